pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "docsafe-relay")]
#[command(author, version, about = "Upload relay CLI - forward documents to the DocSafe processing backend")]
pub struct Cli {
    /// Path to config file (checked in order: local config.toml, ~/.config/docsafe-relay/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the relay server
    Start {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind (overrides config)
        #[arg(long)]
        host: Option<String>,
    },

    /// Show relay and upstream status
    Status,

    /// Send a document through a running relay and save the result
    Process(commands::process::ProcessOptions),
}
