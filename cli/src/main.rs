use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Commands};

/// Added on top of RUST_LOG
const LOG_DIRECTIVES: [&str; 3] = ["docsafe_relay=info", "docsafe_core=info", "tower_http=debug"];

fn init_tracing() -> anyhow::Result<()> {
    let filter = LOG_DIRECTIVES
        .iter()
        .try_fold(EnvFilter::from_default_env(), |filter, directive| {
            directive.parse().map(|d| filter.add_directive(d))
        })?;
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Start { port, host } => cli::commands::start::run(cli.config, port, host).await,
        Commands::Status => cli::commands::status::run(cli.config).await,
        Commands::Process(options) => cli::commands::process::run(cli.config, options).await,
    }
}
