//! DocSafe Core Library
//! Upload relay, upstream client, free-tier quota and configuration

pub mod config;
pub mod error;
pub mod quota;
pub mod proxy;

pub use error::RelayError;
