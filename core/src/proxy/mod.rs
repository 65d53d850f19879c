//! Proxy module - upload relay to the document-processing backend

pub mod config;
pub mod routes;
pub mod upload;
pub mod relay;
pub mod server;
pub mod handlers;
pub mod upstream;

pub use config::RelayPolicy;
pub use routes::{Endpoint, ProcessingMode, RouteTable};
pub use server::{build_router, AppState, RelayServer};
pub use upstream::client::UpstreamClient;
