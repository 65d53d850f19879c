//! Relay Server - Axum HTTP server

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{Config, UpstreamConfig};
use crate::proxy::config::RelayPolicy;
use crate::proxy::handlers::docsafe;
use crate::proxy::upstream::client::UpstreamClient;
use crate::quota::FreeQuota;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<UpstreamClient>,
    pub upstream_config: Arc<UpstreamConfig>,
    pub policy: Arc<RelayPolicy>,
    pub quota: Arc<FreeQuota>,
}

impl AppState {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let upstream = UpstreamClient::new(&config.upstream)?;
        Ok(Self::with_client(config, upstream))
    }

    pub fn with_client(config: &Config, upstream: UpstreamClient) -> Self {
        Self {
            upstream: Arc::new(upstream),
            upstream_config: Arc::new(config.upstream.clone()),
            policy: Arc::new(config.relay.clone()),
            quota: Arc::new(FreeQuota::new(config.quota.clone())),
        }
    }
}

pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/healthz", get(health_check_handler))
        .route("/health", get(health_check_handler))

        // Upload relay
        .route("/api/docsafe", post(docsafe::handle_docsafe))
        .route("/api/process", post(docsafe::handle_process))
        .route("/api/quota", get(docsafe::handle_quota))

        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .with_state(state)
}

/// Relay server instance
pub struct RelayServer {
    host: String,
    port: u16,
    max_upload_bytes: usize,
    state: AppState,
}

impl RelayServer {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            host: config.server.bind_host().to_string(),
            port: config.server.port,
            max_upload_bytes: config.server.max_upload_bytes(),
            state: AppState::new(config)?,
        })
    }

    /// Run the relay server (blocking)
    pub async fn run(self) -> anyhow::Result<()> {
        let app = build_router(self.state, self.max_upload_bytes);

        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        tracing::info!("Relay server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Relay server stopped");
        Ok(())
    }
}

/// Health check handler
async fn health_check_handler() -> Response {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
