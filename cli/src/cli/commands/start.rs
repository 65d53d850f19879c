use std::path::PathBuf;

use docsafe_core::config::load_config;
use docsafe_core::proxy::RelayServer;

pub async fn run(
    config_path: Option<PathBuf>,
    port_override: Option<u16>,
    host_override: Option<String>,
) -> anyhow::Result<()> {
    // Load configuration
    let mut config = load_config(config_path)?;

    // Apply overrides if provided
    if let Some(port) = port_override {
        config.server.port = port;
    }
    if let Some(host) = host_override {
        config.server.host = host;
    }

    tracing::info!("Starting DocSafe Relay...");
    tracing::info!("  Port: {}", config.server.port);
    tracing::info!("  Host: {}", config.server.bind_host());
    tracing::info!("  Max upload: {} MB", config.server.max_upload_mb);

    match config.upstream.base_url.as_deref() {
        Some(url) if !url.trim().is_empty() => {
            tracing::info!("  Upstream: {}", url);
            tracing::info!(
                "  Upstream API key: {}",
                if config.upstream.api_key.is_some() { "set" } else { "not set" }
            );
        }
        _ => {
            tracing::warn!("No upstream URL configured. Set DOCSAFE_BACKEND or upstream.base_url.");
            tracing::warn!("The relay will start but every upload will fail with a 500.");
        }
    }

    tracing::info!(
        "  Retry: {} attempt(s), backoff {}ms x attempt, minimum payload {} bytes",
        config.relay.attempts(),
        config.relay.backoff_base_ms,
        config.relay.min_body_bytes
    );
    if config.quota.enabled {
        tracing::info!("  Free quota: {} anonymous upload(s)", config.quota.free_limit);
    } else {
        tracing::info!("  Free quota: disabled");
    }

    let server = RelayServer::new(&config)?;

    tracing::info!("Relay server starting on http://{}:{}", config.server.bind_host(), config.server.port);
    tracing::info!("Press Ctrl+C to stop");

    // Run server (blocks until shutdown)
    server.run().await?;

    Ok(())
}
