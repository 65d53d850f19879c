use std::path::PathBuf;
use std::time::Duration;

use docsafe_core::config::load_config_with_source;
use docsafe_core::proxy::UpstreamClient;

pub async fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let loaded = load_config_with_source(config_path)?;
    let config = loaded.config;

    println!("DocSafe Relay Status");
    println!("====================");
    println!();
    println!("Configuration:");
    match &loaded.source {
        Some(path) => println!("  Config file: {:?}", path),
        None => println!("  Config file: none found, using defaults"),
    }
    println!();
    println!("Server settings:");
    println!("  Host: {}", config.server.bind_host());
    println!("  Port: {}", config.server.port);
    println!("  Max upload: {} MB", config.server.max_upload_mb);
    println!();
    println!("Relay policy:");
    println!("  Attempts: {}", config.relay.attempts());
    println!("  Backoff base: {}ms", config.relay.backoff_base_ms);
    println!("  Minimum payload: {} bytes", config.relay.min_body_bytes);
    println!("  Routes: clean={} rephrase={}", config.relay.routes.clean, config.relay.routes.clean_rephrase);
    println!();
    println!("Free quota:");
    if config.quota.enabled {
        println!("  Limit: {} (cookie {})", config.quota.free_limit, config.quota.cookie_name);
    } else {
        println!("  Disabled");
    }

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    // Check if relay is reachable
    println!();
    let host = if config.server.allow_lan_access { "127.0.0.1" } else { config.server.host.as_str() };
    let url = format!("http://{}:{}/healthz", host, config.server.port);
    match http.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => {
            println!("Relay: RUNNING ✓");
        }
        _ => {
            println!("Relay: NOT RUNNING");
        }
    }

    // Check upstream
    match config.upstream.target() {
        Ok(target) => {
            let health = UpstreamClient::build_url(&target.base_url, &config.relay.warmup_path);
            match http.get(&health).send().await {
                Ok(resp) if resp.status().is_success() => {
                    println!("Upstream: REACHABLE ✓ ({})", target.base_url);
                }
                Ok(resp) => {
                    println!("Upstream: ANSWERED {} ({})", resp.status(), target.base_url);
                }
                Err(e) if e.is_timeout() => {
                    println!("Upstream: TIMED OUT, possibly cold-starting ({})", target.base_url);
                }
                Err(e) => {
                    println!("Upstream: UNREACHABLE ({}): {}", target.base_url, e);
                }
            }
        }
        Err(e) => {
            println!("Upstream: NOT CONFIGURED ({})", e);
        }
    }

    Ok(())
}
