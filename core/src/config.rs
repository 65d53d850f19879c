use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::RelayError;
use crate::proxy::config::RelayPolicy;
use crate::quota::QuotaConfig;

/// Environment variables naming the upstream base URL, checked in order
pub const BACKEND_URL_VARS: [&str; 3] = ["DOCSAFE_BACKEND", "DOCSAFE_API_URL", "NEXT_PUBLIC_BACKEND_URL"];
pub const API_KEY_VAR: &str = "DOCSAFE_API_KEY";

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub relay: RelayPolicy,

    #[serde(default)]
    pub quota: QuotaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default)]
    pub allow_lan_access: bool,

    /// Largest accepted upload, in megabytes
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allow_lan_access: false,
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

impl ServerConfig {
    pub fn bind_host(&self) -> &str {
        if self.allow_lan_access {
            "0.0.0.0"
        } else {
            &self.host
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,

    /// Seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Seconds, covers the whole upstream exchange
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            api_key_header: default_api_key_header(),
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Upstream base URL and credentials resolved for one request
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamTarget {
    pub base_url: String,
    pub api_key: Option<(String, String)>,
}

impl UpstreamConfig {
    pub fn target(&self) -> Result<UpstreamTarget, RelayError> {
        let base_url = self
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                RelayError::Misconfigured(format!(
                    "Upstream URL not configured (set {} or upstream.base_url)",
                    BACKEND_URL_VARS[0]
                ))
            })?;

        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .map(|k| (self.api_key_header.clone(), k.to_string()));

        Ok(UpstreamTarget {
            base_url: base_url.to_string(),
            api_key,
        })
    }
}

impl Config {
    /// Apply environment overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = BACKEND_URL_VARS
            .iter()
            .filter_map(|&var| lookup(var))
            .find(|v| !v.trim().is_empty());
        if let Some(url) = url {
            self.upstream.base_url = Some(url);
        }

        if let Some(key) = lookup(API_KEY_VAR).filter(|k| !k.is_empty()) {
            self.upstream.api_key = Some(key);
        }
    }
}

// Default value functions
fn default_port() -> u16 { 8045 }
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_max_upload_mb() -> usize { 100 }
fn default_api_key_header() -> String { "x-api-key".to_string() }
fn default_connect_timeout() -> u64 { 20 }
fn default_request_timeout() -> u64 { 300 }

/// Get default config file path
/// Uses ~/.config/docsafe-relay/config.toml
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("docsafe-relay")
        .join("config.toml")
}

/// Effective configuration plus the file it was read from (`None` for built-in defaults)
pub struct LoadedConfig {
    pub config: Config,
    pub source: Option<PathBuf>,
}

/// Load config from file, or fall back to defaults, then apply environment overrides.
///
/// Loading order:
/// 1. Specified path (must exist)
/// 2. ./config.toml (parse errors are logged and skipped)
/// 3. default_config_path() (usually ~/.config/docsafe-relay/config.toml)
pub fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    Ok(load_config_with_source(path)?.config)
}

pub fn load_config_with_source(path: Option<PathBuf>) -> anyhow::Result<LoadedConfig> {
    let (mut config, source) = match path {
        Some(path) if path.exists() => (read_config_file(&path)?, Some(path)),
        Some(path) => anyhow::bail!("Specified config file not found: {:?}", path),
        None => discover_config()?,
    };
    config.apply_env();
    Ok(LoadedConfig { config, source })
}

fn discover_config() -> anyhow::Result<(Config, Option<PathBuf>)> {
    let local = PathBuf::from("config.toml");
    if local.exists() {
        match read_config_file(&local) {
            Ok(config) => return Ok((config, Some(local))),
            Err(e) => tracing::error!("{:#}. Falling back to default path.", e),
        }
    }

    let default_path = default_config_path();
    if default_path.exists() {
        return Ok((read_config_file(&default_path)?, Some(default_path)));
    }

    tracing::info!("No config file found, using defaults");
    Ok((Config::default(), None))
}

fn read_config_file(path: &Path) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {:?}", path))?;
    let config = toml::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))?;
    tracing::info!("Loaded config from {:?}", path);
    Ok(config)
}
