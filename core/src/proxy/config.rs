//! Relay policy: retry, warm-up and response validation knobs

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::proxy::routes::RouteTable;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayPolicy {
    /// Total upstream attempts, first try included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Successful payloads smaller than this are treated as disguised failures
    #[serde(default = "default_min_body_bytes")]
    pub min_body_bytes: usize,

    #[serde(default = "default_warmup_enabled")]
    pub warmup_enabled: bool,

    #[serde(default = "default_warmup_path")]
    pub warmup_path: String,

    #[serde(default = "default_warmup_timeout_secs")]
    pub warmup_timeout_secs: u64,

    #[serde(default)]
    pub routes: RouteTable,

    #[serde(default = "default_accepted_content_types")]
    pub accepted_content_types: Vec<String>,
}

impl Default for RelayPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            min_body_bytes: default_min_body_bytes(),
            warmup_enabled: default_warmup_enabled(),
            warmup_path: default_warmup_path(),
            warmup_timeout_secs: default_warmup_timeout_secs(),
            routes: RouteTable::default(),
            accepted_content_types: default_accepted_content_types(),
        }
    }
}

impl RelayPolicy {
    /// Delay before the attempt following `attempt` (1-based): `base * attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_base_ms.saturating_mul(attempt as u64))
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Compares the media type only, parameters such as charset are ignored
    pub fn accepts(&self, content_type: &str) -> bool {
        let essence = media_type(content_type);
        self.accepted_content_types
            .iter()
            .any(|accepted| media_type(accepted) == essence)
    }
}

pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

fn default_max_attempts() -> u32 { 3 }
fn default_backoff_base_ms() -> u64 { 1500 }
fn default_min_body_bytes() -> usize { 2048 }
fn default_warmup_enabled() -> bool { true }
fn default_warmup_path() -> String { "/health".to_string() }
fn default_warmup_timeout_secs() -> u64 { 10 }

fn default_accepted_content_types() -> Vec<String> {
    [
        "application/zip",
        "application/x-zip-compressed",
        "application/octet-stream",
        "application/pdf",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
