//! Anonymous free-tier quota
//! The counter lives in a client-held cookie. The relay reads it, refuses
//! requests past the ceiling and hands back the incremented value on success.

use axum::http::{header, HeaderMap};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_free_limit")]
    pub free_limit: u32,

    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    #[serde(default = "default_cookie_max_age")]
    pub cookie_max_age_secs: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            free_limit: default_free_limit(),
            cookie_name: default_cookie_name(),
            cookie_max_age_secs: default_cookie_max_age(),
        }
    }
}

fn default_enabled() -> bool { true }
fn default_free_limit() -> u32 { 3 }
fn default_cookie_name() -> String { "docsafe_free_used".to_string() }
fn default_cookie_max_age() -> u64 { 60 * 60 * 24 * 2 }

/// Quota snapshot returned by `GET /api/quota`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QuotaStatus {
    pub enabled: bool,
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
}

#[derive(Debug, Clone)]
pub struct FreeQuota {
    config: QuotaConfig,
}

impl FreeQuota {
    pub fn new(config: QuotaConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Read the usage counter from the request cookies.
    /// Missing or garbled values count as zero.
    pub fn usage(&self, headers: &HeaderMap) -> u32 {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.config.cookie_name)
            .and_then(|(_, value)| value.trim().parse::<u32>().ok())
            .unwrap_or(0)
    }

    pub fn check(&self, used: u32) -> Result<(), RelayError> {
        if self.config.enabled && used >= self.config.free_limit {
            return Err(RelayError::QuotaExceeded {
                used,
                limit: self.config.free_limit,
            });
        }
        Ok(())
    }

    pub fn remaining(&self, used: u32) -> u32 {
        self.config.free_limit.saturating_sub(used)
    }

    /// `Set-Cookie` value carrying the given counter
    pub fn cookie_for(&self, used: u32) -> String {
        format!(
            "{}={}; Path=/; Max-Age={}; SameSite=Lax",
            self.config.cookie_name, used, self.config.cookie_max_age_secs
        )
    }

    pub fn status(&self, used: u32) -> QuotaStatus {
        QuotaStatus {
            enabled: self.config.enabled,
            used,
            limit: self.config.free_limit,
            remaining: self.remaining(used),
        }
    }
}
