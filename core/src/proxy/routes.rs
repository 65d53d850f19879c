//! Processing mode to upstream route table

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingMode {
    /// Cleanup plus spelling/grammar correction
    #[default]
    Clean,
    /// Cleanup plus rephrasing for clarity
    CleanRephrase,
}

impl ProcessingMode {
    /// Unknown or missing selectors fall back to plain cleanup
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("rephrase") | Some("v2") | Some("clean-v2") => Self::CleanRephrase,
            _ => Self::Clean,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::CleanRephrase => "clean-rephrase",
        }
    }
}

/// Inbound upload endpoint; the legacy one keeps its own form defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// POST /api/docsafe
    DocSafe,
    /// POST /api/process
    LegacyProcess,
}

impl Endpoint {
    /// `strictPdf` value forwarded when the client leaves it out
    pub fn default_strict_pdf(&self) -> &'static str {
        match self {
            Self::DocSafe => "false",
            Self::LegacyProcess => "true",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocSafe => "docsafe",
            Self::LegacyProcess => "process",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteTable {
    #[serde(default = "default_clean_path")]
    pub clean: String,

    #[serde(default = "default_clean_rephrase_path")]
    pub clean_rephrase: String,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            clean: default_clean_path(),
            clean_rephrase: default_clean_rephrase_path(),
        }
    }
}

impl RouteTable {
    pub fn path_for(&self, mode: ProcessingMode) -> &str {
        match mode {
            ProcessingMode::Clean => &self.clean,
            ProcessingMode::CleanRephrase => &self.clean_rephrase,
        }
    }
}

fn default_clean_path() -> String { "/clean".to_string() }
fn default_clean_rephrase_path() -> String { "/clean-v2".to_string() }
