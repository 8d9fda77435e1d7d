use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::SessionId;

/// Top-level engine configuration (loaded from swcr.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sessions: SessionConfig,
    pub requests: RequestConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session table size at startup; the table doubles when full (default: 64)
    pub initial_slots: usize,
    /// Upper bound on live sessions (default and maximum: 2^24 - 1)
    pub max_sessions: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Recreate a session from the request's own key material when its
    /// handle is no longer valid (default: true)
    pub allow_migration: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_slots: 64,
            max_sessions: SessionId::MAX_INDEX,
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            allow_migration: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))
    }
}
