//! Client configuration.

use crate::ClientError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Settings for one dashboard channel.
///
/// Defaults match the values the dashboard ships with; a TOML file may
/// override any subset of them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Explicit endpoint. Takes priority over `host`/`port`/`path`.
    pub url: Option<String>,
    /// Hostname the dashboard page was served from.
    pub host: String,
    pub port: u16,
    pub path: String,
    /// Whether the hosting page itself was loaded over TLS.
    pub secure: bool,
    /// Bearer token appended as `?token=` when present.
    pub token: Option<String>,
    pub initial_delay_ms: u64,
    pub history_interval_secs: u64,
    pub history_capacity: usize,
    pub max_reconnect_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 8080,
            path: "/ws".to_string(),
            secure: false,
            token: None,
            initial_delay_ms: 1000,
            history_interval_secs: 30,
            history_capacity: 100,
            max_reconnect_attempts: 5,
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ClientError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ClientError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn history_interval(&self) -> Duration {
        Duration::from_secs(self.history_interval_secs)
    }
}
