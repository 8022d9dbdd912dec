//! Bridge configuration — read once at process start, immutable thereafter.
//!
//! Resolution order: compiled defaults, then an optional JSON file, then
//! `CHATBRIDGE_*` environment variables. Invalid environment values are
//! silently ignored (fall back to file/default).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Default upstream gateway host.
pub const DEFAULT_UPSTREAM_HOST: &str = "127.0.0.1";
/// Default upstream gateway port.
pub const DEFAULT_UPSTREAM_PORT: u16 = 18789;
/// Default fixed delay between reconnect attempts, in milliseconds.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;
/// Default upstream handshake timeout, in milliseconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5000;

/// Configuration file loading error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The config file contained invalid JSON.
    #[error("parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Process-wide bridge configuration.
///
/// Constructed once at startup and passed to the session driver by shared
/// reference; nothing mutates it afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Gateway host to connect to.
    #[serde(default = "default_upstream_host")]
    pub upstream_host: String,
    /// Gateway port to connect to.
    #[serde(default = "default_upstream_port")]
    pub upstream_port: u16,
    /// Fixed delay between reconnect attempts, in milliseconds.
    /// Constant by design — no backoff, no jitter, no retry cap.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Upstream handshake timeout, in milliseconds.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

fn default_upstream_host() -> String {
    DEFAULT_UPSTREAM_HOST.to_owned()
}
fn default_upstream_port() -> u16 {
    DEFAULT_UPSTREAM_PORT
}
fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}
fn default_handshake_timeout_ms() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_MS
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            upstream_host: default_upstream_host(),
            upstream_port: default_upstream_port(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

impl BridgeConfig {
    /// WebSocket URL of the upstream gateway.
    #[must_use]
    pub fn upstream_ws_url(&self) -> String {
        format!("ws://{}:{}/", self.upstream_host, self.upstream_port)
    }

    /// HTTP base URL of the upstream gateway (no trailing slash).
    #[must_use]
    pub fn upstream_http_url(&self) -> String {
        format!("http://{}:{}", self.upstream_host, self.upstream_port)
    }

    /// Fixed reconnect delay.
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Upstream handshake timeout.
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Load configuration from an optional JSON file plus env overrides.
    ///
    /// A missing file is not an error — defaults apply. Invalid JSON is.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => {
                debug!(path = %p.display(), "loading bridge config from file");
                let content = std::fs::read_to_string(p)?;
                serde_json::from_str(&content)?
            }
            Some(p) => {
                debug!(path = %p.display(), "config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `CHATBRIDGE_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = read_env_string("CHATBRIDGE_UPSTREAM_HOST") {
            self.upstream_host = v;
        }
        if let Some(v) = read_env_u16("CHATBRIDGE_UPSTREAM_PORT", 1, 65535) {
            self.upstream_port = v;
        }
        if let Some(v) = read_env_u64("CHATBRIDGE_RECONNECT_DELAY_MS", 1, 600_000) {
            self.reconnect_delay_ms = v;
        }
        if let Some(v) = read_env_u64("CHATBRIDGE_HANDSHAKE_TIMEOUT_MS", 1, 600_000) {
            self.handshake_timeout_ms = v;
        }
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    std::env::var(name)
        .ok()?
        .parse::<u16>()
        .ok()
        .filter(|v| (min..=max).contains(v))
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    std::env::var(name)
        .ok()?
        .parse::<u64>()
        .ok()
        .filter(|v| (min..=max).contains(v))
}
