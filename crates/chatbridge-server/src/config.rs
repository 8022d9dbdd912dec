//! Server listener configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default bind host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default bind port. `0` asks the OS for an ephemeral port, which tests
/// rely on; the CLI supplies a real default.
pub const DEFAULT_PORT: u16 = 0;
/// Default maximum inbound WebSocket message size (16 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Settings for the HTTP/WebSocket listener.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind. `0` selects an ephemeral port.
    #[serde(default)]
    pub port: u16,
    /// Maximum inbound WebSocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Directory of static UI files served as the router fallback.
    #[serde(default)]
    pub ui_dir: Option<PathBuf>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_owned()
}
fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: DEFAULT_PORT,
            max_message_size: default_max_message_size(),
            ui_dir: None,
        }
    }
}

impl ServerConfig {
    /// Bind address string for the TCP listener.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Set the bind port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the static UI directory.
    #[must_use]
    pub fn with_ui_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ui_dir = Some(dir.into());
        self
    }
}
