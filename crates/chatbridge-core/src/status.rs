//! Synthetic connection-status frames injected into the client stream.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

/// Message `type` tag that marks an injected status frame, letting the
/// browser separate bridge notifications from relayed gateway traffic.
pub const STATUS_TYPE: &str = "bridge.status";

/// Upstream connection health as observed by the bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamStatus {
    /// The upstream connection is open.
    Connected,
    /// The upstream connection closed.
    Disconnected,
    /// A connect attempt or an open connection failed.
    Error,
}

impl fmt::Display for UpstreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Out-of-band notification describing upstream health.
///
/// Sent only to the client; never forwarded to the upstream connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusNotification {
    /// Always [`STATUS_TYPE`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Observed upstream state.
    pub state: UpstreamStatus,
    /// Human-readable description.
    pub message: String,
    /// Epoch milliseconds when the notification was created.
    pub ts: i64,
}

impl StatusNotification {
    fn new(state: UpstreamStatus, message: impl Into<String>) -> Self {
        Self {
            kind: STATUS_TYPE.to_owned(),
            state,
            message: message.into(),
            ts: Utc::now().timestamp_millis(),
        }
    }

    /// The upstream connection is open and relaying.
    #[must_use]
    pub fn connected() -> Self {
        Self::new(UpstreamStatus::Connected, "upstream gateway connected")
    }

    /// The upstream connection closed; a reconnect is scheduled.
    #[must_use]
    pub fn disconnected() -> Self {
        Self::new(UpstreamStatus::Disconnected, "upstream gateway disconnected")
    }

    /// A connect attempt or open connection failed.
    #[must_use]
    pub fn error(detail: impl Into<String>) -> Self {
        Self::new(UpstreamStatus::Error, detail)
    }

    /// Serialize into a text frame for the client stream.
    ///
    /// `None` means the notification could not be serialized and nothing
    /// should be sent; the failure is logged here.
    #[must_use]
    pub fn to_frame(&self) -> Option<Frame> {
        match serde_json::to_string(self) {
            Ok(json) => Some(Frame::Text(json)),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize status notification");
                None
            }
        }
    }
}
