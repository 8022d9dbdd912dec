//! Upstream failure taxonomy.

use thiserror::Error;

/// Errors observed on the upstream side of a bridge session.
///
/// None of these are fatal to the process: the session driver absorbs them
/// into status notifications and the reconnect schedule. A single client's
/// failures never propagate beyond its own session.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A connect attempt failed before the handshake completed.
    #[error("upstream {url} unreachable: {reason}")]
    UpstreamUnreachable {
        /// Connect target.
        url: String,
        /// Underlying failure description.
        reason: String,
    },

    /// A connect attempt exceeded the handshake timeout.
    #[error("upstream {url} handshake timed out after {timeout_ms}ms")]
    HandshakeTimeout {
        /// Connect target.
        url: String,
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// A previously open upstream connection ended, cleanly or not.
    #[error("upstream connection closed")]
    UpstreamClosed,

    /// The inbound client connection closed. Terminal for the session and
    /// never reported — there is no one left to report to.
    #[error("client connection closed")]
    ClientGone,
}
