//! # chatbridge-core
//!
//! Portable building blocks for the gateway bridge:
//!
//! - **Frames**: [`frame::Frame`] — opaque relay payloads, never parsed
//! - **Status**: [`status::StatusNotification`] — synthetic connection-health
//!   frames injected into the client stream
//! - **Config**: [`config::BridgeConfig`] — process-wide immutable settings
//! - **Errors**: [`error::BridgeError`] — upstream failure taxonomy
//! - **Machine**: [`machine::BridgeMachine`] — the per-client relay and
//!   reconnect state machine, pure and synchronous
//!
//! The async execution (sockets, timers, tasks) lives in `chatbridge-server`;
//! this crate contains only the parts that can be tested without I/O.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod frame;
pub mod machine;
pub mod status;
