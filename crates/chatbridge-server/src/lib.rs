//! # chatbridge-server
//!
//! The bridge server: an axum application exposing
//!
//! - `GET /ws` — the client WebSocket endpoint; each accepted socket gets a
//!   dedicated relay session against the upstream gateway
//! - `/api/{*path}` — transparent HTTP proxy to the gateway's REST surface
//! - `GET /health` — liveness and connection-count snapshot
//! - `GET /metrics` — Prometheus exposition (when a recorder is installed)
//! - static UI files as the router fallback (when a directory is configured)
//!
//! The relay logic itself lives in [`chatbridge_core::machine`]; this crate
//! supplies the async driver around it: sockets, the reconnect timer, and
//! graceful shutdown.

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod proxy;
pub mod server;
pub mod ws;

pub use config::ServerConfig;
pub use server::BridgeServer;
