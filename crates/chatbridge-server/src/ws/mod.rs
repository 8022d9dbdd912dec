//! WebSocket relay: the per-client session driver and the upstream
//! gateway connector it manages.

pub mod session;
pub mod upstream;
