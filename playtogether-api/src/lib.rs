//! HTTP and WebSocket surface of the session relay, plus the driver loop
//! that owns the session state behind it.

pub mod http;
pub mod impls;
