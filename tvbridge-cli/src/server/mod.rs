//! Middleware simulator: serves a device profile over the wire protocol.

pub mod listener;
pub mod session;

pub use listener::{Server, ServerConfig};
