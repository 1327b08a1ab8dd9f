//! TCP client for a middleware speaking the tvbridge protocol.

pub mod connection;
pub mod remote;

pub use connection::{Connection, ConnectionState};
pub use remote::{RemoteLocator, RemoteMiddleware};
