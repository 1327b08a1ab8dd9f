//! Error types for the tvbridge engine.

use std::io;

use thiserror::Error;
use tvbridge_protocol::{ErrorCode, ProtocolError};

/// Failure of a single middleware call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MiddlewareError {
    /// The middleware link is closed.
    #[error("Middleware disconnected")]
    Disconnected,

    /// No response arrived within the request timeout.
    #[error("Middleware request timed out")]
    Timeout,

    /// Socket level failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// Frame could not be encoded or decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The middleware answered with an error.
    #[error("Middleware rejected request ({code:?}): {message}")]
    Remote { code: ErrorCode, message: String },

    /// The middleware answered with a message of the wrong type.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl MiddlewareError {
    /// Error for a request the middleware refused with the given code.
    pub fn rejected(code: ErrorCode) -> Self {
        MiddlewareError::Remote {
            code,
            message: String::new(),
        }
    }
}

impl From<io::Error> for MiddlewareError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => MiddlewareError::Timeout,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => MiddlewareError::Disconnected,
            _ => MiddlewareError::Io(e.to_string()),
        }
    }
}

/// Engine level errors.
///
/// Cloneable so that one probe outcome can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The probe exhausted its cycle budget without reaching the middleware.
    #[error("Middleware not reachable after {cycles} probe cycles")]
    ConnectionTimeout { cycles: u32 },

    /// Capability query failed during route resolution.
    #[error("Capability source unavailable: {0}")]
    CapabilitySourceUnavailable(MiddlewareError),

    /// The requested role or kind has no route.
    #[error("No route for {0}")]
    RouteNotFound(String),

    /// Reserved; classification is always deterministic.
    #[error("Ambiguous route classification")]
    AmbiguousClassification,

    /// The caller's own wait expired before the probe finished.
    #[error("Timed out waiting for middleware connection")]
    WaitTimeout,

    /// The gate was reset while the caller was waiting.
    #[error("Connection gate reset")]
    ConnectionReset,

    /// The probe thread could not be started.
    #[error("Failed to start connection probe: {0}")]
    ProbeSpawn(String),

    /// The engine has been deinitialized.
    #[error("Engine not connected")]
    NotConnected,

    /// No channel matches the lookup.
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// The channel store failed.
    #[error("Channel store error: {0}")]
    ChannelStore(String),

    /// A service, scan or audio call failed.
    #[error("Middleware call failed: {0}")]
    Middleware(#[from] MiddlewareError),
}
