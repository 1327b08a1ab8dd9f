//! Error types for the tvbridge middleware protocol.

use thiserror::Error;

/// Protocol-level errors that can occur during communication.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Invalid magic bytes in frame header.
    #[error("Invalid magic bytes: expected 'TVBR', got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Message type is unknown or unsupported.
    #[error("Unknown message type: 0x{0:04X}")]
    UnknownMessageType(u16),

    /// Frame payload is too large.
    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(u32, u32),

    /// Frame payload is incomplete.
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    IncompleteFrame { expected: usize, actual: usize },

    /// Failed to decode message payload.
    #[error("Failed to decode message: {0}")]
    DecodeError(String),

    /// Failed to encode message payload.
    #[error("Failed to encode message: {0}")]
    EncodeError(String),

    /// Protocol version mismatch.
    #[error("Protocol version mismatch: client={client}, server={server}")]
    VersionMismatch { client: u16, server: u16 },
}

/// Error code carried by `Ack` and `Error` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    /// Operation succeeded.
    Success = 0x0000,
    /// Unknown error occurred.
    Unknown = 0x0001,
    /// A descriptor index was outside the reported count.
    IndexOutOfRange = 0x0002,
    /// The middleware refused to build the requested route.
    RouteUnavailable = 0x0003,
    /// The route handle is not known to the middleware.
    UnknownRoute = 0x0004,
    /// No service exists at the requested index.
    ServiceNotFound = 0x0005,
    /// Channel scan could not be started or aborted.
    ScanFailed = 0x0006,
    /// Invalid session state.
    InvalidState = 0x0007,
    /// Invalid parameter.
    InvalidParameter = 0x0008,
    /// Protocol error.
    ProtocolError = 0x0009,
}

impl From<u16> for ErrorCode {
    fn from(value: u16) -> Self {
        match value {
            0x0000 => ErrorCode::Success,
            0x0002 => ErrorCode::IndexOutOfRange,
            0x0003 => ErrorCode::RouteUnavailable,
            0x0004 => ErrorCode::UnknownRoute,
            0x0005 => ErrorCode::ServiceNotFound,
            0x0006 => ErrorCode::ScanFailed,
            0x0007 => ErrorCode::InvalidState,
            0x0008 => ErrorCode::InvalidParameter,
            0x0009 => ErrorCode::ProtocolError,
            _ => ErrorCode::Unknown,
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(value: ErrorCode) -> Self {
        value as u16
    }
}

impl ErrorCode {
    /// Returns true if this error code indicates success.
    pub fn is_success(self) -> bool {
        self == ErrorCode::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_from_wire() {
        assert_eq!(ErrorCode::from(0x0003), ErrorCode::RouteUnavailable);
        assert_eq!(ErrorCode::from(0x0001), ErrorCode::Unknown);
        assert_eq!(ErrorCode::from(0xBEEF), ErrorCode::Unknown);
        assert!(ErrorCode::from(0).is_success());
        assert_eq!(u16::from(ErrorCode::ScanFailed), 0x0006);
    }
}
