//! Error types for load-driving sessions.
//!
//! Every failure a session can hit falls into one of two classes: it either
//! happened while establishing the connection (handshake failures, which fail
//! the iteration's status check) or after the connection was open (transport
//! errors, which are logged and otherwise ignored).

use thiserror::Error;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The connection never reached the open state.
    Handshake,
    /// The connection was open when the error occurred.
    Transport,
}

/// Errors that can occur while driving a session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The HTTP Upgrade exchange could not be completed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The server answered the upgrade with something other than 101.
    #[error("Unexpected handshake status: {status} (expected 101)")]
    UnexpectedStatus {
        /// Raw HTTP status code from the response line.
        status: u16,
    },

    /// The handshake did not complete within the configured timeout.
    #[error("Handshake timed out")]
    HandshakeTimeout,

    /// Handshake response headers exceeded the configured maximum.
    #[error("Handshake response too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes received so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Post-open socket failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed frame received from the server.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// More bytes are needed before the frame can be decoded.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Opcode value outside the RFC 6455 table.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// Reserved opcode used without negotiation.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Control frame payload over the 125-byte limit.
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Servers must not mask frames they send.
    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    /// The peer closed the connection.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<u16>),

    /// The subscribe payload could not be serialized.
    #[error("Payload encoding failed: {0}")]
    Payload(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Classify this error into one of the two session failure classes.
    ///
    /// Handshake-class errors fail the `status is 101` check; transport-class
    /// errors are observational only.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Handshake(_)
            | Error::UnexpectedStatus { .. }
            | Error::HandshakeTimeout
            | Error::HandshakeTooLarge { .. } => ErrorClass::Handshake,
            _ => ErrorClass::Transport,
        }
    }

    /// Check whether this error occurred while establishing the connection.
    #[must_use]
    pub fn is_handshake_failure(&self) -> bool {
        matches!(self.class(), ErrorClass::Handshake)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Payload(err.to_string())
    }
}
