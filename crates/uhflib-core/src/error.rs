//! Error types for uhflib.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Argument validation, transport
//! failures, reader error codes, and timeouts are all captured here.

use crate::types::ResponseCode;

/// The error type for all uhflib operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port open, control line, write).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (malformed frame, unexpected response shape).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for a response from the reader module.
    ///
    /// This typically indicates the module is not powered (enable line
    /// deasserted), the baud rate is wrong, or the command was not
    /// understood.
    #[error("timeout waiting for response")]
    Timeout,

    /// An invalid argument was passed to a reader command.
    ///
    /// Raised before any I/O takes place.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The serial link is not in the connected state.
    #[error("not connected")]
    NotConnected,

    /// The connection dropped while a request was outstanding.
    #[error("connection lost")]
    ConnectionLost,

    /// Another command is already waiting for its response.
    #[error("another command is already in flight")]
    Busy,

    /// The reader answered with a non-success response code.
    #[error("reader error: {0}")]
    Reader(ResponseCode),

    /// The settings store could not be read or parsed.
    #[error("settings error: {0}")]
    Settings(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The reader response code carried by this error, if any.
    pub fn response_code(&self) -> Option<ResponseCode> {
        match self {
            Error::Reader(code) => Some(*code),
            _ => None,
        }
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
