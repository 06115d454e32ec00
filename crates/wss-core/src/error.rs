//! Error types for wsslib.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport faults, wire-level protocol
//! faults, errors reported by the stimulator itself, and controller misuse
//! are all captured here.

use std::fmt;

use crate::types::command_name;

/// An error reported by the stimulator in an Error (0x05) reply.
///
/// The device names the command it refused (`command`) and a one-byte
/// reason (`code`). The human-readable description is resolved by the
/// protocol layer when the reply is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceError {
    /// Device error code.
    pub code: u8,
    /// Opcode of the command the device refused.
    pub command: u8,
    /// Description of `code`, or `"Unknown error"`.
    pub description: &'static str,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "device error 0x{:02X} ({}) in response to {}",
            self.code,
            self.description,
            command_name(self.command)
        )
    }
}

impl std::error::Error for DeviceError {}

/// The error type for all wsslib operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port open or write failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (malformed reply, unexpected frame).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for a reply from the stimulator.
    ///
    /// This typically indicates the unit is powered off, the radio link
    /// dropped the frame, or the target address is wrong.
    #[error("timeout waiting for response")]
    Timeout,

    /// The request was cancelled before a reply arrived.
    #[error("request cancelled")]
    Cancelled,

    /// A command parameter was outside its wire range.
    ///
    /// Raised by the command builders before anything is sent.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The stimulator answered with an Error reply.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// The operation is not valid in the controller's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// No connection to the stimulator has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the stimulator was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` if retrying the same request could succeed.
    ///
    /// Only timeouts qualify; device and transport errors are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
