//! Error types for the jetbeep library.

use std::sync::Arc;

use thiserror::Error;

use crate::session::SessionState;
use crate::types::PaymentError;

/// The main error type for jetbeep operations.
///
/// Errors are cheap to clone: a single rejection is handed to every
/// continuation registered on a [`Deferred`](crate::Deferred) and to every
/// event subscriber.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error on the transport.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// Malformed or unrecognized line from the device.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// The device answered a command with something other than `ok`.
    #[error("device rejected command: {reason}")]
    InvalidResponse { reason: String },

    /// The operation is not allowed in the current session state.
    #[error("{operation} is not allowed in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// A command was submitted while another one is awaiting its ack.
    #[error("another command is being executed")]
    OperationInProgress,

    /// The tracked device was detached while the operation was outstanding.
    #[error("device lost")]
    DeviceLost,

    /// No transport is open.
    #[error("not connected")]
    NotConnected,

    /// The operation was discarded before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// The device reported a payment failure.
    #[error("payment failed: {0:?}")]
    Payment(PaymentError),

    /// The attached device runs firmware older than supported.
    #[error("firmware {version} is older than the supported minimum {minimum}")]
    FirmwareNotSupported { version: String, minimum: String },

    /// A registry handle does not refer to a live session.
    #[error("unknown session handle {0}")]
    UnknownHandle(u32),

    /// An awaited result did not arrive in time.
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl Error {
    /// Shorthand for a [`Error::Protocol`] error.
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

/// Result type alias for jetbeep operations.
pub type Result<T> = std::result::Result<T, Error>;
