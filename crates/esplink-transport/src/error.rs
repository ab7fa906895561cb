//! Transport error types.

use thiserror::Error;

use esplink_protocol::ProtocolError;

use crate::mode::OperatingMode;

/// Errors surfaced by the transport layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The co-processor is not present (or has been marked absent).
    #[error("no device present")]
    NoDevice,

    /// The UART driver rejected a write.
    #[error("uart write failed: {0}")]
    Uart(String),

    /// A command was submitted while the operating mode does not match its
    /// protocol family.
    #[error("{request} request submitted in {mode:?} mode")]
    WrongMode {
        /// Mode at the time of transmission.
        mode: OperatingMode,
        /// Short description of the rejected request.
        request: &'static str,
    },

    /// No terminal response arrived within the caller's timeout.
    #[error("command timed out")]
    Timeout,

    /// The AT engine reported a terminal error line.
    #[error("AT command failed ({} lines)", lines.len())]
    AtCommandFailed {
        /// Response lines received before the terminal error.
        lines: Vec<String>,
    },

    /// The engine thread has shut down.
    #[error("transport shut down")]
    Shutdown,

    /// A wire-format error while a command was awaiting its reply.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
