//! Protocol error types.

use thiserror::Error;

/// Errors that can occur when encoding or decoding bootloader frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame is too short to carry a response header.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Expected minimum length.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Direction byte is not the response marker.
    #[error("bad direction byte: expected 0x01, got 0x{0:02X}")]
    BadDirection(u8),

    /// Opcode is not one the codec knows about.
    #[error("unknown opcode: 0x{0:02X}")]
    UnknownOpcode(u8),

    /// The ROM reported a non-zero status for a command.
    #[error("command 0x{opcode:02X} failed with status 0x{status:02X}")]
    CommandFailed {
        /// Opcode echoed by the response.
        opcode: u8,
        /// Non-zero status byte.
        status: u8,
    },

    /// A response echoed a different opcode than the request on the wire.
    #[error("unexpected response opcode: expected 0x{expected:02X}, got 0x{actual:02X}")]
    UnexpectedOpcode {
        /// Opcode of the outstanding request.
        expected: u8,
        /// Opcode carried by the response.
        actual: u8,
    },

    /// An escape introducer was followed by a byte that is not a valid
    /// escape code. The frame in progress is dropped.
    #[error("invalid SLIP escape sequence: 0xDB 0x{0:02X}")]
    InvalidEscape(u8),

    /// A response that should carry a register value did not.
    #[error("response carries no register value")]
    MissingValue,

    /// Payload does not fit the 16-bit length field of the request header.
    #[error("payload too large: maximum {max} bytes, got {actual}")]
    PayloadTooLarge {
        /// Maximum encodable payload length.
        max: usize,
        /// Actual payload length.
        actual: usize,
    },
}
