//! The wire-protocol seam.
//!
//! The command correlation layer is protocol-agnostic: both the AT engine's
//! text commands and the bootloader's binary commands flow through the same
//! queue and completion machinery. What differs is the byte-level encoding
//! and the recognition of a terminal reply, captured by [`WireProtocol`]
//! with one implementation per protocol family.

use esplink_protocol::{slip, LoaderCommand, LoaderResponse, ProtocolError, SlipDeframer};

use crate::error::TransportError;
use crate::mode::OperatingMode;

/// Most recent non-terminal AT lines retained while waiting for a terminal
/// reply; unsolicited chatter beyond this is dropped oldest-first.
const MAX_PENDING_LINES: usize = 64;

/// The two protocol families multiplexed over the UART.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolFamily {
    /// Text AT commands (normal firmware).
    AtText,
    /// SLIP-framed binary bootloader commands.
    SlipBinary,
}

impl ProtocolFamily {
    /// The operating mode this family requires on the wire.
    pub fn required_mode(&self) -> OperatingMode {
        match self {
            ProtocolFamily::AtText => OperatingMode::Running,
            ProtocolFamily::SlipBinary => OperatingMode::Flashing,
        }
    }
}

/// A request handed to the dispatch layer.
#[derive(Debug, Clone)]
pub enum Request {
    /// A ROM bootloader command.
    Loader(LoaderCommand),
    /// An AT command line; a trailing CRLF is appended when missing.
    At(Vec<u8>),
    /// Raw bytes, transmitted verbatim in any mode and completed as soon as
    /// they are written (the AT engine's `send` entry point).
    Raw(Vec<u8>),
}

impl Request {
    /// The protocol family of this request; `None` for raw sends, which are
    /// mode-agnostic.
    pub fn family(&self) -> Option<ProtocolFamily> {
        match self {
            Request::Loader(_) => Some(ProtocolFamily::SlipBinary),
            Request::At(_) => Some(ProtocolFamily::AtText),
            Request::Raw(_) => None,
        }
    }

    /// Short name used in errors and logs.
    pub fn describe(&self) -> &'static str {
        match self {
            Request::Loader(_) => "bootloader",
            Request::At(_) => "AT",
            Request::Raw(_) => "raw",
        }
    }
}

/// A terminal event recognized on the receive path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    /// A complete bootloader response frame.
    Loader(LoaderResponse),
    /// A terminal AT reply.
    AtTerminal {
        /// Whether the terminal line was `OK`.
        ok: bool,
        /// Non-terminal lines received since the command was sent.
        lines: Vec<String>,
    },
}

/// Byte-level encoding and terminal-reply recognition for one protocol
/// family.
pub trait WireProtocol: Send {
    /// The family this implementation speaks.
    fn family(&self) -> ProtocolFamily;

    /// Serialize a request into the exact bytes to put on the UART.
    fn encode_request(&self, request: &Request) -> Result<Vec<u8>, TransportError>;

    /// Feed one received byte. Returns a terminal event when this byte
    /// completes one, or a protocol error when the byte stream is
    /// irrecoverably malformed for the frame in progress.
    fn feed_byte(&mut self, byte: u8) -> Option<Result<WireEvent, ProtocolError>>;

    /// Drop any partial receive state (used across mode switches and after
    /// timeouts).
    fn reset(&mut self);
}

// ============================================================================
// SLIP binary (ROM bootloader)
// ============================================================================

/// [`WireProtocol`] for the SLIP-framed bootloader protocol.
#[derive(Debug, Default)]
pub struct SlipBinaryProtocol {
    deframer: SlipDeframer,
}

impl SlipBinaryProtocol {
    /// Create a protocol instance with the given receive frame capacity.
    pub fn new(frame_capacity: usize) -> Self {
        Self {
            deframer: SlipDeframer::new(frame_capacity),
        }
    }
}

impl WireProtocol for SlipBinaryProtocol {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::SlipBinary
    }

    fn encode_request(&self, request: &Request) -> Result<Vec<u8>, TransportError> {
        match request {
            Request::Loader(command) => Ok(slip::encode(&command.encode()?)),
            other => Err(TransportError::WrongMode {
                mode: OperatingMode::Flashing,
                request: other.describe(),
            }),
        }
    }

    fn feed_byte(&mut self, byte: u8) -> Option<Result<WireEvent, ProtocolError>> {
        match self.deframer.push_byte(byte)? {
            Ok(frame) => Some(LoaderResponse::decode(&frame).map(WireEvent::Loader)),
            Err(err) => Some(Err(err)),
        }
    }

    fn reset(&mut self) {
        self.deframer.reset();
    }
}

// ============================================================================
// AT text (normal firmware)
// ============================================================================

/// [`WireProtocol`] for the AT-text boundary.
///
/// Only the framing concern lives here: accumulate lines and recognize the
/// terminal `OK` / `ERROR` / `FAIL` replies the AT engine keys on. The
/// command grammar itself is the AT engine's business.
#[derive(Debug, Default)]
pub struct AtTextProtocol {
    partial: Vec<u8>,
    lines: Vec<String>,
}

impl AtTextProtocol {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    fn finish_line(&mut self) -> Option<Result<WireEvent, ProtocolError>> {
        let raw = std::mem::take(&mut self.partial);
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            return None;
        }
        match line {
            "OK" => Some(Ok(WireEvent::AtTerminal {
                ok: true,
                lines: std::mem::take(&mut self.lines),
            })),
            "ERROR" | "FAIL" | "SEND FAIL" => Some(Ok(WireEvent::AtTerminal {
                ok: false,
                lines: std::mem::take(&mut self.lines),
            })),
            _ => {
                if self.lines.len() == MAX_PENDING_LINES {
                    self.lines.remove(0);
                }
                self.lines.push(line.to_string());
                None
            }
        }
    }
}

impl WireProtocol for AtTextProtocol {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::AtText
    }

    fn encode_request(&self, request: &Request) -> Result<Vec<u8>, TransportError> {
        match request {
            Request::At(bytes) => {
                let mut out = bytes.clone();
                if !out.ends_with(b"\n") {
                    out.extend_from_slice(b"\r\n");
                }
                Ok(out)
            }
            other => Err(TransportError::WrongMode {
                mode: OperatingMode::Running,
                request: other.describe(),
            }),
        }
    }

    fn feed_byte(&mut self, byte: u8) -> Option<Result<WireEvent, ProtocolError>> {
        if byte == b'\n' {
            self.finish_line()
        } else {
            self.partial.push(byte);
            None
        }
    }

    fn reset(&mut self) {
        self.partial.clear();
        self.lines.clear();
    }
}
