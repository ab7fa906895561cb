//! ESP ROM Bootloader UART Protocol
//!
//! This crate provides the wire-format layer for talking to the ESP
//! co-processor's factory ROM bootloader over a UART link. The bootloader
//! speaks a binary command protocol framed with SLIP delimiters:
//!
//! - **Requests** (host → ROM): `{0x00, opcode, len u16 LE, checksum u32 LE}`
//!   followed by the command payload, wrapped in SLIP `0xC0` delimiters.
//! - **Responses** (ROM → host): `{0x01, opcode, status}` optionally followed
//!   by a 32-bit register value, SLIP-framed the same way.
//!
//! # Example
//!
//! ```rust,ignore
//! use esplink_protocol::{LoaderCommand, LoaderResponse, slip};
//!
//! // Build a SYNC request ready for the wire
//! let frame = slip::encode(&LoaderCommand::Sync.encode());
//!
//! // Parse a deframed response
//! let response = LoaderResponse::decode(&received_frame)?;
//! response.check()?;
//! ```
//!
//! The crate is pure codec: no threads, no I/O. The transport layer feeds the
//! deframer one byte at a time and serializes encoded commands onto the UART.

mod checksum;
mod commands;
mod constants;
mod error;
mod responses;
pub mod slip;

pub use checksum::*;
pub use commands::*;
pub use constants::*;
pub use error::*;
pub use responses::*;
pub use slip::SlipDeframer;
