//! Dual-protocol UART transport multiplexer.
//!
//! One physical UART carries two unrelated wire protocols, selected at
//! runtime by an operating mode:
//!
//! - **Running**: the text AT-command network stack of the co-processor's
//!   normal firmware. This crate only implements the boundary (raw sends
//!   and terminal-line detection); the command grammar belongs to the
//!   external AT engine.
//! - **Flashing**: the binary SLIP-framed ROM bootloader protocol used to
//!   re-flash the co-processor.
//!
//! ## Architecture
//!
//! Exactly three execution contexts are involved:
//!
//! 1. The interrupt/DMA side never blocks: it copies bytes into a circular
//!    [`DmaRing`] and pokes a [`RxNotifier`] (a pure wake-up, coalesced when
//!    the engine is behind).
//! 2. A single engine thread drains both the receive-notification queue and
//!    the command queue. It performs every protocol state transition, owns
//!    the UART for writes, and keeps at most one command in flight.
//! 3. Caller threads submit commands through [`TransportHandle`] and block
//!    on a private completion slot (or hand over a callback).
//!
//! Commands are transmitted strictly in submission order and responses are
//! matched to the oldest (only) outstanding command. A timed-out command is
//! released to its caller; a frame arriving for it afterwards is discarded.

mod engine;
mod error;
mod mode;
mod port;
mod ring;
mod wire;

pub use engine::*;
pub use error::*;
pub use mode::*;
pub use port::*;
pub use ring::*;
pub use wire::*;
