//! Simulated ESP co-processor.
//!
//! Stands in for the real WiFi co-processor on the other end of the UART:
//! host writes are handed to a peer model, and peer output is written into
//! the transport's DMA receive ring followed by a receive notification,
//! the same interrupt-to-thread hand-off the hardware performs.
//!
//! The peer boots into one of two personalities, selected by the boot-select
//! strap pin at reset time, mirroring the real part:
//!
//! - [`RomBootloaderPeer`]: speaks the SLIP-framed bootloader protocol, with
//!   scriptable misbehavior (ignored SYNCs while "settling", failing data
//!   blocks) for exercising retry and abort paths.
//! - [`AtPeer`]: answers text commands with terminal `OK`/`ERROR` lines,
//!   enough to exercise the Running-mode routing path.

mod at;
mod device;
mod rom;

pub use at::*;
pub use device::*;
pub use rom::*;
