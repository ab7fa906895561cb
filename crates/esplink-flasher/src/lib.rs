//! Flash upload sequencer.
//!
//! Drives the ordered ROM bootloader protocol over the UART transport to
//! write a firmware image to the co-processor's flash:
//!
//! ```text
//! Idle -> Syncing -> Identifying -> Begin -> Writing(0..N) -> Ending -> Idle
//! ```
//!
//! SYNC is retried while the device settles after reset; data blocks are
//! retried per block with a bounded budget; the first unrecoverable failure
//! aborts the remaining parts and reports which part and byte offset was
//! reached. Partial writes are not rolled back by this layer.
//!
//! # Example
//!
//! ```rust,ignore
//! use esplink_flasher::{FirmwareImage, FirmwarePart, FlashSession};
//!
//! let image = FirmwareImage::new(vec![FirmwarePart { address: 0, data }]);
//! let mut session = FlashSession::new(transport, reset_control);
//! session.start()?;
//! let summary = session.flash_image(&image)?;
//! session.finish()?;
//! ```

mod error;
mod image;
mod session;

pub use error::*;
pub use image::*;
pub use session::*;
