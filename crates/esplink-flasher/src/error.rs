//! Flashing errors.

use thiserror::Error;

use crate::image::ImageError;
use esplink_transport::TransportError;

/// Errors produced while driving a flashing session.
#[derive(Error, Debug)]
pub enum FlashError {
    /// The bootloader never answered SYNC within the retry budget.
    #[error("bootloader sync failed after {attempts} attempts: {source}")]
    SyncFailed {
        /// Attempts made before giving up.
        attempts: u32,
        /// Error from the final attempt.
        source: TransportError,
    },

    /// A part failed partway through; earlier parts and blocks stay written.
    #[error("flashing part {part_index} failed at offset 0x{offset:08X}: {source}")]
    Part {
        /// Index of the part in the image table.
        part_index: usize,
        /// Byte offset within the part reached before the failure.
        offset: u32,
        /// The underlying transport or protocol error.
        source: TransportError,
    },

    /// A transport failure outside the per-block retry scope.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The image table failed validation before any byte was sent.
    #[error(transparent)]
    Image(#[from] ImageError),
}
