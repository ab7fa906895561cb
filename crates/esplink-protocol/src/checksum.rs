//! FLASH_DATA payload checksum.

use crate::constants::CHECKSUM_SEED;

/// Compute the checksum carried by FLASH_DATA requests.
///
/// A 32-bit accumulator is seeded with [`CHECKSUM_SEED`] and XOR-folded over
/// every payload byte. The ROM recomputes the same value over the received
/// block before committing it to flash.
pub fn checksum(data: &[u8]) -> u32 {
    let mut acc = CHECKSUM_SEED;
    for &byte in data {
        acc ^= u32::from(byte);
    }
    acc
}
