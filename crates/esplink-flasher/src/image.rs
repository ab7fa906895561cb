//! Firmware image table.

use thiserror::Error;

/// One region of a firmware image: a destination flash address and the
/// bytes to write there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwarePart {
    /// Destination offset in the co-processor's flash.
    pub address: u32,
    /// Raw image bytes.
    pub data: Vec<u8>,
}

impl FirmwarePart {
    /// Part size in bytes.
    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }
}

/// An ordered list of parts (bootloader, application, configuration blobs)
/// written in sequence. Immutable once a flashing pass starts.
#[derive(Debug, Clone, Default)]
pub struct FirmwareImage {
    parts: Vec<FirmwarePart>,
}

/// Problems with an image table, caught before any byte hits the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    /// A part has no data.
    #[error("part {0} is empty")]
    EmptyPart(usize),

    /// A part extends past the 32-bit flash address space.
    #[error("part {0} overflows the flash address space")]
    AddressOverflow(usize),

    /// Parts must be listed in ascending, non-overlapping address order.
    #[error("part {0} overlaps or precedes the part before it")]
    Overlap(usize),
}

impl FirmwareImage {
    /// Build an image from its parts.
    pub fn new(parts: Vec<FirmwarePart>) -> Self {
        Self { parts }
    }

    /// The parts, in write order.
    pub fn parts(&self) -> &[FirmwarePart] {
        &self.parts
    }

    /// Total payload bytes across all parts.
    pub fn total_bytes(&self) -> u64 {
        self.parts.iter().map(|p| p.data.len() as u64).sum()
    }

    /// Check ordering and bounds ahead of a flashing pass.
    pub fn validate(&self) -> Result<(), ImageError> {
        let mut watermark: u64 = 0;
        for (index, part) in self.parts.iter().enumerate() {
            if part.data.is_empty() {
                return Err(ImageError::EmptyPart(index));
            }
            let end = u64::from(part.address) + part.data.len() as u64;
            if end > u64::from(u32::MAX) + 1 {
                return Err(ImageError::AddressOverflow(index));
            }
            if index > 0 && u64::from(part.address) < watermark {
                return Err(ImageError::Overlap(index));
            }
            watermark = end;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(address: u32, len: usize) -> FirmwarePart {
        FirmwarePart {
            address,
            data: vec![0xAB; len],
        }
    }

    #[test]
    fn test_validate_ok() {
        let image = FirmwareImage::new(vec![part(0, 0x1000), part(0x1000, 0x200)]);
        assert!(image.validate().is_ok());
        assert_eq!(image.total_bytes(), 0x1200);
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let image = FirmwareImage::new(vec![part(0, 0x1000), part(0x800, 0x200)]);
        assert_eq!(image.validate(), Err(ImageError::Overlap(1)));
    }

    #[test]
    fn test_validate_rejects_empty_part() {
        let image = FirmwareImage::new(vec![part(0, 0)]);
        assert_eq!(image.validate(), Err(ImageError::EmptyPart(0)));
    }

    #[test]
    fn test_validate_rejects_overflow() {
        let image = FirmwareImage::new(vec![part(u32::MAX - 10, 64)]);
        assert_eq!(image.validate(), Err(ImageError::AddressOverflow(0)));
    }
}
