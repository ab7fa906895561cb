//! Requests understood by the ROM bootloader.

use bytes::{BufMut, BytesMut};

use crate::checksum::checksum;
use crate::constants::*;
use crate::error::ProtocolError;

/// Commands that can be sent to the ROM bootloader.
///
/// [`encode`](LoaderCommand::encode) produces the un-framed request bytes;
/// the transport wraps them with [`crate::slip::encode`] before transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderCommand {
    /// Synchronize with the bootloader after reset. The ROM tolerates
    /// repeated SYNC while it is still settling, so senders retry this
    /// command with a bounded budget.
    Sync,

    /// Read a 32-bit register.
    ReadReg {
        /// Register address.
        addr: u32,
    },

    /// Write a 32-bit register.
    WriteReg {
        /// Register address.
        addr: u32,
        /// Value to write.
        value: u32,
        /// Bit mask applied to the write.
        mask: u32,
        /// Delay after the write, in microseconds.
        delay_us: u32,
    },

    /// Start a flash write session for one region.
    FlashBegin {
        /// Total number of data bytes that will follow for this region.
        total_size: u32,
        /// Destination offset in flash.
        offset: u32,
    },

    /// Write one block of flash data. Blocks shorter than
    /// [`FLASH_BLOCK_SIZE`] are padded by the sender before encoding.
    FlashData {
        /// Zero-based block sequence number within the region.
        sequence: u32,
        /// Block payload.
        block: Vec<u8>,
    },

    /// Finish a flash write session.
    FlashEnd {
        /// Whether the ROM should reboot into the flashed firmware
        /// instead of staying in the loader.
        reboot: bool,
    },
}

impl LoaderCommand {
    /// The wire opcode of this command.
    pub fn opcode(&self) -> u8 {
        match self {
            LoaderCommand::Sync => CMD_SYNC,
            LoaderCommand::ReadReg { .. } => CMD_READ_REG,
            LoaderCommand::WriteReg { .. } => CMD_WRITE_REG,
            LoaderCommand::FlashBegin { .. } => CMD_FLASH_BEGIN,
            LoaderCommand::FlashData { .. } => CMD_FLASH_DATA,
            LoaderCommand::FlashEnd { .. } => CMD_FLASH_END,
        }
    }

    /// Encode the request: header `{0x00, opcode, len u16 LE, checksum u32
    /// LE}` followed by the payload.
    ///
    /// Only FLASH_DATA carries a real checksum (the XOR-fold of its block);
    /// every other command sends zero in the checksum field.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let payload = self.payload();
        if payload.len() > usize::from(u16::MAX) {
            return Err(ProtocolError::PayloadTooLarge {
                max: usize::from(u16::MAX),
                actual: payload.len(),
            });
        }

        let check = match self {
            LoaderCommand::FlashData { block, .. } => checksum(block),
            _ => 0,
        };

        let mut out = BytesMut::with_capacity(REQUEST_HEADER_LEN + payload.len());
        out.put_u8(DIRECTION_REQUEST);
        out.put_u8(self.opcode());
        out.put_u16_le(payload.len() as u16);
        out.put_u32_le(check);
        out.extend_from_slice(&payload);
        Ok(out.to_vec())
    }

    /// Build the command payload.
    ///
    /// Multi-word payloads use 32-bit big-endian fields; FLASH_DATA prefixes
    /// its block with the data length and sequence number.
    fn payload(&self) -> Vec<u8> {
        match self {
            LoaderCommand::Sync => {
                let mut p = Vec::with_capacity(SYNC_MARKER.len() + SYNC_FILL_LEN);
                p.extend_from_slice(&SYNC_MARKER);
                p.extend(std::iter::repeat(SYNC_FILL_BYTE).take(SYNC_FILL_LEN));
                p
            }
            LoaderCommand::ReadReg { addr } => addr.to_be_bytes().to_vec(),
            LoaderCommand::WriteReg {
                addr,
                value,
                mask,
                delay_us,
            } => {
                let mut p = BytesMut::with_capacity(16);
                p.put_u32(*addr);
                p.put_u32(*value);
                p.put_u32(*mask);
                p.put_u32(*delay_us);
                p.to_vec()
            }
            LoaderCommand::FlashBegin { total_size, offset } => {
                let mut p = BytesMut::with_capacity(16);
                p.put_u32(*total_size); // erase size
                p.put_u32(block_count(*total_size));
                p.put_u32(FLASH_BLOCK_SIZE as u32);
                p.put_u32(*offset);
                p.to_vec()
            }
            LoaderCommand::FlashData { sequence, block } => {
                let mut p = BytesMut::with_capacity(8 + block.len());
                p.put_u32(block.len() as u32);
                p.put_u32(*sequence);
                p.extend_from_slice(block);
                p.to_vec()
            }
            LoaderCommand::FlashEnd { reboot } => {
                let flag: u32 = if *reboot { 0 } else { 1 };
                flag.to_be_bytes().to_vec()
            }
        }
    }
}

/// Number of FLASH_DATA blocks needed to carry `total_size` bytes.
pub fn block_count(total_size: u32) -> u32 {
    total_size.div_ceil(FLASH_BLOCK_SIZE as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_encoding() {
        let encoded = LoaderCommand::Sync.encode().unwrap();
        assert_eq!(encoded[0], DIRECTION_REQUEST);
        assert_eq!(encoded[1], CMD_SYNC);
        // 36-byte payload, little-endian length.
        assert_eq!(&encoded[2..4], &[36, 0]);
        // Sync is unauthenticated: checksum field is zero.
        assert_eq!(&encoded[4..8], &[0, 0, 0, 0]);
        assert_eq!(&encoded[8..12], &SYNC_MARKER);
        assert!(encoded[12..].iter().all(|&b| b == SYNC_FILL_BYTE));
        assert_eq!(encoded.len(), REQUEST_HEADER_LEN + 36);
    }

    #[test]
    fn test_sync_golden_bytes() {
        let mut expected = hex::decode("000824000000000007071220").unwrap();
        expected.extend(std::iter::repeat(SYNC_FILL_BYTE).take(SYNC_FILL_LEN));
        assert_eq!(LoaderCommand::Sync.encode().unwrap(), expected);
    }

    #[test]
    fn test_flash_begin_encoding() {
        let cmd = LoaderCommand::FlashBegin {
            total_size: 0x1234,
            offset: 0x0008_0000,
        };
        let encoded = cmd.encode().unwrap();
        assert_eq!(encoded[1], CMD_FLASH_BEGIN);
        let payload = &encoded[REQUEST_HEADER_LEN..];
        assert_eq!(payload.len(), 16);
        // Big-endian fields: erase size, block count, block size, offset.
        assert_eq!(&payload[0..4], &0x1234u32.to_be_bytes());
        assert_eq!(&payload[4..8], &5u32.to_be_bytes()); // ceil(0x1234 / 0x400)
        assert_eq!(&payload[8..12], &0x400u32.to_be_bytes());
        assert_eq!(&payload[12..16], &0x0008_0000u32.to_be_bytes());
    }

    #[test]
    fn test_flash_data_carries_checksum() {
        let block = vec![0x5A; 16];
        let cmd = LoaderCommand::FlashData {
            sequence: 3,
            block: block.clone(),
        };
        let encoded = cmd.encode().unwrap();
        assert_eq!(encoded[1], CMD_FLASH_DATA);
        let check = u32::from_le_bytes(encoded[4..8].try_into().unwrap());
        assert_eq!(check, checksum(&block));
        let payload = &encoded[REQUEST_HEADER_LEN..];
        assert_eq!(&payload[0..4], &16u32.to_be_bytes());
        assert_eq!(&payload[4..8], &3u32.to_be_bytes());
        assert_eq!(&payload[8..], &block[..]);
    }

    #[test]
    fn test_flash_end_flag() {
        let stay = LoaderCommand::FlashEnd { reboot: false }.encode().unwrap();
        assert_eq!(&stay[REQUEST_HEADER_LEN..], &1u32.to_be_bytes());
        let reboot = LoaderCommand::FlashEnd { reboot: true }.encode().unwrap();
        assert_eq!(&reboot[REQUEST_HEADER_LEN..], &0u32.to_be_bytes());
    }

    #[test]
    fn test_read_reg_encoding() {
        let encoded = LoaderCommand::ReadReg { addr: 0x3FF0_005C }.encode().unwrap();
        assert_eq!(encoded[1], CMD_READ_REG);
        assert_eq!(&encoded[REQUEST_HEADER_LEN..], &0x3FF0_005Cu32.to_be_bytes());
    }

    #[test]
    fn test_block_count() {
        assert_eq!(block_count(0), 0);
        assert_eq!(block_count(1), 1);
        assert_eq!(block_count(0x400), 1);
        assert_eq!(block_count(0x401), 2);
        assert_eq!(block_count(4080), 4);
    }
}
