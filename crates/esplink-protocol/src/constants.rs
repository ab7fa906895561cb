//! Protocol constants
//!
//! These constants define the SLIP framing bytes, ROM bootloader opcodes,
//! and other fixed values of the ESP bootloader wire protocol.

// ============================================================================
// SLIP framing
// ============================================================================

/// Frame delimiter.
pub const SLIP_END: u8 = 0xC0;
/// Escape introducer.
pub const SLIP_ESC: u8 = 0xDB;
/// Escaped form of the delimiter (`0xDB 0xDC` decodes to `0xC0`).
pub const SLIP_ESC_END: u8 = 0xDC;
/// Escaped form of the escape byte (`0xDB 0xDD` decodes to `0xDB`).
pub const SLIP_ESC_ESC: u8 = 0xDD;

/// Capacity of the receive-side frame buffer. Bytes beyond this are
/// truncated, matching the fixed buffer of the original transport.
pub const RX_FRAME_CAPACITY: usize = 128;

// ============================================================================
// ROM bootloader opcodes
// ============================================================================

/// Begin a flash write session for one region.
pub const CMD_FLASH_BEGIN: u8 = 0x02;
/// Write one block of flash data.
pub const CMD_FLASH_DATA: u8 = 0x03;
/// Finish a flash write session.
pub const CMD_FLASH_END: u8 = 0x04;
/// Begin a RAM download session.
pub const CMD_MEM_BEGIN: u8 = 0x05;
/// Finish a RAM download session.
pub const CMD_MEM_END: u8 = 0x06;
/// Write one block of RAM data.
pub const CMD_MEM_DATA: u8 = 0x07;
/// Synchronize with the bootloader after reset.
pub const CMD_SYNC: u8 = 0x08;
/// Write a 32-bit register.
pub const CMD_WRITE_REG: u8 = 0x09;
/// Read a 32-bit register.
pub const CMD_READ_REG: u8 = 0x0A;

// ============================================================================
// Frame layout
// ============================================================================

/// Direction byte of a host → ROM request.
pub const DIRECTION_REQUEST: u8 = 0x00;
/// Direction byte of a ROM → host response.
pub const DIRECTION_RESPONSE: u8 = 0x01;

/// Request header length: direction, opcode, 16-bit length, 32-bit checksum.
pub const REQUEST_HEADER_LEN: usize = 8;
/// Minimum response frame: direction, opcode, status.
pub const RESPONSE_MIN_LEN: usize = 3;

/// Status returned by the ROM when it cannot parse a request.
pub const STATUS_INVALID_MESSAGE: u8 = 0x05;

// ============================================================================
// Payload values
// ============================================================================

/// Seed of the 32-bit XOR-fold checksum carried by FLASH_DATA requests.
pub const CHECKSUM_SEED: u32 = 0xEF;

/// Fixed transfer unit of FLASH_DATA blocks.
pub const FLASH_BLOCK_SIZE: usize = 0x400;
/// Maximum block size for RAM downloads.
pub const RAM_BLOCK_SIZE: usize = 0x1800;

/// Marker prefix of the SYNC payload; followed by [`SYNC_FILL_LEN`] bytes of
/// [`SYNC_FILL_BYTE`].
pub const SYNC_MARKER: [u8; 4] = [0x07, 0x07, 0x12, 0x20];
/// Fill byte of the SYNC payload.
pub const SYNC_FILL_BYTE: u8 = 0x55;
/// Number of fill bytes in the SYNC payload.
pub const SYNC_FILL_LEN: usize = 32;
