//! Responses sent by the ROM bootloader.

use bytes::{BufMut, BytesMut};

use crate::constants::*;
use crate::error::ProtocolError;

/// A decoded bootloader response.
///
/// Layout on the wire (inside the SLIP frame): `{0x01, opcode, status}`,
/// optionally followed by a 32-bit little-endian register value (READ_REG).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderResponse {
    /// Opcode echoed from the request.
    pub opcode: u8,
    /// Status byte; zero means success.
    pub status: u8,
    /// Register value, present on READ_REG responses.
    pub value: Option<u32>,
}

impl LoaderResponse {
    /// A success response for the given opcode.
    pub fn ok(opcode: u8) -> Self {
        Self {
            opcode,
            status: 0,
            value: None,
        }
    }

    /// A failure response for the given opcode.
    pub fn failed(opcode: u8, status: u8) -> Self {
        Self {
            opcode,
            status,
            value: None,
        }
    }

    /// Attach a register value (READ_REG responses).
    pub fn with_value(mut self, value: u32) -> Self {
        self.value = Some(value);
        self
    }

    /// Decode a deframed response.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.len() < RESPONSE_MIN_LEN {
            return Err(ProtocolError::FrameTooShort {
                expected: RESPONSE_MIN_LEN,
                actual: frame.len(),
            });
        }
        if frame[0] != DIRECTION_RESPONSE {
            return Err(ProtocolError::BadDirection(frame[0]));
        }
        let opcode = frame[1];
        if !is_known_opcode(opcode) {
            return Err(ProtocolError::UnknownOpcode(opcode));
        }
        let status = frame[2];
        let value = if frame.len() >= RESPONSE_MIN_LEN + 4 {
            Some(u32::from_le_bytes(frame[3..7].try_into().unwrap()))
        } else {
            None
        };
        Ok(Self {
            opcode,
            status,
            value,
        })
    }

    /// Encode the response (un-framed). Used by test peers.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(RESPONSE_MIN_LEN + 4);
        out.put_u8(DIRECTION_RESPONSE);
        out.put_u8(self.opcode);
        out.put_u8(self.status);
        if let Some(value) = self.value {
            out.put_u32_le(value);
        }
        out.to_vec()
    }

    /// Map a non-zero status to [`ProtocolError::CommandFailed`].
    pub fn check(&self) -> Result<(), ProtocolError> {
        if self.status != 0 {
            return Err(ProtocolError::CommandFailed {
                opcode: self.opcode,
                status: self.status,
            });
        }
        Ok(())
    }
}

fn is_known_opcode(opcode: u8) -> bool {
    matches!(
        opcode,
        CMD_FLASH_BEGIN
            | CMD_FLASH_DATA
            | CMD_FLASH_END
            | CMD_MEM_BEGIN
            | CMD_MEM_END
            | CMD_MEM_DATA
            | CMD_SYNC
            | CMD_WRITE_REG
            | CMD_READ_REG
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ok_response() {
        let resp = LoaderResponse::decode(&[0x01, CMD_SYNC, 0x00]).unwrap();
        assert_eq!(resp.opcode, CMD_SYNC);
        assert_eq!(resp.status, 0);
        assert_eq!(resp.value, None);
        assert!(resp.check().is_ok());
    }

    #[test]
    fn test_decode_read_reg_value() {
        let mut frame = vec![0x01, CMD_READ_REG, 0x00];
        frame.extend(0xDEAD_BEEFu32.to_le_bytes());
        let resp = LoaderResponse::decode(&frame).unwrap();
        assert_eq!(resp.value, Some(0xDEAD_BEEF));
    }

    #[test]
    fn test_decode_rejects_request_direction() {
        let err = LoaderResponse::decode(&[0x00, CMD_SYNC, 0x00]).unwrap_err();
        assert_eq!(err, ProtocolError::BadDirection(0x00));
    }

    #[test]
    fn test_decode_rejects_short_frame() {
        let err = LoaderResponse::decode(&[0x01, CMD_SYNC]).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooShort { actual: 2, .. }));
    }

    #[test]
    fn test_decode_rejects_unknown_opcode() {
        let err = LoaderResponse::decode(&[0x01, 0x7F, 0x00]).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownOpcode(0x7F));
    }

    #[test]
    fn test_non_zero_status_is_failure() {
        let resp = LoaderResponse::failed(CMD_FLASH_DATA, STATUS_INVALID_MESSAGE);
        let err = resp.check().unwrap_err();
        assert_eq!(
            err,
            ProtocolError::CommandFailed {
                opcode: CMD_FLASH_DATA,
                status: STATUS_INVALID_MESSAGE,
            }
        );
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let resp = LoaderResponse::ok(CMD_READ_REG).with_value(42);
        assert_eq!(LoaderResponse::decode(&resp.encode()).unwrap(), resp);
    }
}
