//! Scriptable ROM bootloader model.

use std::collections::{BTreeMap, HashMap};

use esplink_protocol::{
    checksum, slip, LoaderResponse, SlipDeframer, CMD_FLASH_BEGIN, CMD_FLASH_DATA, CMD_FLASH_END,
    CMD_READ_REG, CMD_SYNC, CMD_WRITE_REG, DIRECTION_REQUEST, REQUEST_HEADER_LEN,
    STATUS_INVALID_MESSAGE,
};

/// Status used when a scripted block failure has no explicit status byte.
pub const STATUS_FLASH_WRITE_ERROR: u8 = 0x06;

/// Scripted misbehavior for one FLASH_DATA sequence number.
#[derive(Debug, Clone)]
pub struct DataFailure {
    /// Block sequence number to fail.
    pub sequence: u32,
    /// Status byte returned for the failing block.
    pub status: u8,
    /// How many attempts to fail; `None` fails every attempt.
    pub remaining: Option<u32>,
}

/// Peer behavior knobs used by tests.
#[derive(Debug, Clone, Default)]
pub struct PeerScript {
    /// Number of initial SYNC attempts to ignore (device still settling
    /// after reset).
    pub ignore_syncs: u32,
    /// Scripted FLASH_DATA failure.
    pub fail_data: Option<DataFailure>,
    /// Register file served to READ_REG.
    pub registers: HashMap<u32, u32>,
}

/// One flash region opened by FLASH_BEGIN and not yet committed.
#[derive(Debug)]
struct OpenRegion {
    offset: u32,
    total_size: u32,
    data: Vec<u8>,
}

/// Request frames are dominated by FLASH_DATA: header, block prefix, one
/// 0x400-byte block, worst-case escaping.
const PEER_FRAME_CAPACITY: usize = 4096;

/// The ROM bootloader personality.
///
/// Deframes host SLIP frames, decodes requests, applies the script, and
/// produces SLIP-framed response bytes.
#[derive(Debug)]
pub struct RomBootloaderPeer {
    deframer: SlipDeframer,
    script: PeerScript,
    syncs_seen: u32,
    open_region: Option<OpenRegion>,
    flash: BTreeMap<u32, Vec<u8>>,
    opcodes_seen: Vec<u8>,
}

impl Default for RomBootloaderPeer {
    fn default() -> Self {
        Self {
            deframer: SlipDeframer::new(PEER_FRAME_CAPACITY),
            script: PeerScript::default(),
            syncs_seen: 0,
            open_region: None,
            flash: BTreeMap::new(),
            opcodes_seen: Vec::new(),
        }
    }
}

impl RomBootloaderPeer {
    /// Replace the behavior script.
    pub fn set_script(&mut self, script: PeerScript) {
        self.script = script;
    }

    /// Mutable access to the script (tests tweak individual knobs).
    pub fn script_mut(&mut self) -> &mut PeerScript {
        &mut self.script
    }

    /// Number of SYNC requests received so far.
    pub fn syncs_seen(&self) -> u32 {
        self.syncs_seen
    }

    /// Opcodes of every request received, in arrival order.
    pub fn opcodes_seen(&self) -> &[u8] {
        &self.opcodes_seen
    }

    /// Data committed by FLASH_END for the region at `offset`.
    pub fn flashed_data(&self, offset: u32) -> Option<&[u8]> {
        self.flash.get(&offset).map(Vec::as_slice)
    }

    /// Forget session state (fresh reset). The script and committed flash
    /// contents survive, like the real part's flash array.
    pub fn reset_session(&mut self) {
        self.deframer.reset();
        self.syncs_seen = 0;
        self.open_region = None;
    }

    /// Feed host bytes; returns the wire bytes the peer sends back.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut frames = Vec::new();
        self.deframer.push_bytes(bytes, |frame| frames.push(frame));

        let mut out = Vec::new();
        for frame in frames {
            if let Some(response) = self.handle_frame(&frame) {
                out.extend(slip::encode(&response.encode()));
            }
        }
        out
    }

    /// Decode one request frame; `None` means no reply (ignored SYNC or
    /// unparseable garbage).
    fn handle_frame(&mut self, frame: &[u8]) -> Option<LoaderResponse> {
        if frame.len() < REQUEST_HEADER_LEN || frame[0] != DIRECTION_REQUEST {
            log::warn!("peer: dropping malformed request frame ({} bytes)", frame.len());
            return None;
        }
        let opcode = frame[1];
        let len = usize::from(u16::from_le_bytes([frame[2], frame[3]]));
        let declared_checksum = u32::from_le_bytes(frame[4..8].try_into().unwrap());
        let payload = &frame[REQUEST_HEADER_LEN..];
        if payload.len() != len {
            log::warn!(
                "peer: length field {} does not match payload {} bytes",
                len,
                payload.len()
            );
            return Some(LoaderResponse::failed(opcode, STATUS_INVALID_MESSAGE));
        }
        self.opcodes_seen.push(opcode);

        match opcode {
            CMD_SYNC => {
                self.syncs_seen += 1;
                if self.syncs_seen <= self.script.ignore_syncs {
                    log::debug!("peer: ignoring SYNC attempt {}", self.syncs_seen);
                    return None;
                }
                Some(LoaderResponse::ok(CMD_SYNC))
            }
            CMD_READ_REG => {
                let addr = read_u32_be(payload, 0)?;
                let value = self.script.registers.get(&addr).copied().unwrap_or(0);
                Some(LoaderResponse::ok(CMD_READ_REG).with_value(value))
            }
            CMD_WRITE_REG => Some(LoaderResponse::ok(CMD_WRITE_REG)),
            CMD_FLASH_BEGIN => {
                let total_size = read_u32_be(payload, 0)?;
                let offset = read_u32_be(payload, 12)?;
                self.open_region = Some(OpenRegion {
                    offset,
                    total_size,
                    data: Vec::with_capacity(total_size as usize),
                });
                Some(LoaderResponse::ok(CMD_FLASH_BEGIN))
            }
            CMD_FLASH_DATA => self.handle_flash_data(payload, declared_checksum),
            CMD_FLASH_END => {
                match self.open_region.take() {
                    Some(mut region) => {
                        // The tail block is padded; trim to the declared size.
                        region.data.truncate(region.total_size as usize);
                        self.flash.insert(region.offset, region.data);
                        Some(LoaderResponse::ok(CMD_FLASH_END))
                    }
                    None => Some(LoaderResponse::failed(CMD_FLASH_END, STATUS_INVALID_MESSAGE)),
                }
            }
            other => Some(LoaderResponse::failed(other, STATUS_INVALID_MESSAGE)),
        }
    }

    fn handle_flash_data(&mut self, payload: &[u8], declared_checksum: u32) -> Option<LoaderResponse> {
        let len = read_u32_be(payload, 0)? as usize;
        let sequence = read_u32_be(payload, 4)?;
        let block = &payload[8..];
        if block.len() < len {
            return Some(LoaderResponse::failed(CMD_FLASH_DATA, STATUS_INVALID_MESSAGE));
        }
        if checksum(block) != declared_checksum {
            log::warn!("peer: checksum mismatch on block {}", sequence);
            return Some(LoaderResponse::failed(CMD_FLASH_DATA, STATUS_INVALID_MESSAGE));
        }

        if let Some(failure) = self.script.fail_data.as_mut() {
            if failure.sequence == sequence {
                let fire = match failure.remaining.as_mut() {
                    None => true,
                    Some(0) => false,
                    Some(n) => {
                        *n -= 1;
                        true
                    }
                };
                if fire {
                    log::debug!("peer: scripted failure on block {}", sequence);
                    return Some(LoaderResponse::failed(CMD_FLASH_DATA, failure.status));
                }
            }
        }

        let Some(region) = self.open_region.as_mut() else {
            return Some(LoaderResponse::failed(CMD_FLASH_DATA, STATUS_INVALID_MESSAGE));
        };
        region.data.extend_from_slice(&block[..len]);
        Some(LoaderResponse::ok(CMD_FLASH_DATA))
    }
}

fn read_u32_be(payload: &[u8], at: usize) -> Option<u32> {
    payload
        .get(at..at + 4)
        .map(|b| u32::from_be_bytes(b.try_into().unwrap()))
}
