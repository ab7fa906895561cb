//! SLIP framing and deframing.
//!
//! The bootloader protocol wraps every frame in `0xC0` delimiters and escapes
//! in-frame occurrences of the delimiter and escape bytes:
//!
//! - `0xC0` is sent as `0xDB 0xDC`
//! - `0xDB` is sent as `0xDB 0xDD`
//!
//! The deframer is incremental: the transport feeds it one received byte at a
//! time, so chunk boundaries (including a split between an escape introducer
//! and its successor) are invisible to the framing logic.

use bytes::{BufMut, BytesMut};

use crate::constants::*;
use crate::error::ProtocolError;

/// Encode one frame, including leading and trailing delimiters.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(payload.len() + 2);
    encode_into(payload, &mut out);
    out.to_vec()
}

/// Encode one frame into an existing buffer.
///
/// Used by the transport's transmit path to build a frame directly into the
/// buffer handed to the UART driver.
pub fn encode_into(payload: &[u8], out: &mut BytesMut) {
    out.put_u8(SLIP_END);
    for &byte in payload {
        match byte {
            SLIP_END => {
                out.put_u8(SLIP_ESC);
                out.put_u8(SLIP_ESC_END);
            }
            SLIP_ESC => {
                out.put_u8(SLIP_ESC);
                out.put_u8(SLIP_ESC_ESC);
            }
            _ => out.put_u8(byte),
        }
    }
    out.put_u8(SLIP_END);
}

/// Deframer state. The escape-pending state never survives past the byte
/// that resolves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeframeState {
    /// Waiting for an opening delimiter.
    Idle,
    /// Accumulating payload bytes.
    InFrame,
    /// Saw `0xDB`, waiting for the escape code.
    EscapePending,
}

/// Incremental SLIP deframer accumulating one frame at a time into a bounded
/// buffer.
///
/// Framing errors are recovered locally: a malformed escape drops the frame
/// in progress, resets to idle, and surfaces
/// [`ProtocolError::InvalidEscape`] to the caller; a frame that outgrows the
/// buffer is truncated silently (the excess bytes are dropped but the frame
/// is still delivered on its closing delimiter). Both conditions are counted
/// so callers can observe them.
#[derive(Debug)]
pub struct SlipDeframer {
    buf: Vec<u8>,
    state: DeframeState,
    capacity: usize,
    frame_truncated: bool,
    truncated_frames: u64,
    dropped_frames: u64,
}

impl Default for SlipDeframer {
    fn default() -> Self {
        Self::new(RX_FRAME_CAPACITY)
    }
}

impl SlipDeframer {
    /// Create a deframer with the given frame buffer capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            state: DeframeState::Idle,
            capacity,
            frame_truncated: false,
            truncated_frames: 0,
            dropped_frames: 0,
        }
    }

    /// Feed one received byte.
    ///
    /// Returns the completed frame payload (delimiters and escapes removed)
    /// when this byte closes a frame, a [`ProtocolError::InvalidEscape`]
    /// when this byte malforms an escape sequence, and `None` otherwise.
    pub fn push_byte(&mut self, byte: u8) -> Option<Result<Vec<u8>, ProtocolError>> {
        match self.state {
            DeframeState::Idle => {
                if byte == SLIP_END {
                    self.state = DeframeState::InFrame;
                }
                // Out-of-frame noise is discarded.
                None
            }
            DeframeState::InFrame => match byte {
                SLIP_END => {
                    if self.buf.is_empty() {
                        // Adjacent delimiters carry no frame; treat the byte
                        // as a fresh opening delimiter.
                        return None;
                    }
                    if self.frame_truncated {
                        self.truncated_frames += 1;
                        log::warn!(
                            "SLIP frame truncated to {} bytes (capacity {})",
                            self.buf.len(),
                            self.capacity
                        );
                    }
                    self.frame_truncated = false;
                    self.state = DeframeState::Idle;
                    Some(Ok(std::mem::take(&mut self.buf)))
                }
                SLIP_ESC => {
                    self.state = DeframeState::EscapePending;
                    None
                }
                _ => {
                    self.append(byte);
                    None
                }
            },
            DeframeState::EscapePending => {
                self.state = DeframeState::InFrame;
                match byte {
                    SLIP_ESC_END => {
                        self.append(SLIP_END);
                        None
                    }
                    SLIP_ESC_ESC => {
                        self.append(SLIP_ESC);
                        None
                    }
                    other => {
                        // Malformed escape: drop the frame and re-sync.
                        self.dropped_frames += 1;
                        self.abort();
                        Some(Err(ProtocolError::InvalidEscape(other)))
                    }
                }
            }
        }
    }

    /// Feed a slice of received bytes, invoking `on_frame` for each completed
    /// frame. Malformed input is logged and skipped.
    pub fn push_bytes(&mut self, bytes: &[u8], mut on_frame: impl FnMut(Vec<u8>)) {
        for &byte in bytes {
            match self.push_byte(byte) {
                Some(Ok(frame)) => on_frame(frame),
                Some(Err(err)) => log::warn!("dropping malformed SLIP input: {}", err),
                None => {}
            }
        }
    }

    /// Discard any partial frame and return to idle.
    pub fn reset(&mut self) {
        self.abort();
    }

    /// Number of frames delivered with truncated payloads.
    pub fn truncated_frames(&self) -> u64 {
        self.truncated_frames
    }

    /// Number of frames dropped due to malformed escapes.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    fn append(&mut self, byte: u8) {
        if self.buf.len() < self.capacity {
            self.buf.push(byte);
        } else {
            self.frame_truncated = true;
        }
    }

    fn abort(&mut self) {
        self.buf.clear();
        self.frame_truncated = false;
        self.state = DeframeState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(deframer: &mut SlipDeframer, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        deframer.push_bytes(bytes, |f| frames.push(f));
        frames
    }

    #[test]
    fn test_round_trip_plain() {
        let payload = b"\x01\x02\x03hello".to_vec();
        let mut deframer = SlipDeframer::default();
        let frames = decode_all(&mut deframer, &encode(&payload));
        assert_eq!(frames, vec![payload]);
    }

    #[test]
    fn test_round_trip_with_special_bytes() {
        // Delimiter and escape bytes as data, including back to back.
        let payload = vec![0xC0, 0xDB, 0xDB, 0xC0, 0x00, 0xDC, 0xDD];
        let encoded = encode(&payload);
        // Every special byte costs two on the wire.
        assert_eq!(encoded.len(), 2 + payload.len() + 4);
        let mut deframer = SlipDeframer::default();
        let frames = decode_all(&mut deframer, &encoded);
        assert_eq!(frames, vec![payload]);
    }

    #[test]
    fn test_chunked_delivery_matches_single_chunk() {
        let payload = vec![0x11, 0xC0, 0x22, 0xDB, 0x33];
        let encoded = encode(&payload);

        // Deliver the same bytes at every possible split point, including a
        // split between the escape introducer and its successor.
        for split in 0..=encoded.len() {
            let mut deframer = SlipDeframer::default();
            let mut frames = Vec::new();
            deframer.push_bytes(&encoded[..split], |f| frames.push(f));
            deframer.push_bytes(&encoded[split..], |f| frames.push(f));
            assert_eq!(frames, vec![payload.clone()], "split at {}", split);
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let payload = vec![0xDB, 0xC0];
        let mut deframer = SlipDeframer::default();
        let mut frames = Vec::new();
        for &b in &encode(&payload) {
            if let Some(Ok(f)) = deframer.push_byte(b) {
                frames.push(f);
            }
        }
        assert_eq!(frames, vec![payload]);
    }

    #[test]
    fn test_noise_between_frames_discarded() {
        let payload = vec![0x42];
        let mut wire = vec![0xAA, 0xBB];
        wire.extend(encode(&payload));
        wire.extend([0xCC]);
        let mut deframer = SlipDeframer::default();
        let frames = decode_all(&mut deframer, &wire);
        assert_eq!(frames, vec![payload]);
    }

    #[test]
    fn test_adjacent_delimiters_no_empty_frame() {
        let mut deframer = SlipDeframer::default();
        let frames = decode_all(&mut deframer, &[0xC0, 0xC0, 0xC0, 0x01, 0xC0]);
        assert_eq!(frames, vec![vec![0x01]]);
    }

    #[test]
    fn test_invalid_escape_drops_frame() {
        let mut deframer = SlipDeframer::default();
        // 0xDB 0x99 is not a valid escape; the frame must be dropped.
        let frames = decode_all(&mut deframer, &[0xC0, 0x01, 0xDB, 0x99, 0x02, 0xC0]);
        assert!(frames.is_empty());
        assert_eq!(deframer.dropped_frames(), 1);

        // The deframer recovers for the next frame.
        let frames = decode_all(&mut deframer, &encode(&[0x55]));
        assert_eq!(frames, vec![vec![0x55]]);
    }

    #[test]
    fn test_invalid_escape_surfaces_error() {
        let mut deframer = SlipDeframer::default();
        assert_eq!(deframer.push_byte(0xC0), None);
        assert_eq!(deframer.push_byte(0xDB), None);
        assert_eq!(
            deframer.push_byte(0x99),
            Some(Err(ProtocolError::InvalidEscape(0x99)))
        );
    }

    #[test]
    fn test_overlong_frame_truncated() {
        let mut deframer = SlipDeframer::new(8);
        let payload: Vec<u8> = (0..16).collect();
        let frames = decode_all(&mut deframer, &encode(&payload));
        assert_eq!(frames, vec![payload[..8].to_vec()]);
        assert_eq!(deframer.truncated_frames(), 1);
    }

    #[test]
    fn test_two_frames_back_to_back() {
        let a = vec![0x01, 0x02];
        let b = vec![0xC0, 0x03];
        let mut wire = encode(&a);
        wire.extend(encode(&b));
        let mut deframer = SlipDeframer::default();
        let frames = decode_all(&mut deframer, &wire);
        assert_eq!(frames, vec![a, b]);
    }
}
