//! Incremental frame decoder for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling frames split across reads:
//! - `WaitingForHeader`: Need the 2 fixed header bytes plus whatever the
//!   length code and mask bit say follows (0/2/8 length bytes, 0/4 key bytes)
//! - `WaitingForPayload`: Header parsed, need N more payload bytes
//!
//! The decoder is role-aware: a server-side decoder rejects unmasked frames,
//! a client-side decoder rejects masked ones.
//!
//! # Example
//!
//! ```
//! use sockwire::protocol::{encode_frame, Frame, FrameDecoder, Opcode};
//!
//! let mut decoder = FrameDecoder::client();
//!
//! // Data arrives in chunks from the socket.
//! let wire = encode_frame(&Frame::text("hello"));
//! let frames = decoder.push(&wire).unwrap();
//!
//! assert_eq!(frames.len(), 1);
//! assert_eq!(frames[0].opcode, Opcode::Text);
//! ```

use bytes::BytesMut;

use super::frame::{apply_mask, bits, Frame, Opcode, Role, LEN_U16, LEN_U64, MAX_CONTROL_PAYLOAD};
use crate::error::{Result, SockwireError};

/// Default cap on a single frame's payload (and on an assembled message).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Parsed header fields carried between states.
#[derive(Debug, Clone, Copy)]
struct PendingFrame {
    fin: bool,
    opcode: Opcode,
    mask_key: Option<[u8; 4]>,
    remaining: usize,
}

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for a complete header.
    WaitingForHeader,
    /// Header parsed and consumed, waiting for payload bytes.
    WaitingForPayload(PendingFrame),
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// All data is stored in a single `BytesMut`; payloads are split out and
/// frozen without copying.
pub struct FrameDecoder {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Which masking rule to enforce on inbound frames.
    role: Role,
    /// Maximum allowed payload size per frame.
    max_payload_size: usize,
}

impl FrameDecoder {
    /// Decoder for the server side of a connection (inbound must be masked).
    pub fn server() -> Self {
        Self::with_max_payload(Role::Server, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Decoder for the client side of a connection (inbound must be unmasked).
    pub fn client() -> Self {
        Self::with_max_payload(Role::Client, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Decoder with a custom per-frame payload cap.
    pub fn with_max_payload(role: Role, max_payload_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            role,
            max_payload_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// This is the main API for processing incoming socket data. Partial
    /// frames stay buffered for the next push.
    ///
    /// # Errors
    ///
    /// Any protocol violation (reserved bits, unknown opcode, wrong masking
    /// for the role, oversized or malformed control frames, payload above the
    /// cap) is fatal: the decoder should be discarded with its connection.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Try to extract a single frame from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on protocol violation
    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        match self.state {
            State::WaitingForHeader => {
                if self.buffer.len() < 2 {
                    return Ok(None);
                }

                let byte0 = self.buffer[0];
                let byte1 = self.buffer[1];

                if byte0 & bits::RSV != 0 {
                    return Err(SockwireError::Protocol(
                        "reserved bits set without a negotiated extension".to_string(),
                    ));
                }
                let fin = byte0 & bits::FIN != 0;
                let opcode = Opcode::from_u8(byte0 & bits::OPCODE)?;

                let masked = byte1 & bits::MASK != 0;
                match self.role {
                    Role::Server if !masked => {
                        return Err(SockwireError::Protocol(
                            "unmasked frame received by server".to_string(),
                        ));
                    }
                    Role::Client if masked => {
                        return Err(SockwireError::Protocol(
                            "masked frame received by client".to_string(),
                        ));
                    }
                    _ => {}
                }

                if opcode.is_control() && !fin {
                    return Err(SockwireError::Protocol(
                        "fragmented control frame".to_string(),
                    ));
                }

                // Header size depends on the length code and the mask bit.
                let len_code = byte1 & bits::LEN;
                let len_bytes = match len_code {
                    LEN_U16 => 2,
                    LEN_U64 => 8,
                    _ => 0,
                };
                let header_len = 2 + len_bytes + if masked { 4 } else { 0 };
                if self.buffer.len() < header_len {
                    return Ok(None);
                }

                let payload_len = match len_code {
                    LEN_U16 => u16::from_be_bytes([self.buffer[2], self.buffer[3]]) as usize,
                    LEN_U64 => {
                        let mut raw = [0u8; 8];
                        raw.copy_from_slice(&self.buffer[2..10]);
                        let raw = u64::from_be_bytes(raw);
                        usize::try_from(raw).map_err(|_| {
                            SockwireError::Protocol(format!(
                                "payload size {} exceeds maximum {}",
                                raw, self.max_payload_size
                            ))
                        })?
                    }
                    literal => literal as usize,
                };

                if opcode.is_control() && payload_len > MAX_CONTROL_PAYLOAD {
                    return Err(SockwireError::Protocol(format!(
                        "control frame payload {payload_len} exceeds 125 bytes"
                    )));
                }
                if payload_len > self.max_payload_size {
                    return Err(SockwireError::Protocol(format!(
                        "payload size {} exceeds maximum {}",
                        payload_len, self.max_payload_size
                    )));
                }

                let mask_key = if masked {
                    let at = 2 + len_bytes;
                    Some([
                        self.buffer[at],
                        self.buffer[at + 1],
                        self.buffer[at + 2],
                        self.buffer[at + 3],
                    ])
                } else {
                    None
                };

                // Consume header bytes.
                let _ = self.buffer.split_to(header_len);

                self.state = State::WaitingForPayload(PendingFrame {
                    fin,
                    opcode,
                    mask_key,
                    remaining: payload_len,
                });

                // Try to get the payload immediately.
                self.try_extract_one()
            }

            State::WaitingForPayload(pending) => {
                if self.buffer.len() < pending.remaining {
                    return Ok(None);
                }

                // Extract payload, unmask in place, then freeze (zero-copy).
                let mut payload = self.buffer.split_to(pending.remaining);
                if let Some(key) = pending.mask_key {
                    apply_mask(&mut payload, key);
                }

                self.state = State::WaitingForHeader;

                Ok(Some(Frame {
                    fin: pending.fin,
                    opcode: pending.opcode,
                    mask_key: pending.mask_key,
                    payload: payload.freeze(),
                }))
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload(_) => "WaitingForPayload",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_frame;

    /// Encoded masked frame, as a client would put it on the wire.
    fn masked_bytes(frame: Frame) -> Vec<u8> {
        encode_frame(&frame.with_mask([0x37, 0xFA, 0x21, 0x3D]))
    }

    #[test]
    fn test_single_masked_frame_at_server() {
        let mut decoder = FrameDecoder::server();
        let wire = masked_bytes(Frame::text("hello"));

        let frames = decoder.push(&wire).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].opcode, Opcode::Text);
        assert!(frames[0].fin);
        assert_eq!(&frames[0].payload[..], b"hello");
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_unmasked_frame_at_server_rejected() {
        let mut decoder = FrameDecoder::server();
        let wire = encode_frame(&Frame::text("hi"));

        let err = decoder.push(&wire).unwrap_err();
        assert!(err.to_string().contains("unmasked"));
    }

    #[test]
    fn test_masked_frame_at_client_rejected() {
        let mut decoder = FrameDecoder::client();
        let wire = masked_bytes(Frame::text("hi"));

        let err = decoder.push(&wire).unwrap_err();
        assert!(err.to_string().contains("masked"));
    }

    #[test]
    fn test_unmasked_frame_at_client() {
        let mut decoder = FrameDecoder::client();
        let wire = encode_frame(&Frame::binary(vec![1, 2, 3]));

        let frames = decoder.push(&wire).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].opcode, Opcode::Binary);
        assert_eq!(&frames[0].payload[..], &[1, 2, 3]);
    }

    #[test]
    fn test_reserved_bits_rejected() {
        let mut decoder = FrameDecoder::client();
        // FIN + RSV1 + text opcode, empty payload.
        let err = decoder.push(&[0xC1, 0x00]).unwrap_err();
        assert!(err.to_string().contains("reserved bits"));
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let mut decoder = FrameDecoder::client();
        // FIN + opcode 0x3 (reserved), empty payload.
        let err = decoder.push(&[0x83, 0x00]).unwrap_err();
        assert!(err.to_string().contains("unknown opcode"));
    }

    #[test]
    fn test_fragmented_control_frame_rejected() {
        let mut decoder = FrameDecoder::client();
        // fin=0 + ping.
        let err = decoder.push(&[0x09, 0x00]).unwrap_err();
        assert!(err.to_string().contains("fragmented control"));
    }

    #[test]
    fn test_oversized_control_frame_rejected() {
        let mut decoder = FrameDecoder::client();
        // Ping with a 16-bit length of 126 (one past the control limit).
        let mut wire = vec![0x89, LEN_U16];
        wire.extend_from_slice(&126u16.to_be_bytes());
        wire.extend_from_slice(&[0u8; 126]);

        let err = decoder.push(&wire).unwrap_err();
        assert!(err.to_string().contains("control frame"));
    }

    #[test]
    fn test_u16_extended_length() {
        let mut decoder = FrameDecoder::server();
        let payload = vec![0x42; 300];
        let wire = masked_bytes(Frame::binary(payload.clone()));

        let frames = decoder.push(&wire).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].payload[..], &payload[..]);
    }

    #[test]
    fn test_u64_extended_length() {
        let mut decoder = FrameDecoder::server();
        let payload = vec![0x07; 70_000];
        let wire = masked_bytes(Frame::binary(payload.clone()));

        let frames = decoder.push(&wire).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.len(), 70_000);
        assert_eq!(&frames[0].payload[..], &payload[..]);
    }

    #[test]
    fn test_max_payload_validation() {
        let mut decoder = FrameDecoder::with_max_payload(Role::Client, 100);
        let wire = encode_frame(&Frame::binary(vec![0u8; 1000]));

        let err = decoder.push(&wire).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_empty_payload_masked() {
        let mut decoder = FrameDecoder::server();
        let wire = masked_bytes(Frame::text(""));

        let frames = decoder.push(&wire).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut decoder = FrameDecoder::server();
        let mut wire = masked_bytes(Frame::text("first"));
        wire.extend_from_slice(&masked_bytes(Frame::text("second")));
        wire.extend_from_slice(&masked_bytes(Frame::ping("third")));

        let frames = decoder.push(&wire).unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[0].payload[..], b"first");
        assert_eq!(&frames[1].payload[..], b"second");
        assert_eq!(frames[2].opcode, Opcode::Ping);
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_fragmented_payload_across_pushes() {
        let mut decoder = FrameDecoder::server();
        let wire = masked_bytes(Frame::text("split across reads"));

        let frames = decoder.push(&wire[..10]).unwrap();
        assert!(frames.is_empty());
        assert_eq!(decoder.state_name(), "WaitingForPayload");

        let frames = decoder.push(&wire[10..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].payload[..], b"split across reads");
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_partial_header_waits() {
        let mut decoder = FrameDecoder::server();
        let wire = masked_bytes(Frame::text("abc"));

        // First byte only: not even the fixed header yet.
        assert!(decoder.push(&wire[..1]).unwrap().is_empty());
        assert_eq!(decoder.state_name(), "WaitingForHeader");

        // Fixed header present but the mask key is still missing.
        assert!(decoder.push(&wire[1..4]).unwrap().is_empty());
        assert_eq!(decoder.state_name(), "WaitingForHeader");

        let frames = decoder.push(&wire[4..]).unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut decoder = FrameDecoder::server();
        let wire = masked_bytes(Frame::text("hi"));

        let mut all_frames = Vec::new();
        for byte in &wire {
            all_frames.extend(decoder.push(&[*byte]).unwrap());
        }

        assert_eq!(all_frames.len(), 1);
        assert_eq!(&all_frames[0].payload[..], b"hi");
    }

    #[test]
    fn test_decoded_payload_is_unmasked() {
        let mut decoder = FrameDecoder::server();
        let key = [0x11, 0x22, 0x33, 0x44];
        let wire = encode_frame(&Frame::binary(vec![0xAA, 0xBB, 0xCC]).with_mask(key));

        // On the wire the payload is XORed with the key.
        let head_len = wire.len() - 3;
        assert_eq!(wire[head_len], 0xAA ^ 0x11);

        let frames = decoder.push(&wire).unwrap();
        assert_eq!(&frames[0].payload[..], &[0xAA, 0xBB, 0xCC]);
        assert_eq!(frames[0].mask_key, Some(key));
    }

    #[test]
    fn test_clear_resets_state() {
        let mut decoder = FrameDecoder::server();
        let wire = masked_bytes(Frame::text("pending"));

        decoder.push(&wire[..8]).unwrap();
        assert!(!decoder.is_empty());

        decoder.clear();
        assert!(decoder.is_empty());
        assert_eq!(decoder.state_name(), "WaitingForHeader");
    }

    #[test]
    fn test_mixed_complete_and_partial() {
        let mut decoder = FrameDecoder::server();
        let frame1 = masked_bytes(Frame::text("first"));
        let frame2 = masked_bytes(Frame::text("second"));

        let mut data = frame1.clone();
        data.extend_from_slice(&frame2[..5]);

        let frames = decoder.push(&data).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].payload[..], b"first");

        let frames = decoder.push(&frame2[5..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].payload[..], b"second");
    }
}
