//! Frame struct with typed accessors and the encode path.
//!
//! Represents one RFC 6455 wire unit: FIN/RSV/opcode byte, mask bit,
//! three-tier payload length, optional 4-byte mask key, payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use sockwire::protocol::{encode_frame, Frame, Opcode};
//!
//! let frame = Frame::text("hi");
//! assert_eq!(frame.opcode, Opcode::Text);
//! assert!(frame.fin);
//!
//! let bytes = encode_frame(&frame);
//! assert_eq!(bytes, [0x81, 0x02, b'h', b'i']);
//! ```

use bytes::Bytes;

use crate::error::{Result, SockwireError};

/// Bit layout of the first two header bytes.
pub mod bits {
    /// Byte 0, bit 7: final fragment of a message.
    pub const FIN: u8 = 0b1000_0000;
    /// Byte 0, bits 4-6: reserved, must be zero (no extensions negotiated).
    pub const RSV: u8 = 0b0111_0000;
    /// Byte 0, bits 0-3: opcode.
    pub const OPCODE: u8 = 0b0000_1111;
    /// Byte 1, bit 7: payload is masked, 4-byte key follows the length.
    pub const MASK: u8 = 0b1000_0000;
    /// Byte 1, bits 0-6: length code (literal, 126 = u16 follows, 127 = u64 follows).
    pub const LEN: u8 = 0b0111_1111;
}

/// Length code meaning "read the next 2 bytes big-endian as the length".
pub(crate) const LEN_U16: u8 = 126;
/// Length code meaning "read the next 8 bytes big-endian as the length".
pub(crate) const LEN_U64: u8 = 127;
/// Control frames must fit in a 7-bit length.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Which side of the upgrade this endpoint is.
///
/// Drives masking: a client masks every outbound frame and rejects masked
/// inbound; a server never masks outbound and rejects unmasked inbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// Whether this side masks the frames it sends.
    #[inline]
    pub fn masks_outbound(self) -> bool {
        matches!(self, Role::Client)
    }
}

/// Frame opcode (low nibble of byte 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// Decode the low nibble; errors on the reserved values.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(SockwireError::Protocol(format!(
                "unknown opcode {other:#x}"
            ))),
        }
    }

    /// Close, Ping and Pong are control frames.
    #[inline]
    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }

    /// Text and Binary start a message; Continuation extends one.
    #[inline]
    pub fn is_data(self) -> bool {
        matches!(self, Opcode::Text | Opcode::Binary)
    }
}

/// Close status code carried in the first two payload bytes of a Close frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000 - normal closure.
    Normal,
    /// 1001 - endpoint going away.
    GoingAway,
    /// 1002 - protocol error.
    ProtocolError,
    /// 1003 - unacceptable data type.
    UnsupportedData,
    /// 1007 - payload not consistent with message type (e.g. bad UTF-8).
    InvalidPayload,
    /// 1008 - policy violation.
    PolicyViolation,
    /// 1009 - message too big.
    TooLarge,
    /// 1011 - unexpected server condition.
    InternalError,
    /// Any other registered or private code.
    Other(u16),
}

impl CloseCode {
    /// Wire value.
    pub fn code(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::TooLarge => 1009,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => code,
        }
    }

    /// Map a wire value back to the known set.
    pub fn from_code(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::TooLarge,
            1011 => CloseCode::InternalError,
            other => CloseCode::Other(other),
        }
    }
}

/// One decoded (or to-be-encoded) WebSocket frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Final fragment of its message.
    pub fin: bool,
    /// Frame type.
    pub opcode: Opcode,
    /// Mask key, present iff the frame is masked on the wire. Decoded
    /// payloads are already unmasked; on encode the key is applied to a copy.
    pub mask_key: Option<[u8; 4]>,
    /// Payload bytes (zero-copy via `bytes::Bytes`; unmasked).
    pub payload: Bytes,
}

impl Frame {
    /// Single-fragment text frame.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Text,
            mask_key: None,
            payload: payload.into(),
        }
    }

    /// Single-fragment binary frame.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Binary,
            mask_key: None,
            payload: payload.into(),
        }
    }

    /// Ping control frame; payload must fit in 125 bytes.
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Ping,
            mask_key: None,
            payload: payload.into(),
        }
    }

    /// Pong control frame echoing a ping payload.
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Pong,
            mask_key: None,
            payload: payload.into(),
        }
    }

    /// Close control frame: 2-byte big-endian status code, then the reason.
    pub fn close(code: CloseCode, reason: &str) -> Self {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.code().to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        Self {
            fin: true,
            opcode: Opcode::Close,
            mask_key: None,
            payload: Bytes::from(payload),
        }
    }

    /// One fragment of a multi-frame message (tests and manual framing).
    pub fn fragment(opcode: Opcode, fin: bool, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            opcode,
            mask_key: None,
            payload: payload.into(),
        }
    }

    /// Mark the frame for masked transmission with the given key.
    pub fn with_mask(mut self, key: [u8; 4]) -> Self {
        self.mask_key = Some(key);
        self
    }

    /// Whether the wire form carries a mask.
    #[inline]
    pub fn is_masked(&self) -> bool {
        self.mask_key.is_some()
    }

    /// Payload length in bytes.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Parse a Close frame's payload into status code and reason.
    ///
    /// Returns `Ok(None)` for an empty close payload (peer sent no status).
    /// A 1-byte payload or a non-UTF-8 reason is a protocol error.
    pub fn close_payload(&self) -> Result<Option<(CloseCode, String)>> {
        match self.payload.len() {
            0 => Ok(None),
            1 => Err(SockwireError::Protocol(
                "close payload of one byte".to_string(),
            )),
            _ => {
                let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
                let reason = std::str::from_utf8(&self.payload[2..])
                    .map_err(|_| {
                        SockwireError::Protocol("close reason is not UTF-8".to_string())
                    })?
                    .to_string();
                Ok(Some((CloseCode::from_code(code), reason)))
            }
        }
    }
}

/// XOR the payload with the 4-byte key, in place.
///
/// Masking is its own inverse; decode and encode share this.
#[inline]
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Fresh mask key from the OS random source (client-role outbound frames).
pub fn random_mask_key() -> Result<[u8; 4]> {
    let mut key = [0u8; 4];
    getrandom::fill(&mut key).map_err(std::io::Error::other)?;
    Ok(key)
}

/// Encode the frame head: byte 0, byte 1, extended length, mask key.
///
/// Returned separately from the payload so the writer can use vectored I/O;
/// see [`encode_frame_parts`].
fn encode_head(frame: &Frame) -> Vec<u8> {
    let mut head = Vec::with_capacity(14);

    let mut byte0 = frame.opcode as u8;
    if frame.fin {
        byte0 |= bits::FIN;
    }
    head.push(byte0);

    let mask_bit = if frame.is_masked() { bits::MASK } else { 0 };
    let len = frame.payload.len();
    if len <= 125 {
        head.push(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        head.push(mask_bit | LEN_U16);
        head.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        head.push(mask_bit | LEN_U64);
        head.extend_from_slice(&(len as u64).to_be_bytes());
    }

    if let Some(key) = frame.mask_key {
        head.extend_from_slice(&key);
    }
    head
}

/// Encode a frame into head and wire-ready payload for scatter/gather I/O.
///
/// Unmasked frames hand back the payload `Bytes` untouched (zero-copy);
/// masked frames XOR a copy so the original stays readable.
pub fn encode_frame_parts(frame: &Frame) -> (Vec<u8>, Bytes) {
    let head = encode_head(frame);
    let payload = match frame.mask_key {
        Some(key) => {
            let mut masked = frame.payload.to_vec();
            apply_mask(&mut masked, key);
            Bytes::from(masked)
        }
        None => frame.payload.clone(),
    };
    (head, payload)
}

/// Encode a complete frame as a single contiguous byte vector.
///
/// # Example
///
/// ```
/// use sockwire::protocol::{encode_frame, CloseCode, Frame};
///
/// let bytes = encode_frame(&Frame::close(CloseCode::Normal, "bye"));
/// assert_eq!(&bytes[2..4], &1000u16.to_be_bytes());
/// assert_eq!(&bytes[4..], b"bye");
/// ```
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let (head, payload) = encode_frame_parts(frame);
    let mut buf = Vec::with_capacity(head.len() + payload.len());
    buf.extend_from_slice(&head);
    buf.extend_from_slice(&payload);
    buf
}
