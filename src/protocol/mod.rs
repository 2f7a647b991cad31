//! Protocol module - RFC 6455 wire format, framing, and message assembly.
//!
//! This module implements the WebSocket data plane:
//! - Frame struct with opcode/close-code tables and the encode path
//! - Incremental role-aware frame decoder for partial reads
//! - Message assembler joining fragments by the `fin` bit

mod frame;
mod frame_codec;
mod message;

pub use frame::{
    apply_mask, bits, encode_frame, encode_frame_parts, random_mask_key, CloseCode, Frame, Opcode,
    Role, MAX_CONTROL_PAYLOAD,
};
pub use frame_codec::{FrameDecoder, DEFAULT_MAX_PAYLOAD_SIZE};
pub use message::{Message, MessageAssembler, MessageKind};
