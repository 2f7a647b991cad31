//! Message assembly from fragmented frames.
//!
//! A message is one or more data frames sharing a single non-continuation
//! opcode, terminated by a frame with `fin=true`. The assembler accumulates
//! payloads in arrival order; the first frame's opcode fixes the message
//! kind. Control frames never pass through here - the session layer answers
//! them between fragments, which RFC 6455 explicitly permits.
//!
//! # Example
//!
//! ```
//! use sockwire::protocol::{Frame, MessageAssembler, Opcode};
//!
//! let mut assembler = MessageAssembler::new();
//!
//! assert!(assembler
//!     .push(Frame::fragment(Opcode::Text, false, "hel"))
//!     .unwrap()
//!     .is_none());
//! let message = assembler
//!     .push(Frame::fragment(Opcode::Continuation, true, "lo"))
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(&message.payload[..], b"hello");
//! ```

use bytes::{Bytes, BytesMut};

use super::frame::{Frame, Opcode};
use super::frame_codec::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::error::{Result, SockwireError};

/// Message type, fixed by the first frame of the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
}

/// One logical application message, assembled from one or more frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageKind,
    /// Concatenation of all fragment payloads, each individually unmasked.
    pub payload: Bytes,
}

impl Message {
    /// View a text message's payload as a string slice.
    ///
    /// Text messages are UTF-8 checked at assembly, so this only fails on a
    /// hand-built binary message viewed as text.
    pub fn as_text(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload)
            .map_err(|_| SockwireError::Protocol("message payload is not UTF-8".to_string()))
    }
}

/// A fragmented message being accumulated.
#[derive(Debug)]
struct InProgress {
    kind: MessageKind,
    buffer: BytesMut,
}

/// Accumulates data-frame payloads into complete messages.
///
/// One assembler per connection; frames must be fed in arrival order.
#[derive(Debug)]
pub struct MessageAssembler {
    in_progress: Option<InProgress>,
    max_message_size: usize,
}

impl MessageAssembler {
    /// Assembler with the default message size cap.
    pub fn new() -> Self {
        Self::with_max_message(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Assembler with a custom cap on the assembled message size.
    pub fn with_max_message(max_message_size: usize) -> Self {
        Self {
            in_progress: None,
            max_message_size,
        }
    }

    /// Whether a fragmented message is currently being accumulated.
    pub fn is_assembling(&self) -> bool {
        self.in_progress.is_some()
    }

    /// Feed one data frame; returns a message once its final fragment lands.
    ///
    /// # Errors
    ///
    /// - `Continuation` with no message in progress
    /// - a new `Text`/`Binary` frame while another message is in progress
    /// - accumulated size above the cap
    /// - completed text message that is not valid UTF-8
    /// - a control frame (those belong to the session layer, not here)
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>> {
        match frame.opcode {
            Opcode::Text | Opcode::Binary => {
                if self.in_progress.is_some() {
                    return Err(SockwireError::Protocol(
                        "data frame while a fragmented message is in progress".to_string(),
                    ));
                }
                let kind = match frame.opcode {
                    Opcode::Text => MessageKind::Text,
                    _ => MessageKind::Binary,
                };
                self.check_size(frame.payload.len())?;

                if frame.fin {
                    // Single-frame message: hand the payload through untouched.
                    return Self::complete(kind, frame.payload).map(Some);
                }

                let mut buffer = BytesMut::with_capacity(frame.payload.len() * 2);
                buffer.extend_from_slice(&frame.payload);
                self.in_progress = Some(InProgress { kind, buffer });
                Ok(None)
            }

            Opcode::Continuation => {
                let Some(mut current) = self.in_progress.take() else {
                    return Err(SockwireError::Protocol(
                        "continuation frame with no message in progress".to_string(),
                    ));
                };
                self.check_size(current.buffer.len() + frame.payload.len())?;
                current.buffer.extend_from_slice(&frame.payload);

                if frame.fin {
                    Self::complete(current.kind, current.buffer.freeze()).map(Some)
                } else {
                    self.in_progress = Some(current);
                    Ok(None)
                }
            }

            Opcode::Close | Opcode::Ping | Opcode::Pong => Err(SockwireError::Protocol(
                "control frame routed to message assembler".to_string(),
            )),
        }
    }

    fn check_size(&self, total: usize) -> Result<()> {
        if total > self.max_message_size {
            return Err(SockwireError::Protocol(format!(
                "message size {} exceeds maximum {}",
                total, self.max_message_size
            )));
        }
        Ok(())
    }

    fn complete(kind: MessageKind, payload: Bytes) -> Result<Message> {
        if kind == MessageKind::Text && std::str::from_utf8(&payload).is_err() {
            return Err(SockwireError::Protocol(
                "text message is not valid UTF-8".to_string(),
            ));
        }
        Ok(Message { kind, payload })
    }
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::new()
    }
}
