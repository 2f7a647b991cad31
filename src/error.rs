//! Error types for sockwire.

use thiserror::Error;

/// Main error type for all sockwire operations.
#[derive(Debug, Error)]
pub enum SockwireError {
    /// I/O error on the underlying byte stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (envelope or body).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wire-level violation (bad reserved bits, unknown opcode, wrong
    /// masking for the role, broken fragmentation). Fatal to the connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The HTTP Upgrade exchange failed before any frame was accepted.
    #[error("Handshake rejected: {0}")]
    Handshake(String),

    /// Inbound call named an operation with no binding.
    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    /// A handler body panicked; the payload is the panic message.
    #[error("Handler panicked: {0}")]
    HandlerPanic(String),

    /// The peer answered one of our calls with a failure reply.
    #[error("Remote error: {0}")]
    Remote(String),

    /// The pending call exceeded the session's call timeout.
    #[error("Call timed out")]
    CallTimeout,

    /// The session is not upgraded, or was torn down with calls pending.
    #[error("Connection closed")]
    Disconnected,

    /// Backpressure timeout - outbound frame queue stayed full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// Too many calls awaiting replies on one session.
    #[error("Pending call limit reached: {0}")]
    PendingLimit(usize),

    /// Invalid operation registration (duplicate name, reserved id).
    #[error("Binding error: {0}")]
    Binding(String),
}

/// Result type alias using SockwireError.
pub type Result<T> = std::result::Result<T, SockwireError>;
