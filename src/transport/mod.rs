//! Transport module - TCP listener and connector.
//!
//! Thin wrappers over tokio's TCP types that apply the socket options
//! the protocol wants (`TCP_NODELAY`) and log connection events.

mod tcp;

pub use tcp::{connect, Listener};
