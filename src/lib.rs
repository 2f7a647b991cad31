//! # sockwire
//!
//! WebSocket transport with symmetric RPC for Rust services.
//!
//! Either peer can invoke operations on the other over one connection:
//! calls carry a correlation id and resolve into typed replies, while
//! notifications are fire-and-forget. The wire format is RFC 6455
//! framing with a JSON packet envelope in text messages.
//!
//! ## Layers
//!
//! - **Framing** (`protocol`): frame codec, masking, fragmentation
//! - **Handshake** (`handshake`): HTTP/1.1 upgrade, both sides
//! - **Packets** (`packet`): the `{api, id, state, fromClient, body}` envelope
//! - **Sessions** (`session`): correlation, dispatch, and lifecycle
//!
//! ## Example
//!
//! ```ignore
//! use sockwire::{Client, Server, transport::Listener};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder()
//!         .handle("sum", |args: (i32, i32), _ctx| async move {
//!             Ok(args.0 + args.1)
//!         })
//!         .build()?;
//!     let listener = Listener::bind("127.0.0.1:0").await?;
//!     let addr = listener.local_addr()?;
//!     tokio::spawn(async move { server.serve(listener).await });
//!
//!     let session = Client::builder().connect(&addr.to_string(), "/rpc").await?;
//!     let sum: i32 = session.invoke("sum", &(2, 3)).await?;
//!     assert_eq!(sum, 5);
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod correlation;
pub mod error;
pub mod handler;
pub mod handshake;
pub mod packet;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod writer;

mod client;
mod server;

pub use client::{Client, ClientBuilder};
pub use error::{Result, SockwireError};
pub use handler::{CallContext, Registry};
pub use packet::{ApiId, Packet};
pub use protocol::{CloseCode, Role};
pub use server::{Server, ServerBuilder};
pub use session::{Session, SessionConfig, SessionHandle, SessionState};
