//! Operation binding and dispatch.
//!
//! Provides:
//! - [`Registry`] - maps operation names and numeric aliases to handlers
//! - [`CallContext`] - read-only descriptor handed to handlers and filters
//!
//! # Example
//!
//! ```ignore
//! use sockwire::handler::{CallContext, Registry};
//!
//! let mut registry = Registry::new();
//!
//! // Bind an operation with a reply value
//! registry.handle("sum", |args: (i32, i32), _ctx: CallContext| async move {
//!     Ok(args.0 + args.1)
//! })?;
//!
//! // Bind a fire-and-forget operation
//! registry.handle_notify("log", |line: String, _ctx| async move {
//!     tracing::info!(%line, "peer log");
//!     Ok(())
//! })?;
//! ```

mod context;
mod registry;

pub use context::CallContext;
pub use registry::{
    BoxFuture, CallFilter, ExceptionHook, Handler, HandlerOutcome, NotifyHandler, Registry,
    TypedHandler,
};
