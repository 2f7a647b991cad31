//! Call context passed to every handler and filter.
//!
//! The context is a read-only descriptor of the call being dispatched:
//! which operation was named, its correlation id, and which peer opened
//! the exchange. It is built by the session read loop and handed to the
//! handler as an explicit second argument.
//!
//! Handlers that need to call back into the peer capture a
//! [`SessionHandle`](crate::session::SessionHandle) clone in their
//! closure at registration time; the context itself carries no I/O.
//!
//! # Example
//!
//! ```ignore
//! async fn sum_handler(args: (i32, i32), ctx: CallContext) -> Result<i32> {
//!     tracing::debug!(api = %ctx.api(), id = ctx.correlation_id(), "sum called");
//!     Ok(args.0 + args.1)
//! }
//! ```

use crate::packet::{ApiId, NOTIFICATION_ID};

/// Read-only descriptor of one inbound call.
#[derive(Debug, Clone)]
pub struct CallContext {
    api: ApiId,
    correlation_id: i64,
    from_client: bool,
}

impl CallContext {
    /// Creates a context for an inbound packet.
    pub fn new(api: ApiId, correlation_id: i64, from_client: bool) -> Self {
        Self {
            api,
            correlation_id,
            from_client,
        }
    }

    /// The operation identifier named by the caller.
    pub fn api(&self) -> &ApiId {
        &self.api
    }

    /// Correlation id of the call, `0` for notifications.
    pub fn correlation_id(&self) -> i64 {
        self.correlation_id
    }

    /// Whether the exchange was opened by the client side.
    pub fn from_client(&self) -> bool {
        self.from_client
    }

    /// Whether the caller expects no reply.
    pub fn is_notification(&self) -> bool {
        self.correlation_id == NOTIFICATION_ID
    }
}
