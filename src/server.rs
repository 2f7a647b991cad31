//! Server builder and accept loop.
//!
//! The [`ServerBuilder`] provides a fluent API for binding operations
//! and tuning the session. The built [`Server`] upgrades inbound
//! streams and runs one [`Session`] per connection; all sessions share
//! the registry.
//!
//! # Example
//!
//! ```ignore
//! use sockwire::{Server, transport::Listener};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder()
//!         .handle("sum", |args: (i32, i32), _ctx| async move {
//!             Ok(args.0 + args.1)
//!         })
//!         .handle_notify("log", |line: String, _ctx| async move {
//!             tracing::info!(%line, "peer log");
//!             Ok(())
//!         })
//!         .build()?;
//!
//!     let listener = Listener::bind("127.0.0.1:9300").await?;
//!     server.serve(listener).await
//! }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Result, SockwireError};
use crate::handler::{CallContext, Registry};
use crate::handshake;
use crate::protocol::Role;
use crate::session::{self, Session, SessionConfig};
use crate::transport::Listener;

/// Builder for configuring a server.
///
/// Binding errors (duplicate operation names) are deferred and
/// reported by [`ServerBuilder::build`], keeping the chain fluent.
pub struct ServerBuilder {
    registry: Registry,
    config: SessionConfig,
    binding_error: Option<SockwireError>,
}

impl ServerBuilder {
    /// Creates a builder with default configuration.
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            config: SessionConfig::default(),
            binding_error: None,
        }
    }

    fn record(&mut self, result: Result<()>) {
        if self.binding_error.is_none() {
            if let Err(e) = result {
                self.binding_error = Some(e);
            }
        }
    }

    /// Binds an operation that produces a reply value.
    pub fn handle<F, Args, R, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Args, CallContext) -> Fut + Send + Sync + 'static,
        Args: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let result = self.registry.handle(name, handler);
        self.record(result);
        self
    }

    /// Binds a notification-style operation with no reply value.
    pub fn handle_notify<F, Args, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Args, CallContext) -> Fut + Send + Sync + 'static,
        Args: DeserializeOwned + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let result = self.registry.handle_notify(name, handler);
        self.record(result);
        self
    }

    /// Adds a filter that runs before every handler body.
    pub fn before_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&CallContext) -> Result<()> + Send + Sync + 'static,
    {
        self.registry.add_before_filter(filter);
        self
    }

    /// Adds a filter that runs after every successful handler body.
    pub fn after_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&CallContext) -> Result<()> + Send + Sync + 'static,
    {
        self.registry.add_after_filter(filter);
        self
    }

    /// Installs the hook invoked on every dispatch failure.
    pub fn exception_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&CallContext, &SockwireError) + Send + Sync + 'static,
    {
        self.registry.set_exception_hook(hook);
        self
    }

    /// Replaces the whole session configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets how long outbound calls may stay pending. Default: 30s
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Sets the period of the call timeout sweep. Default: 1s
    pub fn sweep_interval(mut self, period: Duration) -> Self {
        self.config.sweep_interval = period;
        self
    }

    /// Sets the cap on concurrently pending outbound calls. Default: 1024
    pub fn max_pending_calls(mut self, limit: usize) -> Self {
        self.config.max_pending_calls = limit;
        self
    }

    /// Sets the cap on concurrently running handlers. Default: 256
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.config.max_concurrent_handlers = limit;
        self
    }

    /// Sets the largest accepted frame payload. Default: 16 MiB
    pub fn max_payload_size(mut self, limit: usize) -> Self {
        self.config.max_payload_size = limit;
        self
    }

    /// Sets the maximum pending outbound frames. Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.config.writer.max_pending_frames = limit;
        self
    }

    /// Sets the backpressure timeout. Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.config.writer.backpressure_timeout = timeout;
        self
    }

    /// Finishes the builder.
    ///
    /// Returns the first deferred binding error, if any.
    pub fn build(self) -> Result<Server> {
        if let Some(e) = self.binding_error {
            return Err(e);
        }
        tracing::debug!(operations = self.registry.len(), "server built");
        Ok(Server {
            registry: Arc::new(self.registry),
            config: self.config,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Accepts connections and runs a session per peer.
#[derive(Clone)]
pub struct Server {
    registry: Arc<Registry>,
    config: SessionConfig,
}

impl Server {
    /// Creates a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Upgrades one already-connected stream into a session.
    ///
    /// Performs the server side of the opening handshake, then starts
    /// the session runtime. Bytes the peer pipelined behind its
    /// handshake are fed to the frame decoder first.
    pub async fn accept<S>(&self, mut stream: S) -> Result<Session>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (request, leftover) = handshake::server_upgrade(&mut stream).await?;
        tracing::debug!(path = %request.path, "session upgraded");
        Ok(session::spawn(
            stream,
            Role::Server,
            self.registry.clone(),
            self.config.clone(),
            leftover,
        ))
    }

    /// Accept loop: upgrades every connection and detaches its session.
    ///
    /// Runs until the listener fails. Handshake failures are logged and
    /// do not stop the loop.
    pub async fn serve(&self, listener: Listener) -> Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                match server.accept(stream).await {
                    Ok(session) => {
                        let _ = session.closed().await;
                        tracing::debug!(%addr, "session ended");
                    }
                    Err(e) => tracing::warn!(%addr, error = %e, "handshake failed"),
                }
            });
        }
    }
}
