//! Client builder and connector.
//!
//! The [`ClientBuilder`] provides a fluent API for binding operations
//! the server may invoke back, then dials out:
//! 1. Establish the TCP connection
//! 2. Perform the opening handshake
//! 3. Start the session runtime
//!
//! # Example
//!
//! ```ignore
//! use sockwire::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Client::builder()
//!         .handle("report", |status: String, _ctx| async move {
//!             Ok(format!("seen: {status}"))
//!         })
//!         .connect("127.0.0.1:9300", "/rpc")
//!         .await?;
//!
//!     let sum: i32 = session.invoke("sum", &(2, 3)).await?;
//!     session.closed().await
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
use crate::transport;

/// Builder for configuring a client.
///
/// Binding errors (duplicate operation names) are deferred and
/// reported when the client is built or connects.
pub struct ClientBuilder {
    registry: Registry,
    config: SessionConfig,
    binding_error: Option<SockwireError>,
}

impl ClientBuilder {
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

    /// Binds an operation the server may invoke on this client.
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

    /// Finishes the builder without connecting.
    ///
    /// Returns the first deferred binding error, if any. The client is
    /// reusable: each `connect` call opens an independent session.
    pub fn build(self) -> Result<Client> {
        if let Some(e) = self.binding_error {
            return Err(e);
        }
        Ok(Client {
            registry: Arc::new(self.registry),
            config: self.config,
        })
    }

    /// Builds and connects in one step.
    pub async fn connect(self, addr: &str, path: &str) -> Result<Session> {
        self.build()?.connect(addr, path).await
    }

    /// Builds and upgrades an already-connected stream in one step.
    pub async fn connect_stream<S>(self, stream: S, host: &str, path: &str) -> Result<Session>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.build()?.connect_stream(stream, host, path).await
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Dials servers and runs a session per connection.
#[derive(Clone)]
pub struct Client {
    registry: Arc<Registry>,
    config: SessionConfig,
}

impl Client {
    /// Creates a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connects over TCP and performs the opening handshake.
    ///
    /// `addr` doubles as the `Host` header value.
    pub async fn connect(&self, addr: &str, path: &str) -> Result<Session> {
        let stream = transport::connect(addr).await?;
        self.connect_stream(stream, addr, path).await
    }

    /// Performs the opening handshake over an already-connected stream.
    ///
    /// Bytes the server sent behind its handshake response are fed to
    /// the frame decoder first.
    pub async fn connect_stream<S>(&self, mut stream: S, host: &str, path: &str) -> Result<Session>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let leftover = handshake::client_upgrade(&mut stream, host, path).await?;
        tracing::debug!(%host, %path, "session upgraded");
        Ok(session::spawn(
            stream,
            Role::Client,
            self.registry.clone(),
            self.config.clone(),
            leftover,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Server;
    use tokio::io::duplex;

    #[test]
    fn test_builder_populates_registry() {
        let client = Client::builder()
            .handle("report", |s: String, _ctx| async move { Ok(s) })
            .build()
            .unwrap();

        assert_eq!(client.registry.alias_of("report"), Some(1));
    }

    #[test]
    fn test_duplicate_binding_surfaces_at_build() {
        let result = Client::builder()
            .handle("report", |_: (), _ctx| async { Ok(1i32) })
            .handle("report", |_: (), _ctx| async { Ok(2i32) })
            .build();

        assert!(matches!(result, Err(SockwireError::Binding(_))));
    }

    #[test]
    fn test_builder_configuration() {
        let client = Client::builder()
            .call_timeout(Duration::from_secs(2))
            .max_concurrent_handlers(4)
            .build()
            .unwrap();

        assert_eq!(client.config.call_timeout, Duration::from_secs(2));
        assert_eq!(client.config.max_concurrent_handlers, 4);
    }

    #[tokio::test]
    async fn test_duplex_sessions_call_both_ways() {
        let server = Server::builder()
            .handle("sum", |args: (i32, i32), _ctx| async move {
                Ok(args.0 + args.1)
            })
            .build()
            .unwrap();

        let (server_io, client_io) = duplex(1 << 16);
        let accept = tokio::spawn(async move { server.accept(server_io).await });

        let client_session = Client::builder()
            .handle("double", |n: i32, _ctx| async move { Ok(n * 2) })
            .connect_stream(client_io, "localhost", "/rpc")
            .await
            .unwrap();
        let server_session = accept.await.unwrap().unwrap();

        let sum: i32 = client_session.invoke("sum", &(4, 6)).await.unwrap();
        assert_eq!(sum, 10);

        let doubled: i32 = server_session.invoke("double", &7).await.unwrap();
        assert_eq!(doubled, 14);
    }
}
