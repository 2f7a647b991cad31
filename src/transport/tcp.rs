//! TCP transport.
//!
//! Frames are small and latency-sensitive, so Nagle's algorithm is
//! disabled on every accepted and dialed socket.
//!
//! # Example
//!
//! ```ignore
//! use sockwire::transport::Listener;
//!
//! let listener = Listener::bind("127.0.0.1:0").await?;
//! let addr = listener.local_addr()?;
//! let (stream, peer) = listener.accept().await?;
//! ```

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use crate::error::Result;

/// TCP listener for inbound connections.
pub struct Listener {
    listener: TcpListener,
}

impl Listener {
    /// Binds to the given address.
    ///
    /// Use port 0 to let the OS pick a free port, then read it back
    /// with [`Listener::local_addr`].
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// The locally bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts one connection with `TCP_NODELAY` set.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        tracing::trace!(%addr, "tcp connection accepted");
        Ok((stream, addr))
    }
}

/// Dials a remote address with `TCP_NODELAY` set.
pub async fn connect(addr: impl ToSocketAddrs) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    if let Ok(peer) = stream.peer_addr() {
        tracing::trace!(%peer, "tcp connection established");
    }
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_bind_accept_connect() {
        let listener = Listener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dial = tokio::spawn(async move { connect(addr).await.unwrap() });

        let (mut accepted, peer) = listener.accept().await.unwrap();
        let mut dialed = dial.await.unwrap();
        assert_eq!(peer.ip(), addr.ip());

        dialed.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        accepted.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_address() {
        // Port 1 on a non-local address cannot be bound without privileges.
        let result = Listener::bind("192.0.2.1:80").await;
        assert!(result.is_err());
    }
}
