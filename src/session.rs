//! Session facade and runtime loop.
//!
//! A [`Session`] owns one upgraded connection and drives it:
//! 1. Read socket bytes into the frame decoder
//! 2. Answer control frames (ping, close) inline
//! 3. Assemble data frames into messages and parse packet envelopes
//! 4. Route replies to the correlation table, calls to the registry
//!
//! Outbound traffic goes through the writer task; inbound handlers run
//! on spawned tasks gated by a concurrency semaphore. Both peers use
//! the same session type, so either side can invoke the other.
//!
//! # Example
//!
//! ```ignore
//! let reply: i32 = session.invoke("sum", &(2, 3)).await?;
//! session.notify("log", &"done").await?;
//! session.close(CloseCode::Normal, "bye").await?;
//! ```

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;

use crate::codec::JsonCodec;
use crate::correlation::{
    CorrelationTable, DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_PENDING_CALLS, DEFAULT_SWEEP_INTERVAL,
};
use crate::error::{Result, SockwireError};
use crate::handler::{CallContext, Registry};
use crate::packet::{ApiId, Packet, NOTIFICATION_ID};
use crate::protocol::{
    random_mask_key, CloseCode, Frame, FrameDecoder, Message, MessageAssembler, Opcode, Role,
    DEFAULT_MAX_PAYLOAD_SIZE,
};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

/// Default maximum concurrently running handlers per session.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Connection lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    /// No transport yet.
    Idle = 0,
    /// Transport established, handshake not finished.
    Connected = 1,
    /// Handshake complete, packets may flow.
    Upgraded = 2,
    /// Close initiated or received, draining.
    Closing = 3,
    /// Fully torn down.
    Closed = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Idle,
            1 => SessionState::Connected,
            2 => SessionState::Upgraded,
            3 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// Tunables for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a call may stay pending before it times out.
    pub call_timeout: Duration,
    /// Period of the background timeout sweep.
    pub sweep_interval: Duration,
    /// Cap on concurrently pending outbound calls.
    pub max_pending_calls: usize,
    /// Cap on concurrently running inbound handlers.
    pub max_concurrent_handlers: usize,
    /// Largest accepted frame payload.
    pub max_payload_size: usize,
    /// Largest accepted assembled message.
    pub max_message_size: usize,
    /// Writer task configuration.
    pub writer: WriterConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            max_pending_calls: DEFAULT_MAX_PENDING_CALLS,
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            max_message_size: DEFAULT_MAX_PAYLOAD_SIZE,
            writer: WriterConfig::default(),
        }
    }
}

/// Shared core of one session.
struct SessionInner {
    role: Role,
    state: AtomicU8,
    next_id: AtomicI64,
    writer: WriterHandle,
    calls: Arc<CorrelationTable>,
    registry: Arc<Registry>,
}

impl SessionInner {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves the state forward; returns whether this call did the move.
    ///
    /// `fetch_max` keeps transitions one-directional even when close,
    /// peer close, and teardown race.
    fn advance(&self, to: SessionState) -> bool {
        self.state.fetch_max(to as u8, Ordering::AcqRel) < to as u8
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state() == SessionState::Upgraded {
            Ok(())
        } else {
            Err(SockwireError::Disconnected)
        }
    }

    /// Masks per role and hands the frame to the writer task.
    async fn send_frame(&self, frame: Frame) -> Result<()> {
        let frame = if self.role.masks_outbound() {
            frame.with_mask(random_mask_key()?)
        } else {
            frame
        };
        self.writer.send(OutboundFrame::new(&frame)).await
    }

    async fn send_packet(&self, packet: &Packet) -> Result<()> {
        let wire = packet.to_wire()?;
        self.send_frame(Frame::text(wire)).await
    }
}

/// Cheap cloneable handle onto a running session.
///
/// Handlers that call back into the peer capture one of these at
/// registration time.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl SessionHandle {
    /// Calls a remote operation and awaits its typed reply.
    ///
    /// The pending entry is registered before the packet is written, so
    /// a reply can never arrive ahead of its entry. Fails synchronously
    /// with `Disconnected` when the session is not open, and resolves
    /// with `CallTimeout` when no reply arrives inside the window.
    pub async fn invoke<Args, R>(&self, api: impl Into<ApiId>, args: &Args) -> Result<R>
    where
        Args: Serialize,
        R: DeserializeOwned,
    {
        let inner = &self.inner;
        inner.ensure_open()?;

        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = inner.calls.register(id)?;

        let packet = Packet::call(api.into(), id, inner.role == Role::Client, args)?;
        if let Err(e) = inner.send_packet(&packet).await {
            inner.calls.forget(id);
            return Err(e);
        }

        let raw = rx.await.map_err(|_| SockwireError::Disconnected)??;
        JsonCodec::decode(raw.get().as_bytes())
    }

    /// Sends a fire-and-forget call with correlation id 0.
    pub async fn notify<Args>(&self, api: impl Into<ApiId>, args: &Args) -> Result<()>
    where
        Args: Serialize,
    {
        let inner = &self.inner;
        inner.ensure_open()?;

        let packet = Packet::call(
            api.into(),
            NOTIFICATION_ID,
            inner.role == Role::Client,
            args,
        )?;
        inner.send_packet(&packet).await
    }

    /// Sends a ping control frame; the peer answers with a pong.
    pub async fn ping(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.send_frame(Frame::ping(payload)).await
    }

    /// Starts an orderly shutdown by sending a close frame.
    ///
    /// Idempotent: only the first call per session emits the frame.
    /// Pending calls fail with `Disconnected` once teardown finishes.
    pub async fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        if !self.inner.advance(SessionState::Closing) {
            return Ok(());
        }
        tracing::debug!(code = code.code(), %reason, "closing session");
        self.inner.send_frame(Frame::close(code, reason)).await
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Which side of the connection this session is.
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Number of calls awaiting replies.
    pub fn pending_calls(&self) -> usize {
        self.inner.calls.len()
    }

    /// Number of frames queued for the writer task.
    pub fn pending_frames(&self) -> usize {
        self.inner.writer.pending_count()
    }

    /// Whether outbound backpressure is currently active.
    pub fn is_backpressure_active(&self) -> bool {
        self.inner.writer.is_backpressure_active()
    }
}

/// A running session over one upgraded connection.
///
/// Dropping the session aborts the read loop and fails any pending calls.
/// Frames already queued still flush before the writer exits, so
/// `close(..).await` followed by drop is a graceful shutdown; use
/// [`Session::closed`] to also wait for the peer's closing frame.
pub struct Session {
    handle: SessionHandle,
    closed_rx: oneshot::Receiver<()>,
    read_task: JoinHandle<()>,
    _writer_task: JoinHandle<Result<()>>,
}

impl Session {
    /// Returns a cloneable handle for use inside handlers.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// See [`SessionHandle::invoke`].
    pub async fn invoke<Args, R>(&self, api: impl Into<ApiId>, args: &Args) -> Result<R>
    where
        Args: Serialize,
        R: DeserializeOwned,
    {
        self.handle.invoke(api, args).await
    }

    /// See [`SessionHandle::notify`].
    pub async fn notify<Args>(&self, api: impl Into<ApiId>, args: &Args) -> Result<()>
    where
        Args: Serialize,
    {
        self.handle.notify(api, args).await
    }

    /// See [`SessionHandle::ping`].
    pub async fn ping(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.handle.ping(payload).await
    }

    /// See [`SessionHandle::close`].
    pub async fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        self.handle.close(code, reason).await
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.handle.state()
    }

    /// Which side of the connection this session is.
    pub fn role(&self) -> Role {
        self.handle.role()
    }

    /// Number of calls awaiting replies.
    pub fn pending_calls(&self) -> usize {
        self.handle.pending_calls()
    }

    /// Waits until the read loop has torn the session down.
    pub async fn closed(mut self) -> Result<()> {
        let _ = (&mut self.closed_rx).await;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.read_task.abort();
        self.handle.inner.advance(SessionState::Closed);
        self.handle.inner.calls.drain();
    }
}

/// Spawns the runtime for an already-upgraded stream.
///
/// `leftover` carries bytes the handshake read past the HTTP head;
/// they are fed to the frame decoder before any socket reads.
pub(crate) fn spawn<S>(
    stream: S,
    role: Role,
    registry: Arc<Registry>,
    config: SessionConfig,
    leftover: Vec<u8>,
) -> Session
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (writer, writer_task) = spawn_writer_task(write_half, config.writer.clone());

    let calls = Arc::new(CorrelationTable::new(
        config.call_timeout,
        config.max_pending_calls,
    ));
    let sweep_task = calls.spawn_sweeper(config.sweep_interval);

    let inner = Arc::new(SessionInner {
        role,
        state: AtomicU8::new(SessionState::Upgraded as u8),
        next_id: AtomicI64::new(1),
        writer,
        calls,
        registry,
    });

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_handlers));
    let (closed_tx, closed_rx) = oneshot::channel();

    let loop_inner = inner.clone();
    let read_task = tokio::spawn(async move {
        tracing::debug!(role = ?role, "session started");
        let outcome = read_loop(read_half, &loop_inner, &semaphore, &config, leftover).await;
        finish(&loop_inner, outcome).await;
        sweep_task.abort();
        let _ = closed_tx.send(());
    });

    Session {
        handle: SessionHandle { inner },
        closed_rx,
        read_task,
        _writer_task: writer_task,
    }
}

#[derive(PartialEq)]
enum Flow {
    Continue,
    Stop,
}

/// Main read loop; pulls socket bytes through decoder and assembler.
async fn read_loop<R>(
    mut reader: R,
    inner: &Arc<SessionInner>,
    semaphore: &Arc<Semaphore>,
    config: &SessionConfig,
    leftover: Vec<u8>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;

    let mut decoder = FrameDecoder::with_max_payload(inner.role, config.max_payload_size);
    let mut assembler = MessageAssembler::with_max_message(config.max_message_size);
    let mut buf = vec![0u8; 64 * 1024];

    if !leftover.is_empty() {
        for frame in decoder.push(&leftover)? {
            if handle_frame(inner, semaphore, &mut assembler, frame).await? == Flow::Stop {
                return Ok(());
            }
        }
    }

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return Ok(()), // peer went away
            Ok(n) => n,
            Err(e) => return Err(SockwireError::Io(e)),
        };

        for frame in decoder.push(&buf[..n])? {
            if handle_frame(inner, semaphore, &mut assembler, frame).await? == Flow::Stop {
                return Ok(());
            }
        }
    }
}

/// Handles one decoded frame; control frames never reach the assembler.
async fn handle_frame(
    inner: &Arc<SessionInner>,
    semaphore: &Arc<Semaphore>,
    assembler: &mut MessageAssembler,
    frame: Frame,
) -> Result<Flow> {
    match frame.opcode {
        Opcode::Ping => {
            tracing::trace!(len = frame.payload.len(), "ping");
            inner.send_frame(Frame::pong(frame.payload)).await?;
            Ok(Flow::Continue)
        }
        Opcode::Pong => {
            tracing::trace!(len = frame.payload.len(), "pong");
            Ok(Flow::Continue)
        }
        Opcode::Close => {
            let detail = frame.close_payload()?;
            match &detail {
                Some((code, reason)) => {
                    tracing::debug!(code = code.code(), %reason, "close received")
                }
                None => tracing::debug!("close received"),
            }
            // Echo exactly once when the peer initiated the close.
            if inner.advance(SessionState::Closing) {
                let code = detail.map(|(code, _)| code).unwrap_or(CloseCode::Normal);
                let _ = inner.send_frame(Frame::close(code, "")).await;
            }
            Ok(Flow::Stop)
        }
        Opcode::Text | Opcode::Binary | Opcode::Continuation => {
            if let Some(message) = assembler.push(frame)? {
                handle_message(inner, semaphore, message).await?;
            }
            Ok(Flow::Continue)
        }
    }
}

/// Parses the envelope and routes it to the correlation table or registry.
async fn handle_message(
    inner: &Arc<SessionInner>,
    semaphore: &Arc<Semaphore>,
    message: Message,
) -> Result<()> {
    let packet = Packet::from_wire(&message.payload)
        .map_err(|e| SockwireError::Protocol(format!("malformed packet envelope: {e}")))?;

    if packet.is_reply_for(inner.role) {
        if !inner.calls.resolve(packet.id, packet.state, packet.body) {
            tracing::debug!(id = packet.id, "reply for unknown or expired call");
        }
        return Ok(());
    }

    dispatch_call(inner, semaphore, packet).await
}

/// Runs an inbound call on its own task, gated by the semaphore.
async fn dispatch_call(
    inner: &Arc<SessionInner>,
    semaphore: &Arc<Semaphore>,
    packet: Packet,
) -> Result<()> {
    let permit = match semaphore.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            if packet.is_notification() {
                tracing::warn!(api = %packet.api, "handler capacity reached, dropping notification");
                return Ok(());
            }
            tracing::warn!(api = %packet.api, id = packet.id, "handler capacity reached, rejecting call");
            let reply = Packet::failure(
                packet.api,
                packet.id,
                packet.from_client,
                "concurrency limit reached",
            )?;
            return inner.send_packet(&reply).await;
        }
    };

    let ctx = CallContext::new(packet.api.clone(), packet.id, packet.from_client);
    let inner = inner.clone();

    tokio::spawn(async move {
        // Permit is held until this task completes.
        let _permit = permit;

        let outcome = inner.registry.dispatch(&packet.body, ctx).await;

        if packet.is_notification() {
            return;
        }

        // The reply keeps the caller's fromClient flag so the peer can
        // recognize it as belonging to its own exchange.
        let reply = match outcome {
            Ok(Some(body)) => Packet::reply(packet.api, packet.id, packet.from_client, &body),
            Ok(None) => Packet::reply(packet.api, packet.id, packet.from_client, &()),
            Err(e) => Packet::failure(packet.api, packet.id, packet.from_client, &e.to_string()),
        };

        let sent = match reply {
            Ok(reply) => inner.send_packet(&reply).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            tracing::error!(id = packet.id, error = %e, "failed to send reply");
        }
    });

    Ok(())
}

/// Tears the session down after the read loop exits.
async fn finish(inner: &Arc<SessionInner>, outcome: Result<()>) {
    if let Err(e) = &outcome {
        tracing::error!(error = %e, "session terminated");
        // Best effort: tell the peer why before dropping the socket.
        if inner.state() < SessionState::Closing {
            let _ = inner
                .send_frame(Frame::close(CloseCode::ProtocolError, "protocol error"))
                .await;
        }
    }

    inner.advance(SessionState::Closed);

    let drained = inner.calls.drain();
    if drained > 0 {
        tracing::debug!(drained, "failed pending calls on close");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_frame;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn sum_registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .handle("sum", |args: (i32, i32), _ctx| async move {
                Ok(args.0 + args.1)
            })
            .unwrap();
        registry
    }

    fn pair_with(
        server_registry: Registry,
        client_registry: Registry,
        config: SessionConfig,
    ) -> (Session, Session) {
        let (a, b) = duplex(1 << 16);
        let server = spawn(
            a,
            Role::Server,
            Arc::new(server_registry),
            config.clone(),
            Vec::new(),
        );
        let client = spawn(b, Role::Client, Arc::new(client_registry), config, Vec::new());
        (server, client)
    }

    fn pair(server_registry: Registry, client_registry: Registry) -> (Session, Session) {
        pair_with(server_registry, client_registry, SessionConfig::default())
    }

    #[tokio::test]
    async fn test_invoke_round_trip() {
        let (_server, client) = pair(sum_registry(), Registry::new());

        let reply: i32 = client.invoke("sum", &(2, 3)).await.unwrap();
        assert_eq!(reply, 5);
    }

    #[tokio::test]
    async fn test_server_invokes_client() {
        let mut client_registry = Registry::new();
        client_registry
            .handle("shout", |word: String, _ctx| async move {
                Ok(word.to_uppercase())
            })
            .unwrap();
        let (server, _client) = pair(Registry::new(), client_registry);

        let reply: String = server.invoke("shout", &"hey").await.unwrap();
        assert_eq!(reply, "HEY");
    }

    #[tokio::test]
    async fn test_invoke_by_numeric_alias() {
        let (_server, client) = pair(sum_registry(), Registry::new());

        // "sum" was bound first, so its alias is 1.
        let reply: i32 = client.invoke(1u32, &(10, 20)).await.unwrap();
        assert_eq!(reply, 30);
    }

    #[tokio::test]
    async fn test_unknown_operation_fails_call() {
        let (_server, client) = pair(Registry::new(), Registry::new());

        let err = client.invoke::<_, i32>("missing", &()).await.unwrap_err();
        match err {
            SockwireError::Remote(msg) => assert!(msg.contains("missing")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_remote_handler_error_becomes_remote() {
        let mut registry = Registry::new();
        registry
            .handle("fail", |_: (), _ctx| async {
                Err::<i32, _>(SockwireError::Protocol("kaboom".to_string()))
            })
            .unwrap();
        let (_server, client) = pair(registry, Registry::new());

        let err = client.invoke::<_, i32>("fail", &()).await.unwrap_err();
        match err {
            SockwireError::Remote(msg) => assert!(msg.contains("kaboom")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_notify_reaches_handler() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in = seen.clone();
        let mut registry = Registry::new();
        registry
            .handle_notify("log", move |_line: String, _ctx| {
                let seen = seen_in.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();
        let (_server, client) = pair(registry, Registry::new());

        client.notify("log", &"hello").await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        // Session stays usable after a notification.
        assert_eq!(client.state(), SessionState::Upgraded);
    }

    #[tokio::test]
    async fn test_ping_keeps_session_open() {
        let (_server, client) = pair(sum_registry(), Registry::new());

        client.ping(&b"beat"[..]).await.unwrap();
        let reply: i32 = client.invoke("sum", &(1, 1)).await.unwrap();
        assert_eq!(reply, 2);
    }

    #[tokio::test]
    async fn test_close_completes_both_sides() {
        let (server, client) = pair(Registry::new(), Registry::new());

        client.close(CloseCode::Normal, "bye").await.unwrap();

        server.closed().await.unwrap();
        client.closed().await.unwrap();
    }

    #[tokio::test]
    async fn test_invoke_after_close_fails_fast() {
        let (_server, client) = pair(sum_registry(), Registry::new());

        client.close(CloseCode::Normal, "done").await.unwrap();

        let err = client.invoke::<_, i32>("sum", &(1, 2)).await.unwrap_err();
        assert!(matches!(err, SockwireError::Disconnected));
    }

    #[tokio::test]
    async fn test_concurrency_limit_rejects_with_failure_reply() {
        let mut registry = Registry::new();
        registry
            .handle("slow", |_: (), _ctx| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(1i32)
            })
            .unwrap();
        let config = SessionConfig {
            max_concurrent_handlers: 1,
            ..SessionConfig::default()
        };
        let (_server, client) = pair_with(registry, Registry::new(), config);

        let (first, second) = tokio::join!(
            client.invoke::<_, i32>("slow", &()),
            client.invoke::<_, i32>("slow", &()),
        );

        assert_eq!(first.unwrap(), 1);
        match second.unwrap_err() {
            SockwireError::Remote(msg) => assert!(msg.contains("concurrency limit")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_call_timeout_when_peer_never_replies() {
        let (stream, mut silent_peer) = duplex(1 << 16);
        let config = SessionConfig {
            call_timeout: Duration::from_millis(50),
            sweep_interval: Duration::from_millis(10),
            ..SessionConfig::default()
        };
        let session = spawn(
            stream,
            Role::Client,
            Arc::new(Registry::new()),
            config,
            Vec::new(),
        );

        // Swallow whatever the session writes so it never gets a reply.
        tokio::spawn(async move {
            let mut sink = vec![0u8; 4096];
            while silent_peer.read(&mut sink).await.unwrap_or(0) > 0 {}
        });

        let err = session.invoke::<_, i32>("sum", &(1, 2)).await.unwrap_err();
        assert!(matches!(err, SockwireError::CallTimeout));
        assert_eq!(session.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_fragmented_masked_call_from_raw_peer() {
        let (stream, mut raw) = duplex(1 << 16);
        let session = spawn(
            stream,
            Role::Server,
            Arc::new(sum_registry()),
            SessionConfig::default(),
            Vec::new(),
        );

        let wire = br#"{"api":"sum","id":9,"state":true,"fromClient":true,"body":[4,5]}"#;
        let (left, right) = wire.split_at(20);

        let first = Frame::fragment(Opcode::Text, false, left.to_vec()).with_mask([1, 2, 3, 4]);
        let second =
            Frame::fragment(Opcode::Continuation, true, right.to_vec()).with_mask([5, 6, 7, 8]);
        raw.write_all(&encode_frame(&first)).await.unwrap();
        raw.write_all(&encode_frame(&second)).await.unwrap();

        // Collect the unmasked reply frame the server sends back.
        let mut decoder = FrameDecoder::client();
        let mut buf = vec![0u8; 4096];
        let frames = loop {
            let n = raw.read(&mut buf).await.unwrap();
            let frames = decoder.push(&buf[..n]).unwrap();
            if !frames.is_empty() {
                break frames;
            }
        };

        let reply = Packet::from_wire(&frames[0].payload).unwrap();
        assert_eq!(reply.id, 9);
        assert!(reply.state);
        assert!(reply.from_client, "reply keeps the caller's flag");
        assert_eq!(reply.body.get(), "9");

        drop(session);
    }

    #[tokio::test]
    async fn test_unmasked_inbound_closes_server_session() {
        let (stream, mut raw) = duplex(1 << 16);
        let session = spawn(
            stream,
            Role::Server,
            Arc::new(Registry::new()),
            SessionConfig::default(),
            Vec::new(),
        );

        // Servers must reject unmasked client frames.
        raw.write_all(&encode_frame(&Frame::text("rude"))).await.unwrap();

        session.closed().await.unwrap();

        // The session announces the protocol error before dropping.
        let mut decoder = FrameDecoder::client();
        let mut buf = vec![0u8; 4096];
        let n = raw.read(&mut buf).await.unwrap();
        let frames = decoder.push(&buf[..n]).unwrap();
        assert_eq!(frames[0].opcode, Opcode::Close);
        let (code, _) = frames[0].close_payload().unwrap().unwrap();
        assert_eq!(code, CloseCode::ProtocolError);
    }

    #[tokio::test]
    async fn test_handler_can_call_back() {
        let mut client_registry = Registry::new();
        client_registry
            .handle("double", |n: i32, _ctx| async move { Ok(n * 2) })
            .unwrap();

        let (a, b) = duplex(1 << 16);
        let client = spawn(
            b,
            Role::Client,
            Arc::new(client_registry),
            SessionConfig::default(),
            Vec::new(),
        );

        // The server handler turns around and invokes the client.
        let mut server_registry = Registry::new();
        let client_handle_slot: Arc<std::sync::Mutex<Option<SessionHandle>>> =
            Arc::new(std::sync::Mutex::new(None));
        let slot = client_handle_slot.clone();
        server_registry
            .handle("relay", move |n: i32, _ctx| {
                let slot = slot.clone();
                async move {
                    let peer = slot.lock().unwrap().clone().unwrap();
                    peer.invoke::<_, i32>("double", &n).await
                }
            })
            .unwrap();
        let server = spawn(
            a,
            Role::Server,
            Arc::new(server_registry),
            SessionConfig::default(),
            Vec::new(),
        );
        *client_handle_slot.lock().unwrap() = Some(server.handle());

        let reply: i32 = client.invoke("relay", &21).await.unwrap();
        assert_eq!(reply, 42);
    }

    #[tokio::test]
    async fn test_correlation_ids_are_unique_across_tasks() {
        let (_server, client) = pair(sum_registry(), Registry::new());
        let handle = client.handle();

        let mut tasks = Vec::new();
        for i in 0..20i32 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle.invoke::<_, i32>("sum", &(i, 1)).await
            }));
        }

        for (i, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await.unwrap().unwrap(), i as i32 + 1);
        }
    }

    #[test]
    fn test_state_ordering() {
        assert!(SessionState::Idle < SessionState::Connected);
        assert!(SessionState::Connected < SessionState::Upgraded);
        assert!(SessionState::Upgraded < SessionState::Closing);
        assert!(SessionState::Closing < SessionState::Closed);
        assert_eq!(SessionState::from_u8(2), SessionState::Upgraded);
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.call_timeout, DEFAULT_CALL_TIMEOUT);
        assert_eq!(config.max_concurrent_handlers, DEFAULT_MAX_CONCURRENT_HANDLERS);
        assert_eq!(config.max_pending_calls, DEFAULT_MAX_PENDING_CALLS);
    }
}
