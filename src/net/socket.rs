//! Duplex byte stream over one provider connection.
//!
//! # States
//! - Open: connection established, nothing received yet
//! - Readable: at least one inbound chunk delivered
//! - Closed: end-of-stream received or closed locally
//!
//! # State Transitions
//! ```text
//! Open → Readable: first non-empty chunk
//! Open/Readable → Closed: empty chunk, close(), drop, or adapter teardown
//! ```
//!
//! # Design Decisions
//! - No half-close: an empty inbound chunk closes the whole socket
//! - Writes are a hand-off; the ack says the provider took the bytes, not
//!   that the remote received them
//! - Writes still waiting for their ack when the socket closes fail with
//!   `ConnectionClosed`

use bytes::Bytes;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{mpsc, oneshot};

use crate::adapter::Core;
use crate::error::AdapterError;
use crate::net::connection::ConnectionGuard;
use crate::net::registry::HandleRegistry;
use crate::observability::metrics;
use crate::transport::{ConnHandle, PeerInfo, Status, Token, TransportProvider};

/// Lifecycle state of a socket.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Open = 0,
    Readable = 1,
    Closed = 2,
}

impl From<u8> for SocketState {
    fn from(val: u8) -> Self {
        match val {
            0 => SocketState::Open,
            1 => SocketState::Readable,
            _ => SocketState::Closed,
        }
    }
}

/// Notification delivered to the socket's owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// One inbound chunk, in arrival order.
    Data(Bytes),
    /// The socket reached `Closed`. Fired exactly once.
    Closed,
}

/// Where a socket came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SocketOrigin {
    Dialed,
    /// Accepted by the listener registered under this token.
    Accepted(Token),
}

impl SocketOrigin {
    fn label(&self) -> &'static str {
        match self {
            SocketOrigin::Dialed => "dialed",
            SocketOrigin::Accepted(_) => "accepted",
        }
    }
}

/// Resolves when the provider reports local hand-off of a write or body chunk.
#[derive(Debug)]
pub struct WriteAck {
    rx: oneshot::Receiver<Result<usize, AdapterError>>,
}

impl WriteAck {
    pub(crate) fn pending() -> (oneshot::Sender<Result<usize, AdapterError>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    pub(crate) fn ready(len: usize) -> Self {
        let (tx, ack) = Self::pending();
        let _ = tx.send(Ok(len));
        ack
    }
}

impl Future for WriteAck {
    type Output = Result<usize, AdapterError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(AdapterError::ConnectionClosed)))
    }
}

/// A write handed to the provider and not yet acknowledged.
#[derive(Debug)]
pub(crate) struct PendingWrite {
    tx: oneshot::Sender<Result<usize, AdapterError>>,
    len: usize,
}

impl PendingWrite {
    /// Register-ready pending write and the ack its caller awaits.
    pub(crate) fn new(len: usize) -> (Self, WriteAck) {
        let (tx, ack) = WriteAck::pending();
        (Self { tx, len }, ack)
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Resolve from a provider completion status for operation `op`.
    pub(crate) fn resolve(self, op: &'static str, status: Status) {
        let result = if status.is_ok() {
            let written = usize::try_from(status.code()).unwrap_or(0);
            Ok(if written > 0 { written } else { self.len })
        } else {
            Err(AdapterError::transport(op, status))
        };
        let _ = self.tx.send(result);
    }

    pub(crate) fn reject(self, err: AdapterError) {
        let _ = self.tx.send(Err(err));
    }
}

/// State shared between the dispatcher and the socket's owner.
pub(crate) struct SocketShared {
    conn: ConnHandle,
    origin: SocketOrigin,
    peer: PeerInfo,
    state: AtomicU8,
    events: mpsc::UnboundedSender<SocketEvent>,
    writes: HandleRegistry<PendingWrite>,
    provider: Arc<dyn TransportProvider>,
    core: Weak<Core>,
    guard: Mutex<Option<ConnectionGuard>>,
}

impl std::fmt::Debug for SocketShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketShared")
            .field("conn", &self.conn)
            .field("origin", &self.origin)
            .field("state", &self.state())
            .finish()
    }
}

impl SocketShared {
    /// Wrap `conn` and return the dispatcher side and the owner side.
    pub(crate) fn open(
        conn: ConnHandle,
        origin: SocketOrigin,
        peer: PeerInfo,
        provider: Arc<dyn TransportProvider>,
        core: Weak<Core>,
        guard: Option<ConnectionGuard>,
    ) -> (Arc<SocketShared>, Socket) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SocketShared {
            conn,
            origin,
            peer,
            state: AtomicU8::new(SocketState::Open as u8),
            events: tx,
            writes: HandleRegistry::new("write"),
            provider,
            core,
            guard: Mutex::new(guard),
        });
        metrics::record_socket_opened(origin.label());
        tracing::debug!(conn = %conn, origin = origin.label(), "Socket opened");

        let socket = Socket {
            shared: Arc::clone(&shared),
            events: rx,
            closed_seen: false,
            read_buf: Bytes::new(),
        };
        (shared, socket)
    }

    pub(crate) fn state(&self) -> SocketState {
        SocketState::from(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state() == SocketState::Closed
    }

    /// Feed one inbound chunk from the provider.
    pub(crate) fn capture_data(&self, data: Bytes) {
        if data.is_empty() {
            self.mark_closed("end-of-stream");
            return;
        }
        if self.is_closed() {
            tracing::trace!(conn = %self.conn, len = data.len(), "Dropping data after close");
            return;
        }

        let _ = self.state.compare_exchange(
            SocketState::Open as u8,
            SocketState::Readable as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        metrics::record_bytes_in(data.len());
        tracing::trace!(conn = %self.conn, len = data.len(), "Data captured");
        let _ = self.events.send(SocketEvent::Data(data));
    }

    /// Hand `data` to the provider.
    pub(crate) fn write(&self, data: Bytes) -> Result<WriteAck, AdapterError> {
        if self.is_closed() {
            return Err(AdapterError::ConnectionClosed);
        }
        if data.is_empty() {
            return Ok(WriteAck::ready(0));
        }

        let len = data.len();
        let (pending, ack) = PendingWrite::new(len);
        let token = self.writes.register(pending);
        if self.is_closed() {
            // Lost a race with close; the drain may or may not have seen us.
            self.writes.discard(token);
            return Err(AdapterError::ConnectionClosed);
        }

        tracing::trace!(conn = %self.conn, token = %token, len, "Write handed off");
        self.provider.write(self.conn, data, token);
        Ok(ack)
    }

    /// Resolve the write registered under `token`.
    pub(crate) fn complete_write(&self, token: Token, status: Status) -> Result<(), AdapterError> {
        let pending = match self.writes.discard(token) {
            Some(pending) => pending,
            None if self.is_closed() => {
                // Closing raced the completion and already rejected the write.
                tracing::trace!(conn = %self.conn, token = %token, "Write completion after close");
                return Ok(());
            }
            None => return self.writes.unregister(token).map(drop),
        };
        if status.is_ok() {
            metrics::record_bytes_out(pending.len());
        } else {
            tracing::warn!(conn = %self.conn, status = %status, "Write failed");
        }
        pending.resolve("write", status);
        Ok(())
    }

    /// Transition to `Closed`. Returns `false` if the socket was already closed.
    pub(crate) fn mark_closed(&self, reason: &'static str) -> bool {
        let prev = self.state.swap(SocketState::Closed as u8, Ordering::SeqCst);
        if prev == SocketState::Closed as u8 {
            return false;
        }

        self.detach();
        for (_, pending) in self.writes.drain() {
            pending.reject(AdapterError::ConnectionClosed);
        }
        self.provider.close(self.conn);
        // Runs from `Drop`; a poisoned lock must not panic here.
        self.guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        metrics::record_socket_closed();
        tracing::debug!(conn = %self.conn, reason, "Socket closed");
        let _ = self.events.send(SocketEvent::Closed);
        true
    }

    /// Remove this socket from whichever table routes events to it.
    fn detach(&self) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        core.sockets.remove(&self.conn);
        if let SocketOrigin::Accepted(token) = self.origin {
            if let Some(listener) = core.listeners.find(token) {
                listener.remove_client(self.conn);
            }
        }
    }
}

/// One connection as a duplex byte stream.
///
/// Notifications are read with [`recv`](Socket::recv); the socket also
/// implements [`AsyncRead`] and [`AsyncWrite`] so stream-based protocols can
/// run over it directly. Dropping an open socket closes it.
#[derive(Debug)]
pub struct Socket {
    shared: Arc<SocketShared>,
    events: mpsc::UnboundedReceiver<SocketEvent>,
    closed_seen: bool,
    /// Remainder of a chunk partially consumed through `AsyncRead`.
    read_buf: Bytes,
}

impl Socket {
    /// The provider connection handle this socket wraps.
    pub fn handle(&self) -> ConnHandle {
        self.shared.conn
    }

    pub fn state(&self) -> SocketState {
        self.shared.state()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Who dialed in, for accepted sockets.
    pub fn peer(&self) -> &PeerInfo {
        &self.shared.peer
    }

    /// Token of the listener that accepted this socket.
    pub fn listener(&self) -> Option<Token> {
        match self.shared.origin {
            SocketOrigin::Dialed => None,
            SocketOrigin::Accepted(token) => Some(token),
        }
    }

    /// Next notification. Returns `None` once `Closed` has been observed.
    pub async fn recv(&mut self) -> Option<SocketEvent> {
        if let Some(buffered) = self.take_buffered() {
            return Some(buffered);
        }
        if self.closed_seen {
            return None;
        }
        let event = self.events.recv().await;
        self.observe(event)
    }

    /// Next notification if one is already queued.
    pub fn try_recv(&mut self) -> Option<SocketEvent> {
        if let Some(buffered) = self.take_buffered() {
            return Some(buffered);
        }
        if self.closed_seen {
            return None;
        }
        let event = self.events.try_recv().ok()?;
        self.observe(Some(event))
    }

    /// Hand `data` to the transport.
    ///
    /// Fails with `ConnectionClosed` once the socket is closed. Writing zero
    /// bytes succeeds without touching the transport.
    pub fn write(&self, data: impl Into<Bytes>) -> Result<WriteAck, AdapterError> {
        self.shared.write(data.into())
    }

    /// Close the connection and release the transport handle.
    pub fn close(&self) -> Result<(), AdapterError> {
        if self.shared.mark_closed("closed locally") {
            Ok(())
        } else {
            Err(AdapterError::ConnectionClosed)
        }
    }

    fn take_buffered(&mut self) -> Option<SocketEvent> {
        if self.read_buf.is_empty() {
            None
        } else {
            Some(SocketEvent::Data(std::mem::take(&mut self.read_buf)))
        }
    }

    fn observe(&mut self, event: Option<SocketEvent>) -> Option<SocketEvent> {
        match event {
            Some(SocketEvent::Data(data)) => Some(SocketEvent::Data(data)),
            Some(SocketEvent::Closed) => {
                self.closed_seen = true;
                Some(SocketEvent::Closed)
            }
            None => {
                self.closed_seen = true;
                None
            }
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.shared.mark_closed("dropped");
    }
}

impl AsyncRead for Socket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        loop {
            if !this.read_buf.is_empty() {
                let n = this.read_buf.len().min(buf.remaining());
                buf.put_slice(&this.read_buf.split_to(n));
                return Poll::Ready(Ok(()));
            }
            if this.closed_seen {
                // End-of-stream.
                return Poll::Ready(Ok(()));
            }
            match ready!(this.events.poll_recv(cx)) {
                Some(SocketEvent::Data(data)) => this.read_buf = data,
                Some(SocketEvent::Closed) | None => this.closed_seen = true,
            }
        }
    }
}

impl AsyncWrite for Socket {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let result = self
            .shared
            .write(Bytes::copy_from_slice(buf))
            .map(|_ack| buf.len())
            .map_err(io::Error::from);
        Poll::Ready(result)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shared.mark_closed("shutdown");
        Poll::Ready(Ok(()))
    }
}
