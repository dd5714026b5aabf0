//! Provider completions and the single ordered queue they travel through.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::http::ResponseHead;
use crate::transport::{ConnHandle, PeerInfo, RequestHandle, ServicePermissions, Status, Token};

/// One completion reported by the transport provider.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A dial finished.
    Connected {
        token: Token,
        result: Result<ConnHandle, Status>,
    },
    /// Inbound bytes on a dialed connection. Empty means end-of-stream.
    Data { conn: ConnHandle, data: Bytes },
    /// A bind finished.
    Listening { token: Token, status: Status },
    /// A client connected to the listener registered under `token`.
    Accepted {
        token: Token,
        client: ConnHandle,
        status: Status,
        peer: PeerInfo,
    },
    /// Inbound bytes from an accepted client. Empty means end-of-stream.
    AcceptData {
        token: Token,
        client: ConnHandle,
        data: Bytes,
    },
    /// A write was handed off (or failed).
    WriteComplete {
        conn: ConnHandle,
        token: Token,
        status: Status,
    },
    /// A request was assigned a handle (or failed to open).
    RequestOpened {
        token: Token,
        result: Result<RequestHandle, Status>,
    },
    /// The remote began responding.
    Response {
        req: RequestHandle,
        result: Result<ResponseHead, Status>,
    },
    /// One response body chunk. Empty means end-of-body.
    ResponseData { req: RequestHandle, data: Bytes },
    /// A request body chunk was handed off (or failed).
    RequestDataAck {
        req: RequestHandle,
        token: Token,
        status: Status,
    },
    /// Answer to a service availability query.
    ServiceAvailable {
        token: Token,
        result: Result<ServicePermissions, Status>,
    },
}

/// Items drained by the dispatcher, in arrival order.
#[derive(Debug)]
pub(crate) enum Dispatch {
    Transport(TransportEvent),
    /// Unregister a closed listener once everything queued before it ran.
    RetireListener {
        token: Token,
        done: oneshot::Sender<()>,
    },
}

/// Handle a provider uses to push completions into the adapter.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Dispatch>,
}

impl EventSink {
    /// Queue one completion. Returns `false` once the adapter has gone away.
    pub fn deliver(&self, event: TransportEvent) -> bool {
        self.tx.send(Dispatch::Transport(event)).is_ok()
    }

    pub(crate) fn retire_listener(&self, token: Token, done: oneshot::Sender<()>) -> bool {
        self.tx.send(Dispatch::RetireListener { token, done }).is_ok()
    }
}

/// Receiving end of the event queue, consumed by the adapter's dispatcher.
#[derive(Debug)]
pub struct EventQueue {
    rx: mpsc::UnboundedReceiver<Dispatch>,
    sink: EventSink,
}

impl EventQueue {
    /// A sink feeding this queue.
    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    pub(crate) async fn next(&mut self) -> Option<Dispatch> {
        self.rx.recv().await
    }

    pub(crate) fn try_next(&mut self) -> Option<Dispatch> {
        self.rx.try_recv().ok()
    }
}

/// Create the event queue shared by a provider and an adapter.
pub fn event_queue() -> (EventSink, EventQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = EventSink { tx };
    (sink.clone(), EventQueue { rx, sink })
}
