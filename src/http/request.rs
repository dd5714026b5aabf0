//! One request/response exchange over the transport.
//!
//! # Phases
//! ```text
//! Opened → SendingBody* → AwaitingResponse → ReceivingBody* → Complete
//!                      any phase → Failed
//! ```
//!
//! # Data Flow
//! ```text
//! Adapter::request(spec)
//!     → PendingOpen under token T → provider.request_open(spec, T)
//!     → RequestOpened { T, handle } → Request
//! send_data(chunk) → ack token → RequestDataAck resolves it
//! Response { handle } / ResponseData { handle } → RequestEvent stream
//! ```
//!
//! # Design Decisions
//! - Events after the open carry the request handle itself, so open requests
//!   live in a plain handle-keyed table rather than a token registry
//! - Body chunks are delivered verbatim; nothing is decoded
//! - The phase trail records the phase after every step, repeats included

use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::adapter::Core;
use crate::error::AdapterError;
use crate::http::ResponseHead;
use crate::net::registry::HandleRegistry;
use crate::net::socket::{PendingWrite, WriteAck};
use crate::observability::metrics;
use crate::transport::{RequestHandle, Status, Token, TransportProvider};

/// Position of an exchange in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Opened,
    SendingBody,
    AwaitingResponse,
    ReceivingBody,
    Complete,
    Failed,
}

impl RequestPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestPhase::Complete | RequestPhase::Failed)
    }

    /// Whether body chunks may still be sent.
    fn accepts_body(self) -> bool {
        matches!(self, RequestPhase::Opened | RequestPhase::SendingBody)
    }
}

/// Where a request is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTarget {
    /// A service by name.
    Service(String),
    /// An intercepted `scheme://host:port` address.
    Intercept(Url),
}

impl std::fmt::Display for RequestTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestTarget::Service(name) => write!(f, "service {name}"),
            RequestTarget::Intercept(url) => write!(f, "intercept {url}"),
        }
    }
}

/// Everything needed to open a request.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub target: RequestTarget,
    pub method: Method,
    /// Path plus optional query, always starting with `/`.
    pub path: String,
    pub headers: HeaderMap,
}

impl RequestSpec {
    pub fn new(target: RequestTarget, method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') { path } else { format!("/{path}") };
        Self {
            target,
            method,
            path,
            headers: HeaderMap::new(),
        }
    }

    /// Request to a named service.
    pub fn service(name: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self::new(RequestTarget::Service(name.into()), method, path)
    }

    /// Request to an intercepted address such as `http://db.internal:5432`.
    ///
    /// Only scheme, host and port may be present.
    pub fn intercept(address: &str, method: Method, path: impl Into<String>) -> Result<Self, AdapterError> {
        let url = Url::parse(address)
            .map_err(|e| AdapterError::InvalidArgument(format!("intercept address {address:?}: {e}")))?;
        if url.host_str().is_none() {
            return Err(AdapterError::InvalidArgument(format!(
                "intercept address {address:?} has no host"
            )));
        }
        if url.path() != "/" || url.query().is_some() {
            return Err(AdapterError::InvalidArgument(format!(
                "intercept address {address:?} must not carry a path"
            )));
        }
        Ok(Self::new(RequestTarget::Intercept(url), method, path))
    }

    /// Split a full URL: the host names the service, path and query become
    /// the request path.
    pub fn from_url(url: &str, method: Method) -> Result<Self, AdapterError> {
        let parsed = Url::parse(url).map_err(|e| AdapterError::InvalidArgument(format!("url {url:?}: {e}")))?;
        let service = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| AdapterError::InvalidArgument(format!("url {url:?} has no host")))?;

        let mut path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }
        Ok(Self::service(service, method, path))
    }

    /// Append a typed header.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, AdapterError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| AdapterError::InvalidArgument(format!("invalid header name {name:?}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| AdapterError::InvalidArgument(format!("invalid value for header {name}")))?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Append a header given as a `"Name: value"` line.
    pub fn header_line(mut self, line: &str) -> Result<Self, AdapterError> {
        let (name, value) = parse_header_line(line)?;
        self.headers.append(name, value);
        Ok(self)
    }
}

/// Split a `"Name: value"` line. Whitespace around the value is trimmed.
pub fn parse_header_line(line: &str) -> Result<(HeaderName, HeaderValue), AdapterError> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| AdapterError::InvalidArgument(format!("header line {line:?} has no ':'")))?;
    let name = HeaderName::from_bytes(name.trim().as_bytes())
        .map_err(|_| AdapterError::InvalidArgument(format!("invalid header name in {line:?}")))?;
    let value = HeaderValue::from_str(value.trim())
        .map_err(|_| AdapterError::InvalidArgument(format!("invalid header value in {line:?}")))?;
    Ok((name, value))
}

/// Notification on a request's event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestEvent {
    Response(ResponseHead),
    /// One body chunk, verbatim.
    Data(Bytes),
    Complete,
    Failed(AdapterError),
}

/// An open waiting for its handle.
#[derive(Debug)]
pub(crate) struct PendingOpen {
    target: RequestTarget,
    reply: oneshot::Sender<Result<Request, AdapterError>>,
}

impl PendingOpen {
    pub(crate) fn fail(self, err: AdapterError) {
        let _ = self.reply.send(Err(err));
    }
}

#[derive(Debug)]
struct PhaseLog {
    current: RequestPhase,
    trail: Vec<RequestPhase>,
}

/// Request state shared with the dispatcher.
pub(crate) struct RequestShared {
    req: RequestHandle,
    provider: Arc<dyn TransportProvider>,
    phase: Mutex<PhaseLog>,
    head: Mutex<Option<ResponseHead>>,
    events: mpsc::UnboundedSender<RequestEvent>,
    acks: HandleRegistry<PendingWrite>,
    /// Set once pending acks were rejected; late acks are then expected.
    released: AtomicBool,
}

impl std::fmt::Debug for RequestShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestShared")
            .field("req", &self.req)
            .field("phase", &self.phase())
            .finish()
    }
}

impl RequestShared {
    fn new(
        req: RequestHandle,
        provider: Arc<dyn TransportProvider>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<RequestEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Self {
            req,
            provider,
            phase: Mutex::new(PhaseLog {
                current: RequestPhase::Opened,
                trail: vec![RequestPhase::Opened],
            }),
            head: Mutex::new(None),
            events: tx,
            acks: HandleRegistry::new("request-data"),
            released: AtomicBool::new(false),
        });
        (shared, rx)
    }

    pub(crate) fn phase(&self) -> RequestPhase {
        self.phase.lock().expect("request phase mutex poisoned").current
    }

    fn trail(&self) -> Vec<RequestPhase> {
        self.phase.lock().expect("request phase mutex poisoned").trail.clone()
    }

    /// Move to `next` if `allowed` holds for the current phase.
    fn advance(&self, next: RequestPhase, allowed: impl FnOnce(RequestPhase) -> bool) -> bool {
        let mut log = self.phase.lock().expect("request phase mutex poisoned");
        if !allowed(log.current) {
            return false;
        }
        log.current = next;
        log.trail.push(next);
        true
    }

    fn send_data(&self, data: Bytes) -> Result<WriteAck, AdapterError> {
        if !self.phase().accepts_body() {
            return Err(AdapterError::ConnectionClosed);
        }
        if data.is_empty() {
            return Ok(WriteAck::ready(0));
        }

        let (pending, ack) = PendingWrite::new(data.len());
        let token = self.acks.register(pending);
        if !self.advance(RequestPhase::SendingBody, RequestPhase::accepts_body) {
            self.acks.discard(token);
            return Err(AdapterError::ConnectionClosed);
        }
        tracing::trace!(req = %self.req, token = %token, len = data.len(), "Body chunk handed off");
        self.provider.request_send_data(self.req, data, token);
        Ok(ack)
    }

    fn end(&self) {
        if self.advance(RequestPhase::AwaitingResponse, RequestPhase::accepts_body) {
            tracing::debug!(req = %self.req, "Request body ended");
            self.provider.request_end(self.req);
        }
    }

    /// Resolve the body chunk ack registered under `token`.
    pub(crate) fn complete_ack(&self, token: Token, status: Status) -> Result<(), AdapterError> {
        let pending = match self.acks.discard(token) {
            Some(pending) => pending,
            None if self.released.load(Ordering::SeqCst) => {
                tracing::trace!(req = %self.req, token = %token, "Body ack after release");
                return Ok(());
            }
            None => return self.acks.unregister(token).map(drop),
        };
        if !status.is_ok() {
            tracing::warn!(req = %self.req, status = %status, "Body chunk failed");
        }
        pending.resolve("request-data", status);
        Ok(())
    }

    pub(crate) fn on_response(&self, result: Result<ResponseHead, Status>) {
        match result {
            Ok(head) => {
                if !self.advance(RequestPhase::AwaitingResponse, |p| !p.is_terminal()) {
                    tracing::trace!(req = %self.req, "Response after terminal phase dropped");
                    return;
                }
                tracing::debug!(req = %self.req, status = %head.status, "Response received");
                *self.head.lock().expect("response head mutex poisoned") = Some(head.clone());
                let _ = self.events.send(RequestEvent::Response(head));
            }
            Err(status) => self.fail(AdapterError::transport("response", status)),
        }
    }

    pub(crate) fn on_data(&self, data: Bytes) {
        if data.is_empty() {
            if self.advance(RequestPhase::Complete, |p| !p.is_terminal()) {
                tracing::debug!(req = %self.req, "Response complete");
                metrics::record_request_finished("complete");
                let _ = self.events.send(RequestEvent::Complete);
            }
            return;
        }
        if !self.advance(RequestPhase::ReceivingBody, |p| !p.is_terminal()) {
            tracing::trace!(req = %self.req, len = data.len(), "Body chunk after terminal phase dropped");
            return;
        }
        tracing::trace!(req = %self.req, len = data.len(), "Body chunk received");
        let _ = self.events.send(RequestEvent::Data(data));
    }

    pub(crate) fn fail(&self, err: AdapterError) {
        if self.advance(RequestPhase::Failed, |p| !p.is_terminal()) {
            tracing::warn!(req = %self.req, error = %err, "Request failed");
            metrics::record_request_finished("failed");
            let _ = self.events.send(RequestEvent::Failed(err));
        }
    }

    /// Reject every body chunk still waiting for its ack.
    pub(crate) fn reject_pending(&self, err: AdapterError) {
        self.released.store(true, Ordering::SeqCst);
        for (_, pending) in self.acks.drain() {
            pending.reject(err.clone());
        }
    }
}

/// An open request/response exchange.
///
/// Dropping it stops event delivery; the transport may still finish the
/// exchange on its side.
#[derive(Debug)]
pub struct Request {
    shared: Arc<RequestShared>,
    events: mpsc::UnboundedReceiver<RequestEvent>,
    core: Weak<Core>,
    finished: bool,
}

impl Request {
    pub fn handle(&self) -> RequestHandle {
        self.shared.req
    }

    pub fn phase(&self) -> RequestPhase {
        self.shared.phase()
    }

    /// Every phase entered so far, starting with `Opened`.
    pub fn phase_trail(&self) -> Vec<RequestPhase> {
        self.shared.trail()
    }

    /// Response status and headers, once received.
    pub fn response(&self) -> Option<ResponseHead> {
        self.shared.head.lock().expect("response head mutex poisoned").clone()
    }

    /// Send one body chunk. Allowed until `end` is called.
    pub fn send_data(&self, data: impl Into<Bytes>) -> Result<WriteAck, AdapterError> {
        self.shared.send_data(data.into())
    }

    /// Finish the request body. No effect once past the sending phases.
    pub fn end(&self) {
        self.shared.end();
    }

    /// Next event. Returns `None` after `Complete` or `Failed`.
    pub async fn next_event(&mut self) -> Option<RequestEvent> {
        if self.finished {
            return None;
        }
        let event = self.events.recv().await;
        match &event {
            Some(RequestEvent::Complete) | Some(RequestEvent::Failed(_)) | None => self.finished = true,
            _ => {}
        }
        event
    }

    /// Drain the exchange into its head and concatenated body.
    pub async fn collect(&mut self) -> Result<(ResponseHead, Bytes), AdapterError> {
        let mut head = None;
        let mut body = BytesMut::new();
        while let Some(event) = self.next_event().await {
            match event {
                RequestEvent::Response(h) => head = Some(h),
                RequestEvent::Data(chunk) => body.extend_from_slice(&chunk),
                RequestEvent::Complete => {
                    let head = head.or_else(|| self.response()).ok_or(AdapterError::ConnectionClosed)?;
                    return Ok((head, body.freeze()));
                }
                RequestEvent::Failed(err) => return Err(err),
            }
        }
        Err(AdapterError::Shutdown)
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if let Some(core) = self.core.upgrade() {
            core.requests.remove(&self.shared.req);
        }
        self.shared.reject_pending(AdapterError::ConnectionClosed);
    }
}

/// Open a request described by `spec`.
pub(crate) async fn open(core: &Arc<Core>, spec: RequestSpec) -> Result<Request, AdapterError> {
    if let RequestTarget::Service(name) = &spec.target {
        if name.is_empty() {
            return Err(AdapterError::InvalidArgument("service name is empty".into()));
        }
    }
    if core.is_stopped() {
        return Err(AdapterError::Shutdown);
    }

    let (tx, rx) = oneshot::channel();
    let token = core.opens.register(PendingOpen {
        target: spec.target.clone(),
        reply: tx,
    });
    if core.is_stopped() {
        core.opens.discard(token);
        return Err(AdapterError::Shutdown);
    }

    tracing::debug!(to = %spec.target, method = %spec.method, path = %spec.path, token = %token, "Opening request");
    core.provider.request_open(&spec, token);
    rx.await.unwrap_or(Err(AdapterError::Shutdown))
}

/// Handle the open completion for `token`.
pub(crate) fn complete_open(
    core: &Arc<Core>,
    token: Token,
    result: Result<RequestHandle, Status>,
) -> Result<(), AdapterError> {
    let pending = core.opens.unregister(token)?;
    match result {
        Ok(req) => {
            tracing::debug!(to = %pending.target, req = %req, "Request opened");
            let (shared, events) = RequestShared::new(req, Arc::clone(&core.provider));
            core.requests.insert(req, Arc::clone(&shared));
            let request = Request {
                shared,
                events,
                core: Arc::downgrade(core),
                finished: false,
            };
            // A refused request is dropped here, which removes it again.
            let _ = pending.reply.send(Ok(request));
        }
        Err(status) => {
            tracing::warn!(to = %pending.target, status = %status, "Request open failed");
            metrics::record_request_finished("failed");
            pending.fail(AdapterError::transport("request", status));
        }
    }
    Ok(())
}

/// Look up an open request by handle.
pub(crate) fn find(core: &Core, req: RequestHandle) -> Option<Arc<RequestShared>> {
    core.requests.get(&req).map(|entry| Arc::clone(entry.value()))
}
