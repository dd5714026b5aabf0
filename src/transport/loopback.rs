//! In-process transport provider.
//!
//! Services live in a name table. Dialing a bound service creates a linked
//! pair of connection handles: the dialer's end is reported through
//! `Connected`, the listener's end through `Accepted`. Bytes written on one
//! end arrive on the other; closing one end delivers end-of-stream to the
//! other. Request/response exchanges are answered by responders registered
//! per service name.
//!
//! All state sits behind one mutex and events are queued while it is held,
//! so the queue order always matches the order state changed in.

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::http::{RequestSpec, RequestTarget, ResponseHead};
use crate::transport::{
    ConnHandle, DialMode, EventSink, PeerInfo, RequestHandle, ServicePermissions, Status, Token,
    TransportEvent, TransportProvider,
};

/// A request as seen by a loopback responder.
#[derive(Debug, Clone)]
pub struct LoopbackRequest {
    pub service: String,
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// What a responder answers with.
#[derive(Debug, Clone)]
pub struct LoopbackResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    /// Body chunks, delivered one `ResponseData` each.
    pub chunks: Vec<Bytes>,
}

impl LoopbackResponse {
    pub fn new(status: u16) -> Self {
        let reason = http::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Self {
            status,
            reason,
            headers: Vec::new(),
            chunks: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn chunk(mut self, data: impl Into<Bytes>) -> Self {
        self.chunks.push(data.into());
        self
    }
}

/// Answers requests sent to one service.
pub type Responder = Arc<dyn Fn(&LoopbackRequest) -> LoopbackResponse + Send + Sync>;

/// Where inbound bytes for one end of a link are reported.
#[derive(Debug, Clone, Copy)]
enum Route {
    Dialed,
    Accepted(Token),
}

#[derive(Debug, Clone, Copy)]
struct Endpoint {
    peer: ConnHandle,
    route: Route,
}

#[derive(Debug)]
struct Exchange {
    service: String,
    method: Method,
    path: String,
    headers: HeaderMap,
    body: BytesMut,
}

#[derive(Default)]
struct LoopbackState {
    /// Bound service name → listener token.
    services: HashMap<String, Token>,
    listeners: HashMap<Token, String>,
    links: HashMap<ConnHandle, Endpoint>,
    responders: HashMap<String, Responder>,
    exchanges: HashMap<RequestHandle, Exchange>,
    grants: HashMap<String, ServicePermissions>,
    shut_down: bool,
}

/// Transport provider that connects services within one process.
pub struct LoopbackProvider {
    sink: EventSink,
    identity: Option<String>,
    state: Mutex<LoopbackState>,
    next_conn: AtomicU64,
    next_req: AtomicU64,
}

impl std::fmt::Debug for LoopbackProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackProvider")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl LoopbackProvider {
    pub fn new(sink: EventSink) -> Self {
        Self {
            sink,
            identity: None,
            state: Mutex::new(LoopbackState::default()),
            next_conn: AtomicU64::new(1),
            next_req: AtomicU64::new(1),
        }
    }

    /// Caller id reported to listeners for every dial.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Answer requests for `service` with `responder`.
    pub fn respond<F>(&self, service: &str, responder: F)
    where
        F: Fn(&LoopbackRequest) -> LoopbackResponse + Send + Sync + 'static,
    {
        self.lock().responders.insert(service.to_string(), Arc::new(responder));
    }

    /// Override the permissions reported for `service`.
    pub fn grant(&self, service: &str, permissions: ServicePermissions) {
        self.lock().grants.insert(service.to_string(), permissions);
    }

    /// Whether `service` is currently bound.
    pub fn is_bound(&self, service: &str) -> bool {
        self.lock().services.contains_key(service)
    }

    /// Connections currently linked, both ends counted.
    pub fn open_links(&self) -> usize {
        self.lock().links.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LoopbackState> {
        self.state.lock().expect("loopback state mutex poisoned")
    }

    fn conn(&self) -> ConnHandle {
        ConnHandle::new(self.next_conn.fetch_add(1, Ordering::Relaxed))
    }

    fn emit(&self, event: TransportEvent) {
        if !self.sink.deliver(event) {
            tracing::trace!("Loopback event dropped, adapter gone");
        }
    }

    /// Report `data` arriving at the end `conn`.
    fn arrive(&self, conn: ConnHandle, route: Route, data: Bytes) {
        match route {
            Route::Dialed => self.emit(TransportEvent::Data { conn, data }),
            Route::Accepted(token) => self.emit(TransportEvent::AcceptData {
                token,
                client: conn,
                data,
            }),
        }
    }

    /// Unlink `conn` and send end-of-stream to its peer if still linked.
    fn unlink(&self, state: &mut LoopbackState, conn: ConnHandle) {
        let Some(endpoint) = state.links.remove(&conn) else {
            return;
        };
        if let Some(peer) = state.links.get(&endpoint.peer) {
            self.arrive(endpoint.peer, peer.route, Bytes::new());
        }
    }

    fn respond_to(&self, req: RequestHandle, responder: Responder, request: LoopbackRequest) {
        let response = responder(&request);
        let head = ResponseHead::from_parts(
            response.status,
            &response.reason,
            response.headers.iter().map(|(n, v)| (n.as_str(), v.as_str())),
        );
        match head {
            Ok(head) => {
                self.emit(TransportEvent::Response { req, result: Ok(head) });
                for data in response.chunks.into_iter().filter(|c| !c.is_empty()) {
                    self.emit(TransportEvent::ResponseData { req, data });
                }
                self.emit(TransportEvent::ResponseData {
                    req,
                    data: Bytes::new(),
                });
            }
            Err(e) => {
                tracing::warn!(service = %request.service, error = %e, "Responder produced an invalid head");
                self.emit(TransportEvent::Response {
                    req,
                    result: Err(Status::FAILURE),
                });
            }
        }
    }
}

impl TransportProvider for LoopbackProvider {
    fn connect(&self, service: &str, mode: DialMode, token: Token) {
        let mut state = self.lock();
        let listener = match state.services.get(service) {
            Some(listener) if !state.shut_down => *listener,
            _ => {
                self.emit(TransportEvent::Connected {
                    token,
                    result: Err(Status::SERVICE_UNAVAILABLE),
                });
                return;
            }
        };

        let client = self.conn();
        let server = self.conn();
        state.links.insert(
            client,
            Endpoint {
                peer: server,
                route: Route::Dialed,
            },
        );
        state.links.insert(
            server,
            Endpoint {
                peer: client,
                route: Route::Accepted(listener),
            },
        );
        tracing::trace!(service, ?mode, client = %client, server = %server, "Loopback link created");

        self.emit(TransportEvent::Connected {
            token,
            result: Ok(client),
        });
        self.emit(TransportEvent::Accepted {
            token: listener,
            client: server,
            status: Status::OK,
            peer: PeerInfo {
                caller_id: self.identity.clone(),
                app_data: None,
            },
        });
    }

    fn listen(&self, service: &str, token: Token) {
        let mut state = self.lock();
        let status = if state.shut_down || state.services.contains_key(service) {
            Status::INVALID_STATE
        } else {
            state.services.insert(service.to_string(), token);
            state.listeners.insert(token, service.to_string());
            Status::OK
        };
        self.emit(TransportEvent::Listening { token, status });
    }

    fn close_listener(&self, token: Token) {
        let mut state = self.lock();
        if let Some(service) = state.listeners.remove(&token) {
            state.services.remove(&service);
        }
        // No events for this token may follow: cut its accepted ends now.
        let accepted: Vec<ConnHandle> = state
            .links
            .iter()
            .filter(|(_, e)| matches!(e.route, Route::Accepted(t) if t == token))
            .map(|(conn, _)| *conn)
            .collect();
        for conn in accepted {
            self.unlink(&mut state, conn);
        }
    }

    fn write(&self, conn: ConnHandle, data: Bytes, token: Token) {
        let state = self.lock();
        let peer = state
            .links
            .get(&conn)
            .and_then(|e| state.links.get(&e.peer).map(|p| (e.peer, p.route)));

        let status = match peer {
            Some((peer, route)) => {
                let len = data.len();
                self.arrive(peer, route, data);
                Status::new(len as i64)
            }
            None => Status::CONN_CLOSED,
        };
        self.emit(TransportEvent::WriteComplete { conn, token, status });
    }

    fn close(&self, conn: ConnHandle) {
        let mut state = self.lock();
        self.unlink(&mut state, conn);
    }

    fn request_open(&self, spec: &RequestSpec, token: Token) {
        let mut state = self.lock();
        let service = match &spec.target {
            RequestTarget::Service(name) => name.clone(),
            RequestTarget::Intercept(url) => url.host_str().unwrap_or_default().to_string(),
        };
        if state.shut_down || !state.responders.contains_key(&service) {
            self.emit(TransportEvent::RequestOpened {
                token,
                result: Err(Status::SERVICE_UNAVAILABLE),
            });
            return;
        }

        let req = RequestHandle::new(self.next_req.fetch_add(1, Ordering::Relaxed));
        state.exchanges.insert(
            req,
            Exchange {
                service,
                method: spec.method.clone(),
                path: spec.path.clone(),
                headers: spec.headers.clone(),
                body: BytesMut::new(),
            },
        );
        self.emit(TransportEvent::RequestOpened {
            token,
            result: Ok(req),
        });
    }

    fn request_send_data(&self, req: RequestHandle, data: Bytes, token: Token) {
        let mut state = self.lock();
        let status = match state.exchanges.get_mut(&req) {
            Some(exchange) => {
                exchange.body.extend_from_slice(&data);
                Status::new(data.len() as i64)
            }
            None => Status::CONN_CLOSED,
        };
        self.emit(TransportEvent::RequestDataAck { req, token, status });
    }

    fn request_end(&self, req: RequestHandle) {
        let (responder, request) = {
            let mut state = self.lock();
            let Some(exchange) = state.exchanges.remove(&req) else {
                return;
            };
            let Some(responder) = state.responders.get(&exchange.service).cloned() else {
                return;
            };
            let request = LoopbackRequest {
                service: exchange.service,
                method: exchange.method,
                path: exchange.path,
                headers: exchange.headers,
                body: exchange.body.freeze(),
            };
            (responder, request)
        };
        self.respond_to(req, responder, request);
    }

    fn service_available(&self, service: &str, token: Token) {
        let state = self.lock();
        let result = if let Some(grant) = state.grants.get(service) {
            Ok(*grant)
        } else if state.services.contains_key(service) || state.responders.contains_key(service) {
            Ok(ServicePermissions::DIAL | ServicePermissions::BIND)
        } else {
            Err(Status::SERVICE_UNAVAILABLE)
        };
        self.emit(TransportEvent::ServiceAvailable { token, result });
    }

    fn shutdown(&self) {
        let mut state = self.lock();
        state.shut_down = true;
        state.services.clear();
        state.listeners.clear();
        state.links.clear();
        state.exchanges.clear();
        tracing::debug!("Loopback provider shut down");
    }
}
