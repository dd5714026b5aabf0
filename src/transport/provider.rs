//! The transport provider boundary.

use bytes::Bytes;

use crate::http::RequestSpec;
use crate::transport::{ConnHandle, RequestHandle, Token};

/// How a dialed connection carries data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DialMode {
    /// Ordered byte stream.
    #[default]
    Stream,
    /// Message-oriented connection (websocket-style framing at the provider).
    Datagram,
}

/// An opaque, callback-driven network core.
///
/// Every method is fire-and-forget: it must return without blocking and
/// report its outcome later as a [`TransportEvent`](crate::transport::TransportEvent)
/// through the [`EventSink`](crate::transport::EventSink) the provider was
/// built with. Tokens passed in must be echoed back unchanged.
///
/// Implementations must stop delivering events for a listener token once
/// `close_listener` returns, and for a connection once `close` returns.
pub trait TransportProvider: Send + Sync + 'static {
    /// Open a connection to `service`. Completes with `Connected`, then
    /// `Data` for each inbound chunk.
    fn connect(&self, service: &str, mode: DialMode, token: Token);

    /// Bind `service`. Completes with `Listening`, then `Accepted` and
    /// `AcceptData` carrying `token`.
    fn listen(&self, service: &str, token: Token);

    /// Release a listener bound with `token`.
    fn close_listener(&self, token: Token);

    /// Hand `data` to the connection. Completes with `WriteComplete`.
    fn write(&self, conn: ConnHandle, data: Bytes, token: Token);

    /// Release a connection. The peer observes end-of-stream.
    fn close(&self, conn: ConnHandle);

    /// Start a request/response exchange. Completes with `RequestOpened`,
    /// then `Response` and `ResponseData`.
    fn request_open(&self, spec: &RequestSpec, token: Token);

    /// Send one request body chunk. Completes with `RequestDataAck`.
    fn request_send_data(&self, req: RequestHandle, data: Bytes, token: Token);

    /// No more request body chunks follow.
    fn request_end(&self, req: RequestHandle);

    /// Ask whether the local identity may use `service`. Completes with
    /// `ServiceAvailable`.
    fn service_available(&self, service: &str, token: Token);

    /// Release every provider resource.
    fn shutdown(&self) {}
}
