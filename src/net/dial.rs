//! Outbound connections to a named service.
//!
//! # Data Flow
//! ```text
//! dial(service)
//!     → register PendingDial, token T
//!     → provider.connect(service, mode, T)
//!     ... Connected { T, result } arrives on the event queue
//!     → unregister T
//!     → Ok(conn): wrap in a Socket, track it, resolve the dial
//!     → Err(status): resolve the dial with TransportFailure
//! ```
//!
//! Websocket URLs dial the service named by their host in datagram mode.

use std::sync::Arc;
use tokio::sync::oneshot;
use url::Url;

use crate::adapter::Core;
use crate::error::AdapterError;
use crate::net::socket::{Socket, SocketOrigin, SocketShared};
use crate::transport::{ConnHandle, DialMode, PeerInfo, Status, Token};

/// A dial waiting for its connect completion.
#[derive(Debug)]
pub(crate) struct PendingDial {
    service: String,
    reply: oneshot::Sender<Result<Socket, AdapterError>>,
}

impl PendingDial {
    /// Resolve with an error without touching the transport.
    pub(crate) fn fail(self, err: AdapterError) {
        let _ = self.reply.send(Err(err));
    }
}

/// Open a socket to `service`.
pub(crate) async fn dial(core: &Arc<Core>, service: &str, mode: DialMode) -> Result<Socket, AdapterError> {
    if service.is_empty() {
        return Err(AdapterError::InvalidArgument("service name is empty".into()));
    }
    if core.is_stopped() {
        return Err(AdapterError::Shutdown);
    }

    let (tx, rx) = oneshot::channel();
    let token = core.dials.register(PendingDial {
        service: service.to_string(),
        reply: tx,
    });
    if core.is_stopped() {
        core.dials.discard(token);
        return Err(AdapterError::Shutdown);
    }

    tracing::debug!(service, ?mode, token = %token, "Dialing");
    core.provider.connect(service, mode, token);

    // A dropped sender means the adapter tore down before completion.
    rx.await.unwrap_or(Err(AdapterError::Shutdown))
}

/// Service named by the host of a `ws`, `wss`, `http` or `https` URL.
pub(crate) fn websocket_service(url: &str) -> Result<String, AdapterError> {
    let parsed = Url::parse(url).map_err(|e| AdapterError::InvalidArgument(format!("url {url:?}: {e}")))?;
    if !matches!(parsed.scheme(), "ws" | "wss" | "http" | "https") {
        return Err(AdapterError::InvalidArgument(format!(
            "url {url:?} is not a websocket url"
        )));
    }
    parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AdapterError::InvalidArgument(format!("url {url:?} has no host")))
}

/// Handle the connect completion for `token`.
pub(crate) fn complete(
    core: &Arc<Core>,
    token: Token,
    result: Result<ConnHandle, Status>,
) -> Result<(), AdapterError> {
    let pending = core.dials.unregister(token)?;

    match result {
        Ok(conn) => {
            tracing::info!(service = %pending.service, conn = %conn, "Connected");
            let (shared, socket) = SocketShared::open(
                conn,
                SocketOrigin::Dialed,
                PeerInfo::default(),
                Arc::clone(&core.provider),
                Arc::downgrade(core),
                None,
            );
            core.sockets.insert(conn, shared);
            if let Err(Ok(socket)) = pending.reply.send(Ok(socket)) {
                tracing::debug!(conn = %conn, "Dialer went away, closing socket");
                drop(socket);
            }
        }
        Err(status) => {
            tracing::warn!(service = %pending.service, status = %status, "Connect failed");
            pending.fail(AdapterError::transport("connect", status));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_url_host_names_the_service() {
        assert_eq!(websocket_service("wss://chat/live?room=1").unwrap(), "chat");
        assert_eq!(websocket_service("ws://metrics.internal:8080").unwrap(), "metrics.internal");
    }

    #[test]
    fn websocket_url_needs_a_web_scheme_and_host() {
        assert!(matches!(
            websocket_service("ftp://files/x"),
            Err(AdapterError::InvalidArgument(_))
        ));
        assert!(matches!(
            websocket_service("not a url"),
            Err(AdapterError::InvalidArgument(_))
        ));
    }
}
