//! Adapter context: the owner of every registry and table.
//!
//! # Data Flow
//! ```text
//! Application
//!     → Adapter::dial / Adapter::server / Adapter::request / service_available
//!     → Core registers the pending object, calls the provider
//!
//! Provider
//!     → EventSink → EventQueue
//!     → Dispatcher (dispatch.rs) resolves tokens and handles
//!     → pending futures, sockets, listeners, requests
//! ```
//!
//! # Design Decisions
//! - One context per provider instead of process-wide globals
//! - Everything the dispatcher touches lives in `Core`, shared through `Arc`
//! - Owned objects hold `Weak<Core>` so dropping them never keeps the
//!   context alive

mod availability;
pub mod dispatch;

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::AdapterConfig;
use crate::error::AdapterError;
use crate::http::request::{self, PendingOpen, RequestShared};
use crate::http::{parse_header_line, Request, RequestSpec};
use crate::lifecycle::Shutdown;
use crate::net::dial::{self, PendingDial};
use crate::net::listener::ListenerShared;
use crate::net::registry::HandleRegistry;
use crate::net::socket::SocketShared;
use crate::net::{Server, ServerOptions, Socket};
use crate::transport::{
    ConnHandle, DialMode, EventQueue, EventSink, RequestHandle, ServicePermissions, TransportProvider,
};

use availability::PendingQuery;
pub use dispatch::Dispatcher;

/// State shared by the adapter handle, the dispatcher and owned objects.
pub(crate) struct Core {
    pub(crate) config: AdapterConfig,
    pub(crate) provider: Arc<dyn TransportProvider>,
    pub(crate) sink: EventSink,
    pub(crate) listeners: HandleRegistry<Arc<ListenerShared>>,
    pub(crate) dials: HandleRegistry<PendingDial>,
    pub(crate) opens: HandleRegistry<PendingOpen>,
    pub(crate) queries: HandleRegistry<PendingQuery>,
    /// Open sockets, dialed and accepted, by connection handle.
    pub(crate) sockets: DashMap<ConnHandle, Arc<SocketShared>>,
    /// Open requests by request handle.
    pub(crate) requests: DashMap<RequestHandle, Arc<RequestShared>>,
    pub(crate) shutdown: Shutdown,
    stopped: AtomicBool,
}

impl Core {
    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Refuse new work. Returns `false` if already stopped.
    pub(crate) fn stop(&self) -> bool {
        !self.stopped.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn find_socket(&self, conn: ConnHandle) -> Option<Arc<SocketShared>> {
        self.sockets.get(&conn).map(|entry| Arc::clone(entry.value()))
    }
}

/// Handle to a running adapter. Cheap to clone.
#[derive(Clone)]
pub struct Adapter {
    core: Arc<Core>,
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("listeners", &self.core.listeners.len())
            .field("sockets", &self.core.sockets.len())
            .field("requests", &self.core.requests.len())
            .field("stopped", &self.core.is_stopped())
            .finish()
    }
}

impl Adapter {
    /// Build the context around `provider`.
    ///
    /// `queue` must be the queue whose sink the provider delivers to. The
    /// returned dispatcher has to be driven (usually with `tokio::spawn`)
    /// for any operation to complete.
    pub fn new(
        config: AdapterConfig,
        provider: Arc<dyn TransportProvider>,
        queue: EventQueue,
    ) -> (Adapter, Dispatcher) {
        let core = Arc::new(Core {
            config,
            provider,
            sink: queue.sink(),
            listeners: HandleRegistry::new("listener"),
            dials: HandleRegistry::new("dial"),
            opens: HandleRegistry::new("request-open"),
            queries: HandleRegistry::new("service-query"),
            sockets: DashMap::new(),
            requests: DashMap::new(),
            shutdown: Shutdown::new(),
            stopped: AtomicBool::new(false),
        });
        let dispatcher = Dispatcher::new(Arc::clone(&core), queue);
        tracing::debug!("Adapter initialized");
        (Adapter { core }, dispatcher)
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.core.config
    }

    /// Connect to `service` in the configured dial mode.
    pub async fn dial(&self, service: &str) -> Result<Socket, AdapterError> {
        dial::dial(&self.core, service, self.core.config.dial.mode).await
    }

    /// Connect to `service` in an explicit mode.
    pub async fn dial_with(&self, service: &str, mode: DialMode) -> Result<Socket, AdapterError> {
        dial::dial(&self.core, service, mode).await
    }

    /// Open a websocket-style connection to the service named by `url`'s host.
    ///
    /// Dials in datagram mode; path and query are not sent.
    pub async fn websocket(&self, url: &str) -> Result<Socket, AdapterError> {
        let service = dial::websocket_service(url)?;
        dial::dial(&self.core, &service, DialMode::Datagram).await
    }

    /// New server with options from configuration.
    pub fn server(&self) -> Server {
        self.server_with(ServerOptions::from(&self.core.config.listener))
    }

    pub fn server_with(&self, options: ServerOptions) -> Server {
        Server::new(Arc::clone(&self.core), options)
    }

    /// Open a request/response exchange.
    ///
    /// Configured default headers are added unless `spec` already sets them.
    pub async fn request(&self, mut spec: RequestSpec) -> Result<Request, AdapterError> {
        for line in &self.core.config.request.default_headers {
            let (name, value) = parse_header_line(line)?;
            if !spec.headers.contains_key(&name) {
                spec.headers.insert(name, value);
            }
        }
        request::open(&self.core, spec).await
    }

    /// Ask whether this identity may dial or bind `service`.
    pub async fn service_available(&self, service: &str) -> Result<ServicePermissions, AdapterError> {
        availability::query(&self.core, service).await
    }

    /// Stop the dispatcher and tear everything down.
    pub fn shutdown(&self) {
        tracing::info!("Adapter shutdown requested");
        self.core.shutdown.trigger();
    }

    pub fn is_shut_down(&self) -> bool {
        self.core.is_stopped()
    }

    /// Sockets not yet closed, dialed and accepted.
    pub fn open_sockets(&self) -> usize {
        self.core.sockets.len()
    }

    /// Listeners currently registered.
    pub fn active_listeners(&self) -> usize {
        self.core.listeners.len()
    }

    /// Requests opened and not yet dropped.
    pub fn open_requests(&self) -> usize {
        self.core.requests.len()
    }
}
