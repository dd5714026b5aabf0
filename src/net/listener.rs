//! Service listener: one bind, many accepted sockets.
//!
//! # Responsibilities
//! - Register the listener before asking the provider to bind, because the
//!   registry token is the only key the provider echoes back
//! - Turn each accept completion into a `Socket` delivered through `accept()`
//! - Route accepted clients' data by client handle
//! - Tear down: release the bind, retire the token, close and drain clients
//!
//! # State Transitions
//! ```text
//! Created → Listening: listen()
//! Listening → Closed: close(), drop, or failed bind
//! ```

use dashmap::DashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::adapter::Core;
use crate::config::ListenerConfig;
use crate::error::AdapterError;
use crate::net::connection::ConnectionTracker;
use crate::net::listen_args::{ListenArgs, ListenCallback, ListenOptions};
use crate::net::socket::{Socket, SocketOrigin, SocketShared};
use crate::observability::metrics;
use crate::transport::{ConnHandle, PeerInfo, Status, Token};

/// Listener lifecycle state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Created = 0,
    Listening = 1,
    Closed = 2,
}

impl From<u8> for ListenerState {
    fn from(val: u8) -> Self {
        match val {
            0 => ListenerState::Created,
            1 => ListenerState::Listening,
            _ => ListenerState::Closed,
        }
    }
}

/// Per-server connection options.
///
/// Carried for consumers that inspect them; the adapter does not enforce them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    pub allow_half_open: bool,
    pub pause_on_connect: bool,
    pub no_delay: bool,
    pub keep_alive: bool,
    pub keep_alive_initial_delay: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions::from(&ListenerConfig::default())
    }
}

impl From<&ListenerConfig> for ServerOptions {
    fn from(config: &ListenerConfig) -> Self {
        Self {
            allow_half_open: config.allow_half_open,
            pause_on_connect: config.pause_on_connect,
            no_delay: config.no_delay,
            keep_alive: config.keep_alive,
            keep_alive_initial_delay: Duration::from_secs(config.keep_alive_initial_delay_ms / 1000),
        }
    }
}

/// Where a listening server is bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAddress {
    pub service: String,
    pub token: Token,
}

/// Listener state shared with the dispatcher.
pub(crate) struct ListenerShared {
    token: Token,
    service: String,
    options: ListenOptions,
    state: AtomicU8,
    on_listening: Mutex<Option<ListenCallback>>,
    /// Feeds `Server::accept`; taken once the listener stops accepting.
    connections: Mutex<Option<mpsc::UnboundedSender<Socket>>>,
    /// Accepted sockets still open, keyed by client handle.
    clients: DashMap<ConnHandle, Arc<SocketShared>>,
    tracker: ConnectionTracker,
}

impl std::fmt::Debug for ListenerShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerShared")
            .field("token", &self.token)
            .field("service", &self.service)
            .field("state", &self.state())
            .field("clients", &self.clients.len())
            .finish()
    }
}

impl ListenerShared {
    pub(crate) fn state(&self) -> ListenerState {
        ListenerState::from(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ListenerState) -> ListenerState {
        ListenerState::from(self.state.swap(state as u8, Ordering::SeqCst))
    }

    /// Bind completed. Returns `true` when the bind failed on a listener
    /// nobody has closed yet, which the caller must then unregister.
    pub(crate) fn complete_listen(&self, status: Status) -> bool {
        let callback = self
            .on_listening
            .lock()
            .expect("listen callback mutex poisoned")
            .take();

        let mut release = false;
        let result = if status.is_ok() {
            tracing::info!(service = %self.service, token = %self.token, "Listener bound");
            Ok(())
        } else {
            tracing::warn!(service = %self.service, token = %self.token, status = %status, "Bind failed");
            // A close already in flight retires the token itself.
            release = self.set_state(ListenerState::Closed) == ListenerState::Listening;
            if release {
                self.stop_accepting();
                metrics::record_listener_released();
            }
            Err(AdapterError::transport("listen", status))
        };

        if let Some(callback) = callback {
            callback(result);
        }
        release
    }

    /// Mark closed without going through the owning server.
    pub(crate) fn shut_down(&self) {
        self.set_state(ListenerState::Closed);
        self.retire("adapter shutdown");
    }

    /// End `accept()` and close every accepted socket still open.
    pub(crate) fn retire(&self, reason: &'static str) {
        self.stop_accepting();
        self.close_clients(reason);
    }

    fn stop_accepting(&self) {
        self.connections
            .lock()
            .expect("listener connections mutex poisoned")
            .take();
    }

    /// Wrap an accepted client and hand it to the server's owner.
    pub(crate) fn accept(&self, core: &Arc<Core>, client: ConnHandle, peer: PeerInfo) {
        let connections = self
            .connections
            .lock()
            .expect("listener connections mutex poisoned")
            .clone();
        let Some(connections) = connections.filter(|_| self.state() != ListenerState::Closed) else {
            tracing::debug!(token = %self.token, client = %client, "Refusing client on closed listener");
            core.provider.close(client);
            return;
        };

        tracing::debug!(
            service = %self.service,
            client = %client,
            caller_id = ?peer.caller_id,
            "Client accepted"
        );
        let guard = self.tracker.track(client);
        let (shared, socket) = SocketShared::open(
            client,
            SocketOrigin::Accepted(self.token),
            peer,
            Arc::clone(&core.provider),
            Arc::downgrade(core),
            Some(guard),
        );
        core.sockets.insert(client, Arc::clone(&shared));
        self.clients.insert(client, shared);

        if let Err(mpsc::error::SendError(socket)) = connections.send(socket) {
            // Nobody is accepting anymore; dropping the socket closes it.
            drop(socket);
        }
    }

    /// Forward inbound bytes to the accepted client `client`.
    pub(crate) fn capture(&self, client: ConnHandle, data: bytes::Bytes) {
        // Clone out of the map first: an empty chunk closes the socket, which
        // removes it from `clients`.
        let socket = self.clients.get(&client).map(|entry| Arc::clone(entry.value()));
        match socket {
            Some(socket) => socket.capture_data(data),
            None => tracing::trace!(
                token = %self.token,
                client = %client,
                len = data.len(),
                "Dropping data for closed client"
            ),
        }
    }

    pub(crate) fn remove_client(&self, client: ConnHandle) {
        self.clients.remove(&client);
    }

    /// Close every accepted socket still open.
    pub(crate) fn close_clients(&self, reason: &'static str) {
        let open: Vec<Arc<SocketShared>> = self
            .clients
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for socket in open {
            socket.mark_closed(reason);
        }
    }
}

/// Accepts connections for one service name.
pub struct Server {
    core: Arc<Core>,
    options: ServerOptions,
    listener: Option<Arc<ListenerShared>>,
    incoming: Option<mpsc::UnboundedReceiver<Socket>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("options", &self.options)
            .field("listener", &self.listener)
            .finish()
    }
}

impl Server {
    pub(crate) fn new(core: Arc<Core>, options: ServerOptions) -> Self {
        Self {
            core,
            options,
            listener: None,
            incoming: None,
        }
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Bind `service`.
    ///
    /// Returns once the bind is requested; the outcome is reported to the
    /// callback carried in `args`.
    pub fn listen(&mut self, service: &str, args: impl Into<ListenArgs>) -> Result<(), AdapterError> {
        if self.is_listening() {
            return Err(AdapterError::AlreadyListening);
        }
        let (options, callback) = args.into().normalize();
        let (tx, rx) = mpsc::unbounded_channel();

        let (token, shared) = self.core.listeners.register_with(|token| {
            Arc::new(ListenerShared {
                token,
                service: service.to_string(),
                options,
                state: AtomicU8::new(ListenerState::Listening as u8),
                on_listening: Mutex::new(Some(callback)),
                connections: Mutex::new(Some(tx)),
                clients: DashMap::new(),
                tracker: ConnectionTracker::new(),
            })
        });
        self.listener = Some(shared);
        self.incoming = Some(rx);

        metrics::record_listener_bound();
        tracing::debug!(service, token = %token, "Bind requested");
        self.core.provider.listen(service, token);
        Ok(())
    }

    /// Next accepted connection. Returns `None` once the server is closed.
    pub async fn accept(&mut self) -> Option<Socket> {
        self.incoming.as_mut()?.recv().await
    }

    pub fn state(&self) -> ListenerState {
        self.listener
            .as_ref()
            .map(|l| l.state())
            .unwrap_or(ListenerState::Created)
    }

    pub fn is_listening(&self) -> bool {
        self.state() == ListenerState::Listening
    }

    /// Bound service and token, or `None` before `listen` and after `close`.
    pub fn address(&self) -> Option<ServiceAddress> {
        let listener = self.listener.as_ref()?;
        if listener.state() != ListenerState::Listening {
            return None;
        }
        Some(ServiceAddress {
            service: listener.service.clone(),
            token: listener.token,
        })
    }

    /// Options given to `listen`.
    pub fn listen_options(&self) -> Option<&ListenOptions> {
        self.listener.as_ref().map(|l| &l.options)
    }

    /// Accepted sockets not yet closed.
    pub fn connections(&self) -> u64 {
        self.listener
            .as_ref()
            .map(|l| l.tracker.active_count())
            .unwrap_or(0)
    }

    /// Stop listening, close accepted clients and wait for them to drain.
    ///
    /// Fails with `NotListening` when there is no active bind.
    pub async fn close(&mut self) -> Result<(), AdapterError> {
        let listener = match self.listener.take() {
            Some(listener) if listener.set_state(ListenerState::Closed) == ListenerState::Listening => {
                listener
            }
            _ => return Err(AdapterError::NotListening),
        };
        self.incoming = None;

        let token = listener.token;
        self.core.provider.close_listener(token);

        // Retire through the event queue so events queued before the close
        // still find the listener.
        let (done_tx, done_rx) = oneshot::channel();
        if self.core.sink.retire_listener(token, done_tx) {
            let _ = done_rx.await;
        } else {
            listener.retire("listener closed");
            self.core.listeners.discard(token);
        }

        listener.tracker.wait_drained().await;
        tracing::debug!(service = %listener.service, token = %token, "Listener closed");
        Ok(())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        if listener.set_state(ListenerState::Closed) != ListenerState::Listening {
            return;
        }
        self.core.provider.close_listener(listener.token);
        let (done_tx, _) = oneshot::channel();
        if !self.core.sink.retire_listener(listener.token, done_tx) {
            listener.retire("listener dropped");
            self.core.listeners.discard(listener.token);
        }
    }
}
