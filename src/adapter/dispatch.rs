//! Event dispatcher: the only consumer of the event queue.
//!
//! # Responsibilities
//! - Drain provider completions in arrival order
//! - Resolve each completion's token or handle to its owner
//! - Stop on the first consistency fault and on shutdown
//! - Tear down: fail pending operations, close sockets and listeners
//!
//! # Design Decisions
//! - Token misses are fatal; handle misses are not, because a socket or
//!   request may legitimately close while completions for it are queued
//! - Listener retirement travels through the same queue as completions

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::adapter::{availability, Core};
use crate::error::AdapterError;
use crate::http::request;
use crate::net::dial;
use crate::observability::metrics;
use crate::transport::event::Dispatch;
use crate::transport::{EventQueue, TransportEvent};

/// Drives an adapter by handling queued provider completions.
pub struct Dispatcher {
    core: Arc<Core>,
    queue: EventQueue,
    shutdown: broadcast::Receiver<()>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("stopped", &self.core.is_stopped())
            .finish()
    }
}

impl Dispatcher {
    pub(crate) fn new(core: Arc<Core>, queue: EventQueue) -> Self {
        let shutdown = core.shutdown.subscribe();
        Self {
            core,
            queue,
            shutdown,
        }
    }

    /// Handle events until shutdown or a consistency fault.
    ///
    /// Always tears the adapter down before returning. A fault is returned
    /// as the error.
    pub async fn run(mut self) -> Result<(), AdapterError> {
        tracing::debug!("Dispatcher started");

        let result = loop {
            tokio::select! {
                biased;

                _ = self.shutdown.recv() => {
                    tracing::info!("Dispatcher received shutdown signal");
                    break Ok(());
                }
                next = self.queue.next() => {
                    let Some(item) = next else {
                        break Ok(());
                    };
                    if let Err(e) = self.dispatch(item) {
                        tracing::error!(error = %e, "Dispatcher stopping");
                        break Err(e);
                    }
                }
            }
        };

        self.teardown();
        result
    }

    /// Handle every event already queued, without waiting for more.
    ///
    /// Returns how many were handled. Stops at the first fault, which is
    /// returned without tearing down.
    pub fn run_pending(&mut self) -> Result<usize, AdapterError> {
        let mut handled = 0;
        while let Some(item) = self.queue.try_next() {
            self.dispatch(item)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Handle one provider completion directly, bypassing the queue.
    pub fn handle(&self, event: TransportEvent) -> Result<(), AdapterError> {
        self.dispatch(Dispatch::Transport(event))
    }

    fn dispatch(&self, item: Dispatch) -> Result<(), AdapterError> {
        match item {
            Dispatch::Transport(event) => self.on_event(event),
            Dispatch::RetireListener { token, done } => {
                let listener = self.core.listeners.unregister(token)?;
                listener.retire("listener closed");
                metrics::record_listener_released();
                tracing::debug!(token = %token, "Listener retired");
                let _ = done.send(());
                Ok(())
            }
        }
    }

    fn on_event(&self, event: TransportEvent) -> Result<(), AdapterError> {
        let core = &self.core;
        match event {
            TransportEvent::Connected { token, result } => dial::complete(core, token, result),

            TransportEvent::Data { conn, data } => {
                match core.find_socket(conn) {
                    Some(socket) => socket.capture_data(data),
                    None => tracing::trace!(conn = %conn, len = data.len(), "Data for closed socket dropped"),
                }
                Ok(())
            }

            TransportEvent::Listening { token, status } => {
                let listener = core.listeners.lookup(token)?;
                if listener.complete_listen(status) {
                    core.listeners.unregister(token)?;
                }
                Ok(())
            }

            TransportEvent::Accepted {
                token,
                client,
                status,
                peer,
            } => {
                let listener = core.listeners.lookup(token)?;
                if status.is_ok() {
                    listener.accept(core, client, peer);
                } else {
                    tracing::warn!(token = %token, status = %status, "Accept failed");
                }
                Ok(())
            }

            TransportEvent::AcceptData {
                token,
                client,
                data,
            } => {
                core.listeners.lookup(token)?.capture(client, data);
                Ok(())
            }

            TransportEvent::WriteComplete { conn, token, status } => match core.find_socket(conn) {
                Some(socket) => socket.complete_write(token, status),
                None => {
                    // Closing the socket already rejected the write.
                    tracing::trace!(conn = %conn, token = %token, "Write completion for closed socket");
                    Ok(())
                }
            },

            TransportEvent::RequestOpened { token, result } => request::complete_open(core, token, result),

            TransportEvent::Response { req, result } => {
                match request::find(core, req) {
                    Some(shared) => shared.on_response(result),
                    None => tracing::trace!(req = %req, "Response for dropped request"),
                }
                Ok(())
            }

            TransportEvent::ResponseData { req, data } => {
                match request::find(core, req) {
                    Some(shared) => shared.on_data(data),
                    None => tracing::trace!(req = %req, len = data.len(), "Body chunk for dropped request"),
                }
                Ok(())
            }

            TransportEvent::RequestDataAck { req, token, status } => match request::find(core, req) {
                Some(shared) => shared.complete_ack(token, status),
                None => {
                    tracing::trace!(req = %req, token = %token, "Body ack for dropped request");
                    Ok(())
                }
            },

            TransportEvent::ServiceAvailable { token, result } => availability::complete(core, token, result),
        }
    }

    fn teardown(&self) {
        let core = &self.core;
        if !core.stop() {
            return;
        }
        core.shutdown.trigger();

        for (_, pending) in core.dials.drain() {
            pending.fail(AdapterError::Shutdown);
        }
        for (_, pending) in core.opens.drain() {
            pending.fail(AdapterError::Shutdown);
        }
        for (_, pending) in core.queries.drain() {
            pending.fail(AdapterError::Shutdown);
        }

        for (token, listener) in core.listeners.drain() {
            core.provider.close_listener(token);
            listener.shut_down();
            metrics::record_listener_released();
        }

        let sockets: Vec<_> = core.sockets.iter().map(|e| Arc::clone(e.value())).collect();
        for socket in sockets {
            socket.mark_closed("adapter shutdown");
        }

        let requests: Vec<_> = core.requests.iter().map(|e| Arc::clone(e.value())).collect();
        for shared in requests {
            shared.fail(AdapterError::Shutdown);
            shared.reject_pending(AdapterError::Shutdown);
        }

        core.provider.shutdown();
        tracing::info!("Adapter torn down");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.teardown();
    }
}
