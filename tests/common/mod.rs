//! Shared utilities for integration tests.

#![allow(dead_code)]

use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use overlay_bridge::net::{ListenArgs, Server};
use overlay_bridge::transport::{
    event_queue, ConnHandle, DialMode, EventSink, LoopbackProvider, RequestHandle, Token,
    TransportProvider,
};
use overlay_bridge::{Adapter, AdapterConfig, AdapterError, Dispatcher, RequestSpec};

/// One call the adapter made into a provider.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect { service: String, mode: DialMode, token: Token },
    Listen { service: String, token: Token },
    CloseListener(Token),
    Write { conn: ConnHandle, data: Bytes, token: Token },
    Close(ConnHandle),
    RequestOpen { path: String, token: Token },
    RequestData { req: RequestHandle, data: Bytes, token: Token },
    RequestEnd(RequestHandle),
    ServiceAvailable { service: String, token: Token },
    Shutdown,
}

/// Provider that records calls and never answers on its own.
///
/// Tests play the transport by pushing events through the sink.
#[derive(Default)]
pub struct ScriptedProvider {
    calls: Mutex<Vec<Call>>,
    close_delay: Mutex<Option<Duration>>,
}

impl ScriptedProvider {
    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    /// Make every `close` block the calling thread for `delay`.
    pub fn slow_close(&self, delay: Duration) {
        *self.close_delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Wait until a recorded call matches `pick`, yielding to other tasks.
    pub async fn wait_for<T>(&self, pick: impl Fn(&Call) -> Option<T>) -> T {
        for _ in 0..10_000 {
            if let Some(found) = self.calls.lock().unwrap().iter().find_map(&pick) {
                return found;
            }
            tokio::task::yield_now().await;
        }
        panic!("expected provider call never happened; saw {:?}", self.calls());
    }

    pub async fn connect_token(&self, service: &str) -> Token {
        self.wait_for(|c| match c {
            Call::Connect { service: s, token, .. } if s == service => Some(*token),
            _ => None,
        })
        .await
    }

    pub async fn listen_token(&self, service: &str) -> Token {
        self.wait_for(|c| match c {
            Call::Listen { service: s, token } if s == service => Some(*token),
            _ => None,
        })
        .await
    }
}

impl TransportProvider for ScriptedProvider {
    fn connect(&self, service: &str, mode: DialMode, token: Token) {
        self.record(Call::Connect {
            service: service.to_string(),
            mode,
            token,
        });
    }

    fn listen(&self, service: &str, token: Token) {
        self.record(Call::Listen {
            service: service.to_string(),
            token,
        });
    }

    fn close_listener(&self, token: Token) {
        self.record(Call::CloseListener(token));
    }

    fn write(&self, conn: ConnHandle, data: Bytes, token: Token) {
        self.record(Call::Write { conn, data, token });
    }

    fn close(&self, conn: ConnHandle) {
        let delay = *self.close_delay.lock().unwrap();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.record(Call::Close(conn));
    }

    fn request_open(&self, spec: &RequestSpec, token: Token) {
        self.record(Call::RequestOpen {
            path: spec.path.clone(),
            token,
        });
    }

    fn request_send_data(&self, req: RequestHandle, data: Bytes, token: Token) {
        self.record(Call::RequestData { req, data, token });
    }

    fn request_end(&self, req: RequestHandle) {
        self.record(Call::RequestEnd(req));
    }

    fn service_available(&self, service: &str, token: Token) {
        self.record(Call::ServiceAvailable {
            service: service.to_string(),
            token,
        });
    }

    fn shutdown(&self) {
        self.record(Call::Shutdown);
    }
}

/// Adapter over a scripted provider, with the dispatcher left to the test.
pub struct Scripted {
    pub adapter: Adapter,
    pub dispatcher: Dispatcher,
    pub sink: EventSink,
    pub provider: Arc<ScriptedProvider>,
}

pub fn scripted() -> Scripted {
    let (sink, queue) = event_queue();
    let provider = Arc::new(ScriptedProvider::default());
    let (adapter, dispatcher) = Adapter::new(AdapterConfig::default(), provider.clone(), queue);
    Scripted {
        adapter,
        dispatcher,
        sink,
        provider,
    }
}

/// Adapter over the loopback provider with a running dispatcher.
pub struct Loopback {
    pub adapter: Adapter,
    pub provider: Arc<LoopbackProvider>,
    pub dispatch: JoinHandle<Result<(), AdapterError>>,
}

pub fn loopback(config: AdapterConfig) -> Loopback {
    let (sink, queue) = event_queue();
    let provider = Arc::new(LoopbackProvider::new(sink).with_identity("test-client"));
    let (adapter, dispatcher) = Adapter::new(config, provider.clone(), queue);
    Loopback {
        adapter,
        provider,
        dispatch: tokio::spawn(dispatcher.run()),
    }
}

/// Bind `service` and wait until the transport confirms it.
pub async fn bind(adapter: &Adapter, service: &str) -> Server {
    let mut server = adapter.server();
    let (tx, rx) = tokio::sync::oneshot::channel();
    server
        .listen(
            service,
            ListenArgs::callback(move |result| {
                let _ = tx.send(result);
            }),
        )
        .unwrap();
    rx.await.unwrap().unwrap();
    server
}
