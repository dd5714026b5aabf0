//! Overlay bridge: socket, server and request adapters over an opaque,
//! completion-driven overlay transport.
//!
//! # Architecture Overview
//!
//! ```text
//!   Application                          Transport provider
//!   ───────────                          ──────────────────
//!   Adapter::dial ──────────┐            connect / listen / write /
//!   Adapter::server ────────┼──────────▶ close / request_* (fire-and-forget,
//!   Adapter::request ───────┘            token or handle attached)
//!                                                  │
//!                                                  ▼
//!   Socket / Server / Request ◀── Dispatcher ◀── EventQueue ◀── EventSink
//!   (futures, event streams)      (token → object
//!                                  via registries)
//! ```
//!
//! # Modules
//! - `transport`: provider trait, handles, events, loopback provider
//! - `net`: handle registry, sockets, dial, listeners
//! - `http`: request/response multiplexer
//! - `adapter`: context and dispatcher
//! - `config`, `observability`, `lifecycle`: ambient concerns

pub mod adapter;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod transport;

pub use adapter::{Adapter, Dispatcher};
pub use config::AdapterConfig;
pub use error::AdapterError;
pub use http::{Request, RequestEvent, RequestPhase, RequestSpec, ResponseHead};
pub use lifecycle::Shutdown;
pub use net::{ListenArgs, ListenOptions, Server, ServerOptions, Socket, SocketEvent};
pub use transport::{event_queue, LoopbackProvider, TransportEvent, TransportProvider};
