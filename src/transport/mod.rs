//! Transport provider boundary.
//!
//! # Data Flow
//! ```text
//! adapter operation (dial, listen, write, request...)
//!     → provider.rs (fire-and-forget call carrying a Token or handle)
//!     → provider works on its own threads
//!     → event.rs (TransportEvent pushed through EventSink)
//!     → single ordered EventQueue
//!     → adapter dispatcher
//! ```
//!
//! # Design Decisions
//! - The provider never sees adapter objects, only tokens and handles
//! - Every completion goes through one queue, so per-connection order holds
//! - loopback.rs is an in-process provider for demos and tests

pub mod event;
pub mod handle;
pub mod loopback;
pub mod provider;

pub use event::{event_queue, EventQueue, EventSink, TransportEvent};
pub use handle::{ConnHandle, PeerInfo, RequestHandle, ServicePermissions, Status, Token};
pub use loopback::LoopbackProvider;
pub use provider::{DialMode, TransportProvider};
