//! Stream layer over provider connections.
//!
//! # Data Flow
//! ```text
//! Dial:
//!     dial.rs (PendingDial, token) → provider.connect
//!     → Connected → socket.rs (Socket in the adapter's table)
//!
//! Listen:
//!     listener.rs (ListenerShared, token) → provider.listen
//!     → Listening → callback
//!     → Accepted → Socket in the listener's client map → accept()
//!     → AcceptData → client socket by handle
//!
//! Socket states:
//!     Open → Readable → Closed
//! ```
//!
//! # Design Decisions
//! - Every provider completion names its target by token or handle;
//!   registry.rs resolves tokens and treats a miss as fatal
//! - Accepted sockets are tracked so listener close can wait for drain

pub mod connection;
pub(crate) mod dial;
pub mod listen_args;
pub mod listener;
pub mod registry;
pub mod socket;

pub use connection::{ConnectionGuard, ConnectionTracker};
pub use listen_args::{ListenArg, ListenArgs, ListenCallback, ListenOptions};
pub use listener::{ListenerState, Server, ServerOptions, ServiceAddress};
pub use registry::HandleRegistry;
pub use socket::{Socket, SocketEvent, SocketState, WriteAck};
