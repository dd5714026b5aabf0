//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     Load config → Validate → Build provider and event queue
//!     → Adapter::new → spawn Dispatcher::run
//!
//! Shutdown (shutdown.rs):
//!     Adapter::shutdown → broadcast → dispatcher stops
//!     → pending operations fail → sockets close → provider.shutdown
//! ```
//!
//! # Design Decisions
//! - One coordinator per adapter, owned by its context
//! - A consistency fault also ends the dispatcher and runs the same teardown

pub mod shutdown;

pub use shutdown::Shutdown;
