//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Registries, sockets, listeners and requests produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters and gauges via the metrics facade)
//!
//! Consumers:
//!     → stdout (fmt layer)
//!     → Metrics endpoint (Prometheus scrape, opt-in)
//! ```

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;
