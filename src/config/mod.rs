//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AdapterConfig (validated, immutable)
//!     → owned by the Adapter, read by servers, dials and requests
//! ```
//!
//! # Design Decisions
//! - Config is immutable once the adapter is built
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{AdapterConfig, DialConfig, ListenerConfig, ObservabilityConfig, RequestConfig};
pub use validation::{validate_config, ValidationError};
