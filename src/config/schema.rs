//! Configuration schema definitions.
//!
//! Every section derives Serde traits and falls back to defaults, so an
//! empty file is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::transport::DialMode;

/// Root configuration for the adapter.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AdapterConfig {
    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Defaults for new servers.
    pub listener: ListenerConfig,

    /// Defaults for outbound dials.
    pub dial: DialConfig,

    /// Defaults for request/response exchanges.
    pub request: RequestConfig,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Expose Prometheus metrics.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Server option defaults.
///
/// These are recorded on every server and reported back, not enforced.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ListenerConfig {
    pub allow_half_open: bool,
    pub pause_on_connect: bool,
    pub no_delay: bool,
    pub keep_alive: bool,
    /// Milliseconds; truncated to whole seconds when applied.
    pub keep_alive_initial_delay_ms: u64,
}

/// Dial defaults.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct DialConfig {
    /// Connection mode used by `Adapter::dial`.
    pub mode: DialMode,
}

/// Request defaults.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct RequestConfig {
    /// `"Name: value"` lines added to every request that does not set the
    /// header itself.
    pub default_headers: Vec<String>,
}
