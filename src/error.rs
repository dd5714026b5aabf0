//! Error taxonomy for the adapter layer.
//!
//! Provider-reported failures travel through the same result channel as
//! success and are never raised as panics. Registry misses are the only
//! fatal condition: the provider only ever replays tokens it was given, so a
//! miss means the adapter itself lost track of an object.

use thiserror::Error;

use crate::transport::{Status, Token};

/// Errors produced by adapter operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// A token was looked up or removed that the registry never issued or
    /// already released.
    #[error("consistency fault: {registry} registry has no entry for token {token}")]
    ConsistencyFault {
        registry: &'static str,
        token: Token,
    },

    /// The socket or request is already past its terminal state.
    #[error("connection closed")]
    ConnectionClosed,

    /// The transport provider reported a failure status.
    #[error("transport failure during {op}: {status}")]
    TransportFailure { op: &'static str, status: Status },

    /// `close` was called on a server that is not listening.
    #[error("server is not listening")]
    NotListening,

    /// `listen` was called on a server that is already listening.
    #[error("server is already listening")]
    AlreadyListening,

    /// Malformed call shape, header line or URL.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The adapter was torn down while the operation was pending.
    #[error("adapter shut down")]
    Shutdown,
}

impl AdapterError {
    /// Whether this error must abort event dispatch.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AdapterError::ConsistencyFault { .. })
    }

    pub(crate) fn transport(op: &'static str, status: Status) -> Self {
        AdapterError::TransportFailure { op, status }
    }
}

impl From<AdapterError> for std::io::Error {
    fn from(err: AdapterError) -> Self {
        let kind = match err {
            AdapterError::ConnectionClosed => std::io::ErrorKind::BrokenPipe,
            AdapterError::Shutdown => std::io::ErrorKind::NotConnected,
            AdapterError::InvalidArgument(_) => std::io::ErrorKind::InvalidInput,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}
