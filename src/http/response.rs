//! Response metadata delivered when the remote starts answering.

use http::header::{HeaderName, HeaderValue, SET_COOKIE};
use http::{HeaderMap, StatusCode};

use crate::error::AdapterError;

/// Status line and headers of a response.
///
/// Repeated headers keep every value; `set-cookie` in particular is never
/// folded.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHead {
    pub status: StatusCode,
    /// Reason phrase as sent by the remote.
    pub reason: String,
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// Head with the canonical reason phrase and no headers.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers: HeaderMap::new(),
        }
    }

    /// Build from raw status code, reason and header pairs.
    pub fn from_parts<'a, I>(code: u16, reason: &str, headers: I) -> Result<Self, AdapterError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let status = StatusCode::from_u16(code)
            .map_err(|_| AdapterError::InvalidArgument(format!("status code {code} out of range")))?;
        let mut head = Self {
            status,
            reason: reason.to_string(),
            headers: HeaderMap::new(),
        };
        for (name, value) in headers {
            head = head.header(name, value)?;
        }
        Ok(head)
    }

    /// Append a header, keeping earlier values of the same name.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, AdapterError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| AdapterError::InvalidArgument(format!("invalid header name {name:?}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| AdapterError::InvalidArgument(format!("invalid value for header {name}")))?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Every `set-cookie` value in arrival order.
    pub fn cookies(&self) -> Vec<&str> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}
