//! Opaque handles, adapter tokens and provider status codes.

use bytes::Bytes;

/// Provider-issued handle for one connection (dialed or accepted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnHandle(u64);

impl ConnHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw handle value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Provider-issued handle for one request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestHandle(u64);

impl RequestHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Adapter-issued registry index.
///
/// The provider echoes tokens back unchanged on every completion; it never
/// interprets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(u64);

impl Token {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Status code reported by the provider.
///
/// Zero and positive values are success (writes report the number of bytes
/// handed off); negative values are failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(i64);

impl Status {
    pub const OK: Status = Status(0);
    pub const FAILURE: Status = Status(-1);
    pub const SERVICE_UNAVAILABLE: Status = Status(-2);
    pub const CONN_CLOSED: Status = Status(-3);
    pub const INVALID_STATE: Status = Status(-4);
    pub const NOT_AUTHORIZED: Status = Status(-5);

    pub const fn new(code: i64) -> Self {
        Self(code)
    }

    pub fn code(&self) -> i64 {
        self.0
    }

    pub fn is_ok(&self) -> bool {
        self.0 >= 0
    }

    fn describe(&self) -> Option<&'static str> {
        match *self {
            Status::OK => Some("ok"),
            Status::FAILURE => Some("failure"),
            Status::SERVICE_UNAVAILABLE => Some("service unavailable"),
            Status::CONN_CLOSED => Some("connection closed"),
            Status::INVALID_STATE => Some("invalid state"),
            Status::NOT_AUTHORIZED => Some("not authorized"),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.describe() {
            Some(text) => write!(f, "status {} ({})", self.0, text),
            None => write!(f, "status {}", self.0),
        }
    }
}

/// Permissions the provider grants the local identity on a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServicePermissions(u32);

impl ServicePermissions {
    pub const DIAL: ServicePermissions = ServicePermissions(1);
    pub const BIND: ServicePermissions = ServicePermissions(2);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn can_dial(&self) -> bool {
        self.0 & Self::DIAL.0 != 0
    }

    pub fn can_bind(&self) -> bool {
        self.0 & Self::BIND.0 != 0
    }
}

impl std::ops::BitOr for ServicePermissions {
    type Output = ServicePermissions;

    fn bitor(self, rhs: Self) -> Self::Output {
        ServicePermissions(self.0 | rhs.0)
    }
}

/// What the dialing side announced about itself when a client was accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerInfo {
    /// Identity of the dialing side, when the provider knows it.
    pub caller_id: Option<String>,
    /// Application data sent along with the dial.
    pub app_data: Option<Bytes>,
}
