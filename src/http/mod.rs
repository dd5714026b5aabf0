//! HTTP-shaped request/response exchanges over the transport.
//!
//! # Data Flow
//! ```text
//! RequestSpec (target, method, path, headers)
//!     → request.rs (open, body chunks, phase tracking)
//!     → response.rs (status line and headers)
//!     → RequestEvent stream to the caller
//! ```

pub mod request;
pub mod response;

pub use request::{
    parse_header_line, Request, RequestEvent, RequestPhase, RequestSpec, RequestTarget,
};
pub use response::ResponseHead;
