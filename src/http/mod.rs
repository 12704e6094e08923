//! Minimal HTTP/1.0 request parser and response writer.
//!
//! A request-line plus a singly-linked, insertion-order-reversed header
//! list, all bytes owned by the handling fiber's arena. No keep-alive, no
//! chunked encoding, no pipelining — every connection is one request, one
//! response, then closed.

mod headers;
mod request;

pub use headers::Header;
pub use request::Request;

/// Requests larger than this are rejected before a single byte of header
/// content is parsed.
pub const PROLOGUE_LIMIT: usize = 2048;
