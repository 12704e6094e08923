//! Error handling utils.
//!
//! Every fallible operation in this crate returns a [`Result`]. I/O errors
//! that are part of the normal control flow (`EAGAIN`/`EWOULDBLOCK`, a peer
//! closing its end) never reach this type — they're resolved by the
//! scheduler before the caller sees them (see [`crate::scheduler`]). What's
//! left are the failure families that actually need to propagate: malformed
//! requests, permanent I/O failures, and out-of-memory conditions.

use std::io;

/// A specialized [`Result`] type for the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents all error cases surfaced by this crate's public API.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A page or stack allocation failed. Fatal at the scope of the
    /// failing fiber; callers at the top (the listen loop, `main`) should
    /// log and terminate rather than try to recover mid-request.
    #[error("out of memory: {0}")]
    Oom(&'static str),

    /// A non-retryable I/O failure on a socket or pipe. `EAGAIN` /
    /// `EWOULDBLOCK` are never wrapped here; they resolve to a fiber
    /// suspension instead.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The HTTP request prologue was malformed or exceeded the parser's
    /// buffer.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The scheduler's internal invariants were violated. This always
    /// indicates a bug in this crate (or in an unsafe caller bypassing its
    /// contracts), never a condition an application can recover from.
    #[error("scheduler invariant violated: {0}")]
    Invariant(&'static str),
}

/// Failure to parse an HTTP/1.0 request prologue.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The request line was missing a method, a path, or both.
    #[error("malformed request line")]
    MalformedRequestLine,

    /// A `Content-Length` header's value was not a valid non-negative
    /// decimal integer.
    #[error("malformed Content-Length header")]
    MalformedContentLength,

    /// The prologue (request line + headers, up to `CRLF CRLF`) did not
    /// fit in the parser's fixed buffer. Never silently truncated.
    #[error("request prologue exceeded {0} bytes")]
    PrologueTooLarge(usize),

    /// `write_head` was called a second time for the same request.
    #[error("write_head called more than once for this request")]
    HeadAlreadySent,
}

impl Error {
    /// Returns the raw OS error code, if this is an I/O error backed by one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }
}
