//! Non-blocking fd read/write loops that suspend the calling fiber on
//! `EAGAIN`/`EWOULDBLOCK` instead of the kernel blocking the whole thread.
//!
//! These are the generic primitives; [`crate::net`] wraps them with a
//! connection type, and [`crate::http`] builds the request parser on top of
//! [`read_until`].

use std::io;

use crate::error::{Error, Result};
use crate::scheduler;

/// Reads at most `buf.len()` bytes from `fd`, suspending the caller on the
/// scheduler's `wait_read` until data (or EOF) is available. Returns `0` on
/// EOF, same as `std::io::Read::read`.
pub fn read(fd: i32, buf: &mut [u8]) -> Result<usize> {
    loop {
        // Safety: `buf` is a valid, initialized slice of at least `buf.len()`
        // bytes for the duration of this call.
        let rc = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if rc >= 0 {
            return Ok(rc as usize);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN) => scheduler::wait_read(fd),
            Some(libc::EINTR) => continue,
            _ => return Err(Error::Io(err)),
        }
    }
}

/// Reads from `fd` into `buf` (starting at `buf[0]`, growing `buf` as
/// needed) until `delim` has been seen or `limit` bytes have been
/// accumulated without finding it. Returns the number of bytes read
/// (including `delim`), or `Err` if `limit` was hit first.
///
/// Mirrors the original cooperative runtime's `read_until`: a single
/// fixed-size scratch buffer is filled a chunk at a time, and the delimiter
/// search resumes only over the newly read tail on each iteration.
pub fn read_until(fd: i32, buf: &mut Vec<u8>, delim: &[u8], limit: usize) -> Result<usize> {
    debug_assert!(!delim.is_empty());
    let mut searched_from = buf.len().saturating_sub(delim.len().saturating_sub(1));

    loop {
        if let Some(pos) = find_subslice(&buf[searched_from..], delim) {
            return Ok(searched_from + pos + delim.len());
        }
        if buf.len() >= limit {
            return Err(Error::Protocol(crate::error::ProtocolError::PrologueTooLarge(limit)));
        }
        searched_from = buf.len().saturating_sub(delim.len().saturating_sub(1));

        let mut chunk = [0u8; 4096];
        let want = chunk.len().min(limit - buf.len());
        let n = read(fd, &mut chunk[..want])?;
        if n == 0 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before delimiter was found",
            )));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Writes the entirety of `buf` to `fd`, suspending the caller on the
/// scheduler's `wait_write` whenever the socket's send buffer is full.
pub fn write_all(fd: i32, mut buf: &[u8]) -> Result<()> {
    while !buf.is_empty() {
        // Safety: `buf` is a valid slice of at least `buf.len()` bytes.
        let rc = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
        if rc >= 0 {
            buf = &buf[rc as usize..];
            continue;
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN) => scheduler::wait_write(fd),
            Some(libc::EINTR) => continue,
            _ => return Err(Error::Io(err)),
        }
    }
    Ok(())
}

/// Sets `fd` non-blocking via `fcntl(F_SETFL, O_NONBLOCK)`.
pub fn set_nonblocking(fd: i32) -> Result<()> {
    // Safety: `fd` is a valid, open file descriptor for the duration of
    // this call.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_subslice_locates_delimiter() {
        assert_eq!(find_subslice(b"GET / HTTP/1.0\r\n\r\n", b"\r\n\r\n"), Some(15));
        assert_eq!(find_subslice(b"no delimiter here", b"\r\n\r\n"), None);
    }
}
