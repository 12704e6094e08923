use crate::arena::Arena;
use crate::error::{Error, ProtocolError, Result};
use crate::io;

use super::headers::{self, Header};
use super::PROLOGUE_LIMIT;

/// A parsed HTTP/1.0 request, plus the in-progress response being built for
/// it. Every byte this struct references lives in `arena`, which is the
/// handling fiber's arena — the request cannot outlive the fiber it was
/// parsed in, and doesn't need to: it's released in one motion when the
/// fiber ends.
pub struct Request<'a> {
    arena: &'a Arena,
    conn_fd: i32,
    method: &'a [u8],
    path: &'a [u8],
    version: &'a [u8],
    req_headers: Option<Box<Header<'a>>>,
    res_headers: Option<Box<Header<'a>>>,
    content_length: Option<usize>,
    /// Bytes read from the socket past the `\r\n\r\n` terminator while
    /// hunting for it — the start of the body, already drained from the
    /// kernel and not retrievable by reading `conn_fd` again.
    body_prefix: Vec<u8>,
    body_prefix_pos: usize,
    head_sent: bool,
    body_sent: bool,
}

impl<'a> Request<'a> {
    /// Reads and parses an HTTP/1.0 request-line-plus-headers prologue from
    /// `conn_fd`, copying every token into `arena`.
    pub fn parse(conn_fd: i32, arena: &'a Arena) -> Result<Request<'a>> {
        let mut buf = Vec::with_capacity(256);
        let prologue_len = io::read_until(conn_fd, &mut buf, b"\r\n\r\n", PROLOGUE_LIMIT)?;
        let body_prefix = buf.split_off(prologue_len);

        let mut lines = buf.split(|&b| b == b'\n').map(strip_cr);
        let request_line = lines.next().unwrap_or(&[]);

        let mut tokens = request_line.split(|&b| b == b' ').filter(|t| !t.is_empty());
        let method = tokens.next().ok_or(Error::Protocol(ProtocolError::MalformedRequestLine))?;
        let path = tokens.next().ok_or(Error::Protocol(ProtocolError::MalformedRequestLine))?;
        let version = tokens.next().unwrap_or(b"HTTP/1.0");

        let method = headers::arena_copy(arena, method)?;
        let path = headers::arena_copy(arena, path)?;
        let version = headers::arena_copy(arena, version)?;

        let mut req_headers = None;
        let mut content_length = None;
        for line in lines {
            if line.is_empty() {
                break;
            }
            let colon = match line.iter().position(|&b| b == b':') {
                Some(i) => i,
                None => continue,
            };
            let key = &line[..colon];
            let mut value = &line[colon + 1..];
            while value.first() == Some(&b' ') {
                value = &value[1..];
            }

            if key.eq_ignore_ascii_case(b"content-length") {
                let text = std::str::from_utf8(value)
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .ok_or(Error::Protocol(ProtocolError::MalformedContentLength))?;
                content_length = Some(text);
            }

            let key = headers::arena_copy(arena, key)?;
            let value = headers::arena_copy(arena, value)?;
            req_headers = Some(headers::push_front(req_headers, key, value));
        }

        Ok(Request {
            arena,
            conn_fd,
            method,
            path,
            version,
            req_headers,
            res_headers: None,
            content_length,
            body_prefix,
            body_prefix_pos: 0,
            head_sent: false,
            body_sent: false,
        })
    }

    pub fn method(&self) -> &str {
        std::str::from_utf8(self.method).unwrap_or("")
    }

    pub fn path(&self) -> &str {
        std::str::from_utf8(self.path).unwrap_or("")
    }

    pub fn version(&self) -> &str {
        std::str::from_utf8(self.version).unwrap_or("")
    }

    pub fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    pub fn conn_fd(&self) -> i32 {
        self.conn_fd
    }

    /// Reads up to `buf.len()` bytes of the request body. Drains any bytes
    /// the prologue scan already pulled past the `\r\n\r\n` terminator
    /// before falling through to reading more from the socket.
    pub fn read_body(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.body_prefix_pos < self.body_prefix.len() {
            let available = &self.body_prefix[self.body_prefix_pos..];
            let n = available.len().min(buf.len());
            buf[..n].copy_from_slice(&available[..n]);
            self.body_prefix_pos += n;
            return Ok(n);
        }
        io::read(self.conn_fd, buf)
    }

    /// Looks up a request header by name, case-insensitively.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        let found = headers::find(self.req_headers.as_deref(), name.as_bytes())?;
        std::str::from_utf8(found.value).ok()
    }

    /// Upserts a response header. Must be called before [`Request::write_head`].
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        if self.head_sent {
            return Err(Error::Protocol(ProtocolError::HeadAlreadySent));
        }
        let value_bytes = headers::arena_copy(self.arena, value.as_bytes())?;
        if headers::replace_in_place(self.res_headers.as_mut(), name.as_bytes(), value_bytes) {
            return Ok(());
        }
        let key_bytes = headers::arena_copy(self.arena, name.as_bytes())?;
        self.res_headers = Some(headers::push_front(self.res_headers.take(), key_bytes, value_bytes));
        Ok(())
    }

    /// Serializes the status line and every response header, exactly once.
    pub fn write_head(&mut self, status: u16, reason: &str) -> Result<()> {
        if self.head_sent {
            return Err(Error::Protocol(ProtocolError::HeadAlreadySent));
        }
        self.head_sent = true;

        let status_line = format!("HTTP/1.0 {status} {reason}\r\n");
        io::write_all(self.conn_fd, status_line.as_bytes())?;

        let mut node = self.res_headers.as_deref();
        while let Some(h) = node {
            let key = std::str::from_utf8(h.key).unwrap_or("");
            let value = std::str::from_utf8(h.value).unwrap_or("");
            io::write_all(self.conn_fd, format!("{key}: {value}\r\n").as_bytes())?;
            node = h.next_ref();
        }

        io::write_all(self.conn_fd, b"\r\n")
    }

    /// Writes the response body, calling [`Request::write_head`] first (with
    /// an automatic `Content-Length`) if it hasn't been called yet. A second
    /// call fails: one request gets exactly one body.
    pub fn write_body(&mut self, body: &[u8]) -> Result<()> {
        if self.body_sent {
            return Err(Error::Protocol(ProtocolError::HeadAlreadySent));
        }
        if !self.head_sent {
            self.set_header("Content-Length", &body.len().to_string())?;
            self.write_head(200, "OK")?;
        }
        self.body_sent = true;
        io::write_all(self.conn_fd, body)
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.strip_suffix(b"\r") {
        Some(stripped) => stripped,
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use std::os::unix::io::AsRawFd;
    use std::thread;

    fn parse_bytes(input: &[u8]) -> Result<(i32, Arena, UnixStream)> {
        let (a, mut b) = UnixStream::pair().unwrap();
        let input = input.to_vec();
        let writer = thread::spawn(move || {
            b.write_all(&input).unwrap();
        });
        writer.join().unwrap();
        let fd = a.as_raw_fd();
        crate::io::set_nonblocking(fd)?;
        Ok((fd, Arena::new()?, a))
    }

    #[test]
    fn parses_request_line_and_headers() {
        let (fd, arena, _keep) =
            parse_bytes(b"GET /hello HTTP/1.0\r\nHost: example\r\nContent-Length: 3\r\n\r\n").unwrap();
        let req = Request::parse(fd, &arena).unwrap();
        assert_eq!(req.method(), "GET");
        assert_eq!(req.path(), "/hello");
        assert_eq!(req.content_length(), Some(3));
        assert_eq!(req.get_header("HOST"), Some("example"));
    }

    #[test]
    fn read_body_recovers_bytes_pulled_past_the_prologue_terminator() {
        let (fd, arena, _keep) =
            parse_bytes(b"GET /echo HTTP/1.0\r\nContent-Length: 5\r\n\r\n12345").unwrap();
        let mut req = Request::parse(fd, &arena).unwrap();
        assert_eq!(req.content_length(), Some(5));
        let mut body = [0u8; 5];
        let n = req.read_body(&mut body).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&body, b"12345");
    }

    #[test]
    fn rejects_missing_path() {
        let (fd, arena, _keep) = parse_bytes(b"GET\r\n\r\n").unwrap();
        let err = Request::parse(fd, &arena).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::MalformedRequestLine)));
    }

    #[test]
    fn rejects_non_numeric_content_length() {
        let (fd, arena, _keep) = parse_bytes(b"GET / HTTP/1.0\r\nContent-Length: abc\r\n\r\n").unwrap();
        let err = Request::parse(fd, &arena).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::MalformedContentLength)));
    }
}
