//! TCP listen loop: one fiber blocks on the accept socket and spawns a
//! fresh handler fiber per accepted connection.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::os::unix::io::{AsRawFd, IntoRawFd};

use log::{debug, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::http::Request;
use crate::router::Router;
use crate::scheduler;

/// Owns an accepted connection's file descriptor and closes it
/// unconditionally when the handler fiber ends, however it ends (normal
/// return, an early `write_body`, or a panic partway through).
///
/// See DESIGN.md: the fd is always reclaimed here, regardless of how the
/// handler returns.
struct ConnGuard(i32);

impl ConnGuard {
    fn fd(&self) -> i32 {
        self.0
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        // Safety: `self.0` is a fd this guard owns exclusively.
        unsafe { libc::close(self.0) };
    }
}

/// Binds, listens, and serves `router` forever. Must be called from a
/// fiber (typically the host fiber) running under [`scheduler::run`].
pub fn listen(config: &ServerConfig, router: Router) -> Result<()> {
    config.validate()?;

    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port);
    let listener = TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    // The backlog std's `bind` chose is whatever the platform default is;
    // re-`listen` isn't exposed, so a custom backlog is honored via the
    // raw fd instead when it differs from that default.
    if config.backlog >= 0 {
        // Safety: `listener`'s fd is a bound, not-yet-connected socket.
        unsafe { libc::listen(listener.as_raw_fd(), config.backlog) };
    }

    let listen_fd = listener.as_raw_fd();
    debug!(target: "weft::net", "listening on 0.0.0.0:{}", config.port);

    loop {
        scheduler::wait_read(listen_fd);
        loop {
            let (stream, _peer) = match listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(target: "weft::net", "accept() failed: {e}");
                    break;
                }
            };

            if let Err(e) = stream.set_nonblocking(true) {
                warn!(target: "weft::net", "failed to set accepted socket non-blocking: {e}");
                continue;
            }
            let conn_fd = stream.into_raw_fd();

            debug!(target: "weft::net", "accepted connection on fd {conn_fd}");
            let router = router.clone();
            let spawned = scheduler::spawn(move || serve_connection(conn_fd, &router));
            if let Err(e) = spawned {
                warn!(target: "weft::net", "failed to spawn handler fiber: {e}");
                // Safety: `conn_fd` was just leaked out of `stream` above
                // and hasn't been handed to anything else yet.
                unsafe { libc::close(conn_fd) };
            }
        }
    }
}

fn serve_connection(conn_fd: i32, router: &Router) {
    let guard = ConnGuard(conn_fd);
    let arena = scheduler::current_arena();

    let mut request = match Request::parse(guard.fd(), &arena) {
        Ok(req) => req,
        Err(e) => {
            warn!(target: "weft::net", "malformed request on fd {}: {e}", guard.fd());
            return;
        }
    };

    debug!(target: "weft::net", "dispatching {} {}", request.method(), request.path());
    let handler = router.dispatch(request.method(), request.path());
    handler(&mut request);
}
