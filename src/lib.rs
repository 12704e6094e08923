//! A cooperative stackful-fiber runtime with a per-fiber arena allocator
//! and a minimal non-blocking HTTP/1.0 server.
//!
//! The library has three layers, leaves first:
//!
//! - [`arena`]: per-fiber bump allocation with bulk reset.
//! - [`fiber`] and [`scheduler`]: stackful coroutines, explicit
//!   yield/wait-on-readiness suspension, and the single-threaded
//!   `poll(2)`-driven event loop that resumes them.
//! - [`io`], [`net`], [`http`], [`router`]: non-blocking byte I/O, a TCP
//!   accept loop that spawns one fiber per connection, an HTTP/1.0
//!   request parser and response writer, and method+path dispatch.
//!
//! [`config`] holds the plain, `Default`-implementing settings structs
//! read once at startup; [`error`] holds the crate-wide error type.
//!
//! This crate never starts its own logger; wire one (`env_logger`, say) in
//! your own `main` if you want to see the `trace!`/`debug!`/`warn!` call
//! sites sprinkled through the scheduler and network layers.
//!
//! # Example
//!
//! ```no_run
//! fn hello(req: &mut weft::Request<'_>) {
//!     let _ = req.write_body(b"hello, world");
//! }
//!
//! fn main() -> weft::Result<()> {
//!     let router = weft::RouterBuilder::new().get("/", hello).build();
//!     weft::serve(Default::default(), Default::default(), router)
//! }
//! ```

pub mod arena;
pub mod config;
pub mod error;
pub mod fiber;
pub mod http;
pub mod io;
pub mod net;
pub mod router;
pub mod scheduler;

pub use config::{FiberConfig, ServerConfig};
pub use error::{Error, ProtocolError, Result};
pub use http::Request;
pub use io::{read, read_until, write_all};
pub use router::{Router, RouterBuilder};
pub use scheduler::{current_arena, wait_read, wait_write, yield_now};

/// Runs the scheduler on the current thread and serves `router` on
/// `server.port` until the process is killed. This is the library's main
/// entry point: it combines [`scheduler::run`] and [`net::listen`] so a
/// binary doesn't need to reach for either directly.
pub fn serve(server: ServerConfig, fiber: FiberConfig, router: Router) -> Result<()> {
    let listen_cfg = server.clone();
    scheduler::run(&server, &fiber, move || {
        if let Err(e) = net::listen(&listen_cfg, router) {
            log::error!(target: "weft", "listen loop exited: {e}");
        }
    })
}
