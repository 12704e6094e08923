//! Plain configuration structs: no builder macro, a doc comment per
//! field, `Default` impls, and `..Default::default()` spreads accepted by
//! every constructor that takes one of these.
//!
//! There is no file format and no env-var layer: these are typed
//! constructor arguments, not hot-reloadable settings.

/// Settings for the TCP listen loop and the per-fiber stack it hands out.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to bind on `0.0.0.0`.
    pub port: u16,
    /// Listen backlog passed to `listen(2)`. `-1` means `SOMAXCONN`.
    pub backlog: i32,
    /// Stack size for spawned fibers, in bytes. Must be a multiple of the
    /// OS page size; [`ServerConfig::validate`] checks this.
    pub stack_size: usize,
}

impl ServerConfig {
    /// Checks invariants that can't be expressed in the type system.
    /// Called once by [`crate::net::listen`] before the accept loop starts.
    pub fn validate(&self) -> crate::error::Result<()> {
        let page = crate::fiber::page_size();
        if self.stack_size == 0 || self.stack_size % page != 0 {
            return Err(crate::error::Error::Invariant(
                "ServerConfig::stack_size must be a non-zero multiple of the OS page size",
            ));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 8080,
            backlog: -1,
            stack_size: crate::fiber::DEFAULT_STACK_PAGES * crate::fiber::page_size(),
        }
    }
}

/// Pre-sizing hints for the fiber table, to avoid reallocating `fibers` (or
/// mmap-ing new stacks one at a time) during the first burst of
/// connections.
#[derive(Debug, Clone)]
pub struct FiberConfig {
    /// Number of fiber table slots to pre-allocate.
    pub initial_table_capacity: usize,
    /// Number of fiber stacks (and arenas) to pre-`mmap` and park on the
    /// free list before the first connection is accepted.
    pub initial_stack_pool: usize,
}

impl Default for FiberConfig {
    fn default() -> Self {
        FiberConfig {
            initial_table_capacity: 16,
            initial_stack_pool: 4,
        }
    }
}
