//! The cooperative scheduler: ready/waiting/free queues, the context-switch
//! driver, and the `yield_now`/`wait_read`/`wait_write` suspension points.
//!
//! There is exactly one scheduler per process, owned by the thread that
//! calls [`Scheduler::run`]. It is never exposed across threads — fibers
//! and their arenas are `!Send` by construction (the public API only ever
//! hands out references scoped to the current fiber's callback).
//!
//! The driver loop is a direct generalization of the original cooperative
//! runtime's `runtime_next` (poll once, promote whoever became ready,
//! resume the next runnable fiber, or fall back to the only waiter to avoid
//! starvation), adapted to the index-parallel `waiting`/`polls` vectors
//! this crate's design calls for instead of one `pollfd` embedded per fiber.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use log::{debug, trace};

use crate::arena::Arena;
use crate::config::{FiberConfig, ServerConfig};
use crate::error::{Error, Result};
use crate::fiber::{self, FiberId, Stack};

/// Which direction of readiness a waiting fiber cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

impl Interest {
    fn poll_events(self) -> libc::c_short {
        match self {
            Interest::Read => libc::POLLRDNORM | libc::POLLIN,
            Interest::Write => libc::POLLWRNORM | libc::POLLOUT,
        }
    }
}

struct FiberRecord {
    /// Saved stack pointer, valid while this fiber isn't the one running.
    sp: Cell<usize>,
    /// `None` for the host fiber, which runs on the thread's real stack.
    stack: Option<Stack>,
    arena: Rc<Arena>,
}

struct Inner {
    fibers: Vec<FiberRecord>,
    ready: VecDeque<FiberId>,
    waiting: Vec<FiberId>,
    polls: Vec<libc::pollfd>,
    free: Vec<FiberId>,
    current: FiberId,
    stack_size: usize,
}

thread_local! {
    static SCHEDULER: RefCell<Option<Inner>> = RefCell::new(None);
}

/// Entry point for running code under the scheduler. The closure runs as
/// the host fiber (id 0); when it returns, [`run`] returns.
///
/// `server.stack_size` sizes every fiber's stack (see [`ServerConfig`]);
/// `fiber.initial_stack_pool` stacks are `mmap`-ed and parked on the free
/// list up front so the first burst of connections doesn't pay that cost
/// per accept.
pub fn run<F: FnOnce() + 'static>(server: &ServerConfig, fiber: &FiberConfig, host: F) -> Result<()> {
    server.validate()?;

    SCHEDULER.with(|cell| {
        if cell.borrow().is_some() {
            return Err(Error::Invariant("scheduler already running on this thread"));
        }
        let mut fibers = Vec::with_capacity(fiber.initial_table_capacity.max(1));
        fibers.push(FiberRecord {
            sp: Cell::new(0),
            stack: None,
            arena: Rc::new(Arena::new()?),
        });
        let mut free = Vec::with_capacity(fiber.initial_stack_pool);
        for _ in 0..fiber.initial_stack_pool {
            let id = FiberId(fibers.len());
            fibers.push(FiberRecord {
                sp: Cell::new(0),
                stack: Some(Stack::new(server.stack_size).map_err(|_| Error::Oom("failed to mmap fiber stack"))?),
                arena: Rc::new(Arena::new()?),
            });
            free.push(id);
        }
        *cell.borrow_mut() = Some(Inner {
            fibers,
            ready: VecDeque::new(),
            waiting: Vec::new(),
            polls: Vec::new(),
            free,
            current: FiberId::HOST,
            stack_size: server.stack_size,
        });
        Ok(())
    })?;

    host();

    SCHEDULER.with(|cell| *cell.borrow_mut() = None);
    Ok(())
}

/// Spawns `body` as a new fiber and appends it to the ready queue. Returns
/// the new fiber's id.
pub fn spawn<F: FnOnce() + 'static>(body: F) -> Result<FiberId> {
    with_inner(|inner| {
        let id = if let Some(id) = inner.free.pop() {
            id
        } else {
            let id = FiberId(inner.fibers.len());
            inner.fibers.push(FiberRecord {
                sp: Cell::new(0),
                stack: Some(
                    Stack::new(inner.stack_size).map_err(|_| Error::Oom("failed to mmap fiber stack"))?,
                ),
                arena: Rc::new(Arena::new()?),
            });
            id
        };

        let slot = &mut inner.fibers[id.index()];
        let sp = fiber::build_stack(slot.stack.as_ref().unwrap(), Box::new(body));
        // A reused slot's arena was already reset on the previous fiber's
        // exit; keep it (this is what lets the very first allocation after
        // respawn reuse the same backing page).
        slot.sp.set(sp);

        inner.ready.push_back(id);
        trace!(target: "weft::scheduler", "spawned {id}");
        Ok(id)
    })
}

/// Returns the arena owned by whichever fiber is currently running.
pub fn current_arena() -> Rc<Arena> {
    with_inner(|inner| inner.fibers[inner.current.index()].arena.clone())
}

/// Returns the id of whichever fiber is currently running.
pub fn current_id() -> FiberId {
    with_inner(|inner| inner.current)
}

/// Voluntarily gives up the CPU; the caller is re-enqueued at the tail of
/// `ready` and will run again after every other currently-ready fiber has
/// had a turn.
pub fn yield_now() {
    let switch = with_inner(|inner| {
        let me = inner.current;
        inner.ready.push_back(me);
        pick_next(inner)
    });
    if let Some((old, new_sp)) = switch {
        switch_between(old, new_sp);
    }
}

/// Suspends the caller until `fd` is readable.
pub fn wait_read(fd: i32) {
    wait(fd, Interest::Read);
}

/// Suspends the caller until `fd` is writable.
pub fn wait_write(fd: i32) {
    wait(fd, Interest::Write);
}

/// Suspends the caller until `fd` is readable/writable depending on
/// `interest`.
fn wait(fd: i32, interest: Interest) {
    let switch = with_inner(|inner| {
        let me = inner.current;
        inner.polls.push(libc::pollfd {
            fd,
            events: interest.poll_events(),
            revents: 0,
        });
        inner.waiting.push(me);
        pick_next(inner)
    });
    if let Some((old, new_sp)) = switch {
        switch_between(old, new_sp);
    }
}

/// Called from the fiber trampoline once a fiber's body returns. Resets its
/// arena, frees its id for reuse, and never returns to the caller.
pub(crate) fn exit_current() -> ! {
    let switch = with_inner(|inner| {
        let me = inner.current;
        if me == FiberId::HOST {
            panic!("host fiber attempted to exit");
        }
        inner.fibers[me.index()].arena.reset();
        inner.free.push(me);
        trace!(target: "weft::scheduler", "exited {me}");
        pick_next(inner)
    });
    // A fiber that just ran its body to completion always leaves at least
    // the host runnable (or itself wouldn't have been running), so
    // `pick_next` never returns `None` here.
    let (_, new_sp) = switch.expect("exit_current: no fiber left to resume");
    // Safety: the exiting stack is never resumed again, so discarding its
    // saved stack pointer is sound; `new_sp` is a live, suspended (or brand
    // new) fiber context produced by this module.
    unsafe {
        let mut discard: usize = 0;
        fiber::switch(&mut discard, new_sp);
    }
    unreachable!("a freed fiber's stack must never be resumed");
}

/// Picks the next fiber to run given the current state, advancing
/// `current` and returning `Some((old_current, new_sp))` if a context
/// switch is needed, or `None` if the caller should simply keep running
/// (nothing else is ready or waiting). Does *not* perform the actual
/// context switch — callers must drop their borrow of `Inner` first.
fn pick_next(inner: &mut Inner) -> Option<(FiberId, usize)> {
    let old = inner.current;

    if !inner.polls.is_empty() {
        let timeout = if inner.ready.is_empty() { -1 } else { 0 };
        loop {
            // Safety: `polls` is a valid, densely-packed pollfd array of
            // `inner.polls.len()` entries.
            let rc = unsafe {
                libc::poll(inner.polls.as_mut_ptr(), inner.polls.len() as libc::nfds_t, timeout)
            };
            if rc >= 0 {
                break;
            }
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            panic!("poll() failed: {err}");
        }

        let mut i = 0;
        while i < inner.polls.len() {
            if inner.polls[i].revents != 0 {
                let fid = inner.waiting.swap_remove(i);
                inner.polls.swap_remove(i);
                trace!(target: "weft::scheduler", "{fid} woken by readiness");
                inner.ready.push_back(fid);
            } else {
                i += 1;
            }
        }
    }

    if inner.ready.is_empty() && !inner.waiting.is_empty() {
        let fid = inner.waiting.remove(0);
        inner.polls.remove(0);
        inner.ready.push_back(fid);
    }

    match inner.ready.pop_front() {
        Some(next) if next == old => {
            // The caller is the next fiber due to run, ready or waiting
            // fibers notwithstanding. Its own `sp` slot was never updated
            // by a real context switch (no one ever switched away from
            // it), so treating this as a resume would hand `switch_between`
            // a stale — for the host fiber, zero — stack pointer. Just
            // keep running without switching; `old` re-enters `ready` the
            // next time it yields.
            None
        }
        Some(next) => {
            inner.current = next;
            debug!(target: "weft::scheduler", "resuming {next}");
            Some((old, inner.fibers[next.index()].sp.get()))
        }
        None => None,
    }
}

fn switch_between(old: FiberId, new_sp: usize) {
    let old_sp_slot = with_inner(|inner| inner.fibers[old.index()].sp.as_ptr());
    // Safety: `old_sp_slot` points at a `Cell<usize>` owned by the
    // scheduler's fiber table, which outlives this call; `new_sp` was
    // produced by `pick_next` from a live fiber record.
    unsafe {
        fiber::switch(old_sp_slot, new_sp);
    }
}

fn with_inner<R>(f: impl FnOnce(&mut Inner) -> R) -> R {
    SCHEDULER.with(|cell| {
        let mut guard = cell.borrow_mut();
        let inner = guard
            .as_mut()
            .expect("weft scheduler used outside of Scheduler::run");
        f(inner)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc as StdRc;

    #[test]
    fn round_robin_counter_interleaving() {
        let log = StdRc::new(StdRefCell::new(Vec::new()));

        let log_a = log.clone();
        let log_b = log.clone();
        run(&ServerConfig::default(), &FiberConfig::default(), move || {
            spawn(move || {
                for i in 0..10 {
                    log_a.borrow_mut().push(format!("A{i}"));
                    yield_now();
                }
            })
            .unwrap();
            spawn(move || {
                for i in 0..20 {
                    log_b.borrow_mut().push(format!("B{i}"));
                    yield_now();
                }
            })
            .unwrap();

            while with_inner(|inner| !inner.ready.is_empty()) {
                yield_now();
            }
        })
        .unwrap();

        let trace = log.borrow();
        assert_eq!(trace.len(), 30, "A logs 10 lines, B logs 20");
        assert_eq!(trace[0], "A0", "the first-spawned fiber runs first");
        assert_eq!(trace[1], "B0", "round-robin hands off to the next ready fiber every yield");
        // B is the only fiber left runnable after A's tenth and final yield,
        // so its remaining iterations run back-to-back.
        assert_eq!(&trace[20..], &["B10", "B11", "B12", "B13", "B14", "B15", "B16", "B17", "B18", "B19"]);
        // Within the interleaved prefix, A and B alternate one-for-one.
        let a_count = trace[..20].iter().filter(|s| s.starts_with('A')).count();
        let b_count = trace[..20].iter().filter(|s| s.starts_with('B')).count();
        assert_eq!((a_count, b_count), (10, 10));
    }

    #[test]
    fn arena_is_reused_after_a_fiber_exits() {
        let ptrs = StdRc::new(StdRefCell::new(Vec::new()));
        let p1 = ptrs.clone();
        let p2 = ptrs.clone();
        run(&ServerConfig::default(), &FiberConfig::default(), move || {
            spawn(move || {
                let arena = current_arena();
                let ptr = arena.alloc(4096).unwrap();
                p1.borrow_mut().push(ptr);
            })
            .unwrap();
            while with_inner(|inner| !inner.ready.is_empty()) {
                yield_now();
            }

            spawn(move || {
                let arena = current_arena();
                let ptr = arena.alloc(4096).unwrap();
                p2.borrow_mut().push(ptr);
            })
            .unwrap();
            while with_inner(|inner| !inner.ready.is_empty()) {
                yield_now();
            }
        })
        .unwrap();

        let ptrs = ptrs.borrow();
        assert_eq!(ptrs[0], ptrs[1], "second fiber should reuse the first's arena page");
    }
}
