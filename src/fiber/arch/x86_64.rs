//! x86-64 System V context switch.
//!
//! This is the one place in the crate that touches raw assembly. The
//! technique — save the six callee-saved registers on the current stack,
//! swap `rsp`, restore the same six registers from the new stack, `ret` —
//! replaces naked-function-based context switching (`runtime_yield`/
//! `runtime_resume`) with something stable-Rust-compatible. The push/pop
//! order below (`rbp, rbx, r12, r13, r14, r15`) matches the order used by
//! hand-rolled stackful-coroutine crates such as `fiber`'s
//! `libs/fiber/src/arch/x86_64.rs`, simplified here by dropping
//! unwind-across-fiber support, which this crate's fibers never need.
//!
//! `weft_switch_context` is defined via `global_asm!` rather than a
//! `#[naked]` function so that it compiles on stable Rust without the
//! `naked_functions` feature: the symbol has no Rust-generated prologue or
//! epilogue to fight with.

use std::arch::global_asm;

global_asm!(
    ".pushsection .text",
    ".global weft_switch_context",
    ".balign 16",
    "weft_switch_context:",
    // rdi = &mut old_sp, rsi = new_sp
    "push rbp",
    "push rbx",
    "push r12",
    "push r13",
    "push r14",
    "push r15",
    "mov [rdi], rsp",
    "mov rsp, rsi",
    "pop r15",
    "pop r14",
    "pop r13",
    "pop r12",
    "pop rbx",
    "pop rbp",
    "ret",
    ".balign 16",
    "weft_trampoline:",
    // On first resume of a freshly-initialized fiber, r12 carries the
    // pointer this crate stashed there at stack-init time (see
    // `init_stack` below): a boxed `TrampolineArg`.
    "mov rdi, r12",
    "and rsp, -16",
    "call weft_fiber_entry",
    "ud2",
    ".popsection",
);

extern "C" {
    /// Saves the current callee-saved registers and stack pointer into
    /// `*old_sp`, then restores registers from `new_sp` and returns into
    /// whatever context last suspended there (or, for a never-yet-resumed
    /// fiber, jumps to `weft_trampoline`).
    fn weft_switch_context(old_sp: *mut usize, new_sp: usize);

    fn weft_trampoline();
}

/// Suspends the calling context and resumes `new_sp`, recording the
/// caller's own resumption point into `*old_sp`.
///
/// # Safety
/// `new_sp` must be a stack pointer previously produced by this module
/// (either [`init_stack`] or a prior call to this function) for a context
/// that is not already running.
pub unsafe fn switch(old_sp: *mut usize, new_sp: usize) {
    unsafe { weft_switch_context(old_sp, new_sp) }
}

/// Lays out a brand-new fiber stack so that the first [`switch`] into it
/// jumps to `weft_trampoline`, which forwards `arg` to
/// `weft_fiber_entry` (defined in `fiber/mod.rs`).
///
/// # Safety
/// `stack_top` must be a 16-byte-aligned address at the top of a writable
/// region of at least 64 bytes.
pub unsafe fn init_stack(stack_top: usize, arg: *mut u8) -> usize {
    unsafe {
        let mut sp = stack_top;

        let mut push = |val: usize| {
            sp -= 8;
            (sp as *mut usize).write(val);
        };

        push(weft_trampoline as usize); // return address popped by `ret`
        push(0); // rbp
        push(0); // rbx
        push(arg as usize); // r12 — read by weft_trampoline
        push(0); // r13
        push(0); // r14
        push(0); // r15

        sp
    }
}

