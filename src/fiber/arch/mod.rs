//! Architecture-specific context switch backends.
//!
//! Only x86-64 is implemented. This crate has no preemption and no
//! cross-core work stealing, so a single target architecture is an
//! acceptable scope cut — see DESIGN.md.

#[cfg(target_arch = "x86_64")]
mod x86_64;

#[cfg(target_arch = "x86_64")]
pub use self::x86_64::{init_stack, switch};

#[cfg(not(target_arch = "x86_64"))]
compile_error!("weft's fiber context switch is only implemented for x86_64");
