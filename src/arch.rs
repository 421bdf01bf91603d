//! Architecture-specific control snapshots.
//!
//! Each backend exposes the same surface:
//! - `Snapshot`: saved callee-saved register state of a suspended context
//! - `Snapshot::new`: a snapshot that starts `entry` on a fresh stack
//! - `switch`: save the running state into one snapshot and resume another
//! - `stack_pointer`: the current stack pointer

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
pub use x86_64::*;

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
pub use aarch64::*;

/// ABI alignment of the stack pointer at a call boundary on both backends.
pub const STACK_ALIGN: usize = 16;

/// Signature of the first function a fresh snapshot executes.
pub type Entry = extern "C" fn() -> !;
