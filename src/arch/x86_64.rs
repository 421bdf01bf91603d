//! x86_64 control snapshot and switch.

use super::Entry;
use std::arch::asm;
use std::arch::naked_asm;

/// Saved CPU state of a suspended context.
///
/// On x86_64 System V ABI, these are the callee-saved registers
/// that must be preserved across function calls. Everything else is
/// already dead at the call into `switch`.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Stack pointer
    rsp: u64,
    /// Frame pointer
    rbp: u64,
    /// General purpose (callee-saved)
    rbx: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
}

impl Snapshot {
    /// Build a snapshot whose first resumption calls `entry` on the stack
    /// ending at `stack_top`.
    ///
    /// # Safety
    /// `stack_top` must be 16-byte aligned and the 16 bytes below it must be
    /// writable memory owned by the new context.
    pub unsafe fn new(stack_top: usize, entry: Entry) -> Self {
        // System V ABI requires RSP to be 16-byte aligned BEFORE `call`.
        // We enter through `ret`, so the return address sits where `call`
        // would have pushed it:
        //   stack_top - 8:  padding
        //   stack_top - 16: entry
        // After `ret`: RSP = stack_top - 8, which is 16n+8 as required.
        let initial_rsp = stack_top - 16;

        unsafe {
            // A null return address above the entry ends backtraces there.
            std::ptr::write((stack_top - 8) as *mut u64, 0);
            std::ptr::write(initial_rsp as *mut u64, entry as usize as u64);
        }

        Snapshot {
            rsp: initial_rsp as u64,
            ..Default::default()
        }
    }

    /// Stack pointer recorded in this snapshot.
    pub fn stack_pointer(&self) -> usize {
        self.rsp as usize
    }
}

/// Current stack pointer.
#[inline(always)]
pub fn stack_pointer() -> usize {
    let sp: u64;
    unsafe {
        asm!(
            "mov {}, rsp",
            out(reg) sp,
            options(nomem, nostack, preserves_flags)
        );
    }
    sp as usize
}

/// Save the running state into `old` and resume from `new`.
///
/// Returns when some later switch resumes `old`.
///
/// # Safety
/// `old` must be writable and `new` must hold a snapshot produced either by
/// [`Snapshot::new`] or by a previous `switch` whose context is still alive.
#[unsafe(naked)]
pub unsafe extern "C" fn switch(_old: *mut Snapshot, _new: *const Snapshot) {
    naked_asm!(
        // Save callee-saved registers to old (rdi)
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        // Load callee-saved registers from new (rsi)
        "mov rsp, [rsi + 0x00]",
        "mov rbp, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",
        // Fresh snapshot: pops the entry address.
        // Suspended snapshot: returns into its own `switch` call.
        "ret",
    );
}
