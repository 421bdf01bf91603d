//! aarch64 control snapshot and switch.

use super::Entry;
use std::arch::asm;
use std::arch::naked_asm;

/// Saved CPU state of a suspended context.
///
/// On aarch64 (AAPCS64), these are the callee-saved registers
/// that must be preserved across function calls:
/// - x19-x28: general purpose callee-saved registers
/// - d8-d15: floating-point/SIMD callee-saved registers (lower 64 bits of v8-v15)
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Stack pointer
    sp: u64,
    /// Link register (resume address)
    lr: u64,
    /// Frame pointer
    fp: u64,
    x19: u64,
    x20: u64,
    x21: u64,
    x22: u64,
    x23: u64,
    x24: u64,
    x25: u64,
    x26: u64,
    x27: u64,
    x28: u64,
    d8: u64,
    d9: u64,
    d10: u64,
    d11: u64,
    d12: u64,
    d13: u64,
    d14: u64,
    d15: u64,
}

impl Snapshot {
    /// Build a snapshot whose first resumption calls `entry` on the stack
    /// ending at `stack_top`.
    ///
    /// # Safety
    /// `stack_top` must be 16-byte aligned and owned by the new context.
    pub unsafe fn new(stack_top: usize, entry: Entry) -> Self {
        // `ret` jumps to lr, nothing needs to be pushed.
        Snapshot {
            sp: stack_top as u64,
            lr: entry as usize as u64,
            ..Default::default()
        }
    }

    /// Stack pointer recorded in this snapshot.
    pub fn stack_pointer(&self) -> usize {
        self.sp as usize
    }
}

/// Current stack pointer.
#[inline(always)]
pub fn stack_pointer() -> usize {
    let sp: u64;
    unsafe {
        asm!(
            "mov {}, sp",
            out(reg) sp,
            options(nomem, nostack, preserves_flags)
        );
    }
    sp as usize
}

/// Save the running state into `old` and resume from `new`.
///
/// # Safety
/// `old` must be writable and `new` must hold a snapshot produced either by
/// [`Snapshot::new`] or by a previous `switch` whose context is still alive.
#[unsafe(naked)]
pub unsafe extern "C" fn switch(_old: *mut Snapshot, _new: *const Snapshot) {
    // x0 = old, x1 = new
    naked_asm!(
        "mov x9, sp",
        "str x9,  [x0, #0x00]",
        "str lr,  [x0, #0x08]",
        "str fp,  [x0, #0x10]",
        "str x19, [x0, #0x18]",
        "str x20, [x0, #0x20]",
        "str x21, [x0, #0x28]",
        "str x22, [x0, #0x30]",
        "str x23, [x0, #0x38]",
        "str x24, [x0, #0x40]",
        "str x25, [x0, #0x48]",
        "str x26, [x0, #0x50]",
        "str x27, [x0, #0x58]",
        "str x28, [x0, #0x60]",
        "str d8,  [x0, #0x68]",
        "str d9,  [x0, #0x70]",
        "str d10, [x0, #0x78]",
        "str d11, [x0, #0x80]",
        "str d12, [x0, #0x88]",
        "str d13, [x0, #0x90]",
        "str d14, [x0, #0x98]",
        "str d15, [x0, #0xa0]",
        "ldr x9,  [x1, #0x00]",
        "mov sp, x9",
        "ldr lr,  [x1, #0x08]",
        "ldr fp,  [x1, #0x10]",
        "ldr x19, [x1, #0x18]",
        "ldr x20, [x1, #0x20]",
        "ldr x21, [x1, #0x28]",
        "ldr x22, [x1, #0x30]",
        "ldr x23, [x1, #0x38]",
        "ldr x24, [x1, #0x40]",
        "ldr x25, [x1, #0x48]",
        "ldr x26, [x1, #0x50]",
        "ldr x27, [x1, #0x58]",
        "ldr x28, [x1, #0x60]",
        "ldr d8,  [x1, #0x68]",
        "ldr d9,  [x1, #0x70]",
        "ldr d10, [x1, #0x78]",
        "ldr d11, [x1, #0x80]",
        "ldr d12, [x1, #0x88]",
        "ldr d13, [x1, #0x90]",
        "ldr d14, [x1, #0x98]",
        "ldr d15, [x1, #0xa0]",
        "ret",
    );
}
