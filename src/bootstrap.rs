//! Getting a new context onto its own stack for the first time.
//!
//! A `switch` can only save and resume a stack that is already running, so
//! the very first transfer onto a freshly mapped stack needs help. In
//! `SignalTrap` mode that help comes from the kernel: the new stack is
//! registered as the alternate signal stack, a signal whose handler is
//! marked `SA_ONSTACK` is raised, and the handler, now executing on the new
//! stack, records a resume point just below its own frame. The handler then
//! returns normally and `spawn` carries on; the first time the scheduler
//! resumes that point, the context's entry function starts running there.
//!
//! `Direct` mode writes the same resume point without the trap.

use crate::arch::{self, Entry, STACK_ALIGN, Snapshot};
use crate::config::BootstrapMode;
use crate::context::ContextId;
use crate::error::{Error, Result};
use crate::preempt;
use crate::stack::Stack;
use crate::sys;
use log::trace;
use std::cell::Cell;
use std::io;
use std::ptr;
use std::sync::OnceLock;

/// Signal used for the bootstrap trap.
pub const TRAP_SIGNAL: libc::c_int = libc::SIGUSR1;

/// Room left between the handler's stack pointer and the resume point, so
/// nothing the handler still does before returning can overwrite the
/// entry frame.
const RESUME_GAP: usize = 1024;

/// What the trap handler needs to know about the context being set up.
struct Pending {
    lo: usize,
    hi: usize,
    entry: Entry,
    fired: bool,
    on_stack: bool,
    snapshot: Option<Snapshot>,
}

thread_local! {
    static PENDING: Cell<*mut Pending> = const { Cell::new(ptr::null_mut()) };
}

/// Produce the first resume point of a context living on `stack`.
///
/// Resuming the returned snapshot calls `entry` on `stack`.
pub(crate) fn bootstrap(
    mode: BootstrapMode,
    id: ContextId,
    stack: &Stack,
    entry: Entry,
) -> Result<Snapshot> {
    match mode {
        BootstrapMode::Direct => {
            trace!("context {}: direct bootstrap at {:#x}", id, stack.top());
            Ok(unsafe { Snapshot::new(stack.top(), entry) })
        }
        BootstrapMode::SignalTrap => trap(id, stack, entry),
    }
}

fn trap(id: ContextId, stack: &Stack, entry: Entry) -> Result<Snapshot> {
    install_trap_handler()?;

    // No forced yield may land between registering the stack and putting
    // the old one back, and the trap itself must get through.
    let _mask = sys::SignalMask::adjust(&[preempt::SIGNAL], &[TRAP_SIGNAL])
        .map_err(Error::TrapRaise)?;

    let mut pending = Pending {
        lo: stack.limit(),
        hi: stack.top(),
        entry,
        fired: false,
        on_stack: false,
        snapshot: None,
    };

    let previous =
        sys::set_altstack(stack.usable_ptr(), stack.usable_len()).map_err(Error::AltStack)?;
    PENDING.with(|p| p.set(&mut pending));
    let raised = sys::raise(TRAP_SIGNAL);
    PENDING.with(|p| p.set(ptr::null_mut()));
    let restored = sys::restore_altstack(&previous);

    raised.map_err(Error::TrapRaise)?;
    restored.map_err(Error::AltStack)?;

    if !pending.fired {
        return Err(Error::TrapMissed(id.as_u64()));
    }
    if !pending.on_stack {
        return Err(Error::OffStack(id.as_u64()));
    }
    let snapshot = pending.snapshot.ok_or(Error::TrapMissed(id.as_u64()))?;
    trace!(
        "context {}: trap bootstrap at {:#x} ({} bytes below top)",
        id,
        snapshot.stack_pointer(),
        stack.top() - snapshot.stack_pointer()
    );
    Ok(snapshot)
}

fn install_trap_handler() -> Result<()> {
    // Installed once per process and never removed; the handler ignores
    // deliveries on threads with nothing pending.
    static INSTALLED: OnceLock<std::result::Result<(), i32>> = OnceLock::new();
    let installed = INSTALLED.get_or_init(|| {
        sys::set_handler(TRAP_SIGNAL, on_trap, libc::SA_ONSTACK)
            .map_err(|e| e.raw_os_error().unwrap_or(libc::EINVAL))
    });
    installed.map_err(|errno| Error::TrapInstall(io::Error::from_raw_os_error(errno)))
}

extern "C" fn on_trap(_signo: libc::c_int) {
    let pending = PENDING.with(|p| p.get());
    if pending.is_null() {
        return;
    }
    let pending = unsafe { &mut *pending };
    pending.fired = true;

    let sp = arch::stack_pointer();
    if sp < pending.lo || sp >= pending.hi {
        return;
    }
    pending.on_stack = true;

    let resume_at = (sp - RESUME_GAP) & !(STACK_ALIGN - 1);
    pending.snapshot = Some(unsafe { Snapshot::new(resume_at, pending.entry) });
    // Nothing past this point may call deeper than RESUME_GAP.
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn never() -> ! {
        std::process::abort()
    }

    #[test]
    fn trap_records_a_resume_point_on_the_new_stack() {
        let stack = Stack::new(64 * 1024).unwrap();
        let snapshot = bootstrap(BootstrapMode::SignalTrap, ContextId(7), &stack, never).unwrap();
        let sp = snapshot.stack_pointer();
        assert!(stack.contains(sp));
        assert!(sp < stack.top() - RESUME_GAP);
        assert_eq!(sp % STACK_ALIGN, 0);
    }

    #[test]
    fn direct_starts_at_the_top() {
        let stack = Stack::new(64 * 1024).unwrap();
        let snapshot = bootstrap(BootstrapMode::Direct, ContextId(1), &stack, never).unwrap();
        let sp = snapshot.stack_pointer();
        assert!(sp > stack.limit() && sp <= stack.top());
        assert!(stack.top() - sp <= 16);
    }

    #[test]
    fn trap_leaves_nothing_pending() {
        let stack = Stack::new(64 * 1024).unwrap();
        bootstrap(BootstrapMode::SignalTrap, ContextId(3), &stack, never).unwrap();
        assert!(PENDING.with(|p| p.get()).is_null());
        // A stray delivery with nothing pending is ignored.
        sys::raise(TRAP_SIGNAL).unwrap();
    }
}
