//! Checked wrappers over the signal system calls.

use std::io;
use std::mem;
use std::ptr;

/// Install `handler` for `signo` with the given `SA_*` flags.
pub fn set_handler(
    signo: libc::c_int,
    handler: extern "C" fn(libc::c_int),
    flags: libc::c_int,
) -> io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = handler as usize;
        action.sa_flags = flags;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(signo, &action, ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Make `[sp, sp + len)` this thread's alternate signal stack, returning
/// the one it replaces.
pub fn set_altstack(sp: *mut u8, len: usize) -> io::Result<libc::stack_t> {
    unsafe {
        let mut new: libc::stack_t = mem::zeroed();
        new.ss_sp = sp as *mut libc::c_void;
        new.ss_size = len;
        new.ss_flags = 0;
        let mut old: libc::stack_t = mem::zeroed();
        if libc::sigaltstack(&new, &mut old) != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(old)
    }
}

pub fn restore_altstack(old: &libc::stack_t) -> io::Result<()> {
    let mut old = *old;
    // The kernel reports SS_ONSTACK in the old flags but refuses it back.
    old.ss_flags &= libc::SS_DISABLE;
    if unsafe { libc::sigaltstack(&old, ptr::null_mut()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Deliver `signo` to the calling thread. Returns after the handler ran
/// unless the signal is blocked.
pub fn raise(signo: libc::c_int) -> io::Result<()> {
    if unsafe { libc::raise(signo) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// This thread's signal mask as it was before the guard was taken.
/// Restored on drop.
pub struct SignalMask {
    saved: libc::sigset_t,
}

impl SignalMask {
    /// Block everything in `block` and unblock everything in `unblock`.
    pub fn adjust(block: &[libc::c_int], unblock: &[libc::c_int]) -> io::Result<SignalMask> {
        unsafe {
            let mut saved: libc::sigset_t = mem::zeroed();
            if !block.is_empty() {
                pthread_sigmask(libc::SIG_BLOCK, &set_of(block), &mut saved)?;
            }
            if !unblock.is_empty() {
                let mut before: libc::sigset_t = mem::zeroed();
                pthread_sigmask(libc::SIG_UNBLOCK, &set_of(unblock), &mut before)?;
                if block.is_empty() {
                    saved = before;
                }
            }
            if block.is_empty() && unblock.is_empty() {
                pthread_sigmask(libc::SIG_BLOCK, ptr::null(), &mut saved)?;
            }
            Ok(SignalMask { saved })
        }
    }

    pub fn block(signo: libc::c_int) -> io::Result<SignalMask> {
        Self::adjust(&[signo], &[])
    }
}

impl Drop for SignalMask {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_sigmask(libc::SIG_SETMASK, &self.saved, ptr::null_mut());
        }
    }
}

/// Unblock `signo` for the calling thread with no way back.
pub fn unblock(signo: libc::c_int) -> io::Result<()> {
    unsafe {
        let mut old: libc::sigset_t = mem::zeroed();
        pthread_sigmask(libc::SIG_UNBLOCK, &set_of(&[signo]), &mut old)
    }
}

#[cfg(test)]
pub fn is_blocked(signo: libc::c_int) -> bool {
    unsafe {
        let mut current: libc::sigset_t = mem::zeroed();
        if pthread_sigmask(libc::SIG_BLOCK, ptr::null(), &mut current).is_err() {
            return false;
        }
        libc::sigismember(&current, signo) == 1
    }
}

unsafe fn set_of(signals: &[libc::c_int]) -> libc::sigset_t {
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        libc::sigemptyset(&mut set);
        for &signo in signals {
            libc::sigaddset(&mut set, signo);
        }
        set
    }
}

unsafe fn pthread_sigmask(
    how: libc::c_int,
    set: *const libc::sigset_t,
    old: *mut libc::sigset_t,
) -> io::Result<()> {
    // Returns the error number instead of setting errno.
    match unsafe { libc::pthread_sigmask(how, set, old) } {
        0 => Ok(()),
        err => Err(io::Error::from_raw_os_error(err)),
    }
}

/// Preserves `errno` across a signal handler that may run other code.
pub struct Errno(libc::c_int);

impl Errno {
    pub fn save() -> Errno {
        Errno(unsafe { *errno_location() })
    }
}

impl Drop for Errno {
    fn drop(&mut self) {
        unsafe { *errno_location() = self.0 }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn errno_location() -> *mut libc::c_int {
    unsafe { libc::__errno_location() }
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
unsafe fn errno_location() -> *mut libc::c_int {
    unsafe { libc::__error() }
}

#[cfg(any(target_os = "openbsd", target_os = "netbsd"))]
unsafe fn errno_location() -> *mut libc::c_int {
    unsafe { libc::__errno() }
}
