//! Time slicing.
//!
//! A per-thread CPU-time timer raises `SIGVTALRM` every quantum. The handler
//! does no scheduling of its own: it asks the scheduler for the same yield a
//! context can perform voluntarily, so a forced switch is a yield point the
//! running code did not write.
//!
//! The scheduler masks the signal for every section that touches the ring
//! or the cursor, so a tick arriving mid-switch is held by the kernel and
//! delivered once the switch is complete. Code that must not be torn away
//! from mid-way (console output, anything that takes a lock or allocates)
//! can wrap itself in [`critical`]; a tick landing there is remembered and
//! replayed as a yield when the section ends.

use crate::error::{Error, Result};
use crate::scheduler;
use crate::sys;
use log::{debug, warn};
use std::io;
use std::sync::OnceLock;
use std::time::Duration;

/// Signal carrying timer ticks.
pub const SIGNAL: libc::c_int = libc::SIGVTALRM;

/// Shortest quantum the timer is armed with.
pub const MIN_QUANTUM: Duration = Duration::from_millis(1);

/// Run `f` with forced yields deferred until it returns.
///
/// Outside a running context this just calls `f`.
pub fn critical<R>(f: impl FnOnce() -> R) -> R {
    scheduler::enter_critical();
    let result = f();
    scheduler::leave_critical();
    result
}

/// The preemption signal blocked for this thread until dropped.
pub(crate) struct Masked {
    _mask: sys::SignalMask,
}

pub(crate) fn mask() -> Masked {
    match sys::SignalMask::block(SIGNAL) {
        Ok(mask) => Masked { _mask: mask },
        // Only fails for an invalid `how` or signal number.
        Err(e) => crate::error::fatal("masking preemption", &Error::Timer(e)),
    }
}

/// Let ticks through on this thread, regardless of the inherited mask.
pub(crate) fn unmask() {
    if let Err(e) = sys::unblock(SIGNAL) {
        crate::error::fatal("unmasking preemption", &Error::Timer(e));
    }
}

fn install_handler() -> Result<()> {
    static INSTALLED: OnceLock<std::result::Result<(), i32>> = OnceLock::new();
    let installed = INSTALLED.get_or_init(|| {
        sys::set_handler(SIGNAL, on_tick, libc::SA_RESTART)
            .map_err(|e| e.raw_os_error().unwrap_or(libc::EINVAL))
    });
    installed.map_err(|errno| Error::Timer(io::Error::from_raw_os_error(errno)))
}

extern "C" fn on_tick(_signo: libc::c_int) {
    // Other contexts run before this handler returns.
    let _errno = sys::Errno::save();
    scheduler::preempt_current();
}

/// Periodic tick source for the calling thread. Disarmed on drop.
pub struct Timer {
    quantum: Duration,
    #[cfg(target_os = "linux")]
    id: libc::timer_t,
}

impl Timer {
    /// Start ticking every `quantum` of this thread's CPU time.
    pub fn arm(quantum: Duration) -> Result<Timer> {
        install_handler()?;
        let quantum = quantum.max(MIN_QUANTUM);
        let timer = Self::start(quantum).map_err(Error::Timer)?;
        debug!("preemption timer armed, quantum {:?}", quantum);
        Ok(timer)
    }

    pub fn quantum(&self) -> Duration {
        self.quantum
    }

    #[cfg(target_os = "linux")]
    fn start(quantum: Duration) -> io::Result<Timer> {
        unsafe {
            // Ticks must reach this thread, not whichever one the kernel picks.
            let mut event: libc::sigevent = std::mem::zeroed();
            event.sigev_notify = libc::SIGEV_THREAD_ID;
            event.sigev_signo = SIGNAL;
            event.sigev_notify_thread_id = libc::syscall(libc::SYS_gettid) as libc::c_int;

            let mut id: libc::timer_t = std::ptr::null_mut();
            if libc::timer_create(libc::CLOCK_THREAD_CPUTIME_ID, &mut event, &mut id) != 0 {
                return Err(io::Error::last_os_error());
            }
            let timer = Timer { quantum, id };

            let period = libc::timespec {
                tv_sec: quantum.as_secs() as libc::time_t,
                tv_nsec: quantum.subsec_nanos() as libc::c_long,
            };
            let spec = libc::itimerspec {
                it_interval: period,
                it_value: period,
            };
            if libc::timer_settime(timer.id, 0, &spec, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(timer)
        }
    }

    #[cfg(target_os = "linux")]
    fn stop(&mut self) -> io::Result<()> {
        if unsafe { libc::timer_delete(self.id) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn start(quantum: Duration) -> io::Result<Timer> {
        // Process-wide: only meaningful with one scheduling thread.
        let period = libc::timeval {
            tv_sec: quantum.as_secs() as libc::time_t,
            tv_usec: quantum.subsec_micros() as libc::suseconds_t,
        };
        set_virtual_timer(period)?;
        Ok(Timer { quantum })
    }

    #[cfg(not(target_os = "linux"))]
    fn stop(&mut self) -> io::Result<()> {
        set_virtual_timer(libc::timeval { tv_sec: 0, tv_usec: 0 })
    }
}

#[cfg(not(target_os = "linux"))]
fn set_virtual_timer(period: libc::timeval) -> io::Result<()> {
    let value = libc::itimerval {
        it_interval: period,
        it_value: period,
    };
    if unsafe { libc::setitimer(libc::ITIMER_VIRTUAL, &value, std::ptr::null_mut()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl Drop for Timer {
    fn drop(&mut self) {
        match self.stop() {
            Ok(()) => debug!("preemption timer disarmed"),
            Err(e) => warn!("disarming preemption timer: {}", e),
        }
    }
}
