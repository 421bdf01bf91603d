//! Error types.
//!
//! Every variant is fatal for the scheduler: there is no fallback path for
//! a context that cannot get a stack or cannot be bootstrapped. The `try_*`
//! entry points surface them so a host can report before exiting; the
//! plain entry points abort.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The stack mapping for a new context could not be created.
    #[error("allocating a {size}-byte stack: {source}")]
    StackAllocation {
        size: usize,
        #[source]
        source: io::Error,
    },

    /// The bootstrap trap handler could not be installed.
    #[error("installing the bootstrap trap handler: {0}")]
    TrapInstall(#[source] io::Error),

    /// The new stack could not be registered as the trap stack.
    #[error("sigaltstack: {0}")]
    AltStack(#[source] io::Error),

    /// The bootstrap trap could not be raised.
    #[error("raising the bootstrap trap: {0}")]
    TrapRaise(#[source] io::Error),

    /// The trap was raised but its handler never ran for this context.
    #[error("bootstrap trap for context {0} was not delivered")]
    TrapMissed(u64),

    /// The trap handler ran on a stack other than the new context's.
    #[error("bootstrap trap for context {0} ran off its stack")]
    OffStack(u64),

    /// The preemption timer could not be armed or disarmed.
    #[error("preemption timer: {0}")]
    Timer(#[source] io::Error),

    /// `run` was entered while a run was already in progress on this thread.
    #[error("scheduler is already running on this thread")]
    AlreadyRunning,
}

impl Error {
    /// True for failures to obtain memory for a new context.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, Error::StackAllocation { .. })
    }

    /// True for failures of the bootstrap trap.
    pub fn is_bootstrap_failure(&self) -> bool {
        matches!(
            self,
            Error::TrapInstall(_)
                | Error::AltStack(_)
                | Error::TrapRaise(_)
                | Error::TrapMissed(_)
                | Error::OffStack(_)
        )
    }
}

/// Report a fatal error and abort the process.
#[cold]
pub(crate) fn fatal(what: &str, err: &Error) -> ! {
    log::error!("{}: {}", what, err);
    eprintln!("greenring: {}: {}", what, err);
    std::process::abort()
}
