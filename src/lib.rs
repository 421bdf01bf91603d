//! User-level threads scheduled round robin on one OS thread.
//!
//! Each context gets its own manually mapped stack. A signal delivered on
//! that stack gets it running there for the first time, a hand-written
//! register switch moves between contexts afterwards, and an optional
//! CPU-time timer forces a yield at every quantum.
//!
//! # Example
//!
//! ```no_run
//! use greenring::{Config, Scheduler, yield_now};
//!
//! let mut scheduler = Scheduler::new(Config::default());
//!
//! scheduler.spawn(|| {
//!     println!("Context 0");
//!     yield_now();
//!     println!("Context 0 done");
//! });
//!
//! scheduler.spawn(|| {
//!     println!("Context 1");
//! });
//!
//! let stats = scheduler.run();
//! assert_eq!(stats.disposed, 2);
//! ```

mod arch;
mod bootstrap;
pub mod config;
mod context;
pub mod error;
pub mod preempt;
mod ring;
mod scheduler;
mod stack;
mod sys;

pub use config::{BootstrapMode, Config};
pub use context::{ContextHandle, ContextId, State};
pub use error::{Error, Result};
pub use preempt::critical;
pub use scheduler::{
    Event, Scheduler, StateDump, Stats, current, dump, run, spawn, try_spawn, yield_now,
};
pub use stack::MIN_STACK_SIZE;
