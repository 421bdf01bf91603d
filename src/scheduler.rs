//! The round-robin scheduler.
//!
//! One `Scheduler` drives all contexts on the OS thread that calls
//! [`Scheduler::run`]. While it runs, a thread-local pointer lets code inside
//! a context reach it through the free functions ([`yield_now`], [`spawn`],
//! [`current`]) and lets the preemption handler reach it from a signal.
//!
//! Every mutation of the ring or the cursor happens with the preemption
//! signal masked. A switch always leaves the ring consistent before control
//! moves, and whoever gains control first frees the stack of a context that
//! was disposed on the way out, since that stack was still in use while it
//! was being unlinked.

use crate::arch::{self, Snapshot};
use crate::bootstrap;
use crate::config::Config;
use crate::context::{ContextHandle, ContextId, ExecutionContext, State};
use crate::error::{self, Error, Result};
use crate::preempt::{self, Timer};
use crate::ring::{Ring, Slot};
use crate::stack::Stack;
use log::{debug, info, trace};
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{Ordering, compiler_fence};

thread_local! {
    static CURRENT: Cell<*mut Scheduler> = const { Cell::new(ptr::null_mut()) };
}

/// Raw pointer to this thread's running scheduler, or null.
fn current_scheduler() -> *mut Scheduler {
    CURRENT.with(|c| c.get())
}

/// Who owns the CPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Cursor {
    /// The code that called `run`.
    Host,
    Context(Slot),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Reason {
    Voluntary,
    Forced,
}

/// Entry in the scheduling journal. `None` stands for the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Spawned(ContextId),
    Switched {
        from: Option<ContextId>,
        to: Option<ContextId>,
    },
    Yielded(ContextId),
    Preempted(ContextId),
    Finished(ContextId),
    Disposed(ContextId),
    HostResumed,
}

/// Counters over the scheduler's lifetime.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub spawned: u64,
    pub disposed: u64,
    pub switches: u64,
    pub yields: u64,
    pub preemptions: u64,
    pub host_resumptions: u64,
    pub stack_bytes_allocated: u64,
    pub stack_bytes_freed: u64,
}

impl Stats {
    /// Contexts spawned and not yet disposed.
    pub fn live(&self) -> u64 {
        self.spawned - self.disposed
    }
}

/// `(id, state)` of every live context in ring order, plus the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateDump {
    pub host: State,
    pub contexts: Vec<(ContextId, State)>,
}

impl StateDump {
    /// How many parties are running; one whenever anyone can look.
    pub fn running(&self) -> usize {
        let host = usize::from(self.host == State::Running);
        host + self
            .contexts
            .iter()
            .filter(|(_, state)| *state == State::Running)
            .count()
    }
}

impl fmt::Display for StateDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Thread States")?;
        writeln!(f, "=============")?;
        for (id, state) in &self.contexts {
            writeln!(f, "threadID: {} state:{}", id, state)?;
        }
        Ok(())
    }
}

pub struct Scheduler {
    config: Config,
    ring: Ring<ExecutionContext>,
    cursor: Cursor,
    /// Host registers while a context runs.
    host: Snapshot,
    host_state: State,
    /// Landing spot for the registers of a context that will never resume.
    discard: Snapshot,
    /// Stack of a disposed context, freed once control is on another stack.
    graveyard: Option<Stack>,
    next_id: u64,
    running: bool,
    stats: Stats,
    events: Vec<Event>,
    timer: Option<Timer>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Scheduler {
    pub fn new(config: Config) -> Self {
        Scheduler {
            config,
            ring: Ring::new(),
            cursor: Cursor::Host,
            host: Snapshot::default(),
            host_state: State::Running,
            discard: Snapshot::default(),
            graveyard: None,
            next_id: 0,
            running: false,
            stats: Stats::default(),
            events: Vec::new(),
            timer: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Journal so far; empty unless `Config::record_events` is set.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Live contexts, finished-but-undisposed ones included.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// State of a context, or `None` once it has been disposed.
    pub fn state(&self, id: ContextId) -> Option<State> {
        self.ring.position(|c| c.id == id).map(|slot| self.ring[slot].state)
    }

    pub fn dump(&self) -> StateDump {
        StateDump {
            host: self.host_state,
            contexts: self.ring.iter().map(|(_, c)| (c.id, c.state)).collect(),
        }
    }

    /// Create a context that will run `f` on its own stack.
    ///
    /// Returns once the context is READY; it runs when the scheduler gets to
    /// it. Aborts the process if no stack can be had or the bootstrap fails.
    pub fn spawn<F>(&mut self, f: F) -> ContextHandle
    where
        F: FnOnce() + 'static,
    {
        match self.try_spawn(f) {
            Ok(handle) => handle,
            Err(e) => error::fatal("spawning a context", &e),
        }
    }

    pub fn try_spawn<F>(&mut self, f: F) -> Result<ContextHandle>
    where
        F: FnOnce() + 'static,
    {
        let _masked = preempt::mask();

        let id = ContextId(self.next_id);
        self.next_id += 1;
        let mut context = ExecutionContext::new(id, Box::new(f));
        trace!("context {}: {}", id, context.state);

        let stack = Stack::new(self.config.stack_size)?;
        let snapshot = bootstrap::bootstrap(self.config.bootstrap, id, &stack, context_entry)?;
        let mapped = stack.mapped_len();
        context.bind(stack, snapshot);

        self.ring.push_back(context);
        self.stats.spawned += 1;
        self.stats.stack_bytes_allocated += mapped as u64;
        self.record(Event::Spawned(id));
        debug!("spawned context {} ({} byte stack)", id, mapped);
        Ok(ContextHandle::new(id))
    }

    /// Run every context to completion, then return to the caller.
    ///
    /// Aborts the process if the preemption timer cannot be armed.
    /// Panics if a run is already in progress on this thread.
    pub fn run(&mut self) -> Stats {
        match self.try_run() {
            Ok(stats) => stats,
            Err(Error::AlreadyRunning) => panic!("run() called while already running"),
            Err(e) => error::fatal("starting the scheduler", &e),
        }
    }

    pub fn try_run(&mut self) -> Result<Stats> {
        if self.running || !current_scheduler().is_null() {
            return Err(Error::AlreadyRunning);
        }
        if let Some(quantum) = self.config.quantum {
            self.timer = Some(Timer::arm(quantum)?);
        }

        self.running = true;
        let this: *mut Scheduler = self;
        CURRENT.with(|c| c.set(this));

        if self.config.trace_states {
            debug!("{}", self.dump());
        }
        info!("switching to first context ({} live)", self.ring.len());
        unsafe { Self::dispatch(this) };
        info!("back to the host");

        CURRENT.with(|c| c.set(ptr::null_mut()));
        self.running = false;
        self.timer = None;
        if self.config.trace_states {
            debug!("{}", self.dump());
        }
        Ok(self.stats.clone())
    }

    /// Hand the CPU to the ring until it is exhausted.
    unsafe fn dispatch(this: *mut Scheduler) {
        let _masked = preempt::mask();
        let target = unsafe { (*this).select_next(Cursor::Host) };
        if target == Cursor::Host {
            return;
        }
        unsafe {
            switch_to(this, target);
            (*this).reap();
        }
    }

    /// Next context to run after `from`: the first READY one walking forward
    /// from `from`, ending on `from` itself; the host if there is none.
    fn select_next(&self, from: Cursor) -> Cursor {
        let start = match from {
            Cursor::Context(slot) => Some(slot),
            // From the host, the lap starts at the head.
            Cursor::Host => self.ring.tail(),
        };
        start
            .and_then(|start| {
                self.ring
                    .lap_after(start)
                    .find(|&slot| self.ring[slot].state == State::Ready)
            })
            .map_or(Cursor::Host, Cursor::Context)
    }

    /// Unlink a finished context. Its stack is still the one executing, so
    /// it is parked rather than freed.
    fn dispose(&mut self, slot: Slot) {
        let context = self.ring.remove(slot);
        debug_assert_eq!(context.state, State::Finished);
        debug!("disposing {}", context.id);
        self.stats.disposed += 1;
        self.record(Event::Disposed(context.id));
        if let Some(stack) = context.stack {
            // Anything already parked belongs to an earlier context and is
            // not in use any more.
            if let Some(older) = self.graveyard.replace(stack) {
                self.bury(older);
            }
        }
    }

    /// Free a parked stack. Only called on a stack other than the parked one.
    fn reap(&mut self) {
        if let Some(stack) = self.graveyard.take() {
            self.bury(stack);
        }
    }

    fn bury(&mut self, stack: Stack) {
        self.stats.stack_bytes_freed += stack.mapped_len() as u64;
        drop(stack);
    }

    fn id_of(&self, cursor: Cursor) -> Option<ContextId> {
        match cursor {
            Cursor::Host => None,
            Cursor::Context(slot) => Some(self.ring[slot].id),
        }
    }

    fn record(&mut self, event: Event) {
        trace!("{:?}", event);
        if self.config.record_events {
            self.events.push(event);
        }
    }
}

/// Move the CPU from the cursor to `target`.
///
/// # Safety
/// `this` must be this thread's running scheduler, preemption must be masked,
/// and a context at the cursor must already be READY or FINISHED.
unsafe fn switch_to(this: *mut Scheduler, target: Cursor) {
    let (old, new) = {
        let s = unsafe { &mut *this };
        let from = s.cursor;
        if from == target {
            // Lone context yielding to itself.
            if let Cursor::Context(slot) = target {
                s.ring[slot].mark_running();
            }
            return;
        }

        s.stats.switches += 1;
        let event = Event::Switched {
            from: s.id_of(from),
            to: s.id_of(target),
        };
        s.record(event);

        let old: *mut Snapshot = match from {
            Cursor::Host => {
                s.host_state = State::Ready;
                &mut s.host
            }
            Cursor::Context(slot) if s.ring[slot].state == State::Finished => {
                s.dispose(slot);
                &mut s.discard
            }
            Cursor::Context(slot) => &mut s.ring[slot].snapshot,
        };
        match target {
            Cursor::Host => {
                s.host_state = State::Running;
                s.stats.host_resumptions += 1;
                s.record(Event::HostResumed);
            }
            Cursor::Context(slot) => s.ring[slot].mark_running(),
        }
        s.cursor = target;

        if s.config.trace_states {
            debug!("{}", s.dump());
        }
        let new: *const Snapshot = match target {
            Cursor::Host => &s.host,
            Cursor::Context(slot) => &s.ring[slot].snapshot,
        };
        (old, new)
    };

    unsafe { arch::switch(old, new) }
}

/// Suspend the running context and schedule the next one.
///
/// # Safety
/// `this` must be this thread's running scheduler.
unsafe fn yield_current(this: *mut Scheduler, reason: Reason) {
    let _masked = preempt::mask();
    let target = {
        let s = unsafe { &mut *this };
        let Cursor::Context(slot) = s.cursor else {
            return;
        };
        let context = &mut s.ring[slot];
        context.mark_ready();
        let id = context.id;
        match reason {
            Reason::Voluntary => {
                s.stats.yields += 1;
                s.record(Event::Yielded(id));
            }
            Reason::Forced => {
                s.stats.preemptions += 1;
                s.record(Event::Preempted(id));
            }
        }
        s.select_next(Cursor::Context(slot))
    };

    unsafe {
        switch_to(this, target);
        // Resumed, possibly much later.
        (*this).reap();
    }
}

/// Mark the running context finished and leave it for good.
///
/// # Safety
/// `this` must be this thread's running scheduler and the cursor must be on
/// a context.
unsafe fn finish_current(this: *mut Scheduler) -> ! {
    let masked = preempt::mask();
    let target = {
        let s = unsafe { &mut *this };
        let Cursor::Context(slot) = s.cursor else {
            unreachable!("host cannot finish");
        };
        let context = &mut s.ring[slot];
        context.mark_finished();
        let id = context.id;
        debug!("context {} finished", id);
        s.record(Event::Finished(id));
        s.select_next(Cursor::Context(slot))
    };

    // This frame is never resumed; whoever runs next restores its own mask.
    std::mem::forget(masked);
    unsafe { switch_to(this, target) };

    // A finished context is disposed on the way out and has no snapshot.
    std::process::abort()
}

/// First code a context executes on its own stack.
extern "C" fn context_entry() -> ! {
    let this = current_scheduler();
    if this.is_null() {
        std::process::abort();
    }

    let (id, start) = unsafe {
        let s = &mut *this;
        // The switch that got us here may have left a stack to free.
        s.reap();
        let Cursor::Context(slot) = s.cursor else {
            std::process::abort();
        };
        let context = &mut s.ring[slot];
        (context.id, context.start.take())
    };
    trace!("context {} started", id);
    // We were entered from inside a masked switch. Nothing but the start
    // routine runs unmasked from here on.
    preempt::unmask();

    if let Some(start) = start
        && panic::catch_unwind(AssertUnwindSafe(start)).is_err()
    {
        let _masked = preempt::mask();
        log::error!("context {} panicked", id);
        eprintln!("greenring: context {} panicked", id);
        std::process::abort();
    }

    unsafe { finish_current(this) }
}

/// Preemption handler's entry into the scheduler.
pub(crate) fn preempt_current() {
    let this = current_scheduler();
    if this.is_null() {
        return;
    }
    let _masked = preempt::mask();
    let due = unsafe {
        let s = &mut *this;
        match s.cursor {
            Cursor::Context(slot) if s.running => {
                let context = &mut s.ring[slot];
                if context.state != State::Running {
                    false
                } else if context.defer_depth > 0 {
                    context.deferred = true;
                    false
                } else {
                    true
                }
            }
            _ => false,
        }
    };
    if due {
        unsafe { yield_current(this, Reason::Forced) }
    }
}

/// Run `f` on the running context. Masked, since a forced switch could let
/// another context grow the ring under the borrow.
fn with_running<R>(f: impl FnOnce(&mut ExecutionContext) -> R) -> Option<R> {
    let this = current_scheduler();
    if this.is_null() {
        return None;
    }
    let _masked = preempt::mask();
    let s = unsafe { &mut *this };
    match s.cursor {
        Cursor::Host => None,
        Cursor::Context(slot) => Some(f(&mut s.ring[slot])),
    }
}

pub(crate) fn enter_critical() {
    with_running(|context| context.defer_depth += 1);
    compiler_fence(Ordering::SeqCst);
}

pub(crate) fn leave_critical() {
    let replay = with_running(|context| {
        context.defer_depth -= 1;
        let replay = context.defer_depth == 0 && std::mem::take(&mut context.deferred);
        if replay {
            trace!("context {}: replaying deferred preemption", context.id);
        }
        replay
    })
    .unwrap_or(false);
    if replay {
        preempt_current();
    }
}

/// Give up the CPU to the next READY context.
///
/// Returns once the scheduler picks the caller again. Does nothing on the
/// host or outside a run.
pub fn yield_now() {
    let this = current_scheduler();
    if this.is_null() {
        return;
    }
    unsafe { yield_current(this, Reason::Voluntary) }
}

/// Spawn a context from inside a running one. It is linked at the tail of
/// the ring and runs when the round robin reaches it.
///
/// Panics outside a run; aborts if the context cannot be created.
pub fn spawn<F>(f: F) -> ContextHandle
where
    F: FnOnce() + 'static,
{
    match try_spawn(f) {
        Ok(handle) => handle,
        Err(e) => error::fatal("spawning a context", &e),
    }
}

pub fn try_spawn<F>(f: F) -> Result<ContextHandle>
where
    F: FnOnce() + 'static,
{
    let this = current_scheduler();
    if this.is_null() {
        panic!("greenring::spawn called outside a running scheduler");
    }
    unsafe { (*this).try_spawn(f) }
}

/// Id of the running context; `None` on the host or outside a run.
pub fn current() -> Option<ContextId> {
    with_running(|context| context.id)
}

/// State table of the running scheduler, if any.
pub fn dump() -> Option<StateDump> {
    let this = current_scheduler();
    if this.is_null() {
        return None;
    }
    let _masked = preempt::mask();
    Some(unsafe { (*this).dump() })
}

/// Spawn one context per routine and run them all to completion.
pub fn run<I, F>(config: Config, routines: I) -> Stats
where
    I: IntoIterator<Item = F>,
    F: FnOnce() + 'static,
{
    let mut scheduler = Scheduler::new(config);
    for routine in routines {
        scheduler.spawn(routine);
    }
    scheduler.run()
}
