//! Execution contexts: the thread control blocks the scheduler rings.

use crate::arch::Snapshot;
use crate::stack::Stack;
use std::fmt;

/// Identity of a context. Assigned in creation order, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(pub(crate) u64);

impl ContextId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a context.
///
/// `Setup -> Ready <-> Running -> Finished`, after which the context is
/// disposed and stops existing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Allocated, not yet on its own stack.
    Setup,
    /// Waiting in the ring to be picked.
    Ready,
    /// Executing.
    Running,
    /// Start routine returned; waiting to be disposed.
    Finished,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Setup => "setup",
            State::Ready => "ready",
            State::Running => "running",
            State::Finished => "finished",
        })
    }
}

/// Returned by `spawn`; names a context for later queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextHandle {
    id: ContextId,
}

impl ContextHandle {
    pub(crate) fn new(id: ContextId) -> Self {
        ContextHandle { id }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }
}

pub(crate) type StartRoutine = Box<dyn FnOnce() + 'static>;

pub(crate) struct ExecutionContext {
    pub id: ContextId,
    pub state: State,
    /// `None` only between creation and stack binding.
    pub stack: Option<Stack>,
    pub snapshot: Snapshot,
    /// Taken on first run, so it can only ever run once.
    pub start: Option<StartRoutine>,
    /// Nesting depth of `preempt::critical` sections.
    pub defer_depth: u32,
    /// A forced yield arrived while `defer_depth > 0`.
    pub deferred: bool,
}

impl ExecutionContext {
    pub fn new(id: ContextId, start: StartRoutine) -> Self {
        ExecutionContext {
            id,
            state: State::Setup,
            stack: None,
            snapshot: Snapshot::default(),
            start: Some(start),
            defer_depth: 0,
            deferred: false,
        }
    }

    /// Bind the stack and resume point produced by the bootstrap.
    pub fn bind(&mut self, stack: Stack, snapshot: Snapshot) {
        debug_assert_eq!(self.state, State::Setup);
        self.stack = Some(stack);
        self.snapshot = snapshot;
        self.state = State::Ready;
    }

    pub fn mark_running(&mut self) {
        debug_assert_eq!(self.state, State::Ready, "context {} not ready", self.id);
        self.state = State::Running;
    }

    pub fn mark_ready(&mut self) {
        debug_assert_eq!(self.state, State::Running, "context {} not running", self.id);
        self.state = State::Ready;
    }

    pub fn mark_finished(&mut self) {
        debug_assert_eq!(self.state, State::Running, "context {} not running", self.id);
        self.state = State::Finished;
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("stack", &self.stack)
            .field("started", &self.start.is_none())
            .finish()
    }
}
