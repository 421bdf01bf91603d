//! Scheduler configuration.

use crate::stack;
use log::warn;
use std::time::Duration;

/// Default stack size for each context (64KB)
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// How a new context gets onto its own stack for the first time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootstrapMode {
    /// Raise a signal whose handler runs on the new stack and records the
    /// resume point from there.
    #[default]
    SignalTrap,
    /// Write the initial frame onto the new stack directly.
    Direct,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Requested stack size in bytes; clamped and page-rounded on use.
    pub stack_size: usize,
    /// Time slice for forced yields. `None` disables preemption.
    pub quantum: Option<Duration>,
    pub bootstrap: BootstrapMode,
    /// Log the `(id, state)` table at every scheduling decision.
    pub trace_states: bool,
    /// Keep an in-memory journal of scheduling events.
    pub record_events: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            stack_size: DEFAULT_STACK_SIZE,
            quantum: None,
            bootstrap: BootstrapMode::default(),
            trace_states: false,
            record_events: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `GREENRING_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    fn overlay(mut self, get: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = get("GREENRING_STACK_SIZE") {
            match v.trim().parse() {
                Ok(size) => self.stack_size = size,
                Err(_) => warn!("ignoring GREENRING_STACK_SIZE={:?}", v),
            }
        }
        if let Some(v) = get("GREENRING_QUANTUM_MS") {
            match v.trim().parse::<u64>() {
                Ok(0) => self.quantum = None,
                Ok(ms) => self.quantum = Some(Duration::from_millis(ms)),
                Err(_) => warn!("ignoring GREENRING_QUANTUM_MS={:?}", v),
            }
        }
        if let Some(v) = get("GREENRING_BOOTSTRAP") {
            match v.trim() {
                "trap" => self.bootstrap = BootstrapMode::SignalTrap,
                "direct" => self.bootstrap = BootstrapMode::Direct,
                _ => warn!("ignoring GREENRING_BOOTSTRAP={:?}", v),
            }
        }
        if get("GREENRING_TRACE").is_some() {
            self.trace_states = true;
        }
        self
    }

    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn with_quantum(mut self, quantum: Duration) -> Self {
        self.quantum = Some(quantum);
        self
    }

    pub fn with_bootstrap(mut self, mode: BootstrapMode) -> Self {
        self.bootstrap = mode;
        self
    }

    pub fn with_trace_states(mut self, on: bool) -> Self {
        self.trace_states = on;
        self
    }

    pub fn with_event_journal(mut self, on: bool) -> Self {
        self.record_events = on;
        self
    }

    /// Usable stack bytes each context gets, or `None` if `stack_size` is
    /// too large to ever be mapped.
    pub fn effective_stack_size(&self) -> Option<usize> {
        stack::geometry(self.stack_size).map(|(usable, _)| usable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.stack_size, DEFAULT_STACK_SIZE);
        assert_eq!(config.quantum, None);
        assert_eq!(config.bootstrap, BootstrapMode::SignalTrap);
        assert!(!config.trace_states);
    }

    #[test]
    fn overlay_reads_every_key() {
        let config = Config::default().overlay(env(&[
            ("GREENRING_STACK_SIZE", "131072"),
            ("GREENRING_QUANTUM_MS", "20"),
            ("GREENRING_BOOTSTRAP", "direct"),
            ("GREENRING_TRACE", "1"),
        ]));
        assert_eq!(config.stack_size, 128 * 1024);
        assert_eq!(config.quantum, Some(Duration::from_millis(20)));
        assert_eq!(config.bootstrap, BootstrapMode::Direct);
        assert!(config.trace_states);
    }

    #[test]
    fn overlay_ignores_garbage() {
        let config = Config::default().overlay(env(&[
            ("GREENRING_STACK_SIZE", "lots"),
            ("GREENRING_QUANTUM_MS", "-3"),
            ("GREENRING_BOOTSTRAP", "fork"),
        ]));
        assert_eq!(config.stack_size, DEFAULT_STACK_SIZE);
        assert_eq!(config.quantum, None);
        assert_eq!(config.bootstrap, BootstrapMode::SignalTrap);
    }

    #[test]
    fn zero_quantum_disables_preemption() {
        let config = Config::default()
            .with_quantum(Duration::from_millis(5))
            .overlay(env(&[("GREENRING_QUANTUM_MS", "0")]));
        assert_eq!(config.quantum, None);
    }

    #[test]
    fn tiny_stacks_are_clamped() {
        let config = Config::default().with_stack_size(16);
        let size = config.effective_stack_size().unwrap();
        assert!(size >= stack::MIN_STACK_SIZE);
        assert_eq!(size % stack::page_size(), 0);
    }

    #[test]
    fn huge_stacks_have_no_effective_size() {
        let config = Config::default().overlay(env(&[(
            "GREENRING_STACK_SIZE",
            "18446744073709551615",
        )]));
        assert_eq!(config.stack_size, usize::MAX);
        assert_eq!(config.effective_stack_size(), None);
    }
}
