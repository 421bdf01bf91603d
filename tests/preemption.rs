// Per-thread CPU-time timers are Linux-only; elsewhere the timer is
// process-wide and would leak ticks into the other test threads.
#![cfg(target_os = "linux")]

use greenring::{Config, Event, Scheduler, critical, yield_now};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const QUANTUM: Duration = Duration::from_millis(5);
const GIVE_UP: Duration = Duration::from_secs(20);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn preemptive() -> Config {
    Config::default().with_quantum(QUANTUM).with_event_journal(true)
}

/// Spin until `flag` is set or the deadline passes; true if it was set.
fn spin_until(flag: &AtomicBool) -> bool {
    let start = Instant::now();
    while !flag.load(Ordering::Acquire) {
        if start.elapsed() > GIVE_UP {
            return false;
        }
        std::hint::spin_loop();
    }
    true
}

/// Burn CPU for at least `d` of wall time.
fn busy_for(d: Duration) {
    let start = Instant::now();
    while start.elapsed() < d {
        std::hint::spin_loop();
    }
}

#[test]
fn busy_context_is_interrupted() {
    init_logger();
    let flag = Rc::new(AtomicBool::new(false));
    let released = Rc::new(RefCell::new(false));
    let mut scheduler = Scheduler::new(preemptive());

    let spinner = flag.clone();
    let outcome = released.clone();
    let busy = scheduler
        .spawn(move || {
            // Never yields; only a forced switch lets the setter run.
            let set = spin_until(&spinner);
            critical(|| *outcome.borrow_mut() = set);
        })
        .id();
    let setter = flag.clone();
    scheduler.spawn(move || setter.store(true, Ordering::Release));

    let stats = scheduler.run();
    assert!(*released.borrow());
    assert!(stats.preemptions >= 1);
    assert!(scheduler.events().contains(&Event::Preempted(busy)));
    assert_eq!(stats.disposed, 2);
}

#[test]
fn busy_contexts_share_the_cpu() {
    init_logger();
    const WORKERS: usize = 3;
    let done = Rc::new(AtomicU64::new(0));
    let started = Rc::new(AtomicU64::new(0));
    let mut scheduler = Scheduler::new(preemptive());
    for _ in 0..WORKERS {
        let done = done.clone();
        let started = started.clone();
        scheduler.spawn(move || {
            started.fetch_add(1, Ordering::AcqRel);
            // Every worker must have started before any can finish.
            let start = Instant::now();
            while started.load(Ordering::Acquire) < WORKERS as u64 && start.elapsed() < GIVE_UP {
                std::hint::spin_loop();
            }
            done.fetch_add(1, Ordering::AcqRel);
        });
    }

    let stats = scheduler.run();
    assert_eq!(done.load(Ordering::Acquire), WORKERS as u64);
    assert!(stats.preemptions >= (WORKERS - 1) as u64);
    assert_eq!(stats.yields, 0);
}

#[test]
fn critical_sections_defer_preemption() {
    init_logger();
    let flag = Rc::new(AtomicBool::new(false));
    let observed = Rc::new(RefCell::new(None));
    let mut scheduler = Scheduler::new(preemptive());

    let watched = flag.clone();
    let outcome = observed.clone();
    scheduler.spawn(move || {
        let during = critical(|| {
            // Spans many quanta; every tick is held back.
            busy_for(QUANTUM * 40);
            watched.load(Ordering::Acquire)
        });
        // The held-back tick is replayed on the way out.
        let after = watched.load(Ordering::Acquire);
        critical(|| *outcome.borrow_mut() = Some((during, after)));
    });
    let setter = flag.clone();
    scheduler.spawn(move || setter.store(true, Ordering::Release));

    let stats = scheduler.run();
    assert_eq!(*observed.borrow(), Some((false, true)));
    assert!(stats.preemptions >= 1);
}

#[test]
fn nested_critical_sections_replay_once_at_the_outermost_exit() {
    init_logger();
    let flag = Rc::new(AtomicBool::new(false));
    let observed = Rc::new(RefCell::new(None));
    let mut scheduler = Scheduler::new(preemptive());

    let watched = flag.clone();
    let outcome = observed.clone();
    scheduler.spawn(move || {
        let inner_exit = critical(|| {
            critical(|| busy_for(QUANTUM * 40));
            watched.load(Ordering::Acquire)
        });
        let outer_exit = watched.load(Ordering::Acquire);
        critical(|| *outcome.borrow_mut() = Some((inner_exit, outer_exit)));
    });
    let setter = flag.clone();
    scheduler.spawn(move || setter.store(true, Ordering::Release));

    scheduler.run();
    assert_eq!(*observed.borrow(), Some((false, true)));
}

#[test]
fn voluntary_yields_still_work_with_a_timer() {
    init_logger();
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut scheduler = Scheduler::new(preemptive());
    for n in 0..2 {
        let log = log.clone();
        scheduler.spawn(move || {
            for round in 0..3 {
                critical(|| log.borrow_mut().push((n, round)));
                yield_now();
            }
        });
    }

    let stats = scheduler.run();
    let mut log = log.borrow().clone();
    assert_eq!(log.len(), 6);
    log.sort();
    assert_eq!(log, [(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)]);
    assert_eq!(stats.yields, 6);
}

#[test]
fn no_ticks_without_a_quantum() {
    init_logger();
    let mut scheduler = Scheduler::new(Config::default());
    scheduler.spawn(|| busy_for(Duration::from_millis(30)));
    let stats = scheduler.run();
    assert_eq!(stats.preemptions, 0);
}

#[test]
fn timer_stops_with_the_run() {
    init_logger();
    let mut scheduler = Scheduler::new(preemptive());
    scheduler.spawn(|| busy_for(QUANTUM * 4));
    let stats = scheduler.run();

    // The host keeps computing with no scheduler to deliver ticks to.
    busy_for(QUANTUM * 4);
    assert_eq!(scheduler.stats().preemptions, stats.preemptions);
}
