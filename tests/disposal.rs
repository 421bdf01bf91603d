use greenring::{Config, Event, Scheduler, yield_now};
use std::collections::HashMap;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn yielding(times: usize) -> impl FnOnce() + 'static {
    move || {
        for _ in 0..times {
            yield_now();
        }
    }
}

#[test]
fn every_context_is_disposed_exactly_once() {
    init_logger();
    let mut scheduler = Scheduler::new(Config::default().with_event_journal(true));
    let ids: Vec<_> = (0..5).map(|n| scheduler.spawn(yielding(n)).id()).collect();

    let stats = scheduler.run();
    assert_eq!(stats.spawned, 5);
    assert_eq!(stats.disposed, 5);

    let mut disposed = HashMap::new();
    for event in scheduler.events() {
        if let Event::Disposed(id) = event {
            *disposed.entry(*id).or_insert(0) += 1;
        }
    }
    for id in &ids {
        assert_eq!(disposed.get(id), Some(&1), "context {}", id);
    }
}

#[test]
fn disposal_follows_finishing() {
    init_logger();
    let mut scheduler = Scheduler::new(Config::default().with_event_journal(true));
    for n in 0..3 {
        scheduler.spawn(yielding(n));
    }
    scheduler.run();

    let events = scheduler.events();
    for (i, event) in events.iter().enumerate() {
        if let Event::Disposed(id) = event {
            let finished = events[..i].iter().position(|e| *e == Event::Finished(*id));
            assert!(finished.is_some(), "context {} disposed before finishing", id);
            // Nothing of a disposed context is ever scheduled again.
            assert!(!events[i..].iter().any(|e| matches!(
                e,
                Event::Switched { to: Some(to), .. } if to == id
            )));
        }
    }
}

#[test]
fn contexts_are_disposed_in_finishing_order() {
    init_logger();
    let mut scheduler = Scheduler::new(Config::default().with_event_journal(true));
    let slow = scheduler.spawn(yielding(3)).id();
    let fast = scheduler.spawn(yielding(0)).id();
    let mid = scheduler.spawn(yielding(1)).id();
    scheduler.run();

    let disposed: Vec<_> = scheduler
        .events()
        .iter()
        .filter_map(|e| match e {
            Event::Disposed(id) => Some(*id),
            _ => None,
        })
        .collect();
    assert_eq!(disposed, [fast, mid, slow]);
}

#[test]
fn every_stack_is_released() {
    init_logger();
    let mut scheduler = Scheduler::new(Config::default());
    for n in 0..8 {
        scheduler.spawn(yielding(n % 3));
    }
    let stats = scheduler.run();

    assert!(stats.stack_bytes_allocated >= 8 * greenring::MIN_STACK_SIZE as u64);
    assert_eq!(stats.stack_bytes_freed, stats.stack_bytes_allocated);
    assert_eq!(stats.live(), 0);
}

#[test]
fn disposed_contexts_are_gone() {
    init_logger();
    let mut scheduler = Scheduler::new(Config::default());
    let ids: Vec<_> = (0..3).map(|n| scheduler.spawn(yielding(n)).id()).collect();
    scheduler.run();

    assert!(scheduler.is_empty());
    for id in ids {
        assert_eq!(scheduler.state(id), None);
    }
    assert!(scheduler.dump().contexts.is_empty());
}

#[test]
fn host_resumes_once_the_ring_is_exhausted() {
    init_logger();
    let mut scheduler = Scheduler::new(Config::default().with_event_journal(true));
    for n in 0..4 {
        scheduler.spawn(yielding(n));
    }
    let stats = scheduler.run();

    assert_eq!(stats.host_resumptions, 1);
    assert_eq!(scheduler.events().last(), Some(&Event::HostResumed));
    assert_eq!(scheduler.dump().running(), 1);
}

#[test]
fn unrun_contexts_are_released_with_the_scheduler() {
    init_logger();
    let mut scheduler = Scheduler::new(Config::default());
    scheduler.spawn(|| {
        unreachable!("never scheduled");
    });
    assert_eq!(scheduler.len(), 1);
    drop(scheduler);
}

#[test]
fn scheduler_can_run_again_after_finishing() {
    init_logger();
    let mut scheduler = Scheduler::new(Config::default());
    scheduler.spawn(yielding(1));
    let first = scheduler.run();
    scheduler.spawn(yielding(2));
    let second = scheduler.run();

    assert_eq!(first.disposed, 1);
    assert_eq!(second.disposed, 2);
    assert_eq!(second.host_resumptions, 2);
}

#[test]
fn take_events_drains_the_journal() {
    init_logger();
    let mut scheduler = Scheduler::new(Config::default().with_event_journal(true));
    scheduler.spawn(|| {});
    scheduler.run();
    let events = scheduler.take_events();
    assert!(!events.is_empty());
    assert!(scheduler.events().is_empty());
}

#[test]
fn journal_is_off_by_default() {
    let mut scheduler = Scheduler::new(Config::default());
    scheduler.spawn(|| {});
    scheduler.run();
    assert!(scheduler.events().is_empty());
}
