//! Busy contexts that never yield, time sliced by the preemption timer.

use greenring::{Config, Scheduler, critical, current};
use std::time::Duration;

const NUM_CONTEXTS: usize = 3;
const ITERATIONS: u64 = 40_000_000;
const REPORT_EVERY: u64 = 10_000_000;

fn main() {
    env_logger::init();

    let mut config = Config::from_env();
    if config.quantum.is_none() {
        config = config.with_quantum(Duration::from_millis(20));
    }
    let quantum = config.quantum;

    let mut scheduler = Scheduler::new(config);
    for _ in 0..NUM_CONTEXTS {
        scheduler.spawn(|| {
            let id = current().map(|id| id.as_u64()).unwrap_or_default();
            let mut acc: u64 = 0;
            for i in 0..ITERATIONS {
                acc = std::hint::black_box(acc.wrapping_mul(31).wrapping_add(i));
                if i % REPORT_EVERY == 0 {
                    // Console output must not be torn away mid-write.
                    critical(|| println!("Context {}: {} iterations", id, i));
                }
            }
            critical(|| println!("Context {}: done ({:x})", id, acc));
        });
    }

    println!("switching to first context, quantum {:?}", quantum);
    let stats = scheduler.run();
    println!("back to the main thread");
    println!(
        "{} preemptions, {} switches, {} contexts disposed",
        stats.preemptions, stats.switches, stats.disposed
    );
}
