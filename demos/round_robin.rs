//! Contexts take turns by yielding.

use greenring::{Config, Scheduler, current, yield_now};

const NUM_CONTEXTS: usize = 3;
const ROUNDS: usize = 3;

fn main() {
    env_logger::init();

    // Cooperative only: the prints below are not wrapped in `critical`.
    let config = Config {
        quantum: None,
        ..Config::from_env()
    }
    .with_trace_states(true);
    let mut scheduler = Scheduler::new(config);
    for _ in 0..NUM_CONTEXTS {
        scheduler.spawn(|| {
            let id = current().map(|id| id.as_u64()).unwrap_or_default();
            for round in 0..ROUNDS {
                println!("Context {}: round {}", id, round);
                if let Some(states) = greenring::dump() {
                    print!("{}", states);
                }
                yield_now();
            }
            println!("Context {}: done", id);
        });
    }

    println!("switching to first context");
    let stats = scheduler.run();
    println!("back to the main thread");
    println!(
        "{} yields, {} switches, {} contexts disposed",
        stats.yields, stats.switches, stats.disposed
    );
}
