//! Each context runs to completion before the next one starts.

use greenring::{Config, Scheduler};

const NUM_CONTEXTS: usize = 3;

fn main() {
    env_logger::init();

    // Cooperative only: the prints below are not wrapped in `critical`.
    let config = Config {
        quantum: None,
        ..Config::from_env()
    };
    let mut scheduler = Scheduler::new(config);
    for n in 0..NUM_CONTEXTS {
        scheduler.spawn(move || {
            println!("Context {}: hello", n);
            for step in 1..=3 {
                println!("Context {}: step {}", n, step);
            }
        });
    }

    println!("switching to first context");
    let stats = scheduler.run();
    println!("back to the main thread");
    println!("{} contexts disposed", stats.disposed);
}
