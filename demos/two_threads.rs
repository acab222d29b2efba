//! Two threads allocating in a loop and never freeing, so the ledger only
//! grows and ages. A report shows up on stderr every period.
//!
//! `cargo run --example two_threads -- [rounds]`

use std::{thread, time::Duration};

use heapstat::externc::malloc;
use rand::Rng;

const BLOCKS_PER_ROUND: usize = 10;

fn churn(rounds: usize) {
    let mut rng = rand::thread_rng();
    for round in 1..=rounds {
        for _ in 0..BLOCKS_PER_ROUND {
            let size = if rng.gen_bool(0.5) {
                round
            } else {
                rng.gen_range(0..4096)
            };
            // leaked on purpose
            _ = unsafe { malloc(size) };
        }
        thread::sleep(Duration::from_secs(5));
    }
}

fn main() {
    let rounds = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(99);

    let workers: Vec<_> = (0..2).map(|_| thread::spawn(move || churn(rounds))).collect();
    for worker in workers {
        _ = worker.join();
    }
}
