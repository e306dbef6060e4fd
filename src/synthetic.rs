//! Deterministic generated data, used by the CLI demo and for stress testing the engine.

use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::source::{MemorySource, RowEntry};
use crate::types::{Interval, RowId, TimePoint, NANOS_PER_MILLISECOND};

const STATES: [&str; 4] = ["RUNNING", "WAIT", "SYSCALL", "IDLE"];
const SYSCALLS: [&str; 5] = ["read", "write", "futex", "epoll_wait", "mmap"];

#[derive(Debug, Clone, Copy)]
pub struct SyntheticConfig {
    /// Number of thread rows. They are grouped under process rows.
    pub rows: usize,
    pub threads_per_process: usize,
    pub seed: u64,
    pub duration: TimePoint,
    /// Upper bound of a single state's duration.
    pub max_state: TimePoint,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        SyntheticConfig {
            rows: 16,
            threads_per_process: 4,
            seed: 0,
            duration: 1000 * NANOS_PER_MILLISECOND,
            max_state: 5 * NANOS_PER_MILLISECOND,
        }
    }
}

/// Generate processes with threads switching between scheduler states. The same config always
/// produces the same data.
pub fn generate(config: &SyntheticConfig) -> MemorySource {
    let mut rng = ChaCha20Rng::seed_from_u64(config.seed);
    let mut source = MemorySource::new(&format!("synthetic-{}", config.seed));
    let threads_per_process = config.threads_per_process.max(1);
    let mut next_id: RowId = 0;

    let mut thread_index = 0;
    while thread_index < config.rows {
        let pid = 1000 + next_id;
        next_id += 1;
        let process_id = next_id;
        source.add_row(
            RowEntry {
                id: process_id,
                parent_id: None,
                name: format!("process {}", pid),
                start: 0,
                end: config.duration,
            },
            vec![Interval::state(0, config.duration, "ALIVE").with_attribute("pid", pid)],
        );

        for _ in 0..threads_per_process.min(config.rows - thread_index) {
            next_id += 1;
            let tid = pid * 100 + next_id;
            source.add_row(
                RowEntry {
                    id: next_id,
                    parent_id: Some(process_id),
                    name: format!("thread {}", tid),
                    start: 0,
                    end: config.duration,
                },
                thread_states(&mut rng, config, tid),
            );
            thread_index += 1;
        }
    }

    tracing::debug!(seed = config.seed, rows = source.row_count(), "generated synthetic data");
    source
}

fn thread_states(rng: &mut ChaCha20Rng, config: &SyntheticConfig, tid: u64) -> Vec<Interval> {
    let max_state = config.max_state.max(1);
    let mut intervals = Vec::new();
    let mut time = 0;
    while time < config.duration {
        let end = (time + rng.random_range(1..=max_state)).min(config.duration);
        let state = STATES.choose(rng).copied().unwrap_or("IDLE");
        let mut interval = Interval::state(time, end, state)
            .with_attribute("tid", tid)
            .with_attribute("cpu", rng.random_range(0..8));
        if state == "SYSCALL" {
            let syscall = SYSCALLS.choose(rng).copied().unwrap_or("read");
            interval = interval.with_attribute("syscall", syscall);
        }
        intervals.push(interval);
        time = end;
    }
    intervals
}
