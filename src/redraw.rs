//! Debouncer for redraw requests.
//!
//! At most one redraw is in flight. Requests arriving while one is in flight collapse into a
//! single follow-up redraw, which is scheduled when the host reports the in-flight one done.

use std::sync::Mutex;

use crate::task::lock_unpoisoned;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedrawState {
    #[default]
    Idle,
    /// A redraw was scheduled and hasn't completed yet.
    Busy,
    /// Like `Busy`, plus at least one request arrived in the meantime.
    Pending,
}

#[derive(Debug, Default)]
pub struct RedrawCoalescer {
    state: Mutex<RedrawState>,
}

impl RedrawCoalescer {
    pub fn new() -> RedrawCoalescer {
        RedrawCoalescer::default()
    }

    /// Returns true when the caller must schedule a redraw now.
    pub fn request(&self) -> bool {
        let mut state = lock_unpoisoned(&self.state);
        match *state {
            RedrawState::Idle => {
                *state = RedrawState::Busy;
                true
            }
            RedrawState::Busy | RedrawState::Pending => {
                *state = RedrawState::Pending;
                false
            }
        }
    }

    /// Called when a scheduled redraw finished. Returns true when another one must be scheduled.
    pub fn complete(&self) -> bool {
        let mut state = lock_unpoisoned(&self.state);
        match *state {
            RedrawState::Pending => {
                *state = RedrawState::Busy;
                true
            }
            RedrawState::Busy => {
                *state = RedrawState::Idle;
                false
            }
            RedrawState::Idle => {
                tracing::warn!("redraw completed while none was scheduled");
                false
            }
        }
    }

    pub fn state(&self) -> RedrawState {
        *lock_unpoisoned(&self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drives the coalescer like a host would, counting the redraws it actually performs.
    fn run_burst(requests_during_flight: usize) -> usize {
        let coalescer = RedrawCoalescer::new();
        let mut scheduled = 0;

        if coalescer.request() {
            scheduled += 1;
        }
        for _ in 0..requests_during_flight {
            if coalescer.request() {
                scheduled += 1;
            }
        }
        while coalescer.state() != RedrawState::Idle {
            if coalescer.complete() {
                scheduled += 1;
            }
        }
        scheduled
    }

    #[test]
    fn burst_while_in_flight_yields_two_redraws() {
        assert_eq!(run_burst(0), 1);
        assert_eq!(run_burst(1), 2);
        assert_eq!(run_burst(50), 2);
    }

    #[test]
    fn transitions() {
        let coalescer = RedrawCoalescer::new();
        assert_eq!(coalescer.state(), RedrawState::Idle);
        assert!(coalescer.request());
        assert_eq!(coalescer.state(), RedrawState::Busy);
        assert!(!coalescer.request());
        assert_eq!(coalescer.state(), RedrawState::Pending);
        assert!(coalescer.complete());
        assert_eq!(coalescer.state(), RedrawState::Busy);
        assert!(!coalescer.complete());
        assert_eq!(coalescer.state(), RedrawState::Idle);

        // Spurious completion is ignored.
        assert!(!coalescer.complete());
        assert_eq!(coalescer.state(), RedrawState::Idle);
    }
}
