//! The staleness gate: the only way results of background tasks reach shared state.
//!
//! Every scope (a data source's build, the viewer's zoom) has at most one current task. A result
//! is applied only if the task that produced it is still current, compared by sequence number.
//! Two tasks with identical parameters are still different tasks, so an older one is rejected
//! even when it computed the same window.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::task::{lock_unpoisoned, TaskHandle, TaskScope};

#[derive(Debug, Default)]
pub struct StalenessGate {
    next_seq: AtomicU64,
    current: Mutex<HashMap<TaskScope, u64>>,
}

impl StalenessGate {
    pub fn new() -> StalenessGate {
        StalenessGate::default()
    }

    /// Monotonically increasing, starts at 1.
    pub fn next_sequence(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Make `handle` the current task of its scope, superseding whatever was there.
    pub fn register(&self, handle: &TaskHandle) {
        let previous = lock_unpoisoned(&self.current).insert(handle.scope(), handle.seq());
        if let Some(previous) = previous {
            tracing::trace!(
                scope = ?handle.scope(),
                previous,
                seq = handle.seq(),
                "task superseded"
            );
        }
    }

    /// Clear the scope, but only if `seq` is still its current task.
    /// Returns whether the task was current.
    pub fn retire(&self, scope: TaskScope, seq: u64) -> bool {
        let mut current = lock_unpoisoned(&self.current);
        if current.get(&scope) == Some(&seq) {
            current.remove(&scope);
            true
        } else {
            false
        }
    }

    pub fn is_current(&self, scope: TaskScope, seq: u64) -> bool {
        lock_unpoisoned(&self.current).get(&scope) == Some(&seq)
    }

    pub fn current(&self, scope: TaskScope) -> Option<u64> {
        lock_unpoisoned(&self.current).get(&scope).copied()
    }

    /// Run `mutation` if `handle` is still current. Returns `None` when the result was dropped.
    pub fn apply<R>(&self, handle: &TaskHandle, mutation: impl FnOnce() -> R) -> Option<R> {
        self.apply_seq(handle.scope(), handle.seq(), mutation)
    }

    /// Same as [StalenessGate::apply] for results that only carry the scope and sequence number.
    /// Registration happens on the same thread that applies results, so the check can't go
    /// stale between the lookup and the mutation.
    pub fn apply_seq<R>(
        &self,
        scope: TaskScope,
        seq: u64,
        mutation: impl FnOnce() -> R,
    ) -> Option<R> {
        if !self.is_current(scope, seq) {
            tracing::debug!(?scope, seq, "dropping result of a superseded task");
            return None;
        }
        Some(mutation())
    }
}
