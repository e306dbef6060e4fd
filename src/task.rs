//! Handles for background tasks and the cooperative cancellation flag they share with the
//! foreground.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::types::{DataSourceId, Sampling};

/// Set by the foreground, polled by the task between rows and between phases.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What a task is the current one for. There is one current build per data source and one
/// current zoom per viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskScope {
    Build(DataSourceId),
    Zoom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskTarget {
    Build(DataSourceId),
    Zoom(Sampling),
}

impl TaskTarget {
    pub fn scope(&self) -> TaskScope {
        match self {
            TaskTarget::Build(ds) => TaskScope::Build(*ds),
            TaskTarget::Zoom(_) => TaskScope::Zoom,
        }
    }
}

/// How a task ended. `Failed` is treated like `Cancelled` by everything downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Cancelled,
    Failed,
}

/// A started task. Handles are never reused, a restarted computation gets a new one with a
/// higher sequence number.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    seq: u64,
    target: TaskTarget,
    cancel: CancelFlag,
}

impl TaskHandle {
    pub fn new(seq: u64, target: TaskTarget) -> TaskHandle {
        TaskHandle {
            seq,
            target,
            cancel: CancelFlag::new(),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn target(&self) -> TaskTarget {
        self.target
    }

    pub fn scope(&self) -> TaskScope {
        self.target.scope()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }
}

/// Registries only hold plain data, a panic elsewhere doesn't leave them inconsistent.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run a task body, a panic inside it (usually from a data source) ends the task as `Failed`.
pub(crate) fn run_guarded<T>(task: &str, seq: u64, failed: T, body: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result,
        Err(payload) => {
            tracing::error!(task, seq, panic = panic_message(payload.as_ref()), "task panicked");
            failed
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
