use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// A task finished twice, or finished without having been counted.
    #[error("lifecycle underflow: dirty counter decremented with no operation in flight")]
    Underflow,
}

/// Number of refresh and zoom operations in flight. Zero means quiescent.
#[derive(Debug, Default)]
pub struct DirtyCounter {
    value: AtomicU64,
}

impl DirtyCounter {
    pub fn new() -> DirtyCounter {
        DirtyCounter::default()
    }

    pub fn increment(&self) -> u64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Never goes below zero. An underflow leaves the counter at zero and is reported as an
    /// error so the caller can carry on.
    pub fn decrement(&self) -> Result<u64, LifecycleError> {
        match self
            .value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| {
                value.checked_sub(1)
            }) {
            Ok(previous) => Ok(previous - 1),
            Err(_) => {
                tracing::error!("{}", LifecycleError::Underflow);
                Err(LifecycleError::Underflow)
            }
        }
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    pub fn is_quiescent(&self) -> bool {
        self.value() == 0
    }
}
