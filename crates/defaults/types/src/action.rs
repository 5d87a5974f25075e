//! Outcome of a reconciliation pass

use std::time::Duration;

/// What the control loop should do with a request after reconciling it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Reconcile the same identity again after the delay
    Requeue(Duration),
    /// Nothing left to do until the next relevant event
    AwaitChange,
}

impl Action {
    pub fn requeue(after: Duration) -> Self {
        Self::Requeue(after)
    }

    pub fn await_change() -> Self {
        Self::AwaitChange
    }

    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Self::Requeue(after) => Some(*after),
            Self::AwaitChange => None,
        }
    }
}
