//! Waiter nodes with single-winner wake resolution.

use std::sync::atomic::{AtomicU8, Ordering};

use kernel::TaskHandle;

const PENDING: u8 = 0;
const SIGNALLED: u8 = 1;
const TIMED_OUT: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Pending,
    Signalled,
    TimedOut,
}

/// One blocked waiter on a condition or semaphore.
///
/// The signal path and the timeout path both try to claim the node; the
/// compare-and-swap guarantees at most one of them wins, so a signal
/// racing an expiring timeout can neither be lost nor counted twice.
pub(crate) struct WaitNode {
    pub(crate) task: TaskHandle,
    outcome: AtomicU8,
}

impl WaitNode {
    pub(crate) fn new(task: TaskHandle) -> Self {
        Self {
            task,
            outcome: AtomicU8::new(PENDING),
        }
    }

    /// Claims the node for the signal path.
    pub(crate) fn try_signal(&self) -> bool {
        self.outcome
            .compare_exchange(PENDING, SIGNALLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claims the node for the timeout path.
    pub(crate) fn try_timeout(&self) -> bool {
        self.outcome
            .compare_exchange(PENDING, TIMED_OUT, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn outcome(&self) -> Outcome {
        match self.outcome.load(Ordering::Acquire) {
            PENDING => Outcome::Pending,
            SIGNALLED => Outcome::Signalled,
            _ => Outcome::TimedOut,
        }
    }
}
