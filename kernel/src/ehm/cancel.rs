//! Cancellation state and scoped control.
//!
//! Cancellation is a reserved asynchronous condition checked ahead of
//! ordinary mailbox events at every poll point. When the flag is set and
//! cancellation is enabled, the target unwinds its own stack; the unwind is
//! caught at the context trampoline and the context halts as `Cancelled`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::context::ContextCore;
use crate::current;

/// Unwind payload used for cancellation. Passes transparently through
/// `try_catch`; only the context trampoline consumes it.
pub(crate) struct CancelUnwind;

/// Per-context cancellation cell.
pub(crate) struct CancelCell {
    flag: AtomicBool,
    disabled: AtomicBool,
    in_progress: AtomicBool,
}

impl CancelCell {
    pub(crate) fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
            in_progress: AtomicBool::new(false),
        }
    }

    pub(crate) fn set(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub(crate) fn flagged(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub(crate) fn enabled(&self) -> bool {
        !self.disabled.load(Ordering::Acquire)
    }

    fn set_disabled(&self, disabled: bool) -> bool {
        self.disabled.swap(disabled, Ordering::AcqRel)
    }

    pub(crate) fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub(crate) fn begin_unwind(&self) {
        self.in_progress.store(true, Ordering::Release);
    }

    pub(crate) fn finish_unwind(&self) {
        self.in_progress.store(false, Ordering::Release);
    }
}

/// Scoped guard disabling cancellation for the calling context.
///
/// While any guard is live, poll points deliver ordinary async events but
/// never start a cancellation unwind; the flag stays latched and takes
/// effect at the first poll point after the guard drops.
pub struct CancelGuard {
    core: Arc<ContextCore>,
    was_disabled: bool,
}

impl CancelGuard {
    /// Disables cancellation until the guard is dropped.
    pub fn disable() -> Self {
        let core = current::require_core("CancelGuard::disable");
        let was_disabled = core.cancel.set_disabled(true);
        Self { core, was_disabled }
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.core.cancel.set_disabled(self.was_disabled);
    }
}

/// Whether the calling context's cancel flag is set.
pub fn cancelled() -> bool {
    current::require_core("cancelled").cancel.flagged()
}

/// Whether cancellation is currently enabled for the calling context.
pub fn cancel_enabled() -> bool {
    current::require_core("cancel_enabled").cancel.enabled()
}
