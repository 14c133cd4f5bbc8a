//! Shared execution-context machinery.
//!
//! Every independently-stacked context — plain coroutines and tasks alike —
//! is backed by one dedicated OS thread whose stack size is fixed at
//! creation. Transfer of control is a strict two-party handoff through a
//! [`Gate`]: `resume` lets the context run and blocks the caller until the
//! context suspends or halts; `suspend` is the inverse. The gate counts
//! grants and completed suspensions, so a resume issued while a suspension
//! is still in flight (a wake racing a block) waits for the context to be
//! properly idle instead of running it on two engines at once.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::AtomicBool;
use std::sync::{Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use core_types::ContextId;

use crate::ehm::cancel::{CancelCell, CancelUnwind};
use crate::ehm::event::{Event, ThrownEvent};
use crate::ehm::mailbox::Mailbox;
use crate::error::KernelError;
use crate::{die, ehm};

/// Why a context stopped executing for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltKind {
    /// The entry closure returned normally.
    Completed,
    /// Cancellation (or owner teardown) unwound the context's stack.
    Cancelled,
}

/// Coarse liveness of a context, independent of scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Created,
    Active,
    Halted(HaltKind),
}

#[derive(Default)]
struct GateState {
    /// Resumptions granted to the context so far.
    grants: u64,
    /// Suspensions the context has completed so far.
    suspensions: u64,
    /// Owner teardown: pending suspend-waits unwind instead of resuming.
    killed: bool,
    /// The context finished; resumers stop waiting.
    halted: bool,
}

/// Two-party control-transfer gate.
///
/// Invariant: `grants == suspensions` while the context is idle and
/// `grants == suspensions + 1` while it runs.
pub(crate) struct Gate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            cond: Condvar::new(),
        }
    }

    /// Grants the context one run and blocks until it suspends or halts.
    pub(crate) fn resume(&self) {
        let mut st = self.state.lock().unwrap();
        loop {
            if st.halted {
                return;
            }
            if st.grants == st.suspensions {
                break;
            }
            st = self.cond.wait(st).unwrap();
        }
        st.grants += 1;
        let target = st.grants;
        self.cond.notify_all();
        while st.suspensions != target && !st.halted {
            st = self.cond.wait(st).unwrap();
        }
    }

    /// First wait of a freshly spawned context thread.
    ///
    /// Returns `false` if the context was torn down before ever running.
    pub(crate) fn wait_for_grant(&self) -> bool {
        let mut st = self.state.lock().unwrap();
        while st.grants == st.suspensions && !st.killed {
            st = self.cond.wait(st).unwrap();
        }
        !st.killed
    }

    /// Completes one suspension and blocks until the next grant.
    ///
    /// Returns `false` if the context was torn down while suspended; the
    /// caller must unwind its stack instead of continuing.
    pub(crate) fn suspend(&self) -> bool {
        let mut st = self.state.lock().unwrap();
        st.suspensions += 1;
        self.cond.notify_all();
        while st.grants == st.suspensions && !st.killed {
            st = self.cond.wait(st).unwrap();
        }
        !st.killed
    }

    /// Marks the context finished and releases any waiting resumer.
    pub(crate) fn halt(&self) {
        let mut st = self.state.lock().unwrap();
        st.halted = true;
        self.cond.notify_all();
    }

    /// Requests teardown of a context that never ran or is suspended.
    pub(crate) fn kill(&self) {
        let mut st = self.state.lock().unwrap();
        st.killed = true;
        self.cond.notify_all();
    }

    /// Number of completed suspensions — the context-switch count.
    pub(crate) fn switches(&self) -> u64 {
        self.state.lock().unwrap().suspensions
    }
}

/// State shared by a context's own thread, its resumers, and event tossers.
pub(crate) struct ContextCore {
    pub(crate) id: ContextId,
    pub(crate) name: String,
    pub(crate) gate: Gate,
    lifecycle: Mutex<Lifecycle>,
    halted_cond: Condvar,
    /// Async event queue, written by foreign contexts under its own lock.
    pub(crate) mailbox: Mailbox,
    pub(crate) cancel: CancelCell,
    /// Injected voluntary-yield request, honored at the next poll point.
    pub(crate) yield_requested: AtomicBool,
}

impl ContextCore {
    pub(crate) fn new(name: String) -> Self {
        Self {
            id: ContextId::new(),
            name,
            gate: Gate::new(),
            lifecycle: Mutex::new(Lifecycle::Created),
            halted_cond: Condvar::new(),
            mailbox: Mailbox::new(),
            cancel: CancelCell::new(),
            yield_requested: AtomicBool::new(false),
        }
    }

    pub(crate) fn halt_kind(&self) -> Option<HaltKind> {
        match *self.lifecycle.lock().unwrap() {
            Lifecycle::Halted(kind) => Some(kind),
            _ => None,
        }
    }

    pub(crate) fn mark_active(&self) {
        *self.lifecycle.lock().unwrap() = Lifecycle::Active;
    }

    pub(crate) fn mark_halted(&self, kind: HaltKind) {
        *self.lifecycle.lock().unwrap() = Lifecycle::Halted(kind);
        self.halted_cond.notify_all();
    }

    /// Blocks the calling thread until the context halts.
    pub(crate) fn wait_halted(&self) -> HaltKind {
        let mut life = self.lifecycle.lock().unwrap();
        loop {
            if let Lifecycle::Halted(kind) = *life {
                return kind;
            }
            life = self.halted_cond.wait(life).unwrap();
        }
    }

    /// Bounded variant of [`wait_halted`](Self::wait_halted).
    pub(crate) fn wait_halted_for(&self, timeout: Duration) -> Option<HaltKind> {
        let deadline = std::time::Instant::now() + timeout;
        let mut life = self.lifecycle.lock().unwrap();
        loop {
            if let Lifecycle::Halted(kind) = *life {
                return Some(kind);
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self.halted_cond.wait_timeout(life, deadline - now).unwrap();
            life = guard;
        }
    }

    /// Suspends the context from its own thread; unwinds on teardown.
    pub(crate) fn suspend_current(&self) {
        if !self.gate.suspend() {
            self.cancel.begin_unwind();
            panic::panic_any(CancelUnwind);
        }
    }
}

/// Runs a context entry closure, classifying how its stack ended.
///
/// A cancellation unwind halts the context normally. A synchronous event
/// escaping the entry closure means propagation exhausted every handler in
/// this context — a caller contract violation, reported fatally. The same
/// goes for any foreign panic.
pub(crate) fn run_entry(core: &ContextCore, entry: Box<dyn FnOnce()>) -> HaltKind {
    match panic::catch_unwind(AssertUnwindSafe(entry)) {
        Ok(()) => HaltKind::Completed,
        Err(payload) => {
            if payload.is::<CancelUnwind>() {
                core.cancel.finish_unwind();
                HaltKind::Cancelled
            } else if let Some(thrown) = payload.downcast_ref::<ThrownEvent>() {
                let msg = thrown.event.info().message();
                die!(
                    "propagation failed to find a matching handler in context {} ({}): \
                     event type {}{}{}",
                    core.name,
                    core.id,
                    thrown.event.event_type().name(),
                    if msg.is_empty() { "" } else { ", message: " },
                    msg
                )
            } else {
                die!(
                    "context {} ({}) terminated by an unhandled panic",
                    core.name,
                    core.id
                )
            }
        }
    }
}

/// Spawns the backing thread for a context.
///
/// Thread-creation failure is resource exhaustion and is surfaced to the
/// caller rather than masked.
pub(crate) fn spawn_context_thread(
    thread_name: String,
    stack_size: usize,
    body: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>, KernelError> {
    ehm::silence_event_unwinds();
    thread::Builder::new()
        .name(thread_name)
        .stack_size(stack_size)
        .spawn(body)
        .map_err(|e| KernelError::SpawnFailed(e.to_string()))
}

/// Shared, cloneable reference to a context, usable as an async-toss target.
#[derive(Clone)]
pub struct ContextRef {
    pub(crate) core: std::sync::Arc<ContextCore>,
}

impl ContextRef {
    /// The context's unique identity.
    pub fn id(&self) -> ContextId {
        self.core.id
    }

    /// The context's name, as given at creation.
    pub fn name(&self) -> String {
        self.core.name.clone()
    }

    /// Whether the context has halted, and how.
    pub fn halt_kind(&self) -> Option<HaltKind> {
        self.core.halt_kind()
    }

    /// Number of async events queued and not yet delivered or discarded.
    pub fn pending_async_events(&self) -> usize {
        self.core.mailbox.pending()
    }
}

impl std::fmt::Debug for ContextRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextRef")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .finish()
    }
}
