//! Independently-stacked execution contexts with explicit transfer of
//! control.
//!
//! A coroutine runs its entry closure on its own fixed-size stack.
//! [`Coroutine::resume`] transfers control into the coroutine at its last
//! suspension point (or the entry closure, the first time) and does not
//! return until the coroutine next suspends or halts; [`suspend`] is the
//! inverse, returning control to whoever last resumed. No scheduling
//! policy is attached at this layer — that is what tasks add.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use core_types::ContextId;

use crate::context::{self, ContextCore, ContextRef, HaltKind};
use crate::error::KernelError;
use crate::{current, die, ehm};

/// Coroutine configuration.
#[derive(Debug, Clone)]
pub struct CoroutineConfig {
    /// Human-readable name for diagnostics.
    pub name: String,
    /// Fixed stack size; the stack outlives all pending resumptions.
    pub stack_size: usize,
}

impl Default for CoroutineConfig {
    fn default() -> Self {
        Self {
            name: "coroutine".to_string(),
            stack_size: 128 * 1024,
        }
    }
}

/// An independently-stacked execution context.
///
/// Dropping a coroutine that has not halted unwinds its stack (running
/// destructors) before releasing the backing thread and stack.
pub struct Coroutine {
    core: Arc<ContextCore>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Coroutine {
    /// Creates a coroutine; the entry closure does not run until the
    /// first [`resume`](Self::resume).
    pub fn new(
        config: CoroutineConfig,
        entry: impl FnOnce() + Send + 'static,
    ) -> Result<Self, KernelError> {
        let core = Arc::new(ContextCore::new(config.name.clone()));
        let trampoline = {
            let core = core.clone();
            move || {
                if !core.gate.wait_for_grant() {
                    core.mark_halted(HaltKind::Cancelled);
                    core.gate.halt();
                    return;
                }
                current::enter(core.clone(), None);
                core.mark_active();
                let entry: Box<dyn FnOnce()> = Box::new(move || {
                    // Schedule-in poll point: async events tossed before
                    // the first resume are honored before the entry runs.
                    ehm::poll();
                    entry();
                });
                let kind = context::run_entry(&core, entry);
                core.mark_halted(kind);
                core.gate.halt();
            }
        };
        let thread = context::spawn_context_thread(
            format!("weft-co-{}", config.name),
            config.stack_size,
            trampoline,
        )?;
        Ok(Self {
            core,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Transfers control into this coroutine until it next suspends or
    /// halts.
    ///
    /// Fatal when the coroutine attempts to resume itself or has already
    /// halted — both are caller contract violations, not recoverable
    /// conditions.
    pub fn resume(&self) {
        if let Some(core) = current::try_core() {
            if core.id == self.core.id {
                die!(
                    "context {} ({}) attempted to resume itself",
                    self.core.name,
                    self.core.id
                );
            }
        }
        if self.core.halt_kind().is_some() {
            die!(
                "attempt to resume halted context {} ({})",
                self.core.name,
                self.core.id
            );
        }
        self.core.gate.resume();
    }

    pub fn id(&self) -> ContextId {
        self.core.id
    }

    pub fn name(&self) -> String {
        self.core.name.clone()
    }

    /// Whether the coroutine's entry closure has finished.
    pub fn is_halted(&self) -> bool {
        self.core.halt_kind().is_some()
    }

    pub fn halt_kind(&self) -> Option<HaltKind> {
        self.core.halt_kind()
    }

    /// Async-toss target for this coroutine's context.
    pub fn context(&self) -> ContextRef {
        ContextRef {
            core: self.core.clone(),
        }
    }
}

impl Drop for Coroutine {
    fn drop(&mut self) {
        if self.core.halt_kind().is_none() {
            self.core.gate.kill();
        }
        if let Some(thread) = self.thread.lock().unwrap().take() {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coroutine")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .field("halted", &self.is_halted())
            .finish()
    }
}

/// Suspends the calling coroutine, returning control to whoever last
/// resumed it. A poll point on the way back in.
///
/// Fatal from a task context (tasks yield or block through the scheduler)
/// and from threads hosting no context at all.
pub fn suspend() {
    let core = current::require_core("suspend");
    if current::try_task().is_some() {
        die!(
            "task {} ({}) may not suspend; tasks yield or block through the scheduler",
            core.name,
            core.id
        );
    }
    core.suspend_current();
    ehm::poll();
}
