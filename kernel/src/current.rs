//! Thread-local current-context registry.
//!
//! Every operation in the kernel needs to know its calling context without
//! threading a parameter through user code. Each context owns its backing
//! thread, so the registry is a thread-local set exactly once when the
//! context thread first runs and never mutated elsewhere. Threads that do
//! not host a context (the process main thread, processor dispatch threads)
//! simply read `None`.

use std::cell::RefCell;
use std::sync::Arc;

use core_types::{ContextId, ProcessorId};

use crate::context::ContextCore;
use crate::die;
use crate::task::{TaskCore, TaskHandle};

#[derive(Clone)]
pub(crate) struct CurrentCtx {
    pub(crate) core: Arc<ContextCore>,
    pub(crate) task: Option<Arc<TaskCore>>,
}

thread_local! {
    static CURRENT: RefCell<Option<CurrentCtx>> = const { RefCell::new(None) };
}

/// Registers the calling thread as the given context. Called once, by the
/// context trampoline, before any user code runs.
pub(crate) fn enter(core: Arc<ContextCore>, task: Option<Arc<TaskCore>>) {
    CURRENT.with(|cur| {
        let mut cur = cur.borrow_mut();
        if cur.is_some() {
            die!("thread already hosts a context; cannot enter {}", core.id);
        }
        *cur = Some(CurrentCtx { core, task });
    });
}

pub(crate) fn try_core() -> Option<Arc<ContextCore>> {
    CURRENT.with(|cur| cur.borrow().as_ref().map(|c| c.core.clone()))
}

pub(crate) fn try_task() -> Option<Arc<TaskCore>> {
    CURRENT.with(|cur| cur.borrow().as_ref().and_then(|c| c.task.clone()))
}

pub(crate) fn require_core(operation: &str) -> Arc<ContextCore> {
    match try_core() {
        Some(core) => core,
        None => die!("{} requires a runtime context, but the calling thread hosts none", operation),
    }
}

pub(crate) fn require_task(operation: &str) -> Arc<TaskCore> {
    match try_task() {
        Some(task) => task,
        None => die!("{} requires a task context, but the calling thread hosts none", operation),
    }
}

/// Identity of the calling context, if the thread hosts one.
pub fn current_context_id() -> Option<ContextId> {
    try_core().map(|core| core.id)
}

/// Name of the calling context, if the thread hosts one.
pub fn current_context_name() -> Option<String> {
    try_core().map(|core| core.name.clone())
}

/// Handle to the calling task. Fatal when the thread hosts no task.
pub fn current_task() -> TaskHandle {
    TaskHandle::from_core(require_task("current_task"))
}

/// Handle to the calling task, or `None` outside any task.
pub fn try_current_task() -> Option<TaskHandle> {
    try_task().map(TaskHandle::from_core)
}

/// The processor that most recently dispatched the calling task.
pub fn current_processor() -> Option<ProcessorId> {
    try_task().and_then(|task| task.dispatcher())
}
