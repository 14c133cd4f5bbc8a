//! Scheduler-managed tasks.
//!
//! A task is a coroutine extended with scheduler state: a lifecycle of
//! `Start → Ready → Running → (Blocked ↔ Ready) → Halted`, a base and an
//! active priority, a home cluster, and an optional processor binding.
//! Tasks never transfer control to each other directly — they relinquish
//! to their dispatching processor, and wake-ups go through the cluster's
//! ready queue.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use core_types::{ContextId, Priority, ProcessorId};
use serde::{Deserialize, Serialize};

use crate::cluster::{Cluster, ClusterCore, SchedulingEvent};
use crate::context::{self, ContextCore, ContextRef, HaltKind};
use crate::error::KernelError;
use crate::{current, die, ehm};

/// Marker for "never dispatched" in the dispatcher slot.
const NO_DISPATCHER: usize = usize::MAX;

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// Created, not yet placed on a ready queue.
    Start,
    /// On a cluster's ready queue, waiting for a processor.
    Ready,
    /// Executing on a processor.
    Running,
    /// Suspended on a primitive or a sleep; runs again after a wake.
    Blocked,
    /// Entry returned or the stack was unwound; destruction is now safe.
    Halted,
}

/// Task configuration.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Human-readable name for diagnostics and audit output.
    pub name: String,
    /// Base scheduling priority.
    pub priority: Priority,
    /// Fixed stack size for the task's context.
    pub stack_size: usize,
    /// Pin the task to one processor; unpinned tasks run anywhere.
    pub bound: Option<ProcessorId>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            name: "task".to_string(),
            priority: Priority::DEFAULT,
            stack_size: 256 * 1024,
            bound: None,
        }
    }
}

struct TaskSched {
    state: TaskState,
    cluster: Arc<ClusterCore>,
    /// A wake arrived while the task was running; consumed by the next
    /// block so the wake is never lost.
    wake_pending: bool,
}

pub(crate) struct TaskCore {
    pub(crate) ctx: Arc<ContextCore>,
    pub(crate) bound: Option<ProcessorId>,
    base_priority: Priority,
    active_priority: AtomicU8,
    last_dispatcher: AtomicUsize,
    sched: Mutex<TaskSched>,
}

impl TaskCore {
    pub(crate) fn active_priority(&self) -> Priority {
        Priority(self.active_priority.load(Ordering::Acquire))
    }

    pub(crate) fn dispatcher(&self) -> Option<ProcessorId> {
        match self.last_dispatcher.load(Ordering::Acquire) {
            NO_DISPATCHER => None,
            id => Some(ProcessorId(id)),
        }
    }

    pub(crate) fn note_dispatch(&self, processor: ProcessorId) {
        self.last_dispatcher.store(processor.0, Ordering::Release);
    }

    pub(crate) fn state(&self) -> TaskState {
        self.sched.lock().unwrap().state
    }

    /// Makes the task ready and enqueues it on its current cluster.
    ///
    /// Returns `false` without enqueuing when the task is already ready,
    /// halted, or running — a wake against a running task is latched and
    /// consumed by its next block instead of being lost.
    pub(crate) fn wake(self: &Arc<Self>) -> bool {
        let cluster = {
            let mut sched = self.sched.lock().unwrap();
            match sched.state {
                TaskState::Start | TaskState::Blocked => {
                    sched.state = TaskState::Ready;
                    sched.cluster.clone()
                }
                TaskState::Running => {
                    sched.wake_pending = true;
                    return false;
                }
                TaskState::Ready | TaskState::Halted => return false,
            }
        };
        cluster.audit(SchedulingEvent::Woken { task: self.ctx.id });
        cluster.enqueue(self.clone());
        true
    }

    fn set_running(&self) {
        self.sched.lock().unwrap().state = TaskState::Running;
    }

    fn finish(self: &Arc<Self>, kind: HaltKind) {
        let cluster = {
            let mut sched = self.sched.lock().unwrap();
            sched.state = TaskState::Halted;
            sched.cluster.clone()
        };
        cluster.audit(SchedulingEvent::Halted { task: self.ctx.id });
        self.ctx.mark_halted(kind);
        self.ctx.gate.halt();
    }
}

/// Shared, cloneable handle to a task.
///
/// Equality is task identity. The handle does not own the task: dropping
/// every handle detaches the task, which keeps running to completion.
#[derive(Clone)]
pub struct TaskHandle {
    pub(crate) core: Arc<TaskCore>,
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        self.core.ctx.id == other.core.ctx.id
    }
}

impl Eq for TaskHandle {}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.core.ctx.id)
            .field("name", &self.core.ctx.name)
            .field("state", &self.core.state())
            .finish()
    }
}

impl TaskHandle {
    pub(crate) fn from_core(core: Arc<TaskCore>) -> Self {
        Self { core }
    }

    pub fn id(&self) -> ContextId {
        self.core.ctx.id
    }

    pub fn name(&self) -> String {
        self.core.ctx.name.clone()
    }

    pub fn state(&self) -> TaskState {
        self.core.state()
    }

    /// Base priority, as configured at creation.
    pub fn priority(&self) -> Priority {
        self.core.base_priority
    }

    /// Effective priority, including any inherited boost.
    pub fn active_priority(&self) -> Priority {
        self.core.active_priority()
    }

    /// Raises the task's active priority to at least `priority`.
    ///
    /// Used by priority-inheriting locks: a blocked waiter lends its
    /// priority to the owner. Never lowers the active priority.
    pub fn lend_priority(&self, priority: Priority) {
        self.core
            .active_priority
            .fetch_max(priority.0, Ordering::AcqRel);
    }

    /// Reverts the active priority to the base priority.
    pub fn restore_priority(&self) {
        self.core
            .active_priority
            .store(self.core.base_priority.0, Ordering::Release);
    }

    /// Makes the task ready. See [`TaskCore::wake`] for the state rules.
    pub fn wake(&self) -> bool {
        self.core.wake()
    }

    /// Sets the task's cancel flag; it takes effect at the task's next
    /// poll point with cancellation enabled.
    pub fn cancel(&self) {
        self.core.ctx.cancel.set();
    }

    /// Requests a voluntary yield at the task's next poll point.
    pub fn request_yield(&self) {
        self.core
            .ctx
            .yield_requested
            .store(true, Ordering::Release);
    }

    /// Blocks the calling thread until the task halts.
    pub fn join(&self) -> HaltKind {
        if let Some(core) = current::try_core() {
            if core.id == self.core.ctx.id {
                die!("task {} ({}) attempted to join itself", self.core.ctx.name, self.core.ctx.id);
            }
        }
        self.core.ctx.wait_halted()
    }

    /// Bounded [`join`](Self::join).
    pub fn join_for(&self, timeout: Duration) -> Result<HaltKind, KernelError> {
        if let Some(core) = current::try_core() {
            if core.id == self.core.ctx.id {
                die!("task {} ({}) attempted to join itself", self.core.ctx.name, self.core.ctx.id);
            }
        }
        self.core.ctx.wait_halted_for(timeout).ok_or(KernelError::Timeout)
    }

    /// The cluster the task is currently registered on.
    pub fn cluster(&self) -> Cluster {
        Cluster {
            core: self.core.sched.lock().unwrap().cluster.clone(),
        }
    }

    /// Async-toss target for this task's context.
    pub fn context(&self) -> ContextRef {
        ContextRef {
            core: self.core.ctx.clone(),
        }
    }

    /// The processor that most recently dispatched this task.
    pub fn last_dispatched_by(&self) -> Option<ProcessorId> {
        self.core.dispatcher()
    }

    /// Number of completed context switches (suspensions) so far.
    pub fn context_switches(&self) -> u64 {
        self.core.ctx.gate.switches()
    }

    /// Number of async events queued and not yet delivered.
    pub fn pending_async_events(&self) -> usize {
        self.core.ctx.mailbox.pending()
    }
}

/// Creates a task in the `Start` state on `cluster`.
///
/// The backing context thread is spawned eagerly so resource exhaustion is
/// reported here rather than at first dispatch; the task does not run
/// until [`TaskHandle::wake`] places it on the ready queue.
pub fn create(
    cluster: &Cluster,
    config: TaskConfig,
    entry: impl FnOnce() + Send + 'static,
) -> Result<TaskHandle, KernelError> {
    let ctx = Arc::new(ContextCore::new(config.name.clone()));
    let core = Arc::new(TaskCore {
        ctx,
        bound: config.bound,
        base_priority: config.priority,
        active_priority: AtomicU8::new(config.priority.0),
        last_dispatcher: AtomicUsize::new(NO_DISPATCHER),
        sched: Mutex::new(TaskSched {
            state: TaskState::Start,
            cluster: cluster.core.clone(),
            wake_pending: false,
        }),
    });

    let trampoline = {
        let core = core.clone();
        move || {
            if !core.ctx.gate.wait_for_grant() {
                core.finish(HaltKind::Cancelled);
                return;
            }
            current::enter(core.ctx.clone(), Some(core.clone()));
            core.ctx.mark_active();
            core.set_running();
            let entry: Box<dyn FnOnce()> = Box::new(move || {
                // Task-start poll point: events tossed (or a cancel set)
                // before the first dispatch are honored immediately.
                ehm::poll();
                entry();
            });
            let kind = context::run_entry(&core.ctx, entry);
            core.finish(kind);
        }
    };

    context::spawn_context_thread(
        format!("weft-task-{}", config.name),
        config.stack_size,
        trampoline,
    )?;
    Ok(TaskHandle { core })
}

/// Creates a task and immediately makes it ready.
pub fn spawn(
    cluster: &Cluster,
    config: TaskConfig,
    entry: impl FnOnce() + Send + 'static,
) -> Result<TaskHandle, KernelError> {
    let handle = create(cluster, config, entry)?;
    handle.wake();
    Ok(handle)
}

/// Removes the calling task from "running" until something wakes it.
///
/// A wake that raced the block (arriving while the task was still running)
/// is consumed here and the call returns immediately.
pub fn block_current() {
    let task = current::require_task("block_current");
    block_core(&task);
}

pub(crate) fn block_core(task: &Arc<TaskCore>) {
    {
        let mut sched = task.sched.lock().unwrap();
        if sched.wake_pending {
            sched.wake_pending = false;
            return;
        }
        sched.state = TaskState::Blocked;
        let cluster = sched.cluster.clone();
        drop(sched);
        cluster.audit(SchedulingEvent::Blocked { task: task.ctx.id });
    }
    task.ctx.suspend_current();
    task.set_running();
}

/// Yields the calling task to the back of its cluster's ready queue and
/// dispatches the next ready task. A poll point.
pub fn yield_now() {
    let task = current::require_task("yield_now");
    relinquish(&task);
    ehm::poll();
}

/// Yields `times` times in a row.
pub fn yield_times(times: u32) {
    for _ in 0..times {
        yield_now();
    }
}

/// Yield without the poll point; also used by poll itself to honor an
/// injected yield request without recursing.
pub(crate) fn relinquish(task: &Arc<TaskCore>) {
    let cluster = {
        let mut sched = task.sched.lock().unwrap();
        sched.state = TaskState::Ready;
        sched.wake_pending = false;
        sched.cluster.clone()
    };
    cluster.audit(SchedulingEvent::Yielded { task: task.ctx.id });
    cluster.enqueue(task.clone());
    task.ctx.suspend_current();
    task.set_running();
}

/// Blocks the calling task until `deadline`. A deadline already in the
/// past returns immediately without a context switch. A poll point.
pub fn sleep_until(deadline: Instant) {
    let task = current::require_task("sleep");
    if deadline <= Instant::now() {
        return;
    }
    let cluster = task.sched.lock().unwrap().cluster.clone();
    let waker = task.clone();
    cluster.add_timer(
        deadline,
        Box::new(move || {
            waker.wake();
        }),
    );
    block_core(&task);
    ehm::poll();
}

/// Blocks the calling task for `duration`. A poll point.
pub fn sleep(duration: Duration) {
    sleep_until(Instant::now() + duration);
}

/// Moves the calling task to `destination` and returns its previous
/// cluster.
///
/// Migrating to the current cluster is a no-op that returns immediately
/// without a context switch. Otherwise the task deregisters from its old
/// cluster, registers on the destination, and yields so its next dispatch
/// happens on a processor bound to the destination; the call returns only
/// once the task is running there. Fatal for bound tasks.
pub fn migrate(destination: &Cluster) -> Cluster {
    let task = current::require_task("migrate");
    if task.bound.is_some() {
        die!(
            "bound task {} ({}) may not migrate",
            task.ctx.name,
            task.ctx.id
        );
    }

    let previous = {
        let mut sched = task.sched.lock().unwrap();
        if sched.cluster.id == destination.core.id {
            return Cluster {
                core: sched.cluster.clone(),
            };
        }
        let previous = sched.cluster.clone();
        sched.cluster = destination.core.clone();
        previous
    };
    destination.core.audit(SchedulingEvent::Migrated {
        task: task.ctx.id,
        from: previous.id,
        to: destination.core.id,
    });

    {
        let mut sched = task.sched.lock().unwrap();
        sched.state = TaskState::Ready;
        sched.wake_pending = false;
    }
    destination.core.enqueue(task.clone());
    task.ctx.suspend_current();
    task.set_running();
    ehm::poll();

    Cluster { core: previous }
}
