//! Scheduling domains.
//!
//! A cluster owns a ready queue of tasks and a deadline-ordered event list
//! of pending timed wake-ups. Processors bound to the cluster pull tasks
//! from the ready queue and expire due timers between dispatches. All of
//! the cluster's structures are mutated only under its internal lock, so a
//! timer firing on one processor can never race a migration or wake
//! mutating the same queues on another.
//!
//! An opt-in audit trail records scheduling events in order, which lets
//! tests assert on dispatch behavior without instrumenting task bodies.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use core_types::{ClusterId, ContextId, Priority, ProcessorId};
use serde::{Deserialize, Serialize};

use crate::task::TaskCore;

/// How long an idle processor parks before re-checking for work.
const MAX_PARK: Duration = Duration::from_millis(5);

/// Ready-queue ordering policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueuePolicy {
    /// Strict FIFO regardless of priority.
    Fifo,
    /// Higher active priority first; FIFO within equal priority.
    Priority,
}

/// Cluster configuration.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Human-readable name for diagnostics and audit output.
    pub name: String,
    /// Ready-queue ordering policy.
    pub policy: QueuePolicy,
    /// Whether to record the scheduling audit trail.
    pub record_audit: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: "main".to_string(),
            policy: QueuePolicy::Fifo,
            record_audit: false,
        }
    }
}

/// Scheduling event for the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulingEvent {
    /// Task became ready and was enqueued.
    Woken { task: ContextId },
    /// A processor picked the task from the ready queue.
    Dispatched { task: ContextId, processor: ProcessorId },
    /// Task voluntarily yielded back to the ready queue.
    Yielded { task: ContextId },
    /// Task suspended on a primitive or a sleep.
    Blocked { task: ContextId },
    /// Task moved between clusters.
    Migrated {
        task: ContextId,
        from: ClusterId,
        to: ClusterId,
    },
    /// Task's entry returned or its stack was unwound.
    Halted { task: ContextId },
}

/// One audit-trail entry, timestamped relative to cluster creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub at_micros: u64,
    pub event: SchedulingEvent,
}

struct ReadyEntry {
    task: Arc<TaskCore>,
    priority: Priority,
}

struct TimerNode {
    deadline: Instant,
    fire: Box<dyn FnOnce() + Send>,
}

struct ClusterState {
    ready: VecDeque<ReadyEntry>,
    /// Ordered by deadline, FIFO within equal deadlines.
    timers: Vec<TimerNode>,
    audit: Vec<AuditRecord>,
}

pub(crate) struct ClusterCore {
    pub(crate) id: ClusterId,
    pub(crate) name: String,
    policy: QueuePolicy,
    record_audit: bool,
    created: Instant,
    state: Mutex<ClusterState>,
    idle: Condvar,
}

impl ClusterCore {
    fn new(config: ClusterConfig) -> Arc<Self> {
        Arc::new(Self {
            id: ClusterId::new(),
            name: config.name,
            policy: config.policy,
            record_audit: config.record_audit,
            created: Instant::now(),
            state: Mutex::new(ClusterState {
                ready: VecDeque::new(),
                timers: Vec::new(),
                audit: Vec::new(),
            }),
            idle: Condvar::new(),
        })
    }

    pub(crate) fn audit(&self, event: SchedulingEvent) {
        if !self.record_audit {
            return;
        }
        let at_micros = self.created.elapsed().as_micros() as u64;
        let mut state = self.state.lock().unwrap();
        state.audit.push(AuditRecord { at_micros, event });
    }

    pub(crate) fn audit_log(&self) -> Vec<AuditRecord> {
        self.state.lock().unwrap().audit.clone()
    }

    /// Places a task on the ready queue and wakes an idle processor.
    pub(crate) fn enqueue(&self, task: Arc<TaskCore>) {
        let priority = task.active_priority();
        let mut state = self.state.lock().unwrap();
        match self.policy {
            QueuePolicy::Fifo => state.ready.push_back(ReadyEntry { task, priority }),
            QueuePolicy::Priority => {
                let pos = state
                    .ready
                    .iter()
                    .position(|entry| entry.priority < priority)
                    .unwrap_or(state.ready.len());
                state.ready.insert(pos, ReadyEntry { task, priority });
            }
        }
        drop(state);
        self.idle.notify_one();
    }

    /// Removes the first ready task this processor may run.
    ///
    /// Tasks pinned to a different processor are left in place.
    pub(crate) fn pop_ready_for(&self, processor: ProcessorId) -> Option<Arc<TaskCore>> {
        let mut state = self.state.lock().unwrap();
        let pos = state
            .ready
            .iter()
            .position(|entry| entry.task.bound.map_or(true, |b| b == processor))?;
        state.ready.remove(pos).map(|entry| entry.task)
    }

    /// Inserts a timed wake-up keyed by absolute deadline.
    pub(crate) fn add_timer(&self, deadline: Instant, fire: Box<dyn FnOnce() + Send>) {
        let mut state = self.state.lock().unwrap();
        let pos = state
            .timers
            .iter()
            .position(|node| node.deadline > deadline)
            .unwrap_or(state.timers.len());
        state.timers.insert(pos, TimerNode { deadline, fire });
        drop(state);
        // A processor may be parked past the new, earlier deadline.
        self.idle.notify_all();
    }

    /// Removes and returns every timer whose deadline has passed.
    pub(crate) fn take_due_timers(&self, now: Instant) -> Vec<Box<dyn FnOnce() + Send>> {
        let mut state = self.state.lock().unwrap();
        let mut due = Vec::new();
        while let Some(node) = state.timers.first() {
            if node.deadline > now {
                break;
            }
            let node = state.timers.remove(0);
            due.push(node.fire);
        }
        due
    }

    /// Parks an idle processor until work arrives or the next deadline.
    ///
    /// Ready tasks pinned to other processors do not count as work here,
    /// so a processor does not spin on a queue it cannot drain.
    pub(crate) fn park(&self, processor: ProcessorId) {
        let state = self.state.lock().unwrap();
        let now = Instant::now();
        let runnable = state
            .ready
            .iter()
            .any(|entry| entry.task.bound.map_or(true, |b| b == processor));
        if runnable {
            return;
        }
        if let Some(node) = state.timers.first() {
            if node.deadline <= now {
                return;
            }
        }
        let wait = state
            .timers
            .first()
            .map(|node| node.deadline.saturating_duration_since(now))
            .unwrap_or(MAX_PARK)
            .min(MAX_PARK);
        let _ = self.idle.wait_timeout(state, wait).unwrap();
    }

    /// Wakes every parked processor, for rebinding and shutdown.
    pub(crate) fn notify_all(&self) {
        self.idle.notify_all();
    }
}

/// Shared, cloneable handle to a scheduling domain.
#[derive(Clone)]
pub struct Cluster {
    pub(crate) core: Arc<ClusterCore>,
}

impl Cluster {
    /// Creates a cluster with the given configuration.
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            core: ClusterCore::new(config),
        }
    }

    pub fn id(&self) -> ClusterId {
        self.core.id
    }

    pub fn name(&self) -> String {
        self.core.name.clone()
    }

    pub fn policy(&self) -> QueuePolicy {
        self.core.policy
    }

    /// Snapshot of the audit trail. Empty unless `record_audit` was set.
    pub fn audit_log(&self) -> Vec<AuditRecord> {
        self.core.audit_log()
    }

    /// Schedules `fire` to run on a processor of this cluster once
    /// `deadline` passes. Used by timed waits to arm their timeout path.
    pub fn schedule(&self, deadline: Instant, fire: impl FnOnce() + Send + 'static) {
        self.core.add_timer(deadline, Box::new(fire));
    }

    /// Convenience for [`schedule`](Self::schedule) with a relative delay.
    pub fn schedule_after(&self, delay: Duration, fire: impl FnOnce() + Send + 'static) {
        self.schedule(Instant::now() + delay, fire);
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new(ClusterConfig::default())
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .finish()
    }
}
