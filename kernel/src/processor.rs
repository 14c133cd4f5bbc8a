//! Kernel execution engines.
//!
//! A processor owns one dispatch thread bound to exactly one cluster at a
//! time. The loop expires due timers, pulls the next ready task it may
//! run, and resumes it until the task yields, blocks, or halts; with
//! nothing to do it parks on the cluster until work or the next deadline
//! arrives. Rebinding takes effect at the next loop iteration.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use core_types::ProcessorId;

use crate::cluster::{Cluster, ClusterCore, SchedulingEvent};
use crate::error::KernelError;

static NEXT_PROCESSOR: AtomicUsize = AtomicUsize::new(0);

struct ProcessorShared {
    binding: Mutex<Arc<ClusterCore>>,
    shutdown: AtomicBool,
}

/// A kernel thread executing tasks from one bound cluster.
///
/// Dropping the processor shuts it down: the dispatch thread finishes the
/// task currently running (up to its next suspension) and exits.
pub struct Processor {
    id: ProcessorId,
    shared: Arc<ProcessorShared>,
    thread: Option<JoinHandle<()>>,
}

impl Processor {
    /// Starts a new processor bound to `cluster`.
    pub fn new(cluster: &Cluster) -> Result<Self, KernelError> {
        let id = ProcessorId(NEXT_PROCESSOR.fetch_add(1, Ordering::Relaxed));
        let shared = Arc::new(ProcessorShared {
            binding: Mutex::new(cluster.core.clone()),
            shutdown: AtomicBool::new(false),
        });
        let loop_shared = shared.clone();
        let thread = thread::Builder::new()
            .name(format!("weft-processor-{}", id.0))
            .spawn(move || dispatch_loop(id, &loop_shared))
            .map_err(|e| KernelError::SpawnFailed(e.to_string()))?;
        Ok(Self {
            id,
            shared,
            thread: Some(thread),
        })
    }

    pub fn id(&self) -> ProcessorId {
        self.id
    }

    /// Rebinds the processor to another cluster, returning the previous
    /// one. Takes effect before the next dispatch.
    pub fn rebind(&self, cluster: &Cluster) -> Cluster {
        let previous = {
            let mut binding = self.shared.binding.lock().unwrap();
            std::mem::replace(&mut *binding, cluster.core.clone())
        };
        // Unpark from the old cluster's condvar so the new binding is seen.
        previous.notify_all();
        cluster.core.notify_all();
        Cluster { core: previous }
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.binding.lock().unwrap().notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor").field("id", &self.id).finish()
    }
}

fn dispatch_loop(id: ProcessorId, shared: &ProcessorShared) {
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        let cluster = shared.binding.lock().unwrap().clone();

        // Expire due timers first; their wake-ups feed the ready queue.
        let due = cluster.take_due_timers(Instant::now());
        if !due.is_empty() {
            for fire in due {
                fire();
            }
            continue;
        }

        match cluster.pop_ready_for(id) {
            Some(task) => {
                task.note_dispatch(id);
                cluster.audit(SchedulingEvent::Dispatched {
                    task: task.ctx.id,
                    processor: id,
                });
                task.ctx.gate.resume();
            }
            None => cluster.park(id),
        }
    }
}
