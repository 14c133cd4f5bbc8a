//! Condition queues.
//!
//! `wait` atomically releases the paired lock (fully, whatever its
//! recursion depth) and blocks; the lock is re-acquired, depth restored,
//! before `wait` returns. Signalling follows signal-and-continue: the
//! signaller keeps running, and the woken task re-competes for the lock.
//! Timed waits resolve a racing signal and timeout to exactly one outcome
//! through the waiter node's atomic claim.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use kernel::{block_current, current_task, ehm};

use crate::owner_lock::OwnerLock;
use crate::waiter::{Outcome, WaitNode};

/// Outcome of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// A signal claimed this waiter within the deadline.
    Signalled,
    /// The deadline passed with no signal.
    TimedOut,
}

/// A condition queue for use with [`OwnerLock`].
pub struct CondLock {
    waiters: Mutex<VecDeque<Arc<WaitNode>>>,
}

impl CondLock {
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    /// Atomically releases `lock` and blocks until signalled, then
    /// re-acquires `lock` (restoring its recursion depth) and returns.
    /// A poll point before re-acquisition.
    pub fn wait(&self, lock: &OwnerLock) {
        let me = current_task();
        let node = Arc::new(WaitNode::new(me));
        self.waiters.lock().unwrap().push_back(node.clone());

        let depth = lock.release_all();
        while node.outcome() == Outcome::Pending {
            block_current();
        }
        ehm::poll();
        lock.acquire_restore(depth);
    }

    /// [`wait`](Self::wait) bounded by `timeout`.
    ///
    /// A signal racing the expiring timeout resolves to a single outcome:
    /// the waiter observes either `Signalled` or `TimedOut`, never both
    /// effects.
    pub fn wait_for(&self, lock: &OwnerLock, timeout: Duration) -> WaitResult {
        let me = current_task();
        let node = Arc::new(WaitNode::new(me.clone()));
        self.waiters.lock().unwrap().push_back(node.clone());

        let timeout_node = node.clone();
        me.cluster().schedule(Instant::now() + timeout, move || {
            if timeout_node.try_timeout() {
                timeout_node.task.wake();
            }
        });

        let depth = lock.release_all();
        while node.outcome() == Outcome::Pending {
            block_current();
        }
        let result = match node.outcome() {
            Outcome::Signalled => WaitResult::Signalled,
            _ => WaitResult::TimedOut,
        };
        if result == WaitResult::TimedOut {
            // A timed-out waiter removes itself; signalled waiters were
            // removed by the signaller.
            self.waiters
                .lock()
                .unwrap()
                .retain(|n| !Arc::ptr_eq(n, &node));
        }
        ehm::poll();
        lock.acquire_restore(depth);
        result
    }

    /// Wakes the longest-waiting signallable waiter, if any. The lock is
    /// not handed off; holding it while signalling is permitted but not
    /// required.
    pub fn signal(&self) {
        let winner = {
            let mut waiters = self.waiters.lock().unwrap();
            loop {
                match waiters.pop_front() {
                    None => break None,
                    Some(node) => {
                        if node.try_signal() {
                            break Some(node);
                        }
                        // Already timed out; skim it off and keep looking.
                    }
                }
            }
        };
        if let Some(node) = winner {
            node.task.wake();
        }
    }

    /// Wakes every waiter that can still be signalled.
    pub fn broadcast(&self) {
        let winners: Vec<Arc<WaitNode>> = {
            let mut waiters = self.waiters.lock().unwrap();
            waiters.drain(..).filter(|node| node.try_signal()).collect()
        };
        for node in winners {
            node.task.wake();
        }
    }

    /// Whether no task is currently waiting.
    pub fn is_empty(&self) -> bool {
        self.waiters
            .lock()
            .unwrap()
            .iter()
            .all(|node| node.outcome() != Outcome::Pending)
    }
}

impl Default for CondLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel::{spawn, Cluster, ClusterConfig, HaltKind, Processor, TaskConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn rig() -> (Cluster, Processor) {
        let cluster = Cluster::new(ClusterConfig::default());
        let processor = Processor::new(&cluster).unwrap();
        (cluster, processor)
    }

    fn join(handle: &kernel::TaskHandle) {
        assert_eq!(
            handle.join_for(Duration::from_secs(10)).unwrap(),
            HaltKind::Completed
        );
    }

    #[test]
    fn test_wait_releases_lock_and_signal_wakes() {
        let (cluster, _processor) = rig();
        let lock = Arc::new(OwnerLock::new());
        let cond = Arc::new(CondLock::new());
        let stage = Arc::new(AtomicUsize::new(0));

        let waiter_lock = lock.clone();
        let waiter_cond = cond.clone();
        let waiter_stage = stage.clone();
        let waiter = spawn(
            &cluster,
            TaskConfig {
                name: "waiter".to_string(),
                ..TaskConfig::default()
            },
            move || {
                waiter_lock.acquire();
                waiter_lock.acquire();
                waiter_stage.store(1, Ordering::SeqCst);
                // Wait releases both recursion levels and restores them.
                waiter_cond.wait(&waiter_lock);
                waiter_stage.store(2, Ordering::SeqCst);
                waiter_lock.release();
                waiter_lock.release();
            },
        )
        .unwrap();

        let signaller_lock = lock.clone();
        let signaller_cond = cond.clone();
        let signaller_stage = stage.clone();
        let signaller = spawn(
            &cluster,
            TaskConfig {
                name: "signaller".to_string(),
                ..TaskConfig::default()
            },
            move || {
                while signaller_stage.load(Ordering::SeqCst) < 1 {
                    kernel::yield_now();
                }
                // The waiter's lock was fully released by wait: the
                // signaller can take it even though wait was recursive.
                signaller_lock.acquire();
                assert!(!signaller_cond.is_empty());
                signaller_cond.signal();
                // Signal-and-continue: still running, still the owner.
                assert_eq!(signaller_stage.load(Ordering::SeqCst), 1);
                signaller_lock.release();
            },
        )
        .unwrap();

        join(&waiter);
        join(&signaller);
        assert_eq!(stage.load(Ordering::SeqCst), 2);
        assert!(cond.is_empty());
    }

    #[test]
    fn test_broadcast_wakes_all_waiters() {
        let (cluster, _processor) = rig();
        let lock = Arc::new(OwnerLock::new());
        let cond = Arc::new(CondLock::new());
        let waiting = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..3 {
            let lock = lock.clone();
            let cond = cond.clone();
            let waiting = waiting.clone();
            let released = released.clone();
            handles.push(
                spawn(
                    &cluster,
                    TaskConfig {
                        name: format!("waiter-{}", i),
                        ..TaskConfig::default()
                    },
                    move || {
                        lock.acquire();
                        waiting.fetch_add(1, Ordering::SeqCst);
                        cond.wait(&lock);
                        released.fetch_add(1, Ordering::SeqCst);
                        lock.release();
                    },
                )
                .unwrap(),
            );
        }

        let b_lock = lock.clone();
        let b_cond = cond.clone();
        let b_waiting = waiting.clone();
        let broadcaster = spawn(
            &cluster,
            TaskConfig {
                name: "broadcaster".to_string(),
                ..TaskConfig::default()
            },
            move || {
                while b_waiting.load(Ordering::SeqCst) < 3 {
                    kernel::yield_now();
                }
                b_lock.acquire();
                b_cond.broadcast();
                b_lock.release();
            },
        )
        .unwrap();

        for handle in &handles {
            join(handle);
        }
        join(&broadcaster);
        assert_eq!(released.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_wait_for_times_out_without_signal() {
        let (cluster, _processor) = rig();
        let lock = Arc::new(OwnerLock::new());
        let cond = Arc::new(CondLock::new());

        let t_lock = lock.clone();
        let t_cond = cond.clone();
        let task = spawn(&cluster, TaskConfig::default(), move || {
            t_lock.acquire();
            let result = t_cond.wait_for(&t_lock, Duration::from_millis(20));
            assert_eq!(result, WaitResult::TimedOut);
            // The timed-out node removed itself from the queue.
            assert!(t_cond.is_empty());
            t_lock.release();
        })
        .unwrap();
        join(&task);
    }
}
