//! Counting semaphore.
//!
//! `v` hands a permit directly to the longest waiter when one exists, so
//! a wake can never be consumed by a task that arrived later; otherwise
//! it increments the count. Timed acquires resolve a racing `v` and
//! timeout to exactly one outcome through the waiter node's atomic claim,
//! so a permit is never lost to an expired waiter and a waiter never
//! reports both results.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use kernel::{block_current, current_task, ehm};

use crate::waiter::{Outcome, WaitNode};

struct SemState {
    count: usize,
    waiters: VecDeque<Arc<WaitNode>>,
}

/// A counting semaphore for tasks.
pub struct Semaphore {
    state: Mutex<SemState>,
}

impl Semaphore {
    /// Creates a semaphore with `initial` permits.
    pub fn new(initial: usize) -> Self {
        Self {
            state: Mutex::new(SemState {
                count: initial,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Acquires one permit, blocking while none is available. A poll
    /// point on entry.
    pub fn p(&self) {
        ehm::poll();
        let me = current_task();
        let node = {
            let mut state = self.state.lock().unwrap();
            if state.count > 0 {
                state.count -= 1;
                return;
            }
            let node = Arc::new(WaitNode::new(me));
            state.waiters.push_back(node.clone());
            node
        };
        while node.outcome() == Outcome::Pending {
            block_current();
        }
        // The permit was handed off directly by v().
    }

    /// Acquires one permit within `timeout`. Returns whether a permit was
    /// obtained; on `false` the wait expired and no permit was consumed.
    /// A poll point on entry.
    pub fn p_for(&self, timeout: Duration) -> bool {
        ehm::poll();
        let me = current_task();
        let node = {
            let mut state = self.state.lock().unwrap();
            if state.count > 0 {
                state.count -= 1;
                return true;
            }
            let node = Arc::new(WaitNode::new(me.clone()));
            state.waiters.push_back(node.clone());
            node
        };

        let timeout_node = node.clone();
        me.cluster().schedule(Instant::now() + timeout, move || {
            if timeout_node.try_timeout() {
                timeout_node.task.wake();
            }
        });

        while node.outcome() == Outcome::Pending {
            block_current();
        }
        match node.outcome() {
            Outcome::Signalled => true,
            _ => {
                let mut state = self.state.lock().unwrap();
                state.waiters.retain(|n| !Arc::ptr_eq(n, &node));
                false
            }
        }
    }

    /// Releases one permit: hands it to the longest claimable waiter, or
    /// banks it in the count when no one is waiting.
    pub fn v(&self) {
        let winner = {
            let mut state = self.state.lock().unwrap();
            loop {
                match state.waiters.pop_front() {
                    Some(node) => {
                        if node.try_signal() {
                            break Some(node);
                        }
                        // Expired waiter; drop it and try the next.
                    }
                    None => {
                        state.count += 1;
                        break None;
                    }
                }
            }
        };
        if let Some(node) = winner {
            node.task.wake();
        }
    }

    /// Releases `permits` permits.
    pub fn v_n(&self, permits: usize) {
        for _ in 0..permits {
            self.v();
        }
    }

    /// Current banked permit count. Waiters exist only while this is 0.
    pub fn counter(&self) -> usize {
        self.state.lock().unwrap().count
    }

    /// Whether no task is currently blocked on the semaphore.
    pub fn is_empty(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .waiters
            .iter()
            .all(|node| node.outcome() != Outcome::Pending)
    }
}
