//! Recursive mutual-exclusion lock with owner tracking.
//!
//! The owning task may re-acquire the lock without blocking; a recursion
//! counter tracks the depth and the lock is free only once releases match
//! acquires. A blocked waiter lends its active priority to the owner
//! (priority inheritance), reverted when the owner fully releases.
//! Release follows signal-and-continue: the releaser keeps running and the
//! woken waiter re-competes for ownership.

use std::collections::VecDeque;
use std::sync::Mutex;

use kernel::{block_current, current_task, die, TaskHandle};

struct OwnerState {
    owner: Option<TaskHandle>,
    recursion: usize,
    waiters: VecDeque<TaskHandle>,
}

/// A recursive, owner-tracked, priority-inheriting blocking lock.
pub struct OwnerLock {
    state: Mutex<OwnerState>,
}

impl OwnerLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(OwnerState {
                owner: None,
                recursion: 0,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Acquires the lock, blocking while another task owns it.
    ///
    /// Re-acquisition by the owner never blocks; each acquire must be
    /// matched by a release before another task may proceed.
    pub fn acquire(&self) {
        let me = current_task();
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if state.owner.is_none() {
                    state.owner = Some(me.clone());
                    state.recursion = 1;
                    // A spuriously woken waiter may take the lock while its
                    // queue entry is still pending; purge it so a later
                    // release cannot spend a wake on it.
                    state.waiters.retain(|waiter| *waiter != me);
                    return;
                }
                if state.owner.as_ref() == Some(&me) {
                    state.recursion += 1;
                    return;
                }
                let owner = state.owner.as_ref().unwrap().clone();
                owner.lend_priority(me.active_priority());
                if !state.waiters.contains(&me) {
                    state.waiters.push_back(me.clone());
                }
            }
            block_current();
            // Signal-and-continue: re-compete for ownership.
        }
    }

    /// Acquires the lock only if that cannot block. Returns whether the
    /// caller now holds it (recursively or fresh).
    pub fn try_acquire(&self) -> bool {
        let me = current_task();
        let mut state = self.state.lock().unwrap();
        if state.owner.is_none() {
            state.waiters.retain(|waiter| *waiter != me);
            state.owner = Some(me);
            state.recursion = 1;
            return true;
        }
        if state.owner.as_ref() == Some(&me) {
            state.recursion += 1;
            return true;
        }
        false
    }

    /// Releases one level of ownership; the lock frees once releases
    /// balance acquires. Fatal when the caller is not the owner.
    pub fn release(&self) {
        let me = current_task();
        let next = {
            let mut state = self.state.lock().unwrap();
            if state.owner.as_ref() != Some(&me) {
                die!(
                    "task {} ({}) released a lock it does not hold",
                    me.name(),
                    me.id()
                );
            }
            state.recursion -= 1;
            if state.recursion > 0 {
                return;
            }
            state.owner = None;
            me.restore_priority();
            state.waiters.pop_front()
        };
        if let Some(waiter) = next {
            waiter.wake();
        }
    }

    /// The task currently owning the lock, if any.
    pub fn holder(&self) -> Option<TaskHandle> {
        self.state.lock().unwrap().owner.clone()
    }

    /// Fully releases the lock regardless of recursion depth, returning
    /// the depth so a condition wait can restore it on re-acquisition.
    pub(crate) fn release_all(&self) -> usize {
        let me = current_task();
        let (depth, next) = {
            let mut state = self.state.lock().unwrap();
            if state.owner.as_ref() != Some(&me) {
                die!(
                    "task {} ({}) waited on a condition without holding the lock",
                    me.name(),
                    me.id()
                );
            }
            let depth = state.recursion;
            state.recursion = 0;
            state.owner = None;
            me.restore_priority();
            (depth, state.waiters.pop_front())
        };
        if let Some(waiter) = next {
            waiter.wake();
        }
        depth
    }

    /// Re-acquires the lock and restores a saved recursion depth.
    pub(crate) fn acquire_restore(&self, depth: usize) {
        self.acquire();
        self.state.lock().unwrap().recursion = depth;
    }
}

impl Default for OwnerLock {
    fn default() -> Self {
        Self::new()
    }
}
