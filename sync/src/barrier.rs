//! N-party rendezvous.

use std::sync::Mutex;

use crate::cond_lock::CondLock;
use crate::owner_lock::OwnerLock;

struct BarrierState {
    arrived: usize,
    generation: u64,
}

/// A cyclic barrier: each of `parties` tasks blocks in [`block`] until the
/// last one arrives, which releases the whole group and resets the
/// barrier for the next cycle.
///
/// [`block`]: Barrier::block
pub struct Barrier {
    parties: usize,
    lock: OwnerLock,
    cond: CondLock,
    state: Mutex<BarrierState>,
}

impl Barrier {
    /// Creates a barrier for `parties` tasks.
    pub fn new(parties: usize) -> Self {
        assert!(parties > 0, "a barrier needs at least one party");
        Self {
            parties,
            lock: OwnerLock::new(),
            cond: CondLock::new(),
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
            }),
        }
    }

    /// Blocks until all parties have arrived at the barrier.
    pub fn block(&self) {
        self.lock.acquire();
        let generation = {
            let mut state = self.state.lock().unwrap();
            state.arrived += 1;
            if state.arrived == self.parties {
                state.arrived = 0;
                state.generation += 1;
                drop(state);
                self.cond.broadcast();
                self.lock.release();
                return;
            }
            state.generation
        };
        while self.state.lock().unwrap().generation == generation {
            self.cond.wait(&self.lock);
        }
        self.lock.release();
    }

    /// Number of parties the barrier synchronizes.
    pub fn parties(&self) -> usize {
        self.parties
    }
}
