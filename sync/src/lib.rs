//! # Synchronization Primitives
//!
//! Blocking primitives layered on the Weft kernel's task surface.
//!
//! ## Philosophy
//!
//! - **Signal-and-continue**: signalling wakes a waiter but never hands
//!   off a lock directly; the woken task re-competes under normal
//!   scheduling order.
//! - **One wake per waiter**: a timed wait racing a concurrent signal
//!   resolves to exactly one outcome through an atomic claim on the
//!   waiter node — a wake is never lost and never double-counted.
//! - **Loud ownership violations**: releasing a lock that is not held is
//!   a caller bug and aborts; contention, timeouts, and failed
//!   try-acquires are ordinary return values.

pub mod barrier;
pub mod cond_lock;
pub mod owner_lock;
pub mod semaphore;
mod waiter;

pub use barrier::Barrier;
pub use cond_lock::{CondLock, WaitResult};
pub use owner_lock::OwnerLock;
pub use semaphore::Semaphore;
