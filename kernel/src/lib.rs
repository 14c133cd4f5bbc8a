//! # Weft Kernel
//!
//! The scheduling kernel and exception handling model of the Weft
//! user-level concurrency runtime.
//!
//! ## Philosophy
//!
//! - **Cooperative by construction**: a task runs until it yields, blocks,
//!   or halts. Preemption is a voluntary-yield request honored at poll
//!   points, never an interruption mid-instruction.
//! - **Explicit over implicit**: wake-ups, migrations, and event delivery
//!   are operations with defined junctures, not ambient effects.
//! - **Fail loudly on contract violations**: resuming a halted context or
//!   releasing a lock that is not held is a bug in the caller and aborts
//!   with one diagnostic line; expected dynamic conditions (timeouts,
//!   contention, cancellation) are ordinary return values.
//!
//! ## Layers
//!
//! - [`coroutine`]: independently-stacked contexts with resume/suspend.
//! - [`task`] / [`cluster`] / [`processor`]: the scheduling kernel —
//!   tasks multiplexed onto processors grouped into clusters.
//! - [`ehm`]: the exception handling model — synchronous throw,
//!   non-unwinding resumption, async cross-context delivery, and
//!   cancellation.

pub mod cluster;
pub mod context;
pub mod coroutine;
pub mod current;
pub mod ehm;
pub mod error;
pub mod fatal;
pub mod processor;
pub mod task;

pub use cluster::{AuditRecord, Cluster, ClusterConfig, QueuePolicy, SchedulingEvent};
pub use context::{ContextRef, HaltKind};
pub use coroutine::{suspend, Coroutine, CoroutineConfig};
pub use current::{
    current_context_id, current_context_name, current_processor, current_task, try_current_task,
};
pub use error::KernelError;
pub use processor::Processor;
pub use task::{
    block_current, create, migrate, sleep, sleep_until, spawn, yield_now, yield_times, TaskConfig,
    TaskHandle, TaskState,
};
