//! # Kernel Contract Tests
//!
//! This crate validates the cross-crate contracts of the Weft runtime:
//! scheduling behavior, mutual exclusion, event delivery, and the
//! producer/consumer and timed-semaphore scenarios.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: the guaranteed behaviors are written as
//!   tests so they cannot drift accidentally over time.
//! - **Determinism where possible**: tests orchestrate task interleavings
//!   through semaphores and handshakes instead of sleeping and hoping.
//! - **Assert outside the tasks**: task bodies record what happened into
//!   shared state; the test thread does the asserting after joining.

use std::time::Duration;

use kernel::{Cluster, ClusterConfig, HaltKind, Processor, TaskHandle};

/// A cluster with `processors` execution engines attached.
///
/// The processors shut down when the returned handles drop, so keep them
/// alive for the duration of the test.
pub fn rig(processors: usize) -> (Cluster, Vec<Processor>) {
    rig_with(ClusterConfig::default(), processors)
}

/// [`rig`] with an explicit cluster configuration.
pub fn rig_with(config: ClusterConfig, processors: usize) -> (Cluster, Vec<Processor>) {
    let cluster = Cluster::new(config);
    let engines = (0..processors)
        .map(|_| Processor::new(&cluster).expect("failed to start processor"))
        .collect();
    (cluster, engines)
}

/// Joins a task with a deadline, asserting it completed normally.
pub fn join_ok(handle: &TaskHandle) {
    assert_eq!(
        handle
            .join_for(Duration::from_secs(10))
            .expect("task did not halt in time"),
        HaltKind::Completed
    );
}

/// Joins a task with a deadline, asserting cancellation unwound it.
pub fn join_cancelled(handle: &TaskHandle) {
    assert_eq!(
        handle
            .join_for(Duration::from_secs(10))
            .expect("task did not halt in time"),
        HaltKind::Cancelled
    );
}

/// Event types shared by the delivery tests.
pub mod events {
    use std::any::Any;

    use kernel::ehm::{Event, EventInfo, EventType};

    pub static SIGNAL: EventType = EventType::root("signal");
    pub static PING: EventType = EventType::derived("ping", &SIGNAL);
    pub static PONG: EventType = EventType::derived("pong", &SIGNAL);

    /// A payload-carrying event used for async delivery tests.
    pub struct Ping {
        info: EventInfo,
        pub tag: usize,
    }

    impl Ping {
        pub fn new(tag: usize) -> Self {
            Self {
                info: EventInfo::new(),
                tag,
            }
        }
    }

    impl Event for Ping {
        fn event_type(&self) -> &'static EventType {
            &PING
        }
        fn info(&self) -> &EventInfo {
            &self.info
        }
        fn info_mut(&mut self) -> &mut EventInfo {
            &mut self.info
        }
        fn clone_event(&self) -> Box<dyn Event> {
            Box::new(Self {
                info: self.info.clone(),
                tag: self.tag,
            })
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// A second, unrelated event type for scope-filtering tests.
    pub struct Pong {
        info: EventInfo,
    }

    impl Pong {
        pub fn new() -> Self {
            Self {
                info: EventInfo::new(),
            }
        }
    }

    impl Default for Pong {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Event for Pong {
        fn event_type(&self) -> &'static EventType {
            &PONG
        }
        fn info(&self) -> &EventInfo {
            &self.info
        }
        fn info_mut(&mut self) -> &mut EventInfo {
            &mut self.info
        }
        fn clone_event(&self) -> Box<dyn Event> {
            Box::new(Self {
                info: self.info.clone(),
            })
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }
}
