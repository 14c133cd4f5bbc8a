//! Per-context async event queue.
//!
//! The mailbox is the only channel by which one context signals another
//! without shared-memory cooperation. Foreign contexts enqueue under the
//! mailbox's own short-held lock; the owning context drains it at poll
//! points. A node being handled stays in the queue marked hidden so a
//! nested poll (from inside the handler) cannot deliver it a second time;
//! it is removed once handling finishes, including by unwinding.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::event::{Event, EventType};

struct Node {
    seq: u64,
    hidden: bool,
    /// Taken out for dispatch; a `None` node is a hidden tombstone.
    event: Option<Box<dyn Event>>,
}

#[derive(Default)]
struct MailboxInner {
    next_seq: u64,
    queue: VecDeque<Node>,
}

pub(crate) struct Mailbox {
    inner: Mutex<MailboxInner>,
}

impl Mailbox {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(MailboxInner::default()),
        }
    }

    pub(crate) fn push(&self, event: Box<dyn Event>) {
        let mut inner = self.inner.lock().unwrap();
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.queue.push_back(Node {
            seq,
            hidden: false,
            event: Some(event),
        });
    }

    /// Finds the first visible node past `cursor` whose type satisfies
    /// `deliverable`, marks it hidden, and takes its event out for
    /// dispatch. Non-deliverable nodes are skipped but left queued.
    pub(crate) fn take_next_deliverable(
        &self,
        cursor: u64,
        deliverable: impl Fn(&'static EventType) -> bool,
    ) -> Option<(u64, Box<dyn Event>)> {
        let mut inner = self.inner.lock().unwrap();
        for node in inner.queue.iter_mut() {
            if node.seq <= cursor || node.hidden {
                continue;
            }
            let ty = match node.event.as_ref() {
                Some(ev) => ev.event_type(),
                None => continue,
            };
            if deliverable(ty) {
                node.hidden = true;
                let event = node.event.take();
                return event.map(|ev| (node.seq, ev));
            }
        }
        None
    }

    /// Drops the tombstone left behind by `take_next_deliverable`.
    pub(crate) fn remove(&self, seq: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.retain(|node| node.seq != seq);
    }

    /// Number of events still queued (tombstones excluded).
    pub(crate) fn pending(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.queue.iter().filter(|n| n.event.is_some()).count()
    }
}
