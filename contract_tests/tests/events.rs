//! Event Delivery Contract Tests
//!
//! Validates the exception handling model across contexts: resumption
//! leaves the raiser's stack intact, async events are observed only at
//! poll points, cancellation outranks queued events, delivery scopes
//! filter by type, and a node being handled is invisible to nested polls.
//!
//! The toss tests share one shape: the consumer parks with a poll-free
//! `block_current`, the producer tosses into its mailbox and wakes it, and
//! the consumer's first poll afterwards is the delivery under test.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use contract_tests::events::{Ping, Pong, PING, PONG, SIGNAL};
use contract_tests::{join_cancelled, join_ok, rig};
use kernel::ehm::{
    self, async_retoss, async_toss, CancelGuard, Catcher, DeliveryScope, RaiseKind, ResumeClause,
    ResumptionScope,
};
use kernel::{block_current, spawn, TaskConfig};
use sync::Semaphore;

#[test]
fn test_resumption_leaves_stack_intact_in_task() {
    let (cluster, _engines) = rig(1);
    let outcome = Arc::new(Mutex::new(None));

    let task_outcome = outcome.clone();
    let task = spawn(&cluster, TaskConfig::default(), move || {
        let handled = Arc::new(AtomicUsize::new(0));
        let handler_handled = handled.clone();
        let _scope = ResumptionScope::install(vec![ResumeClause::of(&PING, move |ev| {
            let ping = ev.as_any().downcast_ref::<Ping>().unwrap();
            handler_handled.store(ping.tag, Ordering::SeqCst);
        })]);

        // Marker pushed immediately before the raise; checked right after
        // the resumption returns.
        let marker = [0xAAu8, 0xBB, 0xCC];
        ehm::resume(Ping::new(17));
        let intact = marker == [0xAA, 0xBB, 0xCC];
        *task_outcome.lock().unwrap() = Some((intact, handled.load(Ordering::SeqCst)));
    })
    .unwrap();

    join_ok(&task);
    assert_eq!(*outcome.lock().unwrap(), Some((true, 17)));
}

/// Shared state for the toss tests.
struct TossRig {
    /// Consumer posts once parked-or-about-to-park; producer waits on it.
    ready: Semaphore,
    handled: AtomicUsize,
    seen_tags: Mutex<Vec<usize>>,
}

impl TossRig {
    fn new() -> Self {
        Self {
            ready: Semaphore::new(0),
            handled: AtomicUsize::new(0),
            seen_tags: Mutex::new(Vec::new()),
        }
    }
}

#[test]
fn test_async_events_wait_for_poll_point() {
    let (cluster, _engines) = rig(2);
    let shared = Arc::new(TossRig::new());

    let consumer_shared = shared.clone();
    let consumer = spawn(
        &cluster,
        TaskConfig {
            name: "consumer".to_string(),
            ..TaskConfig::default()
        },
        move || {
            let tags = Arc::new(Mutex::new(Vec::new()));
            let handler_tags = tags.clone();
            let _scope = ResumptionScope::install(vec![ResumeClause::of(&PING, move |ev| {
                let ping = ev.as_any().downcast_ref::<Ping>().unwrap();
                handler_tags.lock().unwrap().push(ping.tag);
            })]);

            // Polling an empty mailbox handles nothing.
            assert_eq!(ehm::poll(), 0);
            consumer_shared.ready.v();
            // Poll-free park: delivery cannot happen while blocked here.
            block_current();
            assert!(tags.lock().unwrap().is_empty());
            let handled = ehm::poll();
            consumer_shared.handled.store(handled, Ordering::SeqCst);
            *consumer_shared.seen_tags.lock().unwrap() = tags.lock().unwrap().clone();
        },
    )
    .unwrap();

    let producer_shared = shared.clone();
    let target = consumer.context();
    let consumer_handle = consumer.clone();
    let producer = spawn(
        &cluster,
        TaskConfig {
            name: "producer".to_string(),
            ..TaskConfig::default()
        },
        move || {
            producer_shared.ready.p();
            for tag in [1usize, 2, 3] {
                assert!(async_toss(&Ping::new(tag), &target, RaiseKind::Resume, false));
            }
            // Delivery happens at the consumer's poll point, not here.
            assert_eq!(consumer_handle.pending_async_events(), 3);
            assert!(producer_shared.seen_tags.lock().unwrap().is_empty());
            consumer_handle.wake();
        },
    )
    .unwrap();

    join_ok(&producer);
    join_ok(&consumer);
    assert_eq!(shared.handled.load(Ordering::SeqCst), 3);
    assert_eq!(*shared.seen_tags.lock().unwrap(), vec![1, 2, 3]);
    assert_eq!(consumer.pending_async_events(), 0);
}

#[test]
fn test_cancellation_outranks_queued_events() {
    let (cluster, _engines) = rig(2);
    let shared = Arc::new(TossRig::new());

    let consumer_shared = shared.clone();
    let consumer = spawn(
        &cluster,
        TaskConfig {
            name: "doomed".to_string(),
            ..TaskConfig::default()
        },
        move || {
            let handled = Arc::new(AtomicUsize::new(0));
            let handler_handled = handled.clone();
            let _scope = ResumptionScope::install(vec![ResumeClause::of(&PING, move |_| {
                handler_handled.fetch_add(1, Ordering::SeqCst);
            })]);

            consumer_shared.ready.v();
            block_current();
            // Events were enqueued first, but the cancel flag wins: this
            // poll unwinds instead of delivering anything.
            ehm::poll();
            consumer_shared
                .handled
                .store(handled.load(Ordering::SeqCst) + 100, Ordering::SeqCst);
        },
    )
    .unwrap();

    let producer_shared = shared.clone();
    let target = consumer.context();
    let victim = consumer.clone();
    let producer = spawn(
        &cluster,
        TaskConfig {
            name: "canceller".to_string(),
            ..TaskConfig::default()
        },
        move || {
            producer_shared.ready.p();
            for tag in 0..4 {
                async_toss(&Ping::new(tag), &target, RaiseKind::Resume, false);
            }
            victim.cancel();
            victim.wake();
        },
    )
    .unwrap();

    join_ok(&producer);
    join_cancelled(&consumer);
    // The consumer delivered nothing and never reached the line after poll.
    assert_eq!(shared.handled.load(Ordering::SeqCst), 0);
    // The undelivered events are still queued behind the cancellation.
    assert_eq!(consumer.pending_async_events(), 4);
}

#[test]
fn test_cancel_guard_defers_unwinding() {
    let (cluster, _engines) = rig(2);
    let shared = Arc::new(TossRig::new());

    let consumer_shared = shared.clone();
    let consumer = spawn(
        &cluster,
        TaskConfig {
            name: "shielded".to_string(),
            ..TaskConfig::default()
        },
        move || {
            let handled = Arc::new(AtomicUsize::new(0));
            let handler_handled = handled.clone();
            let _scope = ResumptionScope::install(vec![ResumeClause::of(&PING, move |_| {
                handler_handled.fetch_add(1, Ordering::SeqCst);
            })]);

            consumer_shared.ready.v();
            {
                let _shield = CancelGuard::disable();
                assert!(!ehm::cancel_enabled());
                block_current();
                // Cancellation is latched but disabled: ordinary events
                // still flow at this poll point.
                let delivered = ehm::poll();
                consumer_shared.handled.store(delivered, Ordering::SeqCst);
                assert!(ehm::cancelled());
            }
            // First poll point after the guard drops: unwind.
            ehm::poll();
            unreachable!("cancellation must unwind before this line");
        },
    )
    .unwrap();

    let producer_shared = shared.clone();
    let target = consumer.context();
    let victim = consumer.clone();
    let producer = spawn(&cluster, TaskConfig::default(), move || {
        producer_shared.ready.p();
        async_toss(&Ping::new(1), &target, RaiseKind::Resume, false);
        async_toss(&Ping::new(2), &target, RaiseKind::Resume, false);
        victim.cancel();
        victim.wake();
    })
    .unwrap();

    join_ok(&producer);
    join_cancelled(&consumer);
    assert_eq!(shared.handled.load(Ordering::SeqCst), 2);
}

#[test]
fn test_throw_kind_delivery_unwinds_the_poller() {
    let (cluster, _engines) = rig(2);
    let shared = Arc::new(TossRig::new());

    let consumer_shared = shared.clone();
    let consumer = spawn(
        &cluster,
        TaskConfig {
            name: "thrown-at".to_string(),
            ..TaskConfig::default()
        },
        move || {
            consumer_shared.ready.v();
            block_current();
            let caught = ehm::try_catch(
                || -> usize {
                    ehm::poll();
                    unreachable!("a throw-kind event must unwind out of poll");
                },
                vec![Catcher::of(&PING, |ev| {
                    ev.as_any().downcast_ref::<Ping>().unwrap().tag
                })],
            );
            consumer_shared.handled.store(caught, Ordering::SeqCst);
            // The handled node was removed even though poll unwound.
            assert_eq!(kernel::current_task().pending_async_events(), 0);
        },
    )
    .unwrap();

    let producer_shared = shared.clone();
    let target = consumer.context();
    let consumer_handle = consumer.clone();
    let producer = spawn(&cluster, TaskConfig::default(), move || {
        producer_shared.ready.p();
        async_toss(&Ping::new(55), &target, RaiseKind::Throw, false);
        consumer_handle.wake();
    })
    .unwrap();

    join_ok(&producer);
    join_ok(&consumer);
    assert_eq!(shared.handled.load(Ordering::SeqCst), 55);
}

#[test]
fn test_delivery_scope_filters_by_type() {
    let (cluster, _engines) = rig(2);
    let shared = Arc::new(TossRig::new());

    let consumer_shared = shared.clone();
    let consumer = spawn(
        &cluster,
        TaskConfig {
            name: "selective".to_string(),
            ..TaskConfig::default()
        },
        move || {
            let pongs = Arc::new(AtomicUsize::new(0));
            let handler_pongs = pongs.clone();
            let pings = Arc::new(AtomicUsize::new(0));
            let handler_pings = pings.clone();
            let _scope = ResumptionScope::install(vec![
                ResumeClause::of(&PING, move |_| {
                    handler_pings.fetch_add(1, Ordering::SeqCst);
                }),
                ResumeClause::of(&PONG, move |_| {
                    handler_pongs.fetch_add(1, Ordering::SeqCst);
                }),
            ]);

            consumer_shared.ready.v();
            block_current();

            {
                let _filter = DeliveryScope::disable(vec![&PING]);
                // Only the pong may flow; the ping stays queued.
                let delivered = ehm::poll();
                assert_eq!(delivered, 1);
                assert_eq!(pongs.load(Ordering::SeqCst), 1);
                assert_eq!(pings.load(Ordering::SeqCst), 0);
                assert_eq!(kernel::current_task().pending_async_events(), 1);
            }
            // Scope dropped: the deferred ping is deliverable again.
            let delivered = ehm::poll();
            assert_eq!(delivered, 1);
            assert_eq!(pings.load(Ordering::SeqCst), 1);
            consumer_shared.handled.store(2, Ordering::SeqCst);
        },
    )
    .unwrap();

    let producer_shared = shared.clone();
    let target = consumer.context();
    let consumer_handle = consumer.clone();
    let producer = spawn(&cluster, TaskConfig::default(), move || {
        producer_shared.ready.p();
        async_toss(&Ping::new(1), &target, RaiseKind::Resume, false);
        async_toss(&Pong::new(), &target, RaiseKind::Resume, false);
        consumer_handle.wake();
    })
    .unwrap();

    join_ok(&producer);
    join_ok(&consumer);
    assert_eq!(shared.handled.load(Ordering::SeqCst), 2);
}

#[test]
fn test_node_being_handled_is_hidden_from_nested_poll() {
    let (cluster, _engines) = rig(2);
    let shared = Arc::new(TossRig::new());

    let consumer_shared = shared.clone();
    let consumer = spawn(
        &cluster,
        TaskConfig {
            name: "nested".to_string(),
            ..TaskConfig::default()
        },
        move || {
            let nested_counts = Arc::new(Mutex::new(Vec::new()));
            let handler_counts = nested_counts.clone();
            let _scope = ResumptionScope::install(vec![ResumeClause::of(&PING, move |_| {
                // A nested poll from inside the handler must not redeliver
                // the event currently being handled.
                handler_counts.lock().unwrap().push(ehm::poll());
            })]);

            consumer_shared.ready.v();
            block_current();
            let delivered = ehm::poll();
            consumer_shared.handled.store(delivered, Ordering::SeqCst);
            *consumer_shared.seen_tags.lock().unwrap() =
                nested_counts.lock().unwrap().clone();
        },
    )
    .unwrap();

    let producer_shared = shared.clone();
    let target = consumer.context();
    let consumer_handle = consumer.clone();
    let producer = spawn(&cluster, TaskConfig::default(), move || {
        producer_shared.ready.p();
        async_toss(&Ping::new(1), &target, RaiseKind::Resume, false);
        consumer_handle.wake();
    })
    .unwrap();

    join_ok(&producer);
    join_ok(&consumer);
    // The outer poll handled one event; its nested poll saw nothing.
    assert_eq!(shared.handled.load(Ordering::SeqCst), 1);
    assert_eq!(*shared.seen_tags.lock().unwrap(), vec![0]);
}

#[test]
fn test_toss_to_halted_target_is_dropped() {
    let (cluster, _engines) = rig(1);

    let finished = spawn(&cluster, TaskConfig::default(), || {}).unwrap();
    join_ok(&finished);

    assert!(!async_toss(
        &Ping::new(1),
        &finished.context(),
        RaiseKind::Resume,
        false
    ));
    assert_eq!(finished.pending_async_events(), 0);
}

#[test]
fn test_source_is_stamped_on_toss() {
    let (cluster, _engines) = rig(2);
    let shared = Arc::new(TossRig::new());
    let source_name = Arc::new(Mutex::new(String::new()));

    let consumer_shared = shared.clone();
    let consumer_source = source_name.clone();
    let consumer = spawn(
        &cluster,
        TaskConfig {
            name: "listener".to_string(),
            ..TaskConfig::default()
        },
        move || {
            let seen = Arc::new(Mutex::new(String::new()));
            let handler_seen = seen.clone();
            let _scope = ResumptionScope::install(vec![ResumeClause::of(&SIGNAL, move |ev| {
                if let Some(source) = ev.info().source() {
                    *handler_seen.lock().unwrap() = source.name.clone();
                }
            })]);
            consumer_shared.ready.v();
            block_current();
            ehm::poll();
            *consumer_source.lock().unwrap() = seen.lock().unwrap().clone();
        },
    )
    .unwrap();

    let producer_shared = shared.clone();
    let target = consumer.context();
    let consumer_handle = consumer.clone();
    let producer = spawn(
        &cluster,
        TaskConfig {
            name: "broadcaster".to_string(),
            ..TaskConfig::default()
        },
        move || {
            producer_shared.ready.p();
            async_toss(&Ping::new(1), &target, RaiseKind::Resume, false);
            consumer_handle.wake();
        },
    )
    .unwrap();

    join_ok(&producer);
    join_ok(&consumer);
    assert_eq!(*source_name.lock().unwrap(), "broadcaster");
}

#[test]
fn test_async_retoss_forwards_caught_event() {
    let (cluster, _engines) = rig(2);
    let shared = Arc::new(TossRig::new());

    let consumer_shared = shared.clone();
    let consumer = spawn(
        &cluster,
        TaskConfig {
            name: "final-target".to_string(),
            ..TaskConfig::default()
        },
        move || {
            consumer_shared.ready.v();
            block_current();
            let tag = ehm::try_catch(
                || -> usize {
                    ehm::poll();
                    0
                },
                vec![Catcher::of(&PING, |ev| {
                    ev.as_any().downcast_ref::<Ping>().unwrap().tag
                })],
            );
            consumer_shared.handled.store(tag, Ordering::SeqCst);
        },
    )
    .unwrap();

    let relay_shared = shared.clone();
    let final_target = consumer.context();
    let consumer_handle = consumer.clone();
    let relay = spawn(
        &cluster,
        TaskConfig {
            name: "relay".to_string(),
            ..TaskConfig::default()
        },
        move || {
            relay_shared.ready.p();
            // Catch a local throw, then forward it asynchronously.
            ehm::try_catch(
                || -> () { ehm::throw(Ping::new(77)) },
                vec![Catcher::of(&PING, |_| {
                    assert!(async_retoss(&final_target, RaiseKind::Throw));
                })],
            );
            consumer_handle.wake();
        },
    )
    .unwrap();

    join_ok(&relay);
    join_ok(&consumer);
    assert_eq!(shared.handled.load(Ordering::SeqCst), 77);
}
