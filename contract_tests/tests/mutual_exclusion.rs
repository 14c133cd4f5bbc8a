//! Mutual Exclusion Contract Tests
//!
//! The interference-counter pattern: a task stamps its identity into a
//! shared cell only while holding the lock, yields to invite interleaving,
//! and re-checks the stamp. Any other task entering the protected section
//! would overwrite the stamp, so a changed stamp is a mutual-exclusion
//! violation. Tasks record violations into a flag; the test thread asserts
//! after joining.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use contract_tests::{join_ok, rig};
use core_types::ContextId;
use kernel::{current_task, sleep, spawn, yield_now, yield_times, TaskConfig};
use sync::{OwnerLock, Semaphore};

struct Interference {
    lock: OwnerLock,
    claim: Mutex<Option<ContextId>>,
    violated: AtomicBool,
}

impl Interference {
    fn new() -> Self {
        Self {
            lock: OwnerLock::new(),
            claim: Mutex::new(None),
            violated: AtomicBool::new(false),
        }
    }

    fn stamp(&self) {
        *self.claim.lock().unwrap() = Some(current_task().id());
    }

    fn check(&self) {
        if *self.claim.lock().unwrap() != Some(current_task().id()) {
            self.violated.store(true, Ordering::SeqCst);
        }
    }
}

#[test]
fn test_blocking_acquire_excludes_all_rivals() {
    let (cluster, _engines) = rig(2);
    let shared = Arc::new(Interference::new());
    const ROUNDS: usize = 100;

    let mut tasks = Vec::new();
    for i in 0..4 {
        let shared = shared.clone();
        tasks.push(
            spawn(
                &cluster,
                TaskConfig {
                    name: format!("rival-{}", i),
                    ..TaskConfig::default()
                },
                move || {
                    for _ in 0..ROUNDS {
                        shared.lock.acquire();
                        shared.stamp();
                        yield_now();
                        shared.check();
                        shared.lock.acquire();
                        shared.check();
                        yield_now();
                        shared.check();
                        shared.lock.release();
                        // One release of two: still the owner.
                        shared.check();
                        yield_now();
                        shared.check();
                        shared.lock.release();
                        yield_times(2);
                    }
                },
            )
            .unwrap(),
        );
    }

    for task in &tasks {
        join_ok(task);
    }
    assert!(!shared.violated.load(Ordering::SeqCst), "interference");
}

#[test]
fn test_try_acquire_excludes_all_rivals() {
    let (cluster, _engines) = rig(2);
    let shared = Arc::new(Interference::new());
    const ROUNDS: usize = 50;

    let mut tasks = Vec::new();
    for i in 0..3 {
        let shared = shared.clone();
        tasks.push(
            spawn(
                &cluster,
                TaskConfig {
                    name: format!("prober-{}", i),
                    ..TaskConfig::default()
                },
                move || {
                    for _ in 0..ROUNDS {
                        while !shared.lock.try_acquire() {
                            yield_now();
                        }
                        shared.stamp();
                        yield_now();
                        shared.check();
                        // Recursive try-acquire by the owner never fails.
                        if !shared.lock.try_acquire() {
                            shared.violated.store(true, Ordering::SeqCst);
                        }
                        shared.check();
                        yield_now();
                        shared.check();
                        shared.lock.release();
                        shared.check();
                        yield_now();
                        shared.check();
                        shared.lock.release();
                        yield_times(2);
                    }
                },
            )
            .unwrap(),
        );
    }

    for task in &tasks {
        join_ok(task);
    }
    assert!(!shared.violated.load(Ordering::SeqCst), "interference");
}

#[test]
fn test_release_count_gates_other_tasks() {
    let (cluster, _engines) = rig(2);
    let lock = Arc::new(OwnerLock::new());
    let holder_ready = Arc::new(Semaphore::new(0));
    let contender_entered = Arc::new(AtomicBool::new(false));

    let holder_lock = lock.clone();
    let holder_gate = holder_ready.clone();
    let holder_entered = contender_entered.clone();
    let holder = spawn(
        &cluster,
        TaskConfig {
            name: "holder".to_string(),
            ..TaskConfig::default()
        },
        move || {
            holder_lock.acquire();
            holder_lock.acquire();
            holder_lock.acquire();
            holder_gate.v();
            // Two of three releases: the contender must stay outside.
            holder_lock.release();
            holder_lock.release();
            sleep(Duration::from_millis(60));
            assert!(!holder_entered.load(Ordering::SeqCst));
            holder_lock.release();
        },
    )
    .unwrap();

    let contender_lock = lock.clone();
    let contender_gate = holder_ready.clone();
    let contender_flag = contender_entered.clone();
    let contender = spawn(
        &cluster,
        TaskConfig {
            name: "contender".to_string(),
            ..TaskConfig::default()
        },
        move || {
            contender_gate.p();
            contender_lock.acquire();
            contender_flag.store(true, Ordering::SeqCst);
            contender_lock.release();
        },
    )
    .unwrap();

    join_ok(&holder);
    join_ok(&contender);
    assert!(contender_entered.load(Ordering::SeqCst));
}
