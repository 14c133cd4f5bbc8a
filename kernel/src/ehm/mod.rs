//! Exception Handling Model
//!
//! Three delivery channels share one matching rule (derived-type matching
//! against a handler's declared event type):
//!
//! - **Synchronous throw** unwinds to the nearest enclosing [`try_catch`]
//!   scope in the same context; an unmatched event reaching the context
//!   boundary is fatal.
//! - **Resumption** dispatches to a handler without unwinding; the raiser's
//!   stack stays intact and control returns to the raise point.
//! - **Asynchronous toss** enqueues an event into another context's
//!   mailbox; the target observes it only at [`poll`] points, with
//!   cancellation checked ahead of ordinary events.

pub mod cancel;
pub mod deliver;
pub mod event;
pub mod handler;
pub(crate) mod mailbox;

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Once};

use crate::context::{ContextCore, ContextRef};
use crate::{current, die};

pub use cancel::{cancel_enabled, cancelled, CancelGuard};
pub use deliver::DeliveryScope;
pub use event::{Event, EventInfo, EventSource, EventType, RaiseKind};
pub use handler::{ResumeClause, ResumptionScope};

use cancel::CancelUnwind;
use event::ThrownEvent;

thread_local! {
    /// Clone of the exception being handled by the innermost catch clause.
    static CAUGHT: RefCell<Option<Box<dyn Event>>> = const { RefCell::new(None) };
}

static HOOK_ONCE: Once = Once::new();

/// Keeps the default panic hook quiet for event unwinds: a caught throw or
/// a cancellation is normal control flow, not a crash report.
pub(crate) fn silence_event_unwinds() {
    HOOK_ONCE.call_once(|| {
        let prev = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if info.payload().is::<ThrownEvent>() || info.payload().is::<CancelUnwind>() {
                return;
            }
            prev(info);
        }));
    });
}

fn stamp(event: &mut dyn Event, kind: RaiseKind) {
    event.info_mut().set_raise_kind(kind);
    if event.info().original_raiser().is_none() {
        if let Some(id) = current::current_context_id() {
            event.info_mut().set_original_raiser(id);
        }
    }
    if event.info().source().is_none() {
        if let Some(core) = current::try_core() {
            event.info_mut().set_source(EventSource {
                id: core.id,
                name: core.name.clone(),
            });
        }
    }
}

/// Raises `event` synchronously: unwinds to the nearest matching catch
/// scope in the calling context. Never returns to the raise point.
pub fn throw<E: Event>(event: E) -> ! {
    throw_boxed(Box::new(event))
}

pub(crate) fn throw_boxed(mut event: Box<dyn Event>) -> ! {
    silence_event_unwinds();
    stamp(event.as_mut(), RaiseKind::Throw);
    panic::panic_any(ThrownEvent { event })
}

/// One catch clause for [`try_catch`].
pub struct Catcher<'a, R> {
    event_type: Option<&'static EventType>,
    handler: Box<dyn FnOnce(Box<dyn Event>) -> R + 'a>,
}

impl<'a, R> Catcher<'a, R> {
    /// Catches events of `ty` and its derived types.
    pub fn of(
        ty: &'static EventType,
        handler: impl FnOnce(Box<dyn Event>) -> R + 'a,
    ) -> Self {
        Self {
            event_type: Some(ty),
            handler: Box::new(handler),
        }
    }

    /// Catches every event type.
    pub fn any(handler: impl FnOnce(Box<dyn Event>) -> R + 'a) -> Self {
        Self {
            event_type: None,
            handler: Box::new(handler),
        }
    }
}

struct CaughtGuard {
    prev: Option<Box<dyn Event>>,
}

impl CaughtGuard {
    fn enter(event: Box<dyn Event>) -> Self {
        let prev = CAUGHT.with(|slot| slot.borrow_mut().replace(event));
        Self { prev }
    }
}

impl Drop for CaughtGuard {
    fn drop(&mut self) {
        CAUGHT.with(|slot| *slot.borrow_mut() = self.prev.take());
    }
}

/// Runs `body`, catching synchronously thrown events against `catchers`
/// in declaration order. Unmatched events keep unwinding; cancellation
/// unwinds and foreign panics pass through untouched.
pub fn try_catch<R>(body: impl FnOnce() -> R, catchers: Vec<Catcher<'_, R>>) -> R {
    silence_event_unwinds();
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(value) => value,
        Err(payload) => match payload.downcast::<ThrownEvent>() {
            Ok(thrown) => {
                let event = thrown.event;
                let ty = event.event_type();
                for catcher in catchers {
                    if catcher.event_type.map_or(true, |t| ty.is_a(t)) {
                        let _caught = CaughtGuard::enter(event.clone_event());
                        return (catcher.handler)(event);
                    }
                }
                panic::panic_any(ThrownEvent { event })
            }
            Err(other) => panic::resume_unwind(other),
        },
    }
}

pub(crate) fn current_exception_clone() -> Option<Box<dyn Event>> {
    CAUGHT.with(|slot| slot.borrow().as_ref().map(|ev| ev.clone_event()))
}

/// Re-raises the most recent active exception as a synchronous throw,
/// falling back to the current resumption. Fatal when neither exists.
pub fn rethrow() -> ! {
    if let Some(event) = current_exception_clone() {
        throw_boxed(event);
    }
    if let Some(event) = handler::current_resumption_clone() {
        throw_boxed(event);
    }
    terminate("rethrow")
}

/// Raises `event` as a resumption: the nearest matching handler runs on
/// top of the raiser's stack, and this call returns once it does.
pub fn resume<E: Event>(event: E) {
    let mut boxed: Box<dyn Event> = Box::new(event);
    stamp(boxed.as_mut(), RaiseKind::Resume);
    handler::dispatch(boxed.as_mut(), true);
}

/// Re-raises the most recent active resumption, falling back to the
/// current exception. Fatal when neither exists.
pub fn reresume() {
    let event = handler::current_resumption_clone().or_else(current_exception_clone);
    match event {
        None => terminate("reresume"),
        Some(mut event) => {
            event.info_mut().set_raise_kind(RaiseKind::Resume);
            handler::dispatch(event.as_mut(), true);
        }
    }
}

/// Re-raises an event object by its own tagged raise kind: a throw-kind
/// event never returns, a resume-kind event returns after its handler.
pub fn reraise(event: Box<dyn Event>) {
    match event.info().raise_kind() {
        Some(RaiseKind::Resume) => {
            let mut event = event;
            handler::dispatch(event.as_mut(), true);
        }
        _ => throw_boxed(event),
    }
}

fn terminate(operation: &str) -> ! {
    let context = current::current_context_name().unwrap_or_else(|| "<main>".to_string());
    let exception = current_exception_clone();
    let resumption = handler::top_resumed_type();
    if exception.is_none() && resumption.is_none() {
        die!(
            "attempt to {} in context {} but no active exception or resumption exists",
            operation,
            context
        );
    }
    die!(
        "attempt to {} in context {} failed; last exception: {}, last resumption: {}",
        operation,
        context,
        exception.map_or("<none>", |ev| ev.event_type().name()),
        resumption.map_or("<none>", |ty| ty.name())
    )
}

/// Enqueues a clone of `event` into `target`'s async mailbox.
///
/// Returns `false` — the event is silently dropped — when the target has
/// already halted. Unless re-tossing, the clone is stamped with the
/// calling context's identity as source and original raiser.
pub fn async_toss(
    event: &dyn Event,
    target: &ContextRef,
    kind: RaiseKind,
    is_retoss: bool,
) -> bool {
    if target.core.halt_kind().is_some() {
        return false;
    }
    let mut clone = event.clone_event();
    clone.info_mut().set_raise_kind(kind);
    if !is_retoss {
        if let Some(core) = current::try_core() {
            clone.info_mut().set_original_raiser(core.id);
            clone.info_mut().set_source(EventSource {
                id: core.id,
                name: core.name.clone(),
            });
        }
    }
    target.core.mailbox.push(clone);
    true
}

/// Re-tosses the current exception or resumption into `target`.
///
/// The preferred slot follows `kind` (resumption first for resume-kind,
/// exception first for throw-kind), falling back to the other. Fatal when
/// neither exists.
pub fn async_retoss(target: &ContextRef, kind: RaiseKind) -> bool {
    let event = match kind {
        RaiseKind::Resume => handler::current_resumption_clone().or_else(current_exception_clone),
        RaiseKind::Throw => current_exception_clone().or_else(handler::current_resumption_clone),
    };
    match event {
        None => terminate("async_retoss"),
        Some(event) => async_toss(event.as_ref(), target, kind, true),
    }
}

/// Removes a mailbox tombstone once handling finishes, including when the
/// handled event unwinds the poller.
struct MailboxRemoval {
    core: Arc<ContextCore>,
    seq: u64,
}

impl Drop for MailboxRemoval {
    fn drop(&mut self) {
        self.core.mailbox.remove(self.seq);
    }
}

/// Delivers pending asynchronous work to the calling context.
///
/// Checks cancellation first: with the flag set and cancellation enabled,
/// the context unwinds its own stack instead of handling anything else.
/// Then honors an injected yield request, and finally walks the mailbox
/// head to tail, delivering every visible event whose type the delivery
/// scopes currently accept. Returns the number of events handled.
pub fn poll() -> usize {
    let core = current::require_core("poll");
    if core.cancel.in_progress() {
        return 0;
    }
    if core.cancel.enabled() && core.cancel.flagged() {
        core.cancel.begin_unwind();
        silence_event_unwinds();
        panic::panic_any(CancelUnwind);
    }
    if core.yield_requested.swap(false, Ordering::AcqRel) {
        if let Some(task) = current::try_task() {
            crate::task::relinquish(&task);
        }
    }

    let mut handled = 0usize;
    let mut cursor = 0u64;
    loop {
        let next = core.mailbox.take_next_deliverable(cursor, deliver::deliverable);
        let Some((seq, mut event)) = next else { break };
        cursor = seq;
        let _removal = MailboxRemoval {
            core: core.clone(),
            seq,
        };
        match event.info().raise_kind() {
            Some(RaiseKind::Throw) => panic::panic_any(ThrownEvent { event }),
            _ => {
                handler::dispatch(event.as_mut(), false);
                handled += 1;
            }
        }
    }
    handled
}
