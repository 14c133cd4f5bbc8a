//! Resumption handler stacks.
//!
//! Resumption dispatches an event to a handler without unwinding: the
//! handler runs with the raiser's stack intact and, when it returns,
//! control continues right after the raise point.
//!
//! The handler stack is an arena of frames threaded by two chains. The
//! "real" chain (`next`) is walked for deliveries arriving from outside
//! any handler (async poll). The "visual" chain (`conseq_next`) is walked
//! for ordinary raises, and while a handler executes the visual top is
//! lowered to the frame below the match — so a resumption raised as a
//! consequence of another resumption can never re-enter handlers above the
//! frame that started the chain.

use std::cell::RefCell;
use std::rc::Rc;

use core_types::ContextId;

use super::event::{Event, EventType};

/// One handler clause in a resumption table.
pub struct ResumeClause {
    event_type: Option<&'static EventType>,
    bound: Option<ContextId>,
    handler: Rc<dyn Fn(&mut dyn Event)>,
}

impl ResumeClause {
    /// Handles events of `ty` and its derived types.
    pub fn of(ty: &'static EventType, handler: impl Fn(&mut dyn Event) + 'static) -> Self {
        Self {
            event_type: Some(ty),
            bound: None,
            handler: Rc::new(handler),
        }
    }

    /// Handles every event type.
    pub fn any(handler: impl Fn(&mut dyn Event) + 'static) -> Self {
        Self {
            event_type: None,
            bound: None,
            handler: Rc::new(handler),
        }
    }

    /// Restricts the clause to events whose original raiser is `raiser`.
    pub fn bound_to(mut self, raiser: ContextId) -> Self {
        self.bound = Some(raiser);
        self
    }
}

struct Frame {
    clauses: Vec<ResumeClause>,
    /// Real chain: frame below at install time.
    next: Option<usize>,
    /// Visual chain: visual top at install time.
    conseq_next: Option<usize>,
}

struct HandlerState {
    frames: Vec<Frame>,
    top: Option<usize>,
    visual_top: Option<usize>,
    /// Clone of the event currently being handled by resumption.
    resumed: Option<Box<dyn Event>>,
    resumed_type: Option<&'static EventType>,
}

thread_local! {
    static STATE: RefCell<HandlerState> = const {
        RefCell::new(HandlerState {
            frames: Vec::new(),
            top: None,
            visual_top: None,
            resumed: None,
            resumed_type: None,
        })
    };
}

/// Scoped registration of a resumption handler table.
///
/// Frames pop strictly LIFO when the scope drops, including by unwinding.
pub struct ResumptionScope {
    index: usize,
}

impl ResumptionScope {
    /// Installs a handler table above every existing frame.
    pub fn install(clauses: Vec<ResumeClause>) -> Self {
        let index = STATE.with(|state| {
            let mut state = state.borrow_mut();
            let next = state.top;
            let conseq_next = state.visual_top;
            state.frames.push(Frame {
                clauses,
                next,
                conseq_next,
            });
            let index = state.frames.len() - 1;
            state.top = Some(index);
            state.visual_top = Some(index);
            index
        });
        Self { index }
    }
}

impl Drop for ResumptionScope {
    fn drop(&mut self) {
        STATE.with(|state| {
            let mut state = state.borrow_mut();
            if let Some(frame) = state.frames.get(self.index) {
                let next = frame.next;
                let conseq_next = frame.conseq_next;
                state.top = next;
                state.visual_top = conseq_next;
                state.frames.truncate(self.index);
            }
        });
    }
}

/// Restores the visual top and resumed-object bookkeeping when a handler
/// finishes, whether it returns or unwinds.
struct ResumeFrameGuard {
    prev_visual: Option<usize>,
    prev_resumed: Option<Box<dyn Event>>,
    prev_type: Option<&'static EventType>,
}

impl ResumeFrameGuard {
    fn enter(
        below: Option<usize>,
        resumed: Box<dyn Event>,
        ty: &'static EventType,
    ) -> Self {
        STATE.with(|state| {
            let mut state = state.borrow_mut();
            let prev_visual = std::mem::replace(&mut state.visual_top, below);
            let prev_resumed = std::mem::replace(&mut state.resumed, Some(resumed));
            let prev_type = std::mem::replace(&mut state.resumed_type, Some(ty));
            Self {
                prev_visual,
                prev_resumed,
                prev_type,
            }
        })
    }
}

impl Drop for ResumeFrameGuard {
    fn drop(&mut self) {
        STATE.with(|state| {
            let mut state = state.borrow_mut();
            state.visual_top = self.prev_visual;
            state.resumed = self.prev_resumed.take();
            state.resumed_type = self.prev_type;
        });
    }
}

/// Finds and runs the nearest matching resumption handler.
///
/// `conseq` selects the chain to search: ordinary raises walk the visual
/// chain, async poll deliveries walk the real chain. Falls back to the
/// event's default action when nothing matches.
pub(crate) fn dispatch(event: &mut dyn Event, conseq: bool) {
    let found = STATE.with(|state| {
        let state = state.borrow();
        let mut idx = if conseq { state.visual_top } else { state.top };
        while let Some(i) = idx {
            let frame = &state.frames[i];
            let next = if conseq { frame.conseq_next } else { frame.next };
            for clause in &frame.clauses {
                let bound_ok = clause
                    .bound
                    .map_or(true, |b| event.info().original_raiser() == Some(b));
                let type_ok = clause
                    .event_type
                    .map_or(true, |ty| event.event_type().is_a(ty));
                if bound_ok && type_ok {
                    return Some((Rc::clone(&clause.handler), next));
                }
            }
            idx = next;
        }
        None
    });

    match found {
        Some((handler, below)) => {
            let _guard = ResumeFrameGuard::enter(below, event.clone_event(), event.event_type());
            handler(event);
        }
        None => {
            let _guard = ResumeFrameGuard::enter(None, event.clone_event(), event.event_type());
            event.default_resume();
        }
    }
}

/// Clone of the event currently being handled by resumption, if any.
pub(crate) fn current_resumption_clone() -> Option<Box<dyn Event>> {
    STATE.with(|state| state.borrow().resumed.as_ref().map(|ev| ev.clone_event()))
}

/// Type of the most recently resumed event, if any.
pub(crate) fn top_resumed_type() -> Option<&'static EventType> {
    STATE.with(|state| state.borrow().resumed_type)
}
