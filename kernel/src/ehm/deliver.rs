//! Delivery-enable scopes for async events.
//!
//! A context controls which async event types a poll point may deliver by
//! stacking scoped enable/disable guards. The innermost scope naming a
//! type (or naming no types, which covers all) decides; with no scope
//! installed, everything is deliverable.

use std::cell::RefCell;

use super::event::EventType;

struct Scope {
    deliver: bool,
    /// Empty means the scope applies to all event types.
    types: Vec<&'static EventType>,
}

thread_local! {
    static SCOPES: RefCell<Vec<Scope>> = const { RefCell::new(Vec::new()) };
}

/// Scoped delivery control for the calling context.
///
/// Dropping the guard restores the surrounding delivery rules.
pub struct DeliveryScope {
    saved_len: usize,
}

impl DeliveryScope {
    fn install(deliver: bool, types: Vec<&'static EventType>) -> Self {
        let saved_len = SCOPES.with(|scopes| {
            let mut scopes = scopes.borrow_mut();
            scopes.push(Scope { deliver, types });
            scopes.len() - 1
        });
        Self { saved_len }
    }

    /// Enables delivery of all async event types.
    pub fn enable_all() -> Self {
        Self::install(true, Vec::new())
    }

    /// Disables delivery of all async event types.
    pub fn disable_all() -> Self {
        Self::install(false, Vec::new())
    }

    /// Enables delivery of the named types (and their derived types).
    pub fn enable(types: Vec<&'static EventType>) -> Self {
        Self::install(true, types)
    }

    /// Disables delivery of the named types (and their derived types).
    pub fn disable(types: Vec<&'static EventType>) -> Self {
        Self::install(false, types)
    }
}

impl Drop for DeliveryScope {
    fn drop(&mut self) {
        SCOPES.with(|scopes| {
            scopes.borrow_mut().truncate(self.saved_len);
        });
    }
}

/// Whether the calling context currently accepts delivery of `ty`.
pub(crate) fn deliverable(ty: &'static EventType) -> bool {
    SCOPES.with(|scopes| {
        for scope in scopes.borrow().iter().rev() {
            if scope.types.is_empty() {
                return scope.deliver;
            }
            if scope.types.iter().any(|t| ty.is_a(t)) {
                return scope.deliver;
            }
        }
        // Base scope: everything deliverable from context start.
        true
    })
}
