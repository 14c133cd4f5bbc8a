//! Event objects and type descriptors.
//!
//! Weft events are matched by type, including derived types: every event
//! type carries a static [`EventType`] descriptor with an optional parent,
//! and "does X satisfy a handler declared for Y" walks the parent chain.
//! The chain is fixed at declaration, so matching never consults any
//! runtime type machinery beyond pointer identity.

use std::any::Any;

use core_types::ContextId;

/// Static descriptor of an event type.
///
/// Declared as a `static` next to the event struct; the descriptor's
/// address is its identity.
pub struct EventType {
    name: &'static str,
    parent: Option<&'static EventType>,
}

impl EventType {
    /// Declares a root event type.
    pub const fn root(name: &'static str) -> Self {
        Self { name, parent: None }
    }

    /// Declares an event type derived from `parent`.
    pub const fn derived(name: &'static str, parent: &'static EventType) -> Self {
        Self {
            name,
            parent: Some(parent),
        }
    }

    /// The declared type name, used in handler matching diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this type is `ancestor` or derives from it.
    pub fn is_a(&self, ancestor: &'static EventType) -> bool {
        let mut cur = Some(self);
        while let Some(ty) = cur {
            if std::ptr::eq(ty, ancestor) {
                return true;
            }
            cur = ty.parent;
        }
        false
    }
}

impl std::fmt::Debug for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventType").field("name", &self.name).finish()
    }
}

/// How an event was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaiseKind {
    /// Synchronous propagation: unwind to the nearest matching handler.
    Throw,
    /// Resumption: dispatch to a handler without unwinding.
    Resume,
}

/// Identity of the context an event came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSource {
    pub id: ContextId,
    pub name: String,
}

/// Bookkeeping shared by every event object.
///
/// Embedded in each concrete event type; the runtime stamps the raise kind
/// and source identity at raise time, and bound resumption handlers match
/// against the original raiser.
#[derive(Debug, Clone, Default)]
pub struct EventInfo {
    kind: Option<RaiseKind>,
    message: String,
    source: Option<EventSource>,
    original_raiser: Option<ContextId>,
}

impl EventInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// The raise kind stamped at the most recent raise, if any.
    pub fn raise_kind(&self) -> Option<RaiseKind> {
        self.kind
    }

    pub(crate) fn set_raise_kind(&mut self, kind: RaiseKind) {
        self.kind = Some(kind);
    }

    /// Optional human-readable message carried into diagnostics.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    /// The context the event was raised from, if stamped.
    pub fn source(&self) -> Option<&EventSource> {
        self.source.as_ref()
    }

    pub(crate) fn set_source(&mut self, source: EventSource) {
        self.source = Some(source);
    }

    /// The raise-site identity bound resumption handlers match against.
    pub fn original_raiser(&self) -> Option<ContextId> {
        self.original_raiser
    }

    /// Pins the raise-site identity, overriding the implicit stamp.
    pub fn set_original_raiser(&mut self, raiser: ContextId) {
        self.original_raiser = Some(raiser);
    }
}

/// A raisable event.
///
/// Concrete event types embed an [`EventInfo`] and expose it through
/// `info`/`info_mut`; `clone_event` supports async delivery (the mailbox
/// owns a duplicate, never the raiser's original) and re-raise.
pub trait Event: Any + Send {
    /// The static descriptor used for handler matching.
    fn event_type(&self) -> &'static EventType;

    /// Shared bookkeeping, read by the runtime.
    fn info(&self) -> &EventInfo;

    /// Shared bookkeeping, stamped by the runtime at raise time.
    fn info_mut(&mut self) -> &mut EventInfo;

    /// Duplicates the event for async delivery or re-raise.
    fn clone_event(&self) -> Box<dyn Event>;

    /// Upcast for handler-side downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Default action when no resumption handler matches.
    ///
    /// The default re-raises the event as a synchronous throw; overrides
    /// may instead return normally, resuming after the raise point.
    fn default_resume(&self) {
        super::throw_boxed(self.clone_event());
    }
}

/// Unwind payload carrying a synchronously thrown event.
pub(crate) struct ThrownEvent {
    pub(crate) event: Box<dyn Event>,
}

#[cfg(test)]
mod tests {
    use super::*;

    static BASE: EventType = EventType::root("base");
    static DERIVED: EventType = EventType::derived("derived", &BASE);
    static GRANDCHILD: EventType = EventType::derived("grandchild", &DERIVED);
    static OTHER: EventType = EventType::root("other");

    #[test]
    fn test_is_a_walks_parent_chain() {
        assert!(BASE.is_a(&BASE));
        assert!(DERIVED.is_a(&BASE));
        assert!(GRANDCHILD.is_a(&BASE));
        assert!(GRANDCHILD.is_a(&DERIVED));
        assert!(!BASE.is_a(&DERIVED));
        assert!(!DERIVED.is_a(&OTHER));
    }

    #[test]
    fn test_event_info_defaults() {
        let info = EventInfo::new();
        assert_eq!(info.raise_kind(), None);
        assert_eq!(info.message(), "");
        assert!(info.source().is_none());
        assert!(info.original_raiser().is_none());
    }

    #[test]
    fn test_event_info_message() {
        let mut info = EventInfo::new();
        info.set_message("queue overflow");
        assert_eq!(info.message(), "queue overflow");
    }
}
