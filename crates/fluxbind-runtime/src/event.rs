#![forbid(unsafe_code)]

//! Events and the listener capability.
//!
//! A property change is announced once, as [`EventMask::VALUE_CHANGED`], and
//! delivered in two phases: every interested subscription is invalidated
//! before any of them is validated. The `apply` argument on delivery
//! distinguishes a real update (`true`) from a dependency query asking "would
//! this change you?" (`false`).

use std::fmt;

use fluxbind_core::object::slot_label;
use fluxbind_core::{BindError, EventMask, ObjectRef, Value};

use crate::engine::Engine;

/// Extra payload carried by an event.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum EventDetail {
    #[default]
    None,
    /// Index of the array element that changed.
    Index(usize),
    /// Host-supplied value.
    Value(Value),
}

/// One delivery: what happened, where.
#[derive(Clone)]
pub struct EventInfo {
    pub kind: EventMask,
    pub object: ObjectRef,
    /// Property slot, or `None` for object-level events.
    pub slot: Option<usize>,
    pub detail: EventDetail,
}

impl EventInfo {
    #[must_use]
    pub fn new(kind: EventMask, object: ObjectRef, slot: Option<usize>, detail: EventDetail) -> Self {
        Self {
            kind,
            object,
            slot,
            detail,
        }
    }

    /// Same event with a different kind.
    #[must_use]
    pub fn with_kind(&self, kind: EventMask) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }

    /// Whether this is an array-element event.
    #[must_use]
    pub fn is_element_event(&self) -> bool {
        self.kind.intersects(EventMask::ARRAY_ELEMENT_CHANGED)
    }

    /// `Type.property` label for logs.
    #[must_use]
    pub fn location(&self) -> String {
        match self.slot {
            Some(slot) => format!("{}.{}", self.object.type_name(), slot_label(&self.object, slot)),
            None => format!("{}.*", self.object.type_name()),
        }
    }
}

impl fmt::Debug for EventInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventInfo")
            .field("kind", &self.kind.label())
            .field("at", &self.location())
            .field("detail", &self.detail)
            .finish()
    }
}

/// A host-side observer of binding events.
///
/// All methods have no-op defaults. The return value of the invalidate and
/// validate callbacks reports whether the listener's own state changed (or,
/// with `apply == false`, would change).
pub trait BindingListener {
    fn value_invalidated(&self, _engine: &Engine, _event: &EventInfo, _apply: bool) -> Result<bool, BindError> {
        Ok(false)
    }

    fn value_validated(&self, _engine: &Engine, _event: &EventInfo, _apply: bool) -> Result<bool, BindError> {
        Ok(false)
    }

    /// Both phases at once; used when a combined change event is delivered
    /// from a binding context.
    fn value_changed(&self, engine: &Engine, event: &EventInfo, apply: bool) -> Result<bool, BindError> {
        let invalidated = self.value_invalidated(engine, event, apply)?;
        let validated = self.value_validated(engine, event, apply)?;
        Ok(invalidated || validated)
    }

    /// A getter asked for a fresh value of the observed property.
    fn value_requested(&self, _engine: &Engine, _event: &EventInfo) -> Result<(), BindError> {
        Ok(())
    }

    /// Another subscription was added on an object this listener watches.
    fn listener_added(&self, _engine: &Engine, _object: &ObjectRef, _slot: Option<usize>) {}

    /// Label used in diagnostics and loop reports.
    fn describe(&self) -> String {
        "listener".to_string()
    }
}
