#![forbid(unsafe_code)]

//! Binding roots: the destination side of a binding.
//!
//! A root is an ordinary expression node that also owns a destination,
//! either a host property or a chained path expression. Forward, the root
//! writes its value there whenever it changes. Reverse, the root watches the
//! destination and pushes new values back into the expression.
//!
//! # Invariants
//!
//! 1. PENDING is never written to a destination.
//! 2. With `SKIP_NULL`, null and UNSET are never written either; otherwise
//!    UNSET is written as null.
//! 3. A destination change equal to the root's cached value is ignored,
//!    which stops a bidirectional binding from echoing its own writes.
//! 4. After removal every entry point is a no-op, and removing again
//!    reports [`BindError::AlreadyRemoved`].

use std::fmt;
use std::rc::Rc;

use fluxbind_core::object::slot_label;
use fluxbind_core::{BindError, BindingDirection, BindingFlags, EventMask, ObjectId, ObjectRef, Value};
use tracing::{debug, info};

use super::{AccessKey, BindingNode, Lifecycle};
use crate::engine::{Engine, WeakEngine};
use crate::registry::ListenerTarget;

#[derive(Clone)]
pub(crate) enum Destination {
    Property { object: ObjectRef, slot: usize },
    Expr(Rc<BindingNode>),
}

pub(crate) struct RootState {
    pub(crate) dest: Destination,
}

fn contain(engine: &Engine, result: Result<(), BindError>) -> Result<(), BindError> {
    match result {
        Err(err) if !err.is_loop() => {
            engine.report(err);
            Ok(())
        }
        other => other,
    }
}

impl BindingNode {
    pub(crate) fn destination(&self) -> Option<Destination> {
        self.root.borrow().as_ref().map(|r| r.dest.clone())
    }

    fn dest_node(&self) -> Option<Rc<BindingNode>> {
        match self.destination()? {
            Destination::Expr(d) => Some(d),
            Destination::Property { .. } => None,
        }
    }

    /// Identity of the destination object, for the engine's root table.
    pub(crate) fn dest_object_id(&self) -> Option<ObjectId> {
        match self.destination()? {
            Destination::Property { object, .. } => Some(ObjectId::of(&object)),
            Destination::Expr(d) => match &d.kind {
                super::NodeKind::Variable(p) => match &p.root {
                    super::path::PathRoot::Fixed { value, .. } => value.object_id(),
                    super::path::PathRoot::Expr(_) => None,
                },
                _ => None,
            },
        }
    }

    /// The `(object, property)` a forward root writes.
    pub(crate) fn write_key(&self) -> Option<AccessKey> {
        if !self.direction().do_forward() {
            return None;
        }
        match self.destination()? {
            Destination::Property { object, slot } => Some((ObjectId::of(&object), Some(slot))),
            Destination::Expr(_) => None,
        }
    }

    pub(crate) fn dest_slot(&self) -> Option<usize> {
        match self.destination()? {
            Destination::Property { slot, .. } => Some(slot),
            Destination::Expr(_) => None,
        }
    }

    pub(crate) fn dest_label(&self) -> String {
        match self.destination() {
            Some(Destination::Property { object, slot }) => {
                format!("{}.{}", object.type_name(), slot_label(&object, slot))
            }
            Some(Destination::Expr(d)) => d.to_string(),
            None => String::from("?"),
        }
    }

    /// `dest op expr`, or just the expression for non-root nodes.
    pub(crate) fn root_description(&self) -> String {
        if self.root.borrow().is_none() {
            return self.to_string();
        }
        format!("{} {} {}", self.dest_label(), self.direction(), self)
    }

    fn trace(&self) -> bool {
        self.flags().contains(BindingFlags::TRACE)
    }

    fn reverse_armed(&self) -> bool {
        self.is_active() && self.lifecycle() == Lifecycle::Live && self.direction().do_reverse()
    }

    pub(crate) fn read_destination(&self, engine: &Engine) -> Result<Value, BindError> {
        match self.destination() {
            Some(Destination::Property { object, slot }) => Ok(object.get_slot(slot).unwrap_or_else(|err| {
                engine.report(err);
                Value::Unset
            })),
            Some(Destination::Expr(d)) => d.get_value(engine),
            None => Ok(Value::Unset),
        }
    }

    /// Subscribe the destination listeners this root needs.
    fn arm(self: &Rc<Self>, engine: &Engine) -> Result<(), BindError> {
        let dir = self.direction();
        match self.destination() {
            Some(Destination::Property { object, slot }) => {
                let target = ListenerTarget::Destination(Rc::clone(self));
                let options = self.options();
                if dir.do_reverse() {
                    engine.subscribe(
                        &object,
                        Some(slot),
                        crate::registry::Subscription::new(target.clone(), EventMask::VALUE_CHANGED)
                            .with_priority(options.priority)
                            .with_scope(options.scope),
                    );
                }
                if dir.do_forward() && options.flags.contains(BindingFlags::QUEUED) {
                    engine.subscribe(
                        &object,
                        Some(slot),
                        crate::registry::Subscription::new(target, EventMask::VALUE_REQUESTED)
                            .with_priority(options.priority),
                    );
                }
            }
            Some(Destination::Expr(d)) if dir.do_reverse() => {
                d.get_value(engine)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn disarm(self: &Rc<Self>, engine: &Engine) {
        match self.destination() {
            Some(Destination::Property { object, slot }) => {
                let target = ListenerTarget::Destination(Rc::clone(self));
                for mask in [EventMask::VALUE_CHANGED, EventMask::VALUE_REQUESTED] {
                    if engine.registry().contains(&object, Some(slot), &target, mask) {
                        if let Err(err) = engine.unsubscribe(&object, Some(slot), &target, mask) {
                            debug!(error = %err, "destination teardown failed");
                        }
                    }
                }
            }
            Some(Destination::Expr(d)) => d.activate(engine, false),
            None => {}
        }
    }

    /// Bring a freshly built root to life: subscribe, evaluate, and perform
    /// the initial forward write.
    pub(crate) fn initialize(self: &Rc<Self>, engine: &Engine) -> Result<(), BindError> {
        self.mark_live();
        if let Some(d) = self.dest_node() {
            d.mark_live();
        }
        if self.flags().contains(BindingFlags::INACTIVE) {
            self.activate(engine, false);
            if let Some(d) = self.dest_node() {
                d.activate(engine, false);
            }
            return Ok(());
        }
        self.arm(engine)?;
        if self.direction().do_forward() {
            self.get_value(engine)?;
            if !self.flags().contains(BindingFlags::NO_INITIAL) {
                return self.apply_forward(engine, true);
            }
        } else {
            let current = self.read_destination(engine)?;
            self.set_cached(current);
        }
        Ok(())
    }

    /// Write the cached value to the destination if it changed.
    pub(crate) fn apply_forward(self: &Rc<Self>, engine: &Engine, changed: bool) -> Result<(), BindError> {
        if !changed || !self.is_listening() {
            return Ok(());
        }
        let value = self.value();
        if value.is_pending() {
            return Ok(());
        }
        if self.flags().contains(BindingFlags::SKIP_NULL) && value.is_null_like() {
            return Ok(());
        }
        if self.trace() {
            info!(binding = %self.root_description(), value = %value, "forward");
        }
        self.write_destination(engine, value.or_null())
    }

    fn write_destination(self: &Rc<Self>, engine: &Engine, value: Value) -> Result<(), BindError> {
        let result = match self.destination() {
            Some(Destination::Property { object, slot }) => engine.write_slot(&object, slot, value).map(|_| ()),
            Some(Destination::Expr(d)) => d.apply_reverse(engine, &value),
            None => Ok(()),
        };
        contain(engine, result)
    }

    /// The destination property changed (reverse trigger).
    pub(crate) fn on_destination_validated(self: &Rc<Self>, engine: &Engine, apply: bool) -> Result<bool, BindError> {
        if !self.reverse_armed() {
            return Ok(false);
        }
        let current = self.read_destination(engine)?;
        self.reverse_from_destination(engine, current, apply)
    }

    /// A chained destination expression produced a new value.
    pub(super) fn destination_expr_changed(self: &Rc<Self>, engine: &Engine, changed: bool) -> Result<(), BindError> {
        if !changed || !self.reverse_armed() {
            return Ok(());
        }
        let Some(d) = self.dest_node() else {
            return Ok(());
        };
        self.reverse_from_destination(engine, d.value(), true).map(|_| ())
    }

    fn reverse_from_destination(self: &Rc<Self>, engine: &Engine, current: Value, apply: bool) -> Result<bool, BindError> {
        if current.equals(&self.value()) || current.is_pending() {
            return Ok(false);
        }
        if !apply {
            return Ok(true);
        }
        if self.trace() {
            info!(binding = %self.root_description(), value = %current, "reverse");
        }
        self.set_cached(current.clone());
        match self.apply_reverse(engine, &current) {
            Ok(()) => Ok(true),
            Err(err) if err.is_loop() => Err(err),
            Err(err) => {
                engine.report(err);
                self.invalidate_subtree();
                Ok(true)
            }
        }
    }

    /// A getter asked for the destination value: deliver whatever is queued
    /// for this binding first.
    pub(crate) fn on_value_requested(self: &Rc<Self>, engine: &Engine) -> Result<(), BindError> {
        if self.lifecycle() != Lifecycle::Live || !self.is_active() {
            return Ok(());
        }
        engine.flush_for_root(self)?;
        if !self.is_valid() && self.direction().do_forward() {
            self.revalidate(engine, None)?;
        }
        Ok(())
    }

    /// Pause or resume the binding.
    pub(crate) fn set_active(self: &Rc<Self>, engine: &Engine, on: bool) -> Result<(), BindError> {
        if self.is_removed() {
            return Err(BindError::AlreadyRemoved {
                binding: self.root_description(),
            });
        }
        if self.is_active() == on {
            return Ok(());
        }
        if on {
            self.activate(engine, true);
            if let Some(d) = self.dest_node() {
                d.activate(engine, true);
            }
            self.arm(engine)?;
            self.sync_destination(engine)
        } else {
            self.disarm(engine);
            self.activate(engine, false);
            Ok(())
        }
    }

    /// Recompute from scratch and rewrite the destination if it disagrees.
    pub(crate) fn sync_destination(self: &Rc<Self>, engine: &Engine) -> Result<(), BindError> {
        if self.lifecycle() != Lifecycle::Live || !self.is_active() {
            return Ok(());
        }
        if self.direction().do_forward() {
            self.invalidate_subtree();
            let value = self.get_value(engine)?;
            let current = self.read_destination(engine)?;
            if !value.equals(&current) {
                return self.apply_forward(engine, true);
            }
        } else {
            let current = self.read_destination(engine)?;
            self.set_cached(current);
        }
        Ok(())
    }

    /// Terminal removal of the whole binding.
    pub(crate) fn teardown(self: &Rc<Self>, engine: &Engine) -> Result<(), BindError> {
        if self.is_removed() {
            return Err(BindError::AlreadyRemoved {
                binding: self.root_description(),
            });
        }
        self.disarm(engine);
        self.remove_subtree(engine);
        if let Some(d) = self.dest_node() {
            d.remove_subtree(engine);
        }
        engine.forget_root(self);
        Ok(())
    }
}

/// Handle to one binding, returned by the engine's `bind` calls.
///
/// Dropping the handle does not remove the binding; the engine keeps it
/// alive until [`remove_listener`](Self::remove_listener) or
/// `Engine::remove_bindings`.
#[derive(Clone)]
pub struct DestinationListener {
    root: Rc<BindingNode>,
    engine: WeakEngine,
}

impl DestinationListener {
    pub(crate) fn new(root: Rc<BindingNode>, engine: WeakEngine) -> Self {
        Self { root, engine }
    }

    pub(crate) fn root(&self) -> &Rc<BindingNode> {
        &self.root
    }

    /// Stable per-engine identifier.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.root.id()
    }

    /// Last value computed (forward) or observed at the destination
    /// (reverse-only).
    #[must_use]
    pub fn value(&self) -> Value {
        self.root.value()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.root.is_valid()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.root.is_active()
    }

    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.root.is_removed()
    }

    #[must_use]
    pub fn direction(&self) -> BindingDirection {
        self.root.direction()
    }

    #[must_use]
    pub fn flags(&self) -> BindingFlags {
        self.root.flags()
    }

    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.root.is_constant()
    }

    #[must_use]
    pub fn is_reversible(&self) -> bool {
        self.root.is_reversible()
    }

    /// Nodes in the expression tree, destination expression excluded.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.root.node_count()
    }

    /// The expression alone, e.g. `Model.a + 1`.
    #[must_use]
    pub fn expression(&self) -> String {
        self.root.to_string()
    }

    /// Pause (`false`) or resume (`true`) the binding. Resuming re-evaluates
    /// from the current source state.
    pub fn activate(&self, on: bool) -> Result<(), BindError> {
        let Some(engine) = self.engine.upgrade() else {
            return Ok(());
        };
        engine.run_detached(|| self.root.set_active(&engine, on))
    }

    /// Force a full re-evaluation and destination sync.
    pub fn refresh(&self) -> Result<(), BindError> {
        let Some(engine) = self.engine.upgrade() else {
            return Ok(());
        };
        engine.run_detached(|| self.root.sync_destination(&engine))
    }

    /// Tear the binding down. Removing twice reports
    /// [`BindError::AlreadyRemoved`].
    pub fn remove_listener(&self) -> Result<(), BindError> {
        let Some(engine) = self.engine.upgrade() else {
            return Ok(());
        };
        let result = self.root.teardown(&engine);
        if let Err(err) = &result {
            engine.report(err.clone());
        }
        result
    }
}

impl fmt::Display for DestinationListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root.root_description())
    }
}

impl fmt::Debug for DestinationListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationListener")
            .field("id", &self.root.id())
            .field("binding", &self.root.root_description())
            .field("value", &self.root.value())
            .field("active", &self.root.is_active())
            .finish()
    }
}
