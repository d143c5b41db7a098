#![forbid(unsafe_code)]

//! The binding engine.
//!
//! An [`Engine`] owns everything a set of bindings shares: the listener
//! registry, the per-scope binding contexts, the dispatch depth counter used
//! for loop detection, and the diagnostics log. It is a cheap, clonable
//! handle; every method takes `&self`.
//!
//! # Usage
//!
//! ```
//! use fluxbind_core::{ObjectRef, PropertyBag, Shape, Value};
//! use fluxbind_runtime::{BindOptions, Engine, Expr};
//!
//! let engine = Engine::new();
//! let shape = Shape::fixed("Cart", ["qty", "price", "total"]);
//! let cart: ObjectRef = PropertyBag::new(&shape);
//! engine.set_property(&cart, "qty", Value::Int(2)).unwrap();
//! engine.set_property(&cart, "price", Value::Int(5)).unwrap();
//!
//! let total = Expr::path(&cart, "qty") * Expr::path(&cart, "price");
//! engine.bind(&cart, "total", total, BindOptions::new()).unwrap();
//! assert_eq!(engine.get_property(&cart, "total").unwrap(), Value::Int(10));
//!
//! engine.set_property(&cart, "qty", Value::Int(3)).unwrap();
//! assert_eq!(engine.get_property(&cart, "total").unwrap(), Value::Int(15));
//! ```
//!
//! # Invariants
//!
//! 1. No `RefCell` borrow owned by the engine is held while a listener,
//!    node or host object runs.
//! 2. At most one forward binding writes a given destination property;
//!    binding a second one replaces the first.
//! 3. Contained failures go to [`Engine::diagnostics`]; only binding loops
//!    and host-visible misuse come back as `Err`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use fluxbind_core::list::SIZE_SLOT;
use fluxbind_core::{BindError, EngineConfig, EventMask, ObjectId, ObjectRef, Value};
use tracing::{debug, error, warn};

use crate::binding::destination::{Destination, DestinationListener, RootState};
use crate::binding::{BindingNode, DEST_SLOT, SharedOptions};
use crate::bind::BindOptions;
use crate::context::{BindingContext, ScopeId, ScopeProvider, SingleScope};
use crate::diagnostics::Diagnostics;
use crate::event::{BindingListener, EventDetail};
use crate::expr::Expr;
use crate::recursion::DispatchState;
use crate::registry::{ListenerTarget, Registry, Subscription};

pub(crate) struct EngineInner {
    config: EngineConfig,
    registry: Registry,
    pub(crate) dispatch: RefCell<DispatchState>,
    pub(crate) contexts: RefCell<AHashMap<ScopeId, BindingContext>>,
    scopes: Box<dyn ScopeProvider>,
    /// Live roots keyed by destination object; `None` for chained
    /// destinations whose object is only known at evaluation time.
    roots: RefCell<AHashMap<Option<ObjectId>, Vec<Rc<BindingNode>>>>,
    diagnostics: RefCell<Diagnostics>,
    next_node: Cell<u64>,
}

/// Shared handle to a binding engine.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Rc<EngineInner>,
}

/// Non-owning engine handle, held by bindings and async callbacks.
#[derive(Clone, Default)]
pub struct WeakEngine(Weak<EngineInner>);

impl WeakEngine {
    #[must_use]
    pub fn upgrade(&self) -> Option<Engine> {
        self.0.upgrade().map(|inner| Engine { inner })
    }
}

impl fmt::Debug for WeakEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakEngine")
            .field("alive", &(self.0.strong_count() > 0))
            .finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Engine with default configuration and a single scope.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_scope_provider(config, SingleScope)
    }

    /// Engine whose notion of "current scope" comes from `scopes`.
    #[must_use]
    pub fn with_scope_provider(config: EngineConfig, scopes: impl ScopeProvider + 'static) -> Self {
        let dispatch = DispatchState::new(config.recursion_threshold, config.max_recorded_frames);
        let diagnostics = Diagnostics::new(config.diagnostics_capacity);
        Self {
            inner: Rc::new(EngineInner {
                config,
                registry: Registry::new(),
                dispatch: RefCell::new(dispatch),
                contexts: RefCell::new(AHashMap::new()),
                scopes: Box::new(scopes),
                roots: RefCell::new(AHashMap::new()),
                diagnostics: RefCell::new(diagnostics),
                next_node: Cell::new(0),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakEngine {
        WeakEngine(Rc::downgrade(&self.inner))
    }

    /// The scope the host is running in right now.
    #[must_use]
    pub fn current_scope(&self) -> ScopeId {
        self.inner.scopes.current_scope()
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub(crate) fn next_node_id(&self) -> u64 {
        let id = self.inner.next_node.get() + 1;
        self.inner.next_node.set(id);
        id
    }

    /// Current nested dispatch depth.
    #[must_use]
    pub fn dispatch_depth(&self) -> usize {
        self.inner.dispatch.borrow().depth()
    }

    // ---- diagnostics ----

    /// Log and keep a contained failure.
    pub fn report(&self, err: BindError) {
        match &err {
            BindError::BindingLoop { frames } => {
                let first = frames.first().map(ToString::to_string).unwrap_or_default();
                error!(frames = frames.len(), first = %first, "binding loop detected; dispatch abandoned");
            }
            BindError::UnsupportedReverse { .. }
            | BindError::UnresolvedProperty { .. }
            | BindError::UnresolvedMethod { .. }
            | BindError::ListenerNotFound { .. }
            | BindError::AlreadyRemoved { .. } => warn!(kind = err.kind(), error = %err, "binding error"),
            _ => debug!(kind = err.kind(), error = %err, "binding evaluation failed"),
        }
        self.inner.diagnostics.borrow_mut().push(err);
    }

    /// Retained diagnostics, oldest first.
    #[must_use]
    pub fn diagnostics(&self) -> Vec<BindError> {
        self.inner.diagnostics.borrow().snapshot()
    }

    /// Drain retained diagnostics.
    pub fn take_diagnostics(&self) -> Vec<BindError> {
        self.inner.diagnostics.borrow_mut().take()
    }

    /// Count of every failure reported, evicted ones included.
    #[must_use]
    pub fn diagnostics_total(&self) -> u64 {
        self.inner.diagnostics.borrow().total()
    }

    // ---- subscriptions ----

    /// Store `sub` and tell `LISTENER_ADDED` observers of `(obj, slot)`.
    pub(crate) fn subscribe(&self, obj: &ObjectRef, slot: Option<usize>, sub: Subscription) {
        let notify = !sub.mask.contains(EventMask::LISTENER_ADDED);
        self.inner.registry.add(obj, slot, sub);
        if !notify {
            return;
        }
        for watcher in self.inner.registry.snapshot(obj, slot, EventMask::LISTENER_ADDED) {
            if let ListenerTarget::External(l) = &watcher.target {
                l.listener_added(self, obj, slot);
            }
        }
    }

    pub(crate) fn unsubscribe(
        &self,
        obj: &ObjectRef,
        slot: Option<usize>,
        target: &ListenerTarget,
        mask: EventMask,
    ) -> Result<Subscription, BindError> {
        self.inner.registry.remove(obj, slot, target, mask)
    }

    fn resolve_slot(obj: &ObjectRef, property: Option<&str>) -> Result<Option<usize>, BindError> {
        match property {
            None => Ok(None),
            Some(name) => obj
                .property_slot(name)
                .map(Some)
                .ok_or_else(|| BindError::unresolved_property(obj.type_name(), name)),
        }
    }

    /// Subscribe host code to `property` of `obj` (or to the whole object
    /// when `property` is `None`).
    pub fn add_listener(
        &self,
        obj: &ObjectRef,
        property: Option<&str>,
        listener: &Rc<dyn BindingListener>,
        mask: EventMask,
        priority: i32,
    ) -> Result<(), BindError> {
        let sub = Subscription::new(ListenerTarget::External(Rc::clone(listener)), mask).with_priority(priority);
        self.add_subscription(obj, property, sub)
    }

    /// Subscribe with full control over delivery mode and owning scope.
    pub fn add_subscription(&self, obj: &ObjectRef, property: Option<&str>, sub: Subscription) -> Result<(), BindError> {
        let slot = Self::resolve_slot(obj, property)?;
        self.subscribe(obj, slot, sub);
        Ok(())
    }

    /// Remove a host subscription. The mask must match the one it was added
    /// with.
    pub fn remove_listener(
        &self,
        obj: &ObjectRef,
        property: Option<&str>,
        listener: &Rc<dyn BindingListener>,
        mask: EventMask,
    ) -> Result<(), BindError> {
        let slot = Self::resolve_slot(obj, property)?;
        let target = ListenerTarget::External(Rc::clone(listener));
        match self.unsubscribe(obj, slot, &target, mask) {
            Ok(_) => Ok(()),
            Err(err) => {
                self.report(err.clone());
                Err(err)
            }
        }
    }

    /// Drop registry entries for objects that no longer exist.
    pub fn prune_registry(&self) -> usize {
        let pruned = self.inner.registry.prune();
        if pruned > 0 {
            debug!(pruned, "pruned listener side table");
        }
        pruned
    }

    // ---- host-facing property access ----

    /// Read a property by name.
    pub fn get_property(&self, obj: &ObjectRef, property: &str) -> Result<Value, BindError> {
        fluxbind_core::object::get_property(obj, property)
    }

    /// Write a property by name and notify listeners if the value changed.
    /// Dynamic objects gain the property on first write.
    pub fn set_property(&self, obj: &ObjectRef, property: &str, value: impl Into<Value>) -> Result<bool, BindError> {
        let slot = obj
            .property_slot(property)
            .or_else(|| obj.define_property(property))
            .ok_or_else(|| BindError::unresolved_property(obj.type_name(), property))?;
        self.write_slot(obj, slot, value.into())
    }

    /// Write a slot and send `VALUE_CHANGED` if it changed.
    pub fn write_slot(&self, obj: &ObjectRef, slot: usize, value: Value) -> Result<bool, BindError> {
        let old = obj.get_slot(slot).unwrap_or(Value::Unset);
        if old.equals(&value) {
            return Ok(false);
        }
        obj.set_slot(slot, value)?;
        self.dispatch(EventMask::VALUE_CHANGED, obj, Some(slot), EventDetail::None)?;
        Ok(true)
    }

    /// Replace element `index` of a list object.
    pub fn set_element(&self, obj: &ObjectRef, index: usize, value: Value) -> Result<bool, BindError> {
        let list = obj
            .as_list()
            .ok_or_else(|| BindError::type_mismatch("list", obj.type_name()))?;
        let old = list.set(index, value.clone())?;
        if old.equals(&value) {
            return Ok(false);
        }
        self.dispatch(EventMask::ARRAY_ELEMENT_CHANGED, obj, None, EventDetail::Index(index))?;
        Ok(true)
    }

    /// Append to a list object; listeners see its size change.
    pub fn push_element(&self, obj: &ObjectRef, value: Value) -> Result<(), BindError> {
        let list = obj
            .as_list()
            .ok_or_else(|| BindError::type_mismatch("list", obj.type_name()))?;
        list.push(value);
        self.dispatch(EventMask::VALUE_CHANGED, obj, Some(SIZE_SLOT), EventDetail::None)
    }

    /// Remove element `index` of a list object.
    pub fn remove_element(&self, obj: &ObjectRef, index: usize) -> Result<Value, BindError> {
        let list = obj
            .as_list()
            .ok_or_else(|| BindError::type_mismatch("list", obj.type_name()))?;
        let removed = list.remove(index)?;
        self.dispatch(EventMask::VALUE_CHANGED, obj, Some(SIZE_SLOT), EventDetail::None)?;
        Ok(removed)
    }

    // ---- binding ----

    /// Bind `property` of `obj` to `expr`.
    ///
    /// Fails only when the destination property cannot be resolved. Loops
    /// during the initial write are reported through diagnostics.
    pub fn bind(
        &self,
        obj: &ObjectRef,
        property: &str,
        expr: Expr,
        options: BindOptions,
    ) -> Result<DestinationListener, BindError> {
        let slot = match obj.property_slot(property).or_else(|| obj.define_property(property)) {
            Some(slot) => slot,
            None => {
                let err = BindError::unresolved_property(obj.type_name(), property);
                self.report(err.clone());
                return Err(err);
            }
        };
        let root = expr.build(self);
        *root.root.borrow_mut() = Some(RootState {
            dest: Destination::Property {
                object: Rc::clone(obj),
                slot,
            },
        });
        Ok(self.install(root, None, options))
    }

    /// Bind a chained destination, e.g. `model.child.name`, to `expr`. The
    /// destination is re-resolved whenever any link of it changes.
    pub fn bind_to(&self, dest: Expr, expr: Expr, options: BindOptions) -> Result<DestinationListener, BindError> {
        if !dest.is_assignable() {
            let err = BindError::unsupported_reverse(dest.to_string(), "destination must be a path or an indexing expression");
            self.report(err.clone());
            return Err(err);
        }
        let dest_node = dest.build(self);
        let root = expr.build(self);
        *root.root.borrow_mut() = Some(RootState {
            dest: Destination::Expr(Rc::clone(&dest_node)),
        });
        Ok(self.install(root, Some(dest_node), options))
    }

    fn install(&self, root: Rc<BindingNode>, dest: Option<Rc<BindingNode>>, options: BindOptions) -> DestinationListener {
        let shared = SharedOptions {
            flags: options.flags,
            priority: options.priority.unwrap_or(self.inner.config.default_priority),
            delivery: options.delivery(),
            scope: options.owning_scope(self.current_scope()),
        };
        root.configure(options.direction, shared);
        if let Some(d) = &dest {
            d.attach_parent(&root, DEST_SLOT);
            let dest_dir = if options.direction.do_reverse() {
                fluxbind_core::BindingDirection::Forward
            } else {
                fluxbind_core::BindingDirection::None
            };
            d.configure(dest_dir, shared);
        }
        self.replace_forward(&root);
        self.inner
            .roots
            .borrow_mut()
            .entry(root.dest_object_id())
            .or_default()
            .push(Rc::clone(&root));

        if let Err(err) = self.run_detached(|| root.initialize(self)) {
            // Loops were reported by the outermost frame.
            if !err.is_loop() {
                self.report(err);
            }
        }
        debug!(binding = %root.root_description(), id = root.id(), "bound");
        DestinationListener::new(root, self.downgrade())
    }

    fn replace_forward(&self, root: &Rc<BindingNode>) {
        let Some(key) = root.write_key() else {
            return;
        };
        let previous: Vec<Rc<BindingNode>> = self
            .inner
            .roots
            .borrow()
            .get(&Some(key.0))
            .map(|roots| roots.iter().filter(|r| r.write_key() == Some(key)).cloned().collect())
            .unwrap_or_default();
        for old in previous {
            debug!(replaced = %old.root_description(), "destination already bound; replacing");
            if let Err(err) = old.teardown(self) {
                self.report(err);
            }
        }
    }

    pub(crate) fn forget_root(&self, root: &Rc<BindingNode>) {
        let mut roots = self.inner.roots.borrow_mut();
        let key = root.dest_object_id();
        if let Some(list) = roots.get_mut(&key) {
            list.retain(|r| !Rc::ptr_eq(r, root));
            if list.is_empty() {
                roots.remove(&key);
            }
        }
    }

    fn roots_of(&self, obj: &ObjectRef) -> Vec<Rc<BindingNode>> {
        self.inner
            .roots
            .borrow()
            .get(&Some(ObjectId::of(obj)))
            .cloned()
            .unwrap_or_default()
    }

    /// Handles to every live binding whose destination is on `obj`.
    #[must_use]
    pub fn bindings_for(&self, obj: &ObjectRef) -> Vec<DestinationListener> {
        self.roots_of(obj)
            .into_iter()
            .map(|root| DestinationListener::new(root, self.downgrade()))
            .collect()
    }

    /// Number of live bindings across all destinations.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.inner.roots.borrow().values().map(Vec::len).sum()
    }

    /// Remove every binding whose destination is on `obj`.
    pub fn remove_bindings(&self, obj: &ObjectRef) -> usize {
        let roots = self.roots_of(obj);
        let mut removed = 0;
        for root in roots {
            match root.teardown(self) {
                Ok(()) => removed += 1,
                Err(err) => self.report(err),
            }
        }
        removed
    }

    /// Re-evaluate every binding whose destination is on `obj` and rewrite
    /// destinations that disagree.
    pub fn refresh_bindings(&self, obj: &ObjectRef) -> Result<(), BindError> {
        let roots = self.roots_of(obj);
        self.run_detached(|| roots.iter().try_for_each(|root| root.sync_destination(self)))
    }

    // ---- events ----

    /// Announce that `property` of `obj` changed outside the engine.
    pub fn send_changed_event(&self, obj: &ObjectRef, property: &str) -> Result<(), BindError> {
        let slot = Self::resolve_slot(obj, Some(property))?;
        self.dispatch(EventMask::VALUE_CHANGED, obj, slot, EventDetail::None)
    }

    /// Send an arbitrary event. `kind` may combine phases; a `*_CHANGED`
    /// kind is split into its invalidate and validate phases.
    pub fn send_event(
        &self,
        kind: EventMask,
        obj: &ObjectRef,
        property: Option<&str>,
        detail: EventDetail,
    ) -> Result<(), BindError> {
        let slot = Self::resolve_slot(obj, property)?;
        self.dispatch(kind, obj, slot, detail)
    }

    /// Read `property` after giving queued bindings that write it a chance
    /// to deliver.
    pub fn request_value(&self, obj: &ObjectRef, property: &str) -> Result<Value, BindError> {
        let slot = Self::resolve_slot(obj, Some(property))?;
        self.dispatch(EventMask::VALUE_REQUESTED, obj, slot, EventDetail::None)?;
        self.get_property(obj, property)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .field("bindings", &self.binding_count())
            .field("depth", &self.dispatch_depth())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::ArithOp;
    use fluxbind_core::{BindingDirection, PropertyBag, Shape};

    fn model() -> ObjectRef {
        PropertyBag::new(&Shape::fixed("M", ["a", "b", "c"]))
    }

    #[test]
    fn write_slot_skips_equal_values() {
        let engine = Engine::new();
        let m = model();
        assert!(engine.set_property(&m, "a", 1).unwrap());
        assert!(!engine.set_property(&m, "a", 1).unwrap());
    }

    #[test]
    fn second_forward_binding_replaces_first() {
        let engine = Engine::new();
        let m = model();
        engine.set_property(&m, "a", 1).unwrap();
        engine.set_property(&m, "b", 2).unwrap();
        let first = engine
            .bind(&m, "c", Expr::path(&m, "a"), BindOptions::new())
            .unwrap();
        let second = engine
            .bind(&m, "c", Expr::path(&m, "b"), BindOptions::new())
            .unwrap();
        assert!(first.is_removed());
        assert!(!second.is_removed());
        assert_eq!(engine.bindings_for(&m).len(), 1);
        engine.set_property(&m, "a", 10).unwrap();
        assert_eq!(engine.get_property(&m, "c").unwrap(), Value::Int(2));
    }

    #[test]
    fn reverse_only_binding_coexists_with_forward() {
        let engine = Engine::new();
        let m = model();
        engine
            .bind(&m, "c", Expr::path(&m, "a"), BindOptions::new())
            .unwrap();
        engine
            .bind(
                &m,
                "c",
                Expr::path(&m, "b"),
                BindOptions::new().direction(BindingDirection::Reverse),
            )
            .unwrap();
        assert_eq!(engine.bindings_for(&m).len(), 2);
    }

    #[test]
    fn remove_bindings_tears_down_all() {
        let engine = Engine::new();
        let m = model();
        let h = engine
            .bind(
                &m,
                "c",
                Expr::arith(ArithOp::Add, vec![Expr::path(&m, "a"), Expr::path(&m, "b")]),
                BindOptions::new(),
            )
            .unwrap();
        assert!(engine.registry().total_for(&m) > 0);
        assert_eq!(engine.remove_bindings(&m), 1);
        assert!(h.is_removed());
        assert_eq!(engine.registry().total_for(&m), 0);
        assert_eq!(engine.binding_count(), 0);
    }

    #[test]
    fn unknown_destination_is_an_error() {
        let engine = Engine::new();
        let m = model();
        let err = engine
            .bind(&m, "missing", Expr::constant(1), BindOptions::new())
            .unwrap_err();
        assert_eq!(err.kind(), "unresolved-property");
        assert_eq!(engine.diagnostics().len(), 1);
    }

    #[test]
    fn weak_handle_dies_with_engine() {
        let engine = Engine::new();
        let weak = engine.downgrade();
        assert!(weak.upgrade().is_some());
        drop(engine);
        assert!(weak.upgrade().is_none());
    }
}
