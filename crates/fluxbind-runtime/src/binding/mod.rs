#![forbid(unsafe_code)]

//! The binding node graph.
//!
//! A binding is a tree of [`BindingNode`]s. The root also knows its
//! destination (see [`destination`]). Interior nodes hold strong references
//! to their children and a weak back-reference to their parent, so a tree is
//! owned from the top and events climb it through the parent links.
//!
//! # Node protocol
//!
//! | Step | Entry point | Effect |
//! |------|-------------|--------|
//! | configure | [`BindingNode::configure`] | narrows the direction per child, copies root options |
//! | evaluate | [`BindingNode::get_value`] | cached for forward nodes, recomputed otherwise |
//! | invalidate | `on_invalidated` / `child_invalidated` | clears `valid` up to the root |
//! | validate | `on_validated` / `child_validated` | recomputes, climbs only if the value changed |
//! | reverse | [`BindingNode::apply_reverse`] | pushes a value from the root toward one source |
//! | activate | [`BindingNode::activate`] | releases or re-arms subscriptions |
//! | remove | [`BindingNode::remove_subtree`] | terminal; every later event is ignored |
//!
//! # Invariants
//!
//! 1. A node is `valid` only if it caches (forward direction, active, not
//!    removed) and its value reflects its sources.
//! 2. Only path and array nodes subscribe to host objects; every other
//!    variant learns about changes from its children.
//! 3. No `RefCell` borrow of node state is held across a call into the
//!    engine, a host object, or another node.
//! 4. `Err` out of evaluation means the dispatch must unwind (a binding
//!    loop). Every other failure is reported and becomes UNSET.

pub(crate) mod arith;
pub(crate) mod array;
pub(crate) mod assign;
pub(crate) mod cast;
pub(crate) mod condition;
pub(crate) mod construct;
pub mod destination;
pub(crate) mod method;
pub(crate) mod path;
pub(crate) mod ternary;
pub(crate) mod unary;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use fluxbind_core::{BindError, BindingDirection, BindingFlags, DeliveryMode, EventMask, ObjectId, ObjectRef, Value};
use tracing::debug;

use crate::context::ScopeId;
use crate::engine::Engine;
use crate::event::EventInfo;
use crate::registry::{ListenerTarget, Subscription};

use self::arith::ArithmeticBinding;
use self::array::ArrayBinding;
use self::assign::AssignmentBinding;
use self::cast::CastBinding;
use self::condition::ConditionalBinding;
use self::construct::ConstructBinding;
use self::destination::RootState;
use self::method::MethodBinding;
use self::path::PathBinding;
use self::ternary::TernaryBinding;
use self::unary::UnaryBinding;

/// Child slot used by a chained destination expression.
pub(crate) const DEST_SLOT: usize = usize::MAX;

/// `(object, property)` pair a binding reads or writes.
pub(crate) type AccessKey = (ObjectId, Option<usize>);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Uninitialized,
    Live,
    Removed,
}

/// Options shared by every node of one binding.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SharedOptions {
    pub(crate) flags: BindingFlags,
    pub(crate) priority: i32,
    pub(crate) delivery: DeliveryMode,
    pub(crate) scope: Option<ScopeId>,
}

#[derive(Debug)]
pub(crate) struct NodeState {
    value: Value,
    valid: bool,
    active: bool,
    suppressed: bool,
    unresolved: bool,
    lifecycle: Lifecycle,
    direction: BindingDirection,
    parent: Option<(Weak<BindingNode>, usize)>,
    options: SharedOptions,
}

impl NodeState {
    fn caches(&self) -> bool {
        self.direction.do_forward() && self.active && self.lifecycle != Lifecycle::Removed
    }
}

/// The closed set of expression variants.
pub(crate) enum NodeKind {
    Constant(Value),
    Variable(PathBinding),
    Selector(PathBinding),
    Method(MethodBinding),
    Arithmetic(ArithmeticBinding),
    Conditional(ConditionalBinding),
    Ternary(TernaryBinding),
    Unary(UnaryBinding),
    Cast(CastBinding),
    ArrayElement(ArrayBinding),
    ArraySelector(ArrayBinding),
    Assignment(AssignmentBinding),
    NewObject(ConstructBinding),
    NewArray(ConstructBinding),
}

impl NodeKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Constant(_) => "constant",
            Self::Variable(_) => "variable",
            Self::Selector(_) => "selector",
            Self::Method(_) => "method",
            Self::Arithmetic(_) => "arithmetic",
            Self::Conditional(_) => "conditional",
            Self::Ternary(_) => "ternary",
            Self::Unary(_) => "unary",
            Self::Cast(_) => "cast",
            Self::ArrayElement(_) => "array-element",
            Self::ArraySelector(_) => "array-selector",
            Self::Assignment(_) => "assignment",
            Self::NewObject(_) => "new-object",
            Self::NewArray(_) => "new-array",
        }
    }

    /// Children with their slot numbers.
    fn slots(&self) -> Vec<(usize, Rc<BindingNode>)> {
        match self {
            Self::Constant(_) | Self::Variable(_) => Vec::new(),
            Self::Selector(p) => p.slots(),
            Self::Method(m) => m.slots(),
            Self::Arithmetic(a) => enumerate(&a.operands),
            Self::Conditional(c) => enumerate(&c.operands),
            Self::Ternary(t) => t.slots(),
            Self::Unary(u) => vec![(0, Rc::clone(&u.operand))],
            Self::Cast(c) => vec![(0, Rc::clone(&c.operand))],
            Self::ArrayElement(a) | Self::ArraySelector(a) => a.slots(),
            Self::Assignment(a) => a.slots(),
            Self::NewObject(c) | Self::NewArray(c) => enumerate(&c.args),
        }
    }

    fn child_direction(&self, slot: usize, dir: BindingDirection) -> BindingDirection {
        match self {
            Self::Method(m) => m.child_direction(slot, dir),
            Self::Ternary(_) if slot == ternary::COND_SLOT => dir.forward_only(),
            Self::Ternary(_) | Self::Unary(_) | Self::Cast(_) | Self::Arithmetic(_) => dir,
            Self::Assignment(_) if slot == assign::TARGET_SLOT => BindingDirection::None,
            _ => dir.forward_only(),
        }
    }
}

fn enumerate(nodes: &[Rc<BindingNode>]) -> Vec<(usize, Rc<BindingNode>)> {
    nodes.iter().cloned().enumerate().collect()
}

/// One node of a binding expression tree.
pub struct BindingNode {
    id: u64,
    pub(crate) kind: NodeKind,
    state: RefCell<NodeState>,
    constant: Cell<Option<bool>>,
    pub(crate) root: RefCell<Option<RootState>>,
}

impl BindingNode {
    pub(crate) fn new(engine: &Engine, kind: NodeKind) -> Rc<Self> {
        let node = Rc::new(Self {
            id: engine.next_node_id(),
            kind,
            state: RefCell::new(NodeState {
                value: Value::Unset,
                valid: false,
                active: true,
                suppressed: false,
                unresolved: false,
                lifecycle: Lifecycle::Uninitialized,
                direction: BindingDirection::Forward,
                parent: None,
                options: SharedOptions {
                    flags: BindingFlags::empty(),
                    priority: engine.config().default_priority,
                    delivery: DeliveryMode::Sync,
                    scope: None,
                },
            }),
            constant: Cell::new(None),
            root: RefCell::new(None),
        });
        for (slot, child) in node.kind.slots() {
            child.state.borrow_mut().parent = Some((Rc::downgrade(&node), slot));
        }
        node
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    pub(crate) fn children(&self) -> Vec<Rc<BindingNode>> {
        self.kind.slots().into_iter().map(|(_, c)| c).collect()
    }

    /// Set direction and options for this node and, narrowed per variant,
    /// for its whole subtree.
    pub(crate) fn configure(&self, direction: BindingDirection, options: SharedOptions) {
        {
            let mut st = self.state.borrow_mut();
            st.direction = direction;
            st.options = options;
        }
        for (slot, child) in self.kind.slots() {
            child.configure(self.kind.child_direction(slot, direction), options);
        }
    }

    pub(crate) fn attach_parent(&self, parent: &Rc<BindingNode>, slot: usize) {
        self.state.borrow_mut().parent = Some((Rc::downgrade(parent), slot));
    }

    pub(crate) fn mark_live(&self) {
        self.state.borrow_mut().lifecycle = Lifecycle::Live;
        for child in self.children() {
            child.mark_live();
        }
    }

    pub(crate) fn mark_unresolved(&self) {
        self.state.borrow_mut().unresolved = true;
    }

    // ---- state accessors ----

    #[must_use]
    pub fn value(&self) -> Value {
        self.state.borrow().value.clone()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.state.borrow().valid
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.borrow().active
    }

    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.state.borrow().lifecycle == Lifecycle::Removed
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        self.state.borrow().lifecycle
    }

    #[must_use]
    pub fn direction(&self) -> BindingDirection {
        self.state.borrow().direction
    }

    pub(crate) fn options(&self) -> SharedOptions {
        self.state.borrow().options
    }

    pub(crate) fn flags(&self) -> BindingFlags {
        self.state.borrow().options.flags
    }

    pub(crate) fn is_suppressed(&self) -> bool {
        self.state.borrow().suppressed
    }

    pub(crate) fn set_suppressed(&self, on: bool) {
        self.state.borrow_mut().suppressed = on;
    }

    pub(crate) fn set_cached(&self, value: Value) {
        let mut st = self.state.borrow_mut();
        st.valid = st.caches();
        st.value = value;
    }

    fn parent(&self) -> Option<(Rc<BindingNode>, usize)> {
        let st = self.state.borrow();
        let (weak, slot) = st.parent.as_ref()?;
        weak.upgrade().map(|p| (p, *slot))
    }

    /// The root of the tree this node belongs to.
    pub(crate) fn root_node(self: &Rc<Self>) -> Rc<BindingNode> {
        let mut cur = Rc::clone(self);
        while let Some((parent, _)) = cur.parent() {
            cur = parent;
        }
        cur
    }

    /// Whether this node currently reacts to source events.
    pub(crate) fn is_listening(&self) -> bool {
        let st = self.state.borrow();
        st.active && st.lifecycle == Lifecycle::Live && st.direction.do_forward()
    }

    fn verbose(&self) -> bool {
        self.flags().contains(BindingFlags::VERBOSE)
    }

    /// Whether the subtree can never change.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        if let Some(c) = self.constant.get() {
            return c;
        }
        let c = match &self.kind {
            NodeKind::Constant(_) => true,
            NodeKind::Variable(_)
            | NodeKind::Selector(_)
            | NodeKind::Method(_)
            | NodeKind::ArrayElement(_)
            | NodeKind::ArraySelector(_)
            | NodeKind::Assignment(_)
            | NodeKind::NewObject(_) => false,
            _ => self.children().iter().all(|c| c.is_constant()),
        };
        self.constant.set(Some(c));
        c
    }

    /// Whether a value can be pushed back through this subtree.
    #[must_use]
    pub fn is_reversible(&self) -> bool {
        match &self.kind {
            NodeKind::Constant(_) | NodeKind::Conditional(_) => false,
            NodeKind::NewObject(_) | NodeKind::NewArray(_) => false,
            NodeKind::Variable(p) | NodeKind::Selector(p) => p.is_reversible(),
            NodeKind::Method(m) => m.is_reversible(),
            NodeKind::Arithmetic(a) => a.is_reversible(),
            NodeKind::Ternary(t) => t.is_reversible(),
            NodeKind::Unary(u) => u.is_reversible(),
            NodeKind::Cast(c) => c.operand.is_reversible(),
            NodeKind::ArrayElement(_) | NodeKind::ArraySelector(_) | NodeKind::Assignment(_) => true,
        }
    }

    // ---- subscriptions ----

    /// Subscribe this node to `(obj, slot)` with the binding's options.
    pub(crate) fn listen(self: &Rc<Self>, engine: &Engine, obj: &ObjectRef, slot: Option<usize>, mask: EventMask) {
        let options = self.options();
        let sub = Subscription::new(ListenerTarget::Node(Rc::clone(self)), mask)
            .with_priority(options.priority)
            .with_delivery(options.delivery)
            .with_scope(options.scope);
        engine.subscribe(obj, slot, sub);
    }

    pub(crate) fn unlisten(self: &Rc<Self>, engine: &Engine, obj: &ObjectRef, slot: Option<usize>, mask: EventMask) {
        let target = ListenerTarget::Node(Rc::clone(self));
        if let Err(err) = engine.unsubscribe(obj, slot, &target, mask) {
            engine.report(err);
        }
    }

    fn release(self: &Rc<Self>, engine: &Engine) {
        match &self.kind {
            NodeKind::Variable(p) | NodeKind::Selector(p) => p.release(self, engine),
            NodeKind::ArrayElement(a) | NodeKind::ArraySelector(a) => a.release(self, engine),
            NodeKind::Method(m) => m.cancel(),
            _ => {}
        }
    }

    /// Every `(object, property)` this subtree is subscribed to.
    pub(crate) fn collect_reads(&self, out: &mut Vec<AccessKey>) {
        match &self.kind {
            NodeKind::Variable(p) | NodeKind::Selector(p) => p.collect_reads(out),
            NodeKind::ArrayElement(a) | NodeKind::ArraySelector(a) => a.collect_reads(out),
            _ => {}
        }
        for child in self.children() {
            child.collect_reads(out);
        }
    }

    // ---- evaluation ----

    /// Current value, recomputing unless the node holds a valid cached one.
    pub(crate) fn get_value(self: &Rc<Self>, engine: &Engine) -> Result<Value, BindError> {
        {
            let st = self.state.borrow();
            if st.unresolved {
                return Ok(Value::Unset);
            }
            if st.valid && st.caches() {
                return Ok(st.value.clone());
            }
        }
        let value = self.evaluate(engine)?;
        self.set_cached(value.clone());
        Ok(value)
    }

    fn evaluate(self: &Rc<Self>, engine: &Engine) -> Result<Value, BindError> {
        match &self.kind {
            NodeKind::Constant(v) => Ok(v.clone()),
            NodeKind::Variable(p) | NodeKind::Selector(p) => p.evaluate(self, engine),
            NodeKind::Method(m) => m.evaluate(self, engine),
            NodeKind::Arithmetic(a) => a.evaluate(self, engine),
            NodeKind::Conditional(c) => c.evaluate(engine),
            NodeKind::Ternary(t) => t.evaluate(engine),
            NodeKind::Unary(u) => u.evaluate(self, engine),
            NodeKind::Cast(c) => c.evaluate(engine),
            NodeKind::ArrayElement(a) | NodeKind::ArraySelector(a) => a.evaluate(self, engine),
            NodeKind::Assignment(a) => a.evaluate(self, engine),
            NodeKind::NewObject(c) | NodeKind::NewArray(c) => c.evaluate(self, engine),
        }
    }

    fn evaluate_after(self: &Rc<Self>, engine: &Engine, event: &EventInfo) -> Result<Value, BindError> {
        match &self.kind {
            NodeKind::Variable(p) | NodeKind::Selector(p) => p.evaluate_after(self, engine, event),
            NodeKind::ArrayElement(a) | NodeKind::ArraySelector(a) => a.evaluate_after(self, engine, event),
            _ => self.evaluate(engine),
        }
    }

    /// Value this node would take after `event`, without touching its state.
    fn peek(self: &Rc<Self>, engine: &Engine) -> Result<Value, BindError> {
        match &self.kind {
            NodeKind::Variable(p) | NodeKind::Selector(p) => p.peek(engine),
            NodeKind::ArrayElement(a) | NodeKind::ArraySelector(a) => a.peek(engine),
            _ => Ok(self.value()),
        }
    }

    fn accepts(&self, event: &EventInfo) -> bool {
        match &self.kind {
            NodeKind::ArrayElement(a) | NodeKind::ArraySelector(a) => a.accepts(event),
            _ => true,
        }
    }

    // ---- invalidate phase ----

    pub(crate) fn on_invalidated(self: &Rc<Self>, engine: &Engine, event: &EventInfo, apply: bool) -> bool {
        if !self.is_listening() || !self.accepts(event) {
            return false;
        }
        if apply {
            self.invalidate(engine);
        }
        true
    }

    pub(crate) fn invalidate(self: &Rc<Self>, engine: &Engine) {
        let suppressed = {
            let mut st = self.state.borrow_mut();
            st.valid = false;
            st.suppressed
        };
        if self.verbose() {
            debug!(node = %self, kind = self.kind_name(), "invalidated");
        }
        if suppressed {
            return;
        }
        if let Some((parent, slot)) = self.parent() {
            parent.child_invalidated(engine, slot);
        }
    }

    fn child_invalidated(self: &Rc<Self>, engine: &Engine, slot: usize) {
        if slot == DEST_SLOT || self.is_removed() {
            return;
        }
        if let NodeKind::Ternary(t) = &self.kind {
            t.child_invalidated(slot);
        }
        self.invalidate(engine);
    }

    // ---- validate phase ----

    pub(crate) fn on_validated(self: &Rc<Self>, engine: &Engine, event: &EventInfo, apply: bool) -> Result<bool, BindError> {
        if !self.is_listening() || !self.accepts(event) {
            return Ok(false);
        }
        if !apply {
            let fresh = self.peek(engine)?;
            return Ok(!fresh.equals(&self.value()));
        }
        self.revalidate(engine, Some(event))?;
        Ok(true)
    }

    /// Recompute and, if the value changed, notify the parent (or apply to
    /// the destination at the root).
    pub(crate) fn revalidate(self: &Rc<Self>, engine: &Engine, event: Option<&EventInfo>) -> Result<(), BindError> {
        if self.is_removed() {
            return Ok(());
        }
        let (old, unresolved) = {
            let st = self.state.borrow();
            (st.value.clone(), st.unresolved)
        };
        let new = if unresolved {
            Value::Unset
        } else {
            match event {
                Some(ev) => self.evaluate_after(engine, ev)?,
                None => self.evaluate(engine)?,
            }
        };
        self.set_cached(new.clone());
        let changed = !old.equals(&new);
        if self.verbose() {
            debug!(node = %self, kind = self.kind_name(), changed, value = %new, "validated");
        }
        self.propagate_validated(engine, changed)
    }

    fn propagate_validated(self: &Rc<Self>, engine: &Engine, changed: bool) -> Result<(), BindError> {
        if self.is_suppressed() {
            return Ok(());
        }
        if let Some((parent, slot)) = self.parent() {
            return parent.child_validated(engine, slot, changed);
        }
        if self.root.borrow().is_some() {
            return self.apply_forward(engine, changed);
        }
        Ok(())
    }

    fn child_validated(self: &Rc<Self>, engine: &Engine, slot: usize, changed: bool) -> Result<(), BindError> {
        if self.is_removed() {
            return Ok(());
        }
        if slot == DEST_SLOT {
            return self.destination_expr_changed(engine, changed);
        }
        if let NodeKind::Ternary(t) = &self.kind {
            t.child_validated(slot);
        }
        if !changed && self.is_valid() {
            return Ok(());
        }
        self.revalidate(engine, None)
    }

    // ---- reverse ----

    /// Push `value` back through this subtree toward its single free source.
    pub(crate) fn apply_reverse(self: &Rc<Self>, engine: &Engine, value: &Value) -> Result<(), BindError> {
        if self.is_removed() || value.is_pending() {
            return Ok(());
        }
        if self.flags().contains(BindingFlags::VERBOSE) {
            debug!(node = %self, value = %value, "reverse");
        }
        match &self.kind {
            NodeKind::Constant(_) | NodeKind::Conditional(_) => Err(BindError::unsupported_reverse(
                self.to_string(),
                format!("{} expressions cannot be assigned", self.kind_name()),
            )),
            NodeKind::Variable(p) | NodeKind::Selector(p) => p.apply_reverse(self, engine, value),
            NodeKind::Method(m) => m.apply_reverse(self, engine, value),
            NodeKind::Arithmetic(a) => a.apply_reverse(self, engine, value),
            NodeKind::Ternary(t) => t.apply_reverse(engine, value),
            NodeKind::Unary(u) => u.apply_reverse(self, engine, value),
            NodeKind::Cast(c) => c.apply_reverse(self, engine, value),
            NodeKind::ArrayElement(a) | NodeKind::ArraySelector(a) => a.apply_reverse(self, engine, value),
            NodeKind::Assignment(a) => a.apply_reverse(self, engine),
            NodeKind::NewObject(c) | NodeKind::NewArray(c) => c.apply_reverse(self, engine),
        }
    }

    // ---- lifecycle ----

    /// Turn evaluation and subscriptions on or off for the subtree.
    pub(crate) fn activate(self: &Rc<Self>, engine: &Engine, on: bool) {
        {
            let mut st = self.state.borrow_mut();
            if st.active == on {
                return;
            }
            st.active = on;
            st.valid = false;
        }
        if !on {
            self.release(engine);
        }
        for child in self.children() {
            child.activate(engine, on);
        }
    }

    /// Mark every node of the subtree stale.
    pub(crate) fn invalidate_subtree(&self) {
        self.state.borrow_mut().valid = false;
        for child in self.children() {
            child.invalidate_subtree();
        }
    }

    /// Terminal teardown of the subtree.
    pub(crate) fn remove_subtree(self: &Rc<Self>, engine: &Engine) {
        {
            let mut st = self.state.borrow_mut();
            if st.lifecycle == Lifecycle::Removed {
                return;
            }
            st.lifecycle = Lifecycle::Removed;
            st.valid = false;
        }
        self.release(engine);
        for child in self.children() {
            child.remove_subtree(engine);
        }
    }

    /// Number of nodes in the subtree.
    #[must_use]
    pub fn node_count(&self) -> usize {
        1 + self.children().iter().map(|c| c.node_count()).sum::<usize>()
    }
}

/// Write an operand, parenthesized when it is itself an operator expression.
pub(crate) fn fmt_operand(node: &BindingNode, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &node.kind {
        NodeKind::Arithmetic(_) | NodeKind::Conditional(_) | NodeKind::Ternary(_) | NodeKind::Assignment(_) => {
            write!(f, "({node})")
        }
        _ => write!(f, "{node}"),
    }
}

pub(crate) fn fmt_list(nodes: &[Rc<BindingNode>], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, n) in nodes.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{n}")?;
    }
    Ok(())
}

impl fmt::Display for BindingNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Constant(v) => match v {
                Value::Str(s) => write!(f, "{s:?}"),
                other => write!(f, "{other}"),
            },
            NodeKind::Variable(p) | NodeKind::Selector(p) => p.fmt(f),
            NodeKind::Method(m) => m.fmt(f),
            NodeKind::Arithmetic(a) => a.fmt(f),
            NodeKind::Conditional(c) => c.fmt(f),
            NodeKind::Ternary(t) => t.fmt(f),
            NodeKind::Unary(u) => u.fmt(f),
            NodeKind::Cast(c) => c.fmt(f),
            NodeKind::ArrayElement(a) | NodeKind::ArraySelector(a) => a.fmt(f),
            NodeKind::Assignment(a) => a.fmt(f),
            NodeKind::NewObject(c) | NodeKind::NewArray(c) => c.fmt(f),
        }
    }
}

impl fmt::Debug for BindingNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.borrow();
        f.debug_struct("BindingNode")
            .field("id", &self.id)
            .field("kind", &self.kind_name())
            .field("expr", &self.to_string())
            .field("value", &st.value)
            .field("valid", &st.valid)
            .field("active", &st.active)
            .field("direction", &st.direction)
            .finish()
    }
}
