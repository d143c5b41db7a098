#![forbid(unsafe_code)]

//! Deferred delivery: binding contexts and their event queues.
//!
//! A [`BindingContext`] belongs to one execution scope. It collects events
//! that must not be delivered immediately (open batches, queued listeners,
//! listeners owned by another scope) and releases them in priority order.
//!
//! # Invariants
//!
//! 1. Queued events are ordered by priority (descending), then arrival.
//! 2. Two events with the same object, property, listener and kind are
//!    never queued together; the later one is dropped.
//! 3. Within one dispatch run, an event is delivered only after every
//!    event it depends on, and each event is delivered at most once.
//!
//! # Failure Modes
//!
//! - Dependency cycle: the `visiting` mark stops the walk; the events in
//!   the cycle are delivered in arrival order.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use fluxbind_core::{DeliveryMode, EventMask, ObjectId};

use crate::event::EventInfo;
use crate::registry::ListenerTarget;

/// Identifies an execution scope (a UI thread, a worker, a test harness).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u64);

impl ScopeId {
    /// The scope used when the host never switches scopes.
    pub const DEFAULT: Self = Self(0);
}

impl Default for ScopeId {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

/// Answers "which scope is running right now?".
pub trait ScopeProvider {
    fn current_scope(&self) -> ScopeId;
}

/// A provider that always reports [`ScopeId::DEFAULT`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleScope;

impl ScopeProvider for SingleScope {
    fn current_scope(&self) -> ScopeId {
        ScopeId::DEFAULT
    }
}

/// Which queued events a flush should release.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DeliveryFilter {
    #[default]
    All,
    Only(DeliveryMode),
}

impl DeliveryFilter {
    fn admits(self, event: &BindingEvent) -> bool {
        match self {
            Self::All => true,
            Self::Only(mode) => event.delivery == mode,
        }
    }
}

/// One queued delivery.
pub struct BindingEvent {
    pub(crate) arrival: Cell<u64>,
    pub info: EventInfo,
    pub target: ListenerTarget,
    pub priority: i32,
    pub delivery: DeliveryMode,
    dependencies: RefCell<Vec<Rc<BindingEvent>>>,
    dispatched: Cell<bool>,
    visiting: Cell<bool>,
}

impl BindingEvent {
    #[must_use]
    pub fn new(info: EventInfo, target: ListenerTarget, priority: i32, delivery: DeliveryMode) -> Self {
        Self {
            arrival: Cell::new(0),
            info,
            target,
            priority,
            delivery,
            dependencies: RefCell::new(Vec::new()),
            dispatched: Cell::new(false),
            visiting: Cell::new(false),
        }
    }

    #[must_use]
    pub fn kind(&self) -> EventMask {
        self.info.kind
    }

    /// Require `other` to be delivered before this event.
    pub fn add_dependency(&self, other: &Rc<BindingEvent>) {
        let mut deps = self.dependencies.borrow_mut();
        if !deps.iter().any(|d| Rc::ptr_eq(d, other)) {
            deps.push(Rc::clone(other));
        }
    }

    #[must_use]
    pub fn depends_on(&self, other: &Rc<BindingEvent>) -> bool {
        self.dependencies.borrow().iter().any(|d| Rc::ptr_eq(d, other))
    }

    #[must_use]
    pub fn is_dispatched(&self) -> bool {
        self.dispatched.get()
    }

    fn same_delivery(&self, other: &BindingEvent) -> bool {
        self.info.kind == other.info.kind
            && self.info.slot == other.info.slot
            && ObjectId::of(&self.info.object) == ObjectId::of(&other.info.object)
            && self.target.id() == other.target.id()
    }
}

impl fmt::Debug for BindingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingEvent")
            .field("info", &self.info)
            .field("target", &self.target)
            .field("priority", &self.priority)
            .field("dispatched", &self.dispatched.get())
            .finish_non_exhaustive()
    }
}

/// The per-scope queue.
#[derive(Default)]
pub struct BindingContext {
    events: Vec<Rc<BindingEvent>>,
    arrivals: u64,
    pub(crate) batch_depth: usize,
    pub(crate) needs_flush: bool,
}

impl BindingContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn in_batch(&self) -> bool {
        self.batch_depth > 0
    }

    /// Queue `event`. Returns the stored handle, or `None` if an identical
    /// delivery is already waiting.
    pub fn queue_event(&mut self, event: BindingEvent) -> Option<Rc<BindingEvent>> {
        if self.events.iter().any(|e| e.same_delivery(&event)) {
            return None;
        }
        self.arrivals += 1;
        event.arrival.set(self.arrivals);
        let event = Rc::new(event);
        let key = (std::cmp::Reverse(event.priority), self.arrivals);
        let at = self
            .events
            .partition_point(|e| (std::cmp::Reverse(e.priority), e.arrival.get()) <= key);
        self.events.insert(at, Rc::clone(&event));
        Some(event)
    }

    /// Queued events sharing `priority`, in arrival order.
    #[must_use]
    pub fn peers_of(&self, priority: i32) -> Vec<Rc<BindingEvent>> {
        self.events
            .iter()
            .filter(|e| e.priority == priority)
            .cloned()
            .collect()
    }

    /// Remove and return the highest-priority run admitted by `filter`.
    pub fn take_run(&mut self, filter: DeliveryFilter) -> Vec<Rc<BindingEvent>> {
        let Some(top) = self
            .events
            .iter()
            .find(|e| filter.admits(e))
            .map(|e| e.priority)
        else {
            return Vec::new();
        };
        let (run, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.events)
            .into_iter()
            .partition(|e| e.priority == top && filter.admits(e));
        self.events = rest;
        run
    }

    /// Remove and return every event matching `pred`, in queue order.
    pub fn take_matching(&mut self, pred: impl Fn(&BindingEvent) -> bool) -> Vec<Rc<BindingEvent>> {
        let (taken, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.events)
            .into_iter()
            .partition(|e| pred(e));
        self.events = rest;
        taken
    }

    /// Priorities of queued events, front to back.
    #[must_use]
    pub fn priorities(&self) -> Vec<i32> {
        self.events.iter().map(|e| e.priority).collect()
    }
}

impl fmt::Debug for BindingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingContext")
            .field("queued", &self.events.len())
            .field("batch_depth", &self.batch_depth)
            .field("needs_flush", &self.needs_flush)
            .finish()
    }
}

/// Order `run` so that dependencies come first and nothing repeats.
///
/// Dependencies outside `run` that have not been dispatched yet are pulled
/// in; their queued copies are skipped later because they are marked.
pub(crate) fn linearize(run: &[Rc<BindingEvent>]) -> Vec<Rc<BindingEvent>> {
    fn visit(event: &Rc<BindingEvent>, out: &mut Vec<Rc<BindingEvent>>) {
        if event.dispatched.get() || event.visiting.get() {
            return;
        }
        event.visiting.set(true);
        let deps = event.dependencies.borrow().clone();
        for dep in &deps {
            visit(dep, out);
        }
        event.visiting.set(false);
        event.dispatched.set(true);
        out.push(Rc::clone(event));
    }

    let mut out = Vec::with_capacity(run.len());
    for event in run {
        visit(event, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{BindingListener, EventDetail};
    use fluxbind_core::{ObjectRef, PropertyBag};
    use proptest::prelude::*;

    struct Nop;
    impl BindingListener for Nop {}

    fn event(obj: &ObjectRef, slot: usize, target: &ListenerTarget, priority: i32) -> BindingEvent {
        let info = EventInfo::new(EventMask::VALUE_VALIDATED, Rc::clone(obj), Some(slot), EventDetail::None);
        BindingEvent::new(info, target.clone(), priority, DeliveryMode::Sync)
    }

    fn target() -> ListenerTarget {
        ListenerTarget::External(Rc::new(Nop))
    }

    #[test]
    fn duplicates_are_dropped() {
        let obj: ObjectRef = PropertyBag::dynamic("M");
        let t = target();
        let mut ctx = BindingContext::new();
        assert!(ctx.queue_event(event(&obj, 0, &t, 0)).is_some());
        assert!(ctx.queue_event(event(&obj, 0, &t, 0)).is_none());
        assert!(ctx.queue_event(event(&obj, 1, &t, 0)).is_some());
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn runs_come_out_by_priority() {
        let obj: ObjectRef = PropertyBag::dynamic("M");
        let mut ctx = BindingContext::new();
        ctx.queue_event(event(&obj, 0, &target(), 1));
        ctx.queue_event(event(&obj, 1, &target(), 9));
        ctx.queue_event(event(&obj, 2, &target(), 1));
        let first = ctx.take_run(DeliveryFilter::All);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].priority, 9);
        let second = ctx.take_run(DeliveryFilter::All);
        assert_eq!(second.iter().map(|e| e.info.slot).collect::<Vec<_>>(), [Some(0), Some(2)]);
        assert!(ctx.is_empty());
    }

    #[test]
    fn filter_skips_other_modes() {
        let obj: ObjectRef = PropertyBag::dynamic("M");
        let mut ctx = BindingContext::new();
        let info = EventInfo::new(EventMask::VALUE_VALIDATED, Rc::clone(&obj), Some(0), EventDetail::None);
        ctx.queue_event(BindingEvent::new(info, target(), 5, DeliveryMode::Queued));
        ctx.queue_event(event(&obj, 1, &target(), 0));
        let run = ctx.take_run(DeliveryFilter::Only(DeliveryMode::Sync));
        assert_eq!(run.len(), 1);
        assert_eq!(run[0].priority, 0);
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn dependencies_are_delivered_first_and_once() {
        let obj: ObjectRef = PropertyBag::dynamic("M");
        let mut ctx = BindingContext::new();
        let a = ctx.queue_event(event(&obj, 0, &target(), 0)).unwrap();
        let b = ctx.queue_event(event(&obj, 1, &target(), 0)).unwrap();
        let c = ctx.queue_event(event(&obj, 2, &target(), 0)).unwrap();
        a.add_dependency(&c);
        b.add_dependency(&c);
        let order = linearize(&ctx.take_run(DeliveryFilter::All));
        let slots: Vec<_> = order.iter().map(|e| e.info.slot).collect();
        assert_eq!(slots, [Some(2), Some(0), Some(1)]);
        assert!(order.iter().all(|e| e.is_dispatched()));
    }

    #[test]
    fn dependency_cycles_terminate() {
        let obj: ObjectRef = PropertyBag::dynamic("M");
        let mut ctx = BindingContext::new();
        let a = ctx.queue_event(event(&obj, 0, &target(), 0)).unwrap();
        let b = ctx.queue_event(event(&obj, 1, &target(), 0)).unwrap();
        a.add_dependency(&b);
        b.add_dependency(&a);
        let order = linearize(&ctx.take_run(DeliveryFilter::All));
        assert_eq!(order.len(), 2);
    }

    proptest! {
        #[test]
        fn queue_is_priority_then_arrival(priorities in proptest::collection::vec(-3i32..3, 1..32)) {
            let obj: ObjectRef = PropertyBag::dynamic("M");
            let mut ctx = BindingContext::new();
            for (i, p) in priorities.iter().enumerate() {
                ctx.queue_event(event(&obj, i, &target(), *p));
            }
            let mut last: Option<(i32, u64)> = None;
            while !ctx.is_empty() {
                let run = ctx.take_run(DeliveryFilter::All);
                for e in &run {
                    let key = (e.priority, e.arrival.get());
                    if let Some((lp, la)) = last {
                        prop_assert!(lp > key.0 || (lp == key.0 && la < key.1));
                    }
                    last = Some(key);
                }
            }
        }
    }
}
