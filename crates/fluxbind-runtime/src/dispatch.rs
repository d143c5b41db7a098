#![forbid(unsafe_code)]

//! Two-phase change dispatch.
//!
//! A `*_CHANGED` event is delivered in two passes over one snapshot of the
//! subscribers: every listener sees the invalidation before any listener
//! sees the validation. A listener that reads another listener's output
//! during validation therefore always finds it marked stale rather than
//! silently out of date.
//!
//! # Routing
//!
//! | Subscription | Invalidate | Validate |
//! |--------------|------------|----------|
//! | owned by another scope | queued there | queued there |
//! | `Immediate` | now | now |
//! | `Sync` | now | now, or queued while the current scope batches |
//! | `Queued` | now | queued in the current scope |
//!
//! Queued validations of equal priority are ordered so that a binding whose
//! destination another queued binding reads is delivered first.

use std::rc::Rc;

use fluxbind_core::{BindError, DeliveryMode, EventMask, ObjectRef};
use tracing::{debug, trace};

use crate::binding::{AccessKey, BindingNode};
use crate::context::{BindingContext, BindingEvent, DeliveryFilter, ScopeId, linearize};
use crate::engine::Engine;
use crate::event::{EventDetail, EventInfo};
use crate::registry::{ListenerTarget, Subscription};

const INVALIDATE_BITS: EventMask = EventMask::VALUE_INVALIDATED.union(EventMask::ARRAY_ELEMENT_INVALIDATED);
const VALIDATE_BITS: EventMask = EventMask::VALUE_VALIDATED.union(EventMask::ARRAY_ELEMENT_VALIDATED);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Invalidate,
    Validate,
}

impl Engine {
    /// Run `f` inside one dispatch frame. A binding loop escaping the
    /// outermost frame is logged and kept in diagnostics before it is
    /// returned.
    pub(crate) fn run_detached<R>(&self, f: impl FnOnce() -> Result<R, BindError>) -> Result<R, BindError> {
        let depth = self.inner.dispatch.borrow_mut().enter();
        let result = f();
        self.inner.dispatch.borrow_mut().exit();
        if depth == 1 {
            if let Err(err) = &result {
                if err.is_loop() {
                    self.report(err.clone());
                }
            }
        }
        result
    }

    pub(crate) fn dispatch(
        &self,
        kind: EventMask,
        obj: &ObjectRef,
        slot: Option<usize>,
        detail: EventDetail,
    ) -> Result<(), BindError> {
        let event = EventInfo::new(kind, Rc::clone(obj), slot, detail);
        self.run_detached(|| self.dispatch_event(&event))
    }

    fn dispatch_event(&self, event: &EventInfo) -> Result<(), BindError> {
        let kind = event.kind;
        let _span = tracing::debug_span!("dispatch", event = %event.location(), kind = kind.label()).entered();
        if self.config().trace_events {
            trace!(event = %event.location(), kind = kind.label(), depth = self.dispatch_depth(), "dispatch");
        }
        if kind.contains(EventMask::VALUE_REQUESTED) {
            let requested = event.with_kind(EventMask::VALUE_REQUESTED);
            for sub in self.registry().snapshot(&event.object, event.slot, EventMask::VALUE_REQUESTED) {
                self.deliver_requested(&sub.target, &requested)?;
            }
        }
        let invalidate = kind & INVALIDATE_BITS;
        let validate = kind & VALIDATE_BITS;
        if invalidate.is_empty() && validate.is_empty() {
            return Ok(());
        }
        let subs = self.registry().snapshot(&event.object, event.slot, invalidate | validate);
        if !invalidate.is_empty() {
            let ev = event.with_kind(invalidate);
            for sub in subs.iter().filter(|s| s.mask.intersects(invalidate)) {
                self.deliver(Phase::Invalidate, sub, &ev)?;
            }
        }
        if !validate.is_empty() {
            let ev = event.with_kind(validate);
            for sub in subs.iter().filter(|s| s.mask.intersects(validate)) {
                self.deliver(Phase::Validate, sub, &ev)?;
            }
        }
        Ok(())
    }

    fn deliver_requested(&self, target: &ListenerTarget, event: &EventInfo) -> Result<(), BindError> {
        self.inner
            .dispatch
            .borrow_mut()
            .record(&event.object, event.slot, target)?;
        match target {
            ListenerTarget::Destination(root) => root.on_value_requested(self),
            ListenerTarget::External(l) => l.value_requested(self, event),
            ListenerTarget::Node(_) => Ok(()),
        }
    }

    fn deliver(&self, phase: Phase, sub: &Subscription, event: &EventInfo) -> Result<(), BindError> {
        let current = self.current_scope();
        if let Some(owner) = sub.scope.filter(|owner| *owner != current) {
            self.enqueue(owner, sub, event, true);
            return Ok(());
        }
        if phase == Phase::Validate && self.defers(sub.delivery, current) {
            self.enqueue(current, sub, event, false);
            return Ok(());
        }
        // One frame per delivery, taken on the validate pass.
        if phase == Phase::Validate {
            self.inner
                .dispatch
                .borrow_mut()
                .record(&event.object, event.slot, &sub.target)?;
        }
        self.deliver_now(phase, &sub.target, event, true).map(|_| ())
    }

    fn defers(&self, delivery: DeliveryMode, scope: ScopeId) -> bool {
        match delivery {
            DeliveryMode::Immediate => false,
            DeliveryMode::Queued => true,
            DeliveryMode::Sync => self
                .inner
                .contexts
                .borrow()
                .get(&scope)
                .is_some_and(BindingContext::in_batch),
        }
    }

    /// Hand one phase of `event` to `target`. With `apply == false` nothing
    /// changes; the result says whether the target would react.
    pub(crate) fn deliver_now(
        &self,
        phase: Phase,
        target: &ListenerTarget,
        event: &EventInfo,
        apply: bool,
    ) -> Result<bool, BindError> {
        match (target, phase) {
            (ListenerTarget::Node(n), Phase::Invalidate) => Ok(n.on_invalidated(self, event, apply)),
            (ListenerTarget::Node(n), Phase::Validate) => n.on_validated(self, event, apply),
            (ListenerTarget::Destination(_), Phase::Invalidate) => Ok(false),
            (ListenerTarget::Destination(root), Phase::Validate) => root.on_destination_validated(self, apply),
            (ListenerTarget::External(l), Phase::Invalidate) => l.value_invalidated(self, event, apply),
            (ListenerTarget::External(l), Phase::Validate) => l.value_validated(self, event, apply),
        }
    }

    fn enqueue(&self, scope: ScopeId, sub: &Subscription, event: &EventInfo, cross_scope: bool) {
        let queued = BindingEvent::new(event.clone(), sub.target.clone(), sub.priority, sub.delivery);
        let (stored, peers) = {
            let mut contexts = self.inner.contexts.borrow_mut();
            let ctx = contexts.entry(scope).or_default();
            if cross_scope {
                ctx.needs_flush = true;
            }
            let Some(stored) = ctx.queue_event(queued) else {
                return;
            };
            let peers = ctx.peers_of(stored.priority);
            (stored, peers)
        };
        self.link_dependencies(&stored, &peers);
        debug!(
            %scope,
            event = %event.location(),
            listener = %sub.target.describe(),
            priority = sub.priority,
            "queued"
        );
    }

    /// Order `event` against queued peers of the same priority: a binding
    /// that writes what another one reads goes first.
    fn link_dependencies(&self, event: &Rc<BindingEvent>, peers: &[Rc<BindingEvent>]) {
        let Some(root) = event.target.node().map(BindingNode::root_node) else {
            return;
        };
        let (reads, writes) = access_of(&root);
        for peer in peers.iter().filter(|p| !Rc::ptr_eq(p, event)) {
            let Some(peer_root) = peer.target.node().map(BindingNode::root_node) else {
                continue;
            };
            if Rc::ptr_eq(&peer_root, &root) {
                continue;
            }
            let (peer_reads, peer_writes) = access_of(&peer_root);
            if peer_writes.is_some_and(|w| reads.contains(&w)) {
                event.add_dependency(peer);
            } else if writes.is_some_and(|w| peer_reads.contains(&w)) && !event.depends_on(peer) {
                peer.add_dependency(event);
            }
        }
    }

    fn deliver_queued(&self, event: &BindingEvent) -> Result<(), BindError> {
        let kind = event.kind();
        self.inner
            .dispatch
            .borrow_mut()
            .record(&event.info.object, event.info.slot, &event.target)?;
        match (kind.has_invalidate(), kind.has_validate()) {
            (true, true) => match &event.target {
                ListenerTarget::External(l) => l.value_changed(self, &event.info, true).map(|_| ()),
                target => {
                    self.deliver_now(Phase::Invalidate, target, &event.info, true)?;
                    self.deliver_now(Phase::Validate, target, &event.info, true).map(|_| ())
                }
            },
            (true, false) => self.deliver_now(Phase::Invalidate, &event.target, &event.info, true).map(|_| ()),
            (false, true) => self.deliver_now(Phase::Validate, &event.target, &event.info, true).map(|_| ()),
            (false, false) => {
                if kind.contains(EventMask::VALUE_REQUESTED) {
                    self.deliver_requested(&event.target, &event.info)?;
                }
                Ok(())
            }
        }
    }

    fn deliver_run(&self, run: &[Rc<BindingEvent>]) -> Result<(), BindError> {
        for event in linearize(run) {
            self.deliver_queued(&event)?;
        }
        Ok(())
    }

    /// Deliver every event queued in `scope` that `filter` admits, highest
    /// priority first.
    pub fn flush_scope_filtered(&self, scope: ScopeId, filter: DeliveryFilter) -> Result<(), BindError> {
        self.run_detached(|| {
            loop {
                let run = match self.inner.contexts.borrow_mut().get_mut(&scope) {
                    Some(ctx) => ctx.take_run(filter),
                    None => Vec::new(),
                };
                if run.is_empty() {
                    break;
                }
                self.deliver_run(&run)?;
            }
            Ok(())
        })?;
        self.retire_context(scope);
        Ok(())
    }

    /// Deliver everything queued in `scope`.
    pub fn flush_scope(&self, scope: ScopeId) -> Result<(), BindError> {
        self.flush_scope_filtered(scope, DeliveryFilter::All)
    }

    /// Deliver everything queued in the current scope.
    pub fn flush(&self) -> Result<(), BindError> {
        self.flush_scope(self.current_scope())
    }

    fn retire_context(&self, scope: ScopeId) {
        let mut contexts = self.inner.contexts.borrow_mut();
        if let Some(ctx) = contexts.get_mut(&scope) {
            if ctx.is_empty() {
                ctx.needs_flush = false;
                if !ctx.in_batch() {
                    contexts.remove(&scope);
                }
            }
        }
    }

    /// Deliver, right now, whatever the current scope holds for the binding
    /// rooted at `root`.
    pub(crate) fn flush_for_root(&self, root: &Rc<BindingNode>) -> Result<(), BindError> {
        let scope = self.current_scope();
        let taken = match self.inner.contexts.borrow_mut().get_mut(&scope) {
            Some(ctx) => ctx.take_matching(|e| {
                e.target
                    .node()
                    .is_some_and(|n| Rc::ptr_eq(&BindingNode::root_node(n), root))
            }),
            None => return Ok(()),
        };
        if taken.is_empty() {
            return Ok(());
        }
        debug!(binding = %root.root_description(), events = taken.len(), "delivering on request");
        self.deliver_run(&taken)
    }

    /// Ask every listener of `property` whether a change there would alter
    /// its value, without changing anything.
    pub fn query_changed(&self, obj: &ObjectRef, property: &str) -> Result<bool, BindError> {
        let slot = obj
            .property_slot(property)
            .ok_or_else(|| BindError::unresolved_property(obj.type_name(), property))?;
        let event = EventInfo::new(EventMask::VALUE_VALIDATED, Rc::clone(obj), Some(slot), EventDetail::None);
        self.run_detached(|| {
            let mut any = false;
            for sub in self.registry().snapshot(obj, Some(slot), EventMask::VALUE_VALIDATED) {
                any |= self.deliver_now(Phase::Validate, &sub.target, &event, false)?;
            }
            Ok(any)
        })
    }

    /// Put an event straight into `scope`'s queue. It is delivered on the
    /// next flush of that scope.
    pub fn queue_event(&self, scope: ScopeId, sub: &Subscription, event: &EventInfo) {
        self.enqueue(scope, sub, event, scope != self.current_scope());
    }

    /// Events waiting in `scope`.
    #[must_use]
    pub fn queued_len(&self, scope: ScopeId) -> usize {
        self.inner.contexts.borrow().get(&scope).map_or(0, BindingContext::len)
    }

    /// Scopes that received events from elsewhere and should be flushed by
    /// their owner.
    #[must_use]
    pub fn pending_scopes(&self) -> Vec<ScopeId> {
        let mut scopes: Vec<ScopeId> = self
            .inner
            .contexts
            .borrow()
            .iter()
            .filter(|(_, ctx)| ctx.needs_flush && !ctx.is_empty())
            .map(|(scope, _)| *scope)
            .collect();
        scopes.sort();
        scopes
    }

    /// Priorities waiting in `scope`, front of the queue first.
    #[must_use]
    pub fn queued_priorities(&self, scope: ScopeId) -> Vec<i32> {
        self.inner
            .contexts
            .borrow()
            .get(&scope)
            .map(BindingContext::priorities)
            .unwrap_or_default()
    }
}

fn access_of(root: &Rc<BindingNode>) -> (Vec<AccessKey>, Option<AccessKey>) {
    let mut reads = Vec::new();
    root.collect_reads(&mut reads);
    (reads, root.write_key())
}
