#![forbid(unsafe_code)]

//! Per-object, per-property subscription storage.
//!
//! Every observed object owns a [`SlotTable`]: list 0 holds object-level
//! subscriptions, list `slot + 1` holds subscriptions to property `slot`.
//! Objects that expose a [`ListenerStorage`](fluxbind_core::ListenerStorage)
//! keep their table inline; all other objects are tracked in a side table
//! keyed by object identity, which holds only a weak reference to the object.
//!
//! # Invariants
//!
//! 1. Each list is ordered by priority (descending), then by insertion
//!    sequence (ascending).
//! 2. A listener/mask pair appears at most once per list; re-adding it
//!    replaces the earlier subscription.
//! 3. Side-table entries whose object has been dropped are never returned.
//!    A new object that reuses a dead object's address starts empty.
//! 4. Dispatch iterates a snapshot, so listeners may subscribe or
//!    unsubscribe during delivery.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use fluxbind_core::{BindError, DeliveryMode, EventMask, ObjectId, ObjectRef, WeakObjectRef};
use fluxbind_core::object::slot_label;

use crate::binding::BindingNode;
use crate::context::ScopeId;
use crate::event::BindingListener;

/// Who receives an event.
#[derive(Clone)]
pub enum ListenerTarget {
    /// An interior or root expression node observing a source.
    Node(Rc<BindingNode>),
    /// A root observing its own destination (reverse trigger, value requests).
    Destination(Rc<BindingNode>),
    /// Host code.
    External(Rc<dyn BindingListener>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Role {
    Node,
    Destination,
    External,
}

/// Identity of a listener: the allocation plus the role it listens in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId {
    addr: usize,
    role: Role,
}

impl ListenerTarget {
    #[must_use]
    pub fn id(&self) -> ListenerId {
        match self {
            Self::Node(n) => ListenerId {
                addr: Rc::as_ptr(n) as usize,
                role: Role::Node,
            },
            Self::Destination(n) => ListenerId {
                addr: Rc::as_ptr(n) as usize,
                role: Role::Destination,
            },
            Self::External(l) => ListenerId {
                addr: Rc::as_ptr(l).cast::<()>() as usize,
                role: Role::External,
            },
        }
    }

    /// The expression node behind this target, if any.
    #[must_use]
    pub fn node(&self) -> Option<&Rc<BindingNode>> {
        match self {
            Self::Node(n) | Self::Destination(n) => Some(n),
            Self::External(_) => None,
        }
    }

    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Node(n) => n.to_string(),
            Self::Destination(n) => format!("destination of {}", n.root_description()),
            Self::External(l) => l.describe(),
        }
    }
}

impl fmt::Debug for ListenerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// A stored subscription.
#[derive(Clone, Debug)]
pub struct Subscription {
    pub(crate) seq: u64,
    pub target: ListenerTarget,
    pub mask: EventMask,
    pub priority: i32,
    pub delivery: DeliveryMode,
    /// Scope that owns the listener; `None` means "whoever is current".
    pub scope: Option<ScopeId>,
}

impl Subscription {
    #[must_use]
    pub fn new(target: ListenerTarget, mask: EventMask) -> Self {
        Self {
            seq: 0,
            target,
            mask,
            priority: 0,
            delivery: DeliveryMode::Sync,
            scope: None,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: Option<ScopeId>) -> Self {
        self.scope = scope;
        self
    }

    fn order_key(&self) -> (std::cmp::Reverse<i32>, u64) {
        (std::cmp::Reverse(self.priority), self.seq)
    }
}

/// Priority-ordered subscriptions of one property (or of the object itself).
#[derive(Default, Debug)]
struct ListenerList {
    entries: Vec<Subscription>,
}

impl ListenerList {
    fn insert(&mut self, sub: Subscription) {
        let id = sub.target.id();
        self.entries.retain(|s| !(s.target.id() == id && s.mask == sub.mask));
        let key = sub.order_key();
        let at = self.entries.partition_point(|s| s.order_key() <= key);
        self.entries.insert(at, sub);
    }

    fn remove(&mut self, id: ListenerId, mask: EventMask) -> Option<Subscription> {
        let pos = self
            .entries
            .iter()
            .position(|s| s.target.id() == id && s.mask == mask)?;
        Some(self.entries.remove(pos))
    }
}

/// All subscriptions of one object.
#[derive(Default, Debug)]
pub struct SlotTable {
    lists: Vec<ListenerList>,
}

impl SlotTable {
    fn index(slot: Option<usize>) -> usize {
        slot.map_or(0, |s| s + 1)
    }

    fn list_mut(&mut self, slot: Option<usize>) -> &mut ListenerList {
        let idx = Self::index(slot);
        if self.lists.len() <= idx {
            self.lists.resize_with(idx + 1, ListenerList::default);
        }
        &mut self.lists[idx]
    }

    fn list(&self, slot: Option<usize>) -> Option<&ListenerList> {
        self.lists.get(Self::index(slot))
    }

    fn is_empty(&self) -> bool {
        self.lists.iter().all(|l| l.entries.is_empty())
    }

    fn total(&self) -> usize {
        self.lists.iter().map(|l| l.entries.len()).sum()
    }
}

struct SideEntry {
    object: WeakObjectRef,
    table: SlotTable,
}

impl SideEntry {
    fn is_for(&self, id: ObjectId) -> bool {
        self.object
            .upgrade()
            .is_some_and(|obj| ObjectId::of(&obj) == id)
    }
}

/// The subscription registry.
#[derive(Default)]
pub struct Registry {
    side: RefCell<AHashMap<ObjectId, SideEntry>>,
    seq: Cell<u64>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_table<R>(&self, obj: &ObjectRef, create: bool, f: impl FnOnce(&mut SlotTable) -> R) -> Option<R> {
        if let Some(storage) = obj.listener_storage() {
            if !create && !storage.is_initialized() {
                return None;
            }
            return Some(storage.with_mut::<SlotTable, R>(f));
        }
        let id = ObjectId::of(obj);
        let mut side = self.side.borrow_mut();
        let live = side.get(&id).is_some_and(|e| e.is_for(id));
        if !live {
            // Missing, or left behind by a dropped object at the same address.
            side.remove(&id);
            if !create {
                return None;
            }
            side.insert(
                id,
                SideEntry {
                    object: Rc::downgrade(obj),
                    table: SlotTable::default(),
                },
            );
        }
        side.get_mut(&id).map(|e| f(&mut e.table))
    }

    /// Store `sub` on `(obj, slot)`, assigning its insertion sequence.
    pub fn add(&self, obj: &ObjectRef, slot: Option<usize>, mut sub: Subscription) {
        let seq = self.seq.get() + 1;
        self.seq.set(seq);
        sub.seq = seq;
        self.with_table(obj, true, |table| table.list_mut(slot).insert(sub));
    }

    /// Remove the subscription of `target` with exactly `mask`.
    pub fn remove(
        &self,
        obj: &ObjectRef,
        slot: Option<usize>,
        target: &ListenerTarget,
        mask: EventMask,
    ) -> Result<Subscription, BindError> {
        let id = target.id();
        self.with_table(obj, false, |table| table.list_mut(slot).remove(id, mask))
            .flatten()
            .ok_or_else(|| BindError::ListenerNotFound {
                object: obj.type_name().to_string(),
                property: slot.map_or_else(|| "*".to_string(), |s| slot_label(obj, s)),
                listener: target.describe(),
            })
    }

    /// Whether `target` is subscribed on `(obj, slot)` with `mask`.
    #[must_use]
    pub fn contains(&self, obj: &ObjectRef, slot: Option<usize>, target: &ListenerTarget, mask: EventMask) -> bool {
        let id = target.id();
        self.with_table(obj, false, |table| {
            table
                .list(slot)
                .is_some_and(|l| l.entries.iter().any(|s| s.target.id() == id && s.mask == mask))
        })
        .unwrap_or(false)
    }

    /// Subscriptions interested in `kind` on `(obj, slot)`, merged with the
    /// object-level list and ordered by priority then insertion.
    #[must_use]
    pub fn snapshot(&self, obj: &ObjectRef, slot: Option<usize>, kind: EventMask) -> Vec<Subscription> {
        self.with_table(obj, false, |table| {
            let mut out: Vec<Subscription> = Vec::new();
            let mut take = |list: Option<&ListenerList>| {
                if let Some(list) = list {
                    out.extend(list.entries.iter().filter(|s| s.mask.intersects(kind)).cloned());
                }
            };
            take(table.list(slot));
            if slot.is_some() {
                take(table.list(None));
            }
            out.sort_by_key(Subscription::order_key);
            out
        })
        .unwrap_or_default()
    }

    /// Number of subscriptions on `(obj, slot)`.
    #[must_use]
    pub fn count(&self, obj: &ObjectRef, slot: Option<usize>) -> usize {
        self.with_table(obj, false, |table| table.list(slot).map_or(0, |l| l.entries.len()))
            .unwrap_or(0)
    }

    /// Number of subscriptions on `obj` across all slots.
    #[must_use]
    pub fn total_for(&self, obj: &ObjectRef) -> usize {
        self.with_table(obj, false, |table| table.total()).unwrap_or(0)
    }

    /// Drop side-table entries whose object is gone or whose lists are all
    /// empty. Returns how many entries were removed.
    pub fn prune(&self) -> usize {
        let mut side = self.side.borrow_mut();
        let before = side.len();
        side.retain(|id, entry| entry.is_for(*id) && !entry.table.is_empty());
        before - side.len()
    }

    /// Number of objects tracked in the side table.
    #[must_use]
    pub fn side_table_len(&self) -> usize {
        self.side.borrow().len()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("side_table", &self.side.borrow().len())
            .field("seq", &self.seq.get())
            .finish()
    }
}
