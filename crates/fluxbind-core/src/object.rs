#![forbid(unsafe_code)]

//! Host object contract.
//!
//! The engine never owns host objects. It reaches them through
//! [`BindableObject`], which maps property names to stable small integer
//! slots and reads/writes values by slot.
//!
//! # Invariants
//!
//! 1. **Slot stability**: for a given object, `property_slot(name)` returns
//!    the same slot for the lifetime of the object. Objects sharing a
//!    [`Shape`] agree on every slot.
//! 2. **Identity, not equality**: objects are keyed by [`ObjectId`] (the
//!    allocation address of the `Rc`), never by value.
//! 3. **Embedded storage is opaque**: [`ListenerStorage`] belongs to the
//!    engine. Hosts only allocate it.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Unknown property | name not in shape | `property_slot` returns `None` |
//! | Read-only write | shape marks slot read-only | `BindError::PropertyAccess` |
//! | Slot out of range | stale slot | `BindError::PropertyAccess` |

use std::any::Any;
use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;

use crate::error::BindError;
use crate::list::ObservableList;
use crate::value::Value;

/// Shared handle to a host object.
pub type ObjectRef = Rc<dyn BindableObject>;

/// Non-owning handle to a host object.
pub type WeakObjectRef = Weak<dyn BindableObject>;

/// Identity of a host object: the address of its shared allocation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(usize);

impl ObjectId {
    /// Identity of `obj`.
    #[must_use]
    pub fn of(obj: &ObjectRef) -> Self {
        Self(Rc::as_ptr(obj).cast::<()>() as usize)
    }

    /// Raw address, for diagnostics only.
    #[must_use]
    pub fn raw(self) -> usize {
        self.0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({:#x})", self.0)
    }
}

/// Engine-owned subscription storage embedded in a host object.
///
/// Objects that carry one opt in to the embedded registry representation;
/// everything else is tracked in the engine's identity-keyed side table.
#[derive(Default)]
pub struct ListenerStorage {
    slot: RefCell<Option<Box<dyn Any>>>,
}

impl ListenerStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the stored table, creating it on first use.
    ///
    /// If a table of a different type was installed, it is replaced.
    pub fn with_mut<T: Default + 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut slot = self.slot.borrow_mut();
        let boxed = slot.get_or_insert_with(|| Box::new(T::default()) as Box<dyn Any>);
        if !boxed.is::<T>() {
            *boxed = Box::new(T::default());
        }
        match boxed.downcast_mut::<T>() {
            Some(table) => f(table),
            None => f(&mut T::default()),
        }
    }

    /// Whether the engine has stored anything yet.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Drop whatever the engine stored.
    pub fn clear(&self) {
        self.slot.borrow_mut().take();
    }
}

impl fmt::Debug for ListenerStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerStorage")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// The property-accessor abstraction the engine consumes.
pub trait BindableObject: 'static {
    /// Runtime type name, used in diagnostics.
    fn type_name(&self) -> &str;

    /// Stable slot for `name`, or `None` if the object has no such property.
    fn property_slot(&self, name: &str) -> Option<usize>;

    /// Name of the property at `slot`.
    fn property_name(&self, slot: usize) -> Option<Rc<str>>;

    /// Read the property at `slot`.
    fn get_slot(&self, slot: usize) -> Result<Value, BindError>;

    /// Write the property at `slot`. Must not send change events; the engine
    /// does that after a successful write.
    fn set_slot(&self, slot: usize, value: Value) -> Result<(), BindError>;

    /// Create a property on a dynamically-shaped object.
    fn define_property(&self, _name: &str) -> Option<usize> {
        None
    }

    /// Embedded subscription storage, for objects that opt in.
    fn listener_storage(&self) -> Option<&ListenerStorage> {
        None
    }

    /// List view for array-valued objects.
    fn as_list(&self) -> Option<&ObservableList> {
        None
    }
}

/// Read a property by name.
pub fn get_property(obj: &ObjectRef, name: &str) -> Result<Value, BindError> {
    let slot = obj
        .property_slot(name)
        .ok_or_else(|| BindError::unresolved_property(obj.type_name(), name))?;
    obj.get_slot(slot)
}

/// Display name of `slot` on `obj`, falling back to `#slot`.
#[must_use]
pub fn slot_label(obj: &ObjectRef, slot: usize) -> String {
    obj.property_name(slot)
        .map_or_else(|| format!("#{slot}"), |name| name.to_string())
}

// ---------------------------------------------------------------------------
// Shape
// ---------------------------------------------------------------------------

/// Property layout shared by all objects of one runtime type.
///
/// A *fixed* shape rejects unknown names; a *dynamic* shape interns them on
/// first definition so every object sharing it agrees on the slot.
pub struct Shape {
    name: Rc<str>,
    dynamic: bool,
    inner: RefCell<ShapeInner>,
}

#[derive(Default)]
struct ShapeInner {
    names: Vec<Rc<str>>,
    read_only: Vec<bool>,
    index: AHashMap<Rc<str>, usize>,
}

impl Shape {
    /// A fixed shape with the given properties.
    #[must_use]
    pub fn fixed<'a>(name: &str, props: impl IntoIterator<Item = &'a str>) -> Rc<Self> {
        let shape = Self {
            name: Rc::from(name),
            dynamic: false,
            inner: RefCell::new(ShapeInner::default()),
        };
        for prop in props {
            shape.intern(prop, false);
        }
        Rc::new(shape)
    }

    /// A dynamic shape that grows as properties are defined.
    #[must_use]
    pub fn dynamic(name: &str) -> Rc<Self> {
        Rc::new(Self {
            name: Rc::from(name),
            dynamic: true,
            inner: RefCell::new(ShapeInner::default()),
        })
    }

    /// Add a read-only property to a fixed shape under construction.
    #[must_use]
    pub fn with_read_only(self: Rc<Self>, prop: &str) -> Rc<Self> {
        self.intern(prop, true);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.inner.borrow().index.get(name).copied()
    }

    #[must_use]
    pub fn name_of(&self, slot: usize) -> Option<Rc<str>> {
        self.inner.borrow().names.get(slot).cloned()
    }

    #[must_use]
    pub fn is_read_only(&self, slot: usize) -> bool {
        self.inner.borrow().read_only.get(slot).copied().unwrap_or(false)
    }

    fn intern(&self, name: &str, read_only: bool) -> usize {
        let mut inner = self.inner.borrow_mut();
        if let Some(&slot) = inner.index.get(name) {
            return slot;
        }
        let slot = inner.names.len();
        let name: Rc<str> = Rc::from(name);
        inner.names.push(Rc::clone(&name));
        inner.read_only.push(read_only);
        inner.index.insert(name, slot);
        slot
    }

    fn define(&self, name: &str) -> Option<usize> {
        match self.slot_of(name) {
            Some(slot) => Some(slot),
            None if self.dynamic => Some(self.intern(name, false)),
            None => None,
        }
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Shape")
            .field("name", &self.name)
            .field("dynamic", &self.dynamic)
            .field("props", &inner.names)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PropertyBag
// ---------------------------------------------------------------------------

/// A general-purpose host object: a value per shape slot.
///
/// Bags created with [`PropertyBag::with_embedded_listeners`] carry their own
/// subscription storage; all others live in the engine's side table.
pub struct PropertyBag {
    shape: Rc<Shape>,
    values: RefCell<Vec<Value>>,
    storage: Option<ListenerStorage>,
}

impl PropertyBag {
    /// New bag over `shape`, tracked in the side table.
    #[must_use]
    pub fn new(shape: &Rc<Shape>) -> Rc<Self> {
        Rc::new(Self {
            shape: Rc::clone(shape),
            values: RefCell::new(vec![Value::Null; shape.len()]),
            storage: None,
        })
    }

    /// New bag over `shape` with embedded subscription storage.
    #[must_use]
    pub fn with_embedded_listeners(shape: &Rc<Shape>) -> Rc<Self> {
        Rc::new(Self {
            shape: Rc::clone(shape),
            values: RefCell::new(vec![Value::Null; shape.len()]),
            storage: Some(ListenerStorage::new()),
        })
    }

    /// New bag with its own dynamic shape.
    #[must_use]
    pub fn dynamic(type_name: &str) -> Rc<Self> {
        Self::new(&Shape::dynamic(type_name))
    }

    #[must_use]
    pub fn shape(&self) -> &Rc<Shape> {
        &self.shape
    }

    /// Read a property by name. Unknown names read as `Null`.
    #[must_use]
    pub fn get(&self, name: &str) -> Value {
        self.shape
            .slot_of(name)
            .and_then(|slot| self.values.borrow().get(slot).cloned())
            .unwrap_or(Value::Null)
    }

    /// Write a property by name without notifying anyone. Defines the
    /// property on dynamic shapes. Returns `false` if the name is unknown.
    pub fn set_raw(&self, name: &str, value: impl Into<Value>) -> bool {
        let Some(slot) = self.shape.define(name) else {
            return false;
        };
        let mut values = self.values.borrow_mut();
        if values.len() <= slot {
            values.resize(slot + 1, Value::Null);
        }
        values[slot] = value.into();
        true
    }

    /// Builder-style [`set_raw`](Self::set_raw).
    #[must_use]
    pub fn with(self: Rc<Self>, name: &str, value: impl Into<Value>) -> Rc<Self> {
        self.set_raw(name, value);
        self
    }

    /// Borrow all values in slot order.
    pub fn values(&self) -> Ref<'_, Vec<Value>> {
        self.values.borrow()
    }
}

impl BindableObject for PropertyBag {
    fn type_name(&self) -> &str {
        self.shape.name()
    }

    fn property_slot(&self, name: &str) -> Option<usize> {
        self.shape.slot_of(name)
    }

    fn property_name(&self, slot: usize) -> Option<Rc<str>> {
        self.shape.name_of(slot)
    }

    fn get_slot(&self, slot: usize) -> Result<Value, BindError> {
        if slot >= self.shape.len() {
            return Err(BindError::PropertyAccess {
                type_name: self.shape.name().to_string(),
                property: format!("#{slot}"),
                reason: "slot out of range".to_string(),
            });
        }
        Ok(self.values.borrow().get(slot).cloned().unwrap_or(Value::Null))
    }

    fn set_slot(&self, slot: usize, value: Value) -> Result<(), BindError> {
        let property = || {
            self.shape
                .name_of(slot)
                .map_or_else(|| format!("#{slot}"), |n| n.to_string())
        };
        if slot >= self.shape.len() {
            return Err(BindError::PropertyAccess {
                type_name: self.shape.name().to_string(),
                property: property(),
                reason: "slot out of range".to_string(),
            });
        }
        if self.shape.is_read_only(slot) {
            return Err(BindError::PropertyAccess {
                type_name: self.shape.name().to_string(),
                property: property(),
                reason: "property is read-only".to_string(),
            });
        }
        let mut values = self.values.borrow_mut();
        if values.len() <= slot {
            values.resize(slot + 1, Value::Null);
        }
        values[slot] = value;
        Ok(())
    }

    fn define_property(&self, name: &str) -> Option<usize> {
        self.shape.define(name)
    }

    fn listener_storage(&self) -> Option<&ListenerStorage> {
        self.storage.as_ref()
    }
}

impl fmt::Debug for PropertyBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self.values.borrow();
        let mut map = f.debug_map();
        for (slot, value) in values.iter().enumerate() {
            let name = self.shape.name_of(slot);
            map.entry(&name.as_deref().unwrap_or("?"), value);
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_shape_agrees_on_slots() {
        let shape = Shape::fixed("Point", ["x", "y"]);
        let a = PropertyBag::new(&shape);
        let b = PropertyBag::new(&shape);
        assert_eq!(a.property_slot("y"), Some(1));
        assert_eq!(a.property_slot("y"), b.property_slot("y"));
        assert_eq!(a.property_slot("z"), None);
    }

    #[test]
    fn dynamic_shape_interns_on_define() {
        let bag = PropertyBag::dynamic("Any");
        assert!(bag.set_raw("first", 1));
        assert!(bag.set_raw("second", 2));
        assert_eq!(bag.property_slot("second"), Some(1));
        assert_eq!(bag.get("first"), Value::Int(1));
    }

    #[test]
    fn fixed_shape_rejects_unknown_names() {
        let shape = Shape::fixed("Point", ["x"]);
        let bag = PropertyBag::new(&shape);
        assert!(!bag.set_raw("nope", 1));
        assert_eq!(bag.define_property("nope"), None);
    }

    #[test]
    fn read_only_slot_refuses_writes() {
        let shape = Shape::fixed("Counter", ["value"]).with_read_only("id");
        let bag = PropertyBag::new(&shape);
        let slot = bag.property_slot("id").unwrap();
        let err = bag.set_slot(slot, Value::Int(1)).unwrap_err();
        assert!(err.to_string().contains("read-only"));
    }

    #[test]
    fn object_identity_is_per_allocation() {
        let a: ObjectRef = PropertyBag::dynamic("A");
        let a2 = Rc::clone(&a);
        let b: ObjectRef = PropertyBag::dynamic("A");
        assert_eq!(ObjectId::of(&a), ObjectId::of(&a2));
        assert_ne!(ObjectId::of(&a), ObjectId::of(&b));
    }

    #[test]
    fn listener_storage_initializes_lazily() {
        let storage = ListenerStorage::new();
        assert!(!storage.is_initialized());
        storage.with_mut::<Vec<u32>, _>(|v| v.push(7));
        let len = storage.with_mut::<Vec<u32>, _>(|v| v.len());
        assert_eq!(len, 1);
        storage.clear();
        assert!(!storage.is_initialized());
    }

    #[test]
    fn get_property_reports_unknown_name() {
        let obj: ObjectRef = PropertyBag::dynamic("Thing");
        let err = get_property(&obj, "missing").unwrap_err();
        assert!(matches!(err, BindError::UnresolvedProperty { .. }));
    }
}
