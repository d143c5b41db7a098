#![forbid(unsafe_code)]

//! Array-valued host objects.
//!
//! An [`ObservableList`] is a [`BindableObject`] with one read-only property,
//! `size`, plus indexed elements. Element writes are reported by the engine
//! as array-element events on the list's object-level listeners, carrying
//! the index as event detail.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::BindError;
use crate::object::{BindableObject, ListenerStorage};
use crate::value::Value;

/// Slot of the `size` property.
pub const SIZE_SLOT: usize = 0;

/// A shared, indexable list of values with embedded subscription storage.
pub struct ObservableList {
    items: RefCell<Vec<Value>>,
    storage: ListenerStorage,
}

impl ObservableList {
    /// Create a list holding `items`.
    #[must_use]
    pub fn new(items: Vec<Value>) -> Rc<Self> {
        Rc::new(Self {
            items: RefCell::new(items),
            storage: ListenerStorage::new(),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    /// Element at `index`, or `None` when out of range.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.borrow().get(index).cloned()
    }

    /// Replace the element at `index`, returning the previous value.
    pub fn set(&self, index: usize, value: Value) -> Result<Value, BindError> {
        let mut items = self.items.borrow_mut();
        let len = items.len();
        match items.get_mut(index) {
            Some(slot) => Ok(std::mem::replace(slot, value)),
            None => Err(BindError::InvalidIndex { index: index as i64, len }),
        }
    }

    pub fn push(&self, value: Value) {
        self.items.borrow_mut().push(value);
    }

    pub fn remove(&self, index: usize) -> Result<Value, BindError> {
        let mut items = self.items.borrow_mut();
        if index >= items.len() {
            return Err(BindError::InvalidIndex {
                index: index as i64,
                len: items.len(),
            });
        }
        Ok(items.remove(index))
    }

    /// Clone of all elements.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Value> {
        self.items.borrow().clone()
    }

    /// Element-wise equality using [`Value::equals`].
    #[must_use]
    pub fn content_equals(&self, other: &ObservableList) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let a = self.items.borrow();
        let b = other.items.borrow();
        a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
    }
}

impl BindableObject for ObservableList {
    fn type_name(&self) -> &str {
        "List"
    }

    fn property_slot(&self, name: &str) -> Option<usize> {
        (name == "size").then_some(SIZE_SLOT)
    }

    fn property_name(&self, slot: usize) -> Option<Rc<str>> {
        (slot == SIZE_SLOT).then(|| Rc::from("size"))
    }

    fn get_slot(&self, slot: usize) -> Result<Value, BindError> {
        if slot == SIZE_SLOT {
            Ok(Value::Int(self.len() as i64))
        } else {
            Err(BindError::PropertyAccess {
                type_name: "List".to_string(),
                property: format!("#{slot}"),
                reason: "slot out of range".to_string(),
            })
        }
    }

    fn set_slot(&self, _slot: usize, _value: Value) -> Result<(), BindError> {
        Err(BindError::PropertyAccess {
            type_name: "List".to_string(),
            property: "size".to_string(),
            reason: "property is read-only".to_string(),
        })
    }

    fn listener_storage(&self) -> Option<&ListenerStorage> {
        Some(&self.storage)
    }

    fn as_list(&self) -> Option<&ObservableList> {
        Some(self)
    }
}

impl fmt::Debug for ObservableList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.borrow().iter()).finish()
    }
}
