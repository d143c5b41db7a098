#![forbid(unsafe_code)]

//! Indexed access: `source[i][j]`.
//!
//! Each dimension is one level `(list, index)`. Levels subscribe at object
//! level on their list, so they hear both element writes and size changes.
//! An element event at the last level for the watched index takes a fast
//! path: the element is re-read without re-evaluating the source or the
//! index expressions.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use fluxbind_core::{BindError, EventMask, ObjectId, ObjectRef, Value};

use super::{AccessKey, BindingNode};
use crate::engine::Engine;
use crate::event::{EventDetail, EventInfo};

#[derive(Clone)]
struct Level {
    list: ObjectRef,
    index: usize,
    subscribed: bool,
}

enum Indices {
    Ready(Vec<usize>),
    Pending,
    Invalid,
}

pub(crate) struct ArrayBinding {
    pub(crate) source: Rc<BindingNode>,
    pub(crate) dims: Vec<Rc<BindingNode>>,
    levels: RefCell<Vec<Level>>,
}

impl ArrayBinding {
    pub(crate) fn new(source: Rc<BindingNode>, dims: Vec<Rc<BindingNode>>) -> Self {
        Self {
            source,
            dims,
            levels: RefCell::new(Vec::new()),
        }
    }

    pub(super) fn slots(&self) -> Vec<(usize, Rc<BindingNode>)> {
        std::iter::once(Rc::clone(&self.source))
            .chain(self.dims.iter().cloned())
            .enumerate()
            .collect()
    }

    fn indices(&self, engine: &Engine) -> Result<Indices, BindError> {
        let mut out = Vec::with_capacity(self.dims.len());
        for dim in &self.dims {
            match dim.get_value(engine)? {
                Value::Pending => return Ok(Indices::Pending),
                Value::Int(i) if i >= 0 => out.push(i as usize),
                Value::Int(i) => {
                    engine.report(BindError::InvalidIndex { index: i, len: 0 });
                    return Ok(Indices::Invalid);
                }
                Value::Unset | Value::Null => return Ok(Indices::Invalid),
                other => {
                    engine.report(BindError::type_mismatch(
                        "int",
                        other.value_type().map_or_else(|| "unset".to_string(), |t| t.to_string()),
                    ));
                    return Ok(Indices::Invalid);
                }
            }
        }
        Ok(Indices::Ready(out))
    }

    /// Index into `cur` once per entry of `indices`, appending levels.
    fn descend(engine: &Engine, mut cur: Value, indices: &[usize], levels: &mut Vec<Level>) -> Value {
        for &index in indices {
            let list = match &cur {
                Value::Object(obj) if obj.as_list().is_some() => Rc::clone(obj),
                Value::Pending => return Value::Pending,
                Value::Null | Value::Unset => return Value::Unset,
                other => {
                    engine.report(BindError::type_mismatch(
                        "list",
                        other.value_type().map_or_else(|| "unset".to_string(), |t| t.to_string()),
                    ));
                    return Value::Unset;
                }
            };
            let element = list.as_list().and_then(|l| l.get(index));
            levels.push(Level {
                list: Rc::clone(&list),
                index,
                subscribed: false,
            });
            cur = match element {
                Some(v) => v,
                None => {
                    let len = list.as_list().map_or(0, |l| l.len());
                    engine.report(BindError::InvalidIndex {
                        index: index as i64,
                        len,
                    });
                    return Value::Unset;
                }
            };
        }
        cur
    }

    pub(super) fn evaluate(&self, node: &Rc<BindingNode>, engine: &Engine) -> Result<Value, BindError> {
        let base = self.source.get_value(engine)?;
        let mut fresh = Vec::new();
        let value = match self.indices(engine)? {
            Indices::Ready(idx) => Self::descend(engine, base, &idx, &mut fresh),
            Indices::Pending => Value::Pending,
            Indices::Invalid => Value::Unset,
        };
        self.sync_levels(node, engine, fresh);
        Ok(value)
    }

    pub(super) fn accepts(&self, event: &EventInfo) -> bool {
        if !event.is_element_event() {
            return true;
        }
        let id = ObjectId::of(&event.object);
        let levels = self.levels.borrow();
        match event.detail {
            EventDetail::Index(i) => levels
                .iter()
                .any(|l| ObjectId::of(&l.list) == id && l.index == i),
            _ => true,
        }
    }

    pub(super) fn evaluate_after(
        &self,
        node: &Rc<BindingNode>,
        engine: &Engine,
        event: &EventInfo,
    ) -> Result<Value, BindError> {
        let id = ObjectId::of(&event.object);
        let levels = self.levels.borrow().clone();
        let Some(k) = levels.iter().position(|l| ObjectId::of(&l.list) == id) else {
            return self.evaluate(node, engine);
        };
        let last = k + 1 == levels.len() && levels.len() == self.dims.len();
        if last && event.is_element_event() {
            if let EventDetail::Index(i) = event.detail {
                if i == levels[k].index {
                    let list = &levels[k].list;
                    return Ok(list.as_list().and_then(|l| l.get(i)).unwrap_or(Value::Unset));
                }
            }
        }
        let Indices::Ready(idx) = self.indices(engine)? else {
            return self.evaluate(node, engine);
        };
        let mut fresh = levels[..k].to_vec();
        let value = Self::descend(engine, Value::Object(Rc::clone(&levels[k].list)), &idx[k..], &mut fresh);
        self.sync_levels(node, engine, fresh);
        Ok(value)
    }

    pub(super) fn peek(&self, engine: &Engine) -> Result<Value, BindError> {
        let base = self.source.get_value(engine)?;
        let mut scratch = Vec::new();
        Ok(match self.indices(engine)? {
            Indices::Ready(idx) => Self::descend(engine, base, &idx, &mut scratch),
            Indices::Pending => Value::Pending,
            Indices::Invalid => Value::Unset,
        })
    }

    fn sync_levels(&self, node: &Rc<BindingNode>, engine: &Engine, mut fresh: Vec<Level>) {
        let listening = node.is_listening();
        let old = std::mem::take(&mut *self.levels.borrow_mut());
        let mut drop_subs = Vec::new();
        let mut add_subs = Vec::new();
        for i in 0..old.len().max(fresh.len()) {
            let prev = old.get(i).filter(|l| l.subscribed);
            let keep = listening
                && match (prev, fresh.get(i)) {
                    (Some(p), Some(n)) => Rc::ptr_eq(&p.list, &n.list),
                    _ => false,
                };
            if let Some(n) = fresh.get_mut(i) {
                n.subscribed = keep;
            }
            if keep {
                continue;
            }
            if let Some(p) = prev {
                drop_subs.push(Rc::clone(&p.list));
            }
            if let Some(n) = fresh.get_mut(i).filter(|_| listening) {
                n.subscribed = true;
                add_subs.push(Rc::clone(&n.list));
            }
        }
        *self.levels.borrow_mut() = fresh;
        for list in drop_subs {
            node.unlisten(engine, &list, None, EventMask::ALL_CHANGES);
        }
        for list in add_subs {
            node.listen(engine, &list, None, EventMask::ALL_CHANGES);
        }
    }

    pub(super) fn release(&self, node: &Rc<BindingNode>, engine: &Engine) {
        let levels = std::mem::take(&mut *self.levels.borrow_mut());
        for level in levels.into_iter().filter(|l| l.subscribed) {
            node.unlisten(engine, &level.list, None, EventMask::ALL_CHANGES);
        }
    }

    pub(super) fn collect_reads(&self, out: &mut Vec<AccessKey>) {
        out.extend(
            self.levels
                .borrow()
                .iter()
                .filter(|l| l.subscribed)
                .map(|l| (ObjectId::of(&l.list), None)),
        );
    }

    /// Write the addressed element.
    pub(super) fn apply_reverse(&self, node: &Rc<BindingNode>, engine: &Engine, value: &Value) -> Result<(), BindError> {
        let base = self.source.get_value(engine)?;
        let idx = match self.indices(engine)? {
            Indices::Ready(idx) => idx,
            Indices::Pending => return Ok(()),
            Indices::Invalid => {
                return Err(BindError::evaluation(node.to_string(), "index is not a valid integer"));
            }
        };
        let Some((&last, init)) = idx.split_last() else {
            return Err(BindError::unsupported_reverse(node.to_string(), "no index to assign"));
        };
        let mut scratch = Vec::new();
        match Self::descend(engine, base, init, &mut scratch) {
            Value::Object(list) if list.as_list().is_some() => {
                engine.set_element(&list, last, value.clone().or_null())?;
                Ok(())
            }
            Value::Pending => Ok(()),
            _ => Err(BindError::evaluation(node.to_string(), "cannot assign into a non-list")),
        }
    }

    pub(super) fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        super::fmt_operand(&self.source, f)?;
        for d in &self.dims {
            write!(f, "[{d}]")?;
        }
        Ok(())
    }
}
