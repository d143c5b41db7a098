#![forbid(unsafe_code)]

//! Property paths: `root.a.b.c` with a fixed root object (variable) or a
//! computed root (selector).
//!
//! Each step of the path is a link `(holder, slot, value)`. A forward path
//! subscribes to every link's `(holder, slot)`. When a link fires, only the
//! links after it are re-read, and only links whose holder changed identity
//! are re-subscribed.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use fluxbind_core::{BindError, EventMask, ObjectId, ObjectRef, Value};

use super::{AccessKey, BindingNode};
use crate::engine::Engine;
use crate::event::EventInfo;

pub(crate) enum PathRoot {
    /// A host value, usually an object, with the label used in display.
    Fixed { value: Value, label: Rc<str> },
    /// A sub-expression (slot 0).
    Expr(Rc<BindingNode>),
}

#[derive(Clone, Default)]
struct Link {
    holder: Option<ObjectRef>,
    slot: Option<usize>,
    subscribed: bool,
}

impl Link {
    fn key(&self) -> Option<(ObjectId, usize)> {
        Some((ObjectId::of(self.holder.as_ref()?), self.slot?))
    }
}

pub(crate) struct PathBinding {
    pub(crate) root: PathRoot,
    pub(crate) props: Vec<Rc<str>>,
    links: RefCell<Vec<Link>>,
}

impl PathBinding {
    pub(crate) fn new(root: PathRoot, props: Vec<Rc<str>>) -> Self {
        Self {
            root,
            props,
            links: RefCell::new(Vec::new()),
        }
    }

    pub(super) fn slots(&self) -> Vec<(usize, Rc<BindingNode>)> {
        match &self.root {
            PathRoot::Expr(node) => vec![(0, Rc::clone(node))],
            PathRoot::Fixed { .. } => Vec::new(),
        }
    }

    pub(super) fn is_reversible(&self) -> bool {
        !self.props.is_empty()
    }

    /// Construction-time check of the first step on a fixed root. Dynamic
    /// objects get the property defined; fixed shapes must already have it.
    pub(crate) fn resolve_first(&self) -> Result<(), BindError> {
        let (PathRoot::Fixed { value: Value::Object(obj), .. }, Some(first)) = (&self.root, self.props.first())
        else {
            return Ok(());
        };
        if obj.property_slot(first).is_some() || obj.define_property(first).is_some() {
            return Ok(());
        }
        Err(BindError::unresolved_property(obj.type_name(), &**first))
    }

    fn root_value(&self, engine: &Engine) -> Result<Value, BindError> {
        match &self.root {
            PathRoot::Fixed { value, .. } => Ok(value.clone()),
            PathRoot::Expr(node) => node.get_value(engine),
        }
    }

    /// Follow `props` starting from `cur`, appending one link per step read.
    fn walk(engine: &Engine, mut cur: Value, props: &[Rc<str>], links: &mut Vec<Link>) -> Value {
        for name in props {
            let obj = match &cur {
                Value::Object(obj) => Rc::clone(obj),
                Value::Pending => return Value::Pending,
                Value::Null | Value::Unset => return Value::Unset,
                other => {
                    engine.report(BindError::type_mismatch(
                        "object",
                        other.value_type().map_or_else(|| "unset".to_string(), |t| t.to_string()),
                    ));
                    return Value::Unset;
                }
            };
            let Some(slot) = obj.property_slot(name) else {
                engine.report(BindError::unresolved_property(obj.type_name(), &**name));
                return Value::Unset;
            };
            cur = match obj.get_slot(slot) {
                Ok(v) => v,
                Err(err) => {
                    engine.report(err);
                    Value::Unset
                }
            };
            links.push(Link {
                holder: Some(obj),
                slot: Some(slot),
                subscribed: false,
            });
        }
        cur
    }

    pub(super) fn evaluate(&self, node: &Rc<BindingNode>, engine: &Engine) -> Result<Value, BindError> {
        self.evaluate_from(node, engine, 0)
    }

    pub(super) fn evaluate_after(
        &self,
        node: &Rc<BindingNode>,
        engine: &Engine,
        event: &EventInfo,
    ) -> Result<Value, BindError> {
        let start = event.slot.and_then(|slot| {
            let key = (ObjectId::of(&event.object), slot);
            self.links.borrow().iter().position(|l| l.key() == Some(key))
        });
        self.evaluate_from(node, engine, start.unwrap_or(0))
    }

    /// Re-read the path from link `start` onward.
    fn evaluate_from(&self, node: &Rc<BindingNode>, engine: &Engine, start: usize) -> Result<Value, BindError> {
        let resumed = if start == 0 {
            None
        } else {
            let links = self.links.borrow();
            links
                .get(start)
                .and_then(|l| l.holder.clone())
                .map(|holder| (links[..start].to_vec(), Value::Object(holder)))
        };
        let (mut fresh, cur, start) = match resumed {
            Some((prefix, holder)) => (prefix, holder, start),
            None => (Vec::new(), self.root_value(engine)?, 0),
        };
        let value = Self::walk(engine, cur, &self.props[start..], &mut fresh);
        self.sync_links(node, engine, fresh);
        Ok(value)
    }

    pub(super) fn peek(&self, engine: &Engine) -> Result<Value, BindError> {
        let mut scratch = Vec::new();
        Ok(Self::walk(engine, self.root_value(engine)?, &self.props, &mut scratch))
    }

    /// Install `fresh` as the current links, moving subscriptions from links
    /// whose holder changed.
    fn sync_links(&self, node: &Rc<BindingNode>, engine: &Engine, mut fresh: Vec<Link>) {
        let listening = node.is_listening();
        let old = std::mem::take(&mut *self.links.borrow_mut());
        let mut drop_subs = Vec::new();
        let mut add_subs = Vec::new();
        for i in 0..old.len().max(fresh.len()) {
            let prev = old.get(i).filter(|p| p.subscribed);
            let keep = listening
                && match (prev, fresh.get(i)) {
                    (Some(p), Some(n)) => p.key().is_some() && p.key() == n.key(),
                    _ => false,
                };
            if let Some(n) = fresh.get_mut(i) {
                n.subscribed = keep;
            }
            if keep {
                continue;
            }
            if let Some(p) = prev {
                drop_subs.push(p.clone());
            }
            if let Some(n) = fresh.get_mut(i).filter(|n| listening && n.holder.is_some()) {
                n.subscribed = true;
                add_subs.push(n.clone());
            }
        }
        *self.links.borrow_mut() = fresh;
        for link in drop_subs {
            if let Some(holder) = &link.holder {
                node.unlisten(engine, holder, link.slot, EventMask::VALUE_CHANGED);
            }
        }
        for link in add_subs {
            if let Some(holder) = &link.holder {
                node.listen(engine, holder, link.slot, EventMask::VALUE_CHANGED);
            }
        }
    }

    pub(super) fn release(&self, node: &Rc<BindingNode>, engine: &Engine) {
        let links = std::mem::take(&mut *self.links.borrow_mut());
        for link in links.into_iter().filter(|l| l.subscribed) {
            if let Some(holder) = &link.holder {
                node.unlisten(engine, holder, link.slot, EventMask::VALUE_CHANGED);
            }
        }
    }

    pub(super) fn collect_reads(&self, out: &mut Vec<AccessKey>) {
        out.extend(
            self.links
                .borrow()
                .iter()
                .filter(|l| l.subscribed)
                .filter_map(|l| l.key().map(|(id, slot)| (id, Some(slot)))),
        );
    }

    /// Assign the last property of the path.
    pub(super) fn apply_reverse(&self, node: &Rc<BindingNode>, engine: &Engine, value: &Value) -> Result<(), BindError> {
        let Some((last, init)) = self.props.split_last() else {
            return Err(BindError::unsupported_reverse(node.to_string(), "path has no property to assign"));
        };
        let mut scratch = Vec::new();
        let holder = Self::walk(engine, self.root_value(engine)?, init, &mut scratch);
        let obj = match holder {
            Value::Object(obj) => obj,
            Value::Pending => return Ok(()),
            _ => {
                return Err(BindError::evaluation(
                    node.to_string(),
                    "cannot assign through a null intermediate",
                ));
            }
        };
        let slot = obj
            .property_slot(last)
            .or_else(|| obj.define_property(last))
            .ok_or_else(|| BindError::unresolved_property(obj.type_name(), &**last))?;
        engine.write_slot(&obj, slot, value.clone().or_null())?;
        Ok(())
    }

    pub(super) fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.root {
            PathRoot::Fixed { label, .. } => f.write_str(label)?,
            PathRoot::Expr(node) => super::fmt_operand(node, f)?,
        }
        for p in &self.props {
            write!(f, ".{p}")?;
        }
        Ok(())
    }
}
