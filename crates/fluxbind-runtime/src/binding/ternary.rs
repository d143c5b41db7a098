#![forbid(unsafe_code)]

//! `cond ? then : otherwise`.
//!
//! While the condition is being invalidated both branches are suppressed:
//! they keep tracking their own sources but do not disturb this node. Once
//! the condition validates, exactly one branch is active.

use std::fmt;
use std::rc::Rc;

use fluxbind_core::{BindError, Value};

use super::BindingNode;
use crate::engine::Engine;
use crate::ops::type_label;

pub(crate) const COND_SLOT: usize = 0;

pub(crate) struct TernaryBinding {
    pub(crate) cond: Rc<BindingNode>,
    pub(crate) then: Rc<BindingNode>,
    pub(crate) otherwise: Rc<BindingNode>,
}

impl TernaryBinding {
    pub(crate) fn new(cond: Rc<BindingNode>, then: Rc<BindingNode>, otherwise: Rc<BindingNode>) -> Self {
        Self { cond, then, otherwise }
    }

    pub(super) fn slots(&self) -> Vec<(usize, Rc<BindingNode>)> {
        vec![
            (COND_SLOT, Rc::clone(&self.cond)),
            (1, Rc::clone(&self.then)),
            (2, Rc::clone(&self.otherwise)),
        ]
    }

    pub(super) fn is_reversible(&self) -> bool {
        self.then.is_reversible() || self.otherwise.is_reversible()
    }

    pub(super) fn child_invalidated(&self, slot: usize) {
        if slot == COND_SLOT {
            self.then.set_suppressed(true);
            self.otherwise.set_suppressed(true);
        }
    }

    pub(super) fn child_validated(&self, slot: usize) {
        if slot == COND_SLOT {
            self.then.set_suppressed(false);
            self.otherwise.set_suppressed(false);
        }
    }

    /// The branch selected by the condition, or the value to report instead.
    fn select(&self, engine: &Engine) -> Result<Result<&Rc<BindingNode>, Value>, BindError> {
        Ok(match self.cond.get_value(engine)? {
            Value::Bool(true) => Ok(&self.then),
            Value::Bool(false) => Ok(&self.otherwise),
            Value::Pending => Err(Value::Pending),
            Value::Unset | Value::Null => Err(Value::Unset),
            other => {
                engine.report(BindError::type_mismatch("bool", type_label(&other)));
                Err(Value::Unset)
            }
        })
    }

    pub(super) fn evaluate(&self, engine: &Engine) -> Result<Value, BindError> {
        let taken = match self.select(engine)? {
            Ok(branch) => Rc::clone(branch),
            Err(Value::Pending) => return Ok(Value::Pending),
            Err(other) => {
                self.then.activate(engine, false);
                self.otherwise.activate(engine, false);
                return Ok(other);
            }
        };
        let other = if Rc::ptr_eq(&taken, &self.then) {
            &self.otherwise
        } else {
            &self.then
        };
        other.activate(engine, false);
        taken.activate(engine, true);
        taken.set_suppressed(false);
        taken.get_value(engine)
    }

    pub(super) fn apply_reverse(&self, engine: &Engine, value: &Value) -> Result<(), BindError> {
        match self.select(engine)? {
            Ok(branch) => Rc::clone(branch).apply_reverse(engine, value),
            Err(_) => Ok(()),
        }
    }

    pub(super) fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        super::fmt_operand(&self.cond, f)?;
        f.write_str(" ? ")?;
        super::fmt_operand(&self.then, f)?;
        f.write_str(" : ")?;
        super::fmt_operand(&self.otherwise, f)
    }
}
