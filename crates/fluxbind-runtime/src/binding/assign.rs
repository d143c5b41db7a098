#![forbid(unsafe_code)]

//! `target = value` used as an expression.
//!
//! Forward, every change of `value` is written into `target` and the
//! assigned value is also the node's own value. In a reverse-only binding
//! the assignment is the whole point: a destination change triggers the
//! write, and the destination itself is never written.

use std::fmt;
use std::rc::Rc;

use fluxbind_core::{BindError, Value};

use super::BindingNode;
use crate::engine::Engine;

pub(crate) const TARGET_SLOT: usize = 0;

pub(crate) struct AssignmentBinding {
    pub(crate) target: Rc<BindingNode>,
    pub(crate) value: Rc<BindingNode>,
}

impl AssignmentBinding {
    pub(crate) fn new(target: Rc<BindingNode>, value: Rc<BindingNode>) -> Self {
        Self { target, value }
    }

    pub(super) fn slots(&self) -> Vec<(usize, Rc<BindingNode>)> {
        vec![(TARGET_SLOT, Rc::clone(&self.target)), (1, Rc::clone(&self.value))]
    }

    fn assign(&self, engine: &Engine, v: &Value) -> Result<(), BindError> {
        match self.target.apply_reverse(engine, v) {
            Err(err) if !err.is_loop() => {
                engine.report(err);
                Ok(())
            }
            other => other,
        }
    }

    pub(super) fn evaluate(&self, node: &Rc<BindingNode>, engine: &Engine) -> Result<Value, BindError> {
        let v = self.value.get_value(engine)?;
        if !v.is_sentinel() && node.is_listening() {
            self.assign(engine, &v)?;
        }
        Ok(v)
    }

    pub(super) fn apply_reverse(&self, node: &Rc<BindingNode>, engine: &Engine) -> Result<(), BindError> {
        let v = self.value.get_value(engine)?;
        if v.is_pending() {
            return Ok(());
        }
        node.set_cached(v.clone());
        self.assign(engine, &v)
    }

    pub(super) fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = ", self.target)?;
        super::fmt_operand(&self.value, f)
    }
}
