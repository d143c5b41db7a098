#![forbid(unsafe_code)]

//! N-ary arithmetic, folded left to right.
//!
//! Reverse propagation solves for the single non-constant operand: the
//! operands after it are peeled off the result with `invert_left`, then the
//! operand itself is recovered from the fold of the operands before it with
//! `invert_right`.

use std::fmt;
use std::rc::Rc;

use fluxbind_core::{BindError, Value};

use super::BindingNode;
use crate::engine::Engine;
use crate::ops::ArithOp;

pub(crate) struct ArithmeticBinding {
    pub(crate) op: ArithOp,
    pub(crate) operands: Vec<Rc<BindingNode>>,
}

impl ArithmeticBinding {
    pub(crate) fn new(op: ArithOp, operands: Vec<Rc<BindingNode>>) -> Self {
        Self { op, operands }
    }

    fn fold(&self, node: &BindingNode, values: &[Value]) -> Result<Value, BindError> {
        let Some((first, rest)) = values.split_first() else {
            return Ok(Value::Unset);
        };
        let mut acc = first.clone();
        for v in rest {
            acc = self
                .op
                .apply(&acc, v)
                .map_err(|reason| BindError::evaluation(node.to_string(), reason))?;
        }
        Ok(acc)
    }

    pub(super) fn evaluate(&self, node: &Rc<BindingNode>, engine: &Engine) -> Result<Value, BindError> {
        let mut values = Vec::with_capacity(self.operands.len());
        for operand in &self.operands {
            values.push(operand.get_value(engine)?);
        }
        if values.iter().any(Value::is_pending) {
            return Ok(Value::Pending);
        }
        Ok(self.fold(node, &values).unwrap_or_else(|err| {
            engine.report(err);
            Value::Unset
        }))
    }

    fn free_operand(&self) -> Option<usize> {
        let mut free = self.operands.iter().enumerate().filter(|(_, o)| !o.is_constant());
        let (idx, _) = free.next()?;
        free.next().is_none().then_some(idx)
    }

    pub(super) fn is_reversible(&self) -> bool {
        self.op.is_invertible() && self.free_operand().is_some_and(|i| self.operands[i].is_reversible())
    }

    pub(super) fn apply_reverse(&self, node: &Rc<BindingNode>, engine: &Engine, value: &Value) -> Result<(), BindError> {
        if !self.op.is_invertible() {
            return Err(BindError::unsupported_reverse(
                node.to_string(),
                format!("operator {} cannot be inverted", self.op),
            ));
        }
        let Some(free) = self.free_operand() else {
            return Err(BindError::unsupported_reverse(
                node.to_string(),
                "expression must have exactly one non-constant operand",
            ));
        };
        let mut values = Vec::with_capacity(self.operands.len());
        for operand in &self.operands {
            values.push(operand.get_value(engine)?);
        }
        let unsolvable = || BindError::unsupported_reverse(node.to_string(), format!("no operand yields {value}"));
        let mut target = value.clone();
        for right in values[free + 1..].iter().rev() {
            target = self.op.invert_left(&target, right).ok_or_else(unsolvable)?;
        }
        if free > 0 {
            let prefix = self.fold(node, &values[..free])?;
            target = self.op.invert_right(&prefix, &target).ok_or_else(unsolvable)?;
        }
        self.operands[free].apply_reverse(engine, &target)
    }

    pub(super) fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, operand) in self.operands.iter().enumerate() {
            if i > 0 {
                write!(f, " {} ", self.op)?;
            }
            super::fmt_operand(operand, f)?;
        }
        Ok(())
    }
}
