#![forbid(unsafe_code)]

//! Logical and comparison operators.
//!
//! `&&` and `||` short-circuit: once the outcome is decided, the remaining
//! operands are deactivated so their sources stop generating events. They
//! are re-activated when evaluation reaches them again.

use std::fmt;
use std::rc::Rc;

use fluxbind_core::{BindError, Value};

use super::BindingNode;
use crate::engine::Engine;
use crate::ops::{CondOp, type_label};

pub(crate) struct ConditionalBinding {
    pub(crate) op: CondOp,
    pub(crate) operands: Vec<Rc<BindingNode>>,
}

impl ConditionalBinding {
    pub(crate) fn new(op: CondOp, operands: Vec<Rc<BindingNode>>) -> Self {
        Self { op, operands }
    }

    pub(super) fn evaluate(&self, engine: &Engine) -> Result<Value, BindError> {
        if self.op.is_logical() {
            return self.evaluate_logical(engine);
        }
        let [a, b] = self.operands.as_slice() else {
            engine.report(BindError::evaluation(
                self.op.symbol(),
                format!("comparison needs 2 operands, got {}", self.operands.len()),
            ));
            return Ok(Value::Unset);
        };
        let (va, vb) = (a.get_value(engine)?, b.get_value(engine)?);
        if va.is_pending() || vb.is_pending() {
            return Ok(Value::Pending);
        }
        Ok(self.op.compare(&va, &vb).unwrap_or_else(|reason| {
            engine.report(BindError::evaluation(format!("{a} {} {b}", self.op), reason));
            Value::Unset
        }))
    }

    fn evaluate_logical(&self, engine: &Engine) -> Result<Value, BindError> {
        let decisive = self.op == CondOp::Or;
        for (i, operand) in self.operands.iter().enumerate() {
            operand.activate(engine, true);
            let v = operand.get_value(engine)?;
            let outcome = match &v {
                Value::Pending => return Ok(Value::Pending),
                Value::Unset | Value::Null => return Ok(Value::Unset),
                Value::Bool(b) => *b,
                other => {
                    engine.report(BindError::type_mismatch("bool", type_label(other)));
                    return Ok(Value::Unset);
                }
            };
            if outcome == decisive {
                for rest in &self.operands[i + 1..] {
                    rest.activate(engine, false);
                }
                return Ok(Value::Bool(decisive));
            }
        }
        Ok(Value::Bool(!decisive))
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
