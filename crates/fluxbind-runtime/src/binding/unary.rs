#![forbid(unsafe_code)]

use std::fmt;
use std::rc::Rc;

use fluxbind_core::{BindError, Value};

use super::BindingNode;
use crate::engine::Engine;
use crate::ops::UnaryOp;

pub(crate) struct UnaryBinding {
    pub(crate) op: UnaryOp,
    pub(crate) operand: Rc<BindingNode>,
}

impl UnaryBinding {
    pub(crate) fn new(op: UnaryOp, operand: Rc<BindingNode>) -> Self {
        Self { op, operand }
    }

    pub(super) fn is_reversible(&self) -> bool {
        self.operand.is_reversible()
    }

    pub(super) fn evaluate(&self, node: &Rc<BindingNode>, engine: &Engine) -> Result<Value, BindError> {
        let v = self.operand.get_value(engine)?;
        if v.is_pending() {
            return Ok(Value::Pending);
        }
        Ok(self.op.apply(&v).unwrap_or_else(|reason| {
            engine.report(BindError::evaluation(node.to_string(), reason));
            Value::Unset
        }))
    }

    pub(super) fn apply_reverse(&self, node: &Rc<BindingNode>, engine: &Engine, value: &Value) -> Result<(), BindError> {
        let inverted = self
            .op
            .apply(value)
            .map_err(|reason| BindError::unsupported_reverse(node.to_string(), reason))?;
        self.operand.apply_reverse(engine, &inverted)
    }

    pub(super) fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.op.symbol())?;
        super::fmt_operand(&self.operand, f)
    }
}
