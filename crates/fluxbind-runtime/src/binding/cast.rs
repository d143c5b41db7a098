#![forbid(unsafe_code)]

//! `(type) operand`. The operand's own type is remembered on every forward
//! evaluation so a reverse write can convert back.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use fluxbind_core::{BindError, Value, ValueType};

use super::BindingNode;
use crate::engine::Engine;
use crate::ops::type_label;

pub(crate) struct CastBinding {
    pub(crate) target: ValueType,
    pub(crate) operand: Rc<BindingNode>,
    source_type: Cell<Option<ValueType>>,
}

impl CastBinding {
    pub(crate) fn new(target: ValueType, operand: Rc<BindingNode>) -> Self {
        Self {
            target,
            operand,
            source_type: Cell::new(None),
        }
    }

    pub(super) fn evaluate(&self, engine: &Engine) -> Result<Value, BindError> {
        let v = self.operand.get_value(engine)?;
        if v.is_sentinel() {
            return Ok(v);
        }
        if let Some(t) = v.value_type().filter(|t| *t != ValueType::Null) {
            self.source_type.set(Some(t));
        }
        Ok(v.convert_to(self.target).unwrap_or_else(|| {
            engine.report(BindError::type_mismatch(self.target.to_string(), type_label(&v)));
            Value::Unset
        }))
    }

    pub(super) fn apply_reverse(&self, node: &Rc<BindingNode>, engine: &Engine, value: &Value) -> Result<(), BindError> {
        let back = match self.source_type.get() {
            Some(t) => value.convert_to(t).ok_or_else(|| {
                BindError::unsupported_reverse(node.to_string(), format!("cannot convert {value} back to {t}"))
            })?,
            None => value.clone(),
        };
        self.operand.apply_reverse(engine, &back)
    }

    pub(super) fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) ", self.target)?;
        super::fmt_operand(&self.operand, f)
    }
}
