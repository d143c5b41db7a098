#![forbid(unsafe_code)]

//! Object and array construction: `new Type(args)` and `{a, b, c}`.
//!
//! Construction never runs with a missing argument: any UNSET argument
//! makes the node UNSET.

use std::fmt;
use std::rc::Rc;

use fluxbind_core::{BindError, BindingDirection, MethodRef, Value};

use super::BindingNode;
use crate::engine::Engine;

pub(crate) struct ConstructBinding {
    /// `None` builds a list from the arguments.
    pub(crate) constructor: Option<MethodRef>,
    pub(crate) args: Vec<Rc<BindingNode>>,
}

impl ConstructBinding {
    pub(crate) fn object(constructor: MethodRef, args: Vec<Rc<BindingNode>>) -> Self {
        Self {
            constructor: Some(constructor),
            args,
        }
    }

    pub(crate) fn array(elements: Vec<Rc<BindingNode>>) -> Self {
        Self {
            constructor: None,
            args: elements,
        }
    }

    pub(super) fn evaluate(&self, node: &Rc<BindingNode>, engine: &Engine) -> Result<Value, BindError> {
        let mut values = Vec::with_capacity(self.args.len());
        for a in &self.args {
            let v = a.get_value(engine)?;
            if v.is_pending() {
                return Ok(Value::Pending);
            }
            if v.is_unset() {
                return Ok(Value::Unset);
            }
            values.push(v);
        }
        let Some(ctor) = &self.constructor else {
            return Ok(Value::list(values));
        };
        Ok(ctor.invoke(None, &values).unwrap_or_else(|err| {
            engine.report(BindError::evaluation(node.to_string(), err.to_string()));
            Value::Unset
        }))
    }

    /// Reverse-only bindings evaluate the construction for its side
    /// effects; anything else cannot be inverted.
    pub(super) fn apply_reverse(&self, node: &Rc<BindingNode>, engine: &Engine) -> Result<(), BindError> {
        if node.root_node().direction() == BindingDirection::Reverse {
            let v = self.evaluate(node, engine)?;
            node.set_cached(v);
            return Ok(());
        }
        Err(BindError::unsupported_reverse(
            node.to_string(),
            "constructed values cannot be assigned",
        ))
    }

    pub(super) fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constructor {
            Some(ctor) => {
                write!(f, "new {}(", ctor.name())?;
                super::fmt_list(&self.args, f)?;
                f.write_str(")")
            }
            None => {
                f.write_str("{")?;
                super::fmt_list(&self.args, f)?;
                f.write_str("}")
            }
        }
    }
}
