#![forbid(unsafe_code)]

//! Method calls: `target.name(args...)` or `name(args...)`.
//!
//! Remote methods complete through a callback. While a call is in flight the
//! node reports PENDING. Each call carries a sequence number; a completion
//! whose number is no longer current is dropped, so an old answer can never
//! overwrite a newer one.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use fluxbind_core::{BindError, BindingDirection, MethodRef, RemoteResult, Value};
use tracing::debug;

use super::BindingNode;
use crate::engine::Engine;

#[derive(Default)]
struct RemoteState {
    seq: u64,
    in_flight: Option<Vec<Value>>,
    resolved: Option<(Vec<Value>, Value)>,
    inline: bool,
}

pub(crate) struct MethodBinding {
    pub(crate) method: MethodRef,
    pub(crate) target: Option<Rc<BindingNode>>,
    pub(crate) args: Vec<Rc<BindingNode>>,
    remote: RefCell<RemoteState>,
}

fn same_args(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
}

impl MethodBinding {
    pub(crate) fn new(method: MethodRef, target: Option<Rc<BindingNode>>, args: Vec<Rc<BindingNode>>) -> Self {
        Self {
            method,
            target,
            args,
            remote: RefCell::new(RemoteState::default()),
        }
    }

    fn target_slot(&self) -> usize {
        self.args.len()
    }

    pub(super) fn slots(&self) -> Vec<(usize, Rc<BindingNode>)> {
        let mut out: Vec<_> = self.args.iter().cloned().enumerate().collect();
        if let Some(t) = &self.target {
            out.push((self.target_slot(), Rc::clone(t)));
        }
        out
    }

    pub(super) fn child_direction(&self, slot: usize, dir: BindingDirection) -> BindingDirection {
        if slot != self.target_slot() && self.method.has_inverse() {
            dir
        } else {
            dir.forward_only()
        }
    }

    /// Construction-time arity check.
    pub(crate) fn check_arity(&self) -> Result<(), BindError> {
        match self.method.arity() {
            Some(n) if n != self.args.len() => Err(BindError::UnresolvedMethod {
                name: self.method.name().to_string(),
                reason: format!("expects {n} arguments, got {}", self.args.len()),
            }),
            _ => Ok(()),
        }
    }

    fn free_arg(&self) -> Option<usize> {
        let mut free = self.args.iter().enumerate().filter(|(_, a)| !a.is_constant());
        let (idx, _) = free.next()?;
        free.next().is_none().then_some(idx)
    }

    pub(super) fn is_reversible(&self) -> bool {
        self.method.has_inverse() && self.free_arg().is_some_and(|i| self.args[i].is_reversible())
    }

    pub(super) fn evaluate(&self, node: &Rc<BindingNode>, engine: &Engine) -> Result<Value, BindError> {
        let this = match &self.target {
            Some(t) => {
                let v = t.get_value(engine)?;
                if v.is_pending() {
                    return Ok(Value::Pending);
                }
                if v.is_null_like() {
                    return Ok(Value::Unset);
                }
                Some(v)
            }
            None => None,
        };
        let mut args = Vec::with_capacity(self.args.len());
        for a in &self.args {
            args.push(a.get_value(engine)?);
        }
        if args.iter().any(Value::is_pending) {
            return Ok(Value::Pending);
        }
        if self.method.skip_nulls() && args.iter().any(Value::is_null_like) {
            return Ok(Value::Unset);
        }
        let args: Vec<Value> = args.into_iter().map(Value::or_null).collect();
        if self.method.is_remote() {
            return Ok(self.call_remote(node, engine, this.as_ref(), args));
        }
        Ok(match self.method.invoke(this.as_ref(), &args) {
            Ok(v) => v,
            Err(err) => {
                engine.report(err);
                Value::Unset
            }
        })
    }

    fn call_remote(&self, node: &Rc<BindingNode>, engine: &Engine, this: Option<&Value>, args: Vec<Value>) -> Value {
        let seq = {
            let mut st = self.remote.borrow_mut();
            if let Some((prev, v)) = &st.resolved {
                if same_args(prev, &args) {
                    return v.clone();
                }
            }
            if st.in_flight.as_deref().is_some_and(|a| same_args(a, &args)) {
                return Value::Pending;
            }
            st.seq += 1;
            st.in_flight = Some(args.clone());
            st.resolved = None;
            st.seq
        };
        let weak_node = Rc::downgrade(node);
        let weak_engine = engine.downgrade();
        self.remote.borrow_mut().inline = true;
        self.method.invoke_remote(
            this,
            &args,
            Box::new(move |result| {
                if let (Some(node), Some(engine)) = (weak_node.upgrade(), weak_engine.upgrade()) {
                    complete(&node, &engine, seq, result);
                }
            }),
        );
        // A synchronous completion has already filled in the answer.
        let mut st = self.remote.borrow_mut();
        st.inline = false;
        match &st.resolved {
            Some((prev, v)) if same_args(prev, &args) => v.clone(),
            _ => Value::Pending,
        }
    }

    /// Drop any in-flight call; its completion will be ignored.
    pub(super) fn cancel(&self) {
        let mut st = self.remote.borrow_mut();
        st.seq += 1;
        st.in_flight = None;
        st.resolved = None;
    }

    pub(super) fn apply_reverse(&self, node: &Rc<BindingNode>, engine: &Engine, value: &Value) -> Result<(), BindError> {
        if !self.method.has_inverse() {
            return Err(BindError::unsupported_reverse(
                node.to_string(),
                format!("method '{}' has no inverse", self.method.name()),
            ));
        }
        let Some(slot) = self.free_arg() else {
            return Err(BindError::unsupported_reverse(
                node.to_string(),
                "exactly one argument must be non-constant",
            ));
        };
        let mut args = Vec::with_capacity(self.args.len());
        for a in &self.args {
            args.push(a.get_value(engine)?.or_null());
        }
        let inverted = self.method.invert(&args, slot, value).ok_or_else(|| {
            BindError::unsupported_reverse(node.to_string(), "inverse produced no value")
        })?;
        self.args[slot].apply_reverse(engine, &inverted)
    }

    pub(super) fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(t) = &self.target {
            super::fmt_operand(t, f)?;
            f.write_str(".")?;
        }
        write!(f, "{}(", self.method.name())?;
        super::fmt_list(&self.args, f)?;
        f.write_str(")")
    }
}

/// Callback side of a remote call.
fn complete(node: &Rc<BindingNode>, engine: &Engine, seq: u64, result: RemoteResult) {
    let super::NodeKind::Method(m) = &node.kind else {
        return;
    };
    let value = match result {
        Ok(v) => v,
        Err(err) => {
            engine.report(BindError::RemoteFailure {
                method: m.method.name().to_string(),
                code: err.code,
                message: err.message,
            });
            Value::Unset
        }
    };
    {
        let mut st = m.remote.borrow_mut();
        if st.seq != seq {
            debug!(method = m.method.name(), seq, current = st.seq, "stale remote completion dropped");
            return;
        }
        let Some(args) = st.in_flight.take() else {
            return;
        };
        st.resolved = Some((args, value));
        if st.inline {
            return;
        }
    }
    if node.is_removed() {
        return;
    }
    node.invalidate(engine);
    if let Err(err) = engine.run_detached(|| node.revalidate(engine, None)) {
        debug!(error = %err, "remote completion propagation failed");
    }
}
