#![forbid(unsafe_code)]

//! Binding options and one construction call per expression variant.
//!
//! Every `bind_*` call is shorthand for [`Engine::bind`] with the matching
//! [`Expr`] constructor.

use fluxbind_core::{BindError, BindingDirection, BindingFlags, DeliveryMode, MethodRef, ObjectRef, Value, ValueType};

use crate::binding::destination::DestinationListener;
use crate::context::ScopeId;
use crate::engine::Engine;
use crate::expr::Expr;
use crate::ops::{ArithOp, CondOp, UnaryOp};

/// How a binding propagates and is delivered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BindOptions {
    pub direction: BindingDirection,
    pub flags: BindingFlags,
    /// `None` uses the engine's default priority.
    pub priority: Option<i32>,
}

impl BindOptions {
    /// Forward, synchronous, default priority.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn direction(mut self, direction: BindingDirection) -> Self {
        self.direction = direction;
        self
    }

    #[must_use]
    pub fn bidirectional(self) -> Self {
        self.direction(BindingDirection::Bidirectional)
    }

    #[must_use]
    pub fn reverse(self) -> Self {
        self.direction(BindingDirection::Reverse)
    }

    /// Add `flags` to those already set.
    #[must_use]
    pub fn flags(mut self, flags: BindingFlags) -> Self {
        self.flags |= flags;
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub(crate) fn delivery(&self) -> DeliveryMode {
        DeliveryMode::from_flags(self.flags)
    }

    pub(crate) fn owning_scope(&self, current: ScopeId) -> Option<ScopeId> {
        self.flags.contains(BindingFlags::CROSS_SCOPE).then_some(current)
    }
}

impl Engine {
    pub fn bind_constant(
        &self,
        obj: &ObjectRef,
        property: &str,
        value: impl Into<Value>,
        options: BindOptions,
    ) -> Result<DestinationListener, BindError> {
        self.bind(obj, property, Expr::constant(value), options)
    }

    /// `obj.property := source.path`.
    pub fn bind_path(
        &self,
        obj: &ObjectRef,
        property: &str,
        source: &ObjectRef,
        path: &str,
        options: BindOptions,
    ) -> Result<DestinationListener, BindError> {
        self.bind(obj, property, Expr::path(source, path), options)
    }

    /// `obj.property := (root).path`.
    pub fn bind_selector(
        &self,
        obj: &ObjectRef,
        property: &str,
        root: Expr,
        path: &str,
        options: BindOptions,
    ) -> Result<DestinationListener, BindError> {
        self.bind(obj, property, root.select(path), options)
    }

    /// `obj.property := target.method(args)`, or a free call without target.
    pub fn bind_method(
        &self,
        obj: &ObjectRef,
        property: &str,
        target: Option<Expr>,
        method: &MethodRef,
        args: Vec<Expr>,
        options: BindOptions,
    ) -> Result<DestinationListener, BindError> {
        let expr = match target {
            Some(t) => t.invoke(method, args),
            None => Expr::call(method, args),
        };
        self.bind(obj, property, expr, options)
    }

    pub fn bind_arithmetic(
        &self,
        obj: &ObjectRef,
        property: &str,
        op: ArithOp,
        operands: Vec<Expr>,
        options: BindOptions,
    ) -> Result<DestinationListener, BindError> {
        self.bind(obj, property, Expr::arith(op, operands), options)
    }

    pub fn bind_conditional(
        &self,
        obj: &ObjectRef,
        property: &str,
        op: CondOp,
        operands: Vec<Expr>,
        options: BindOptions,
    ) -> Result<DestinationListener, BindError> {
        self.bind(obj, property, Expr::Conditional { op, operands }, options)
    }

    pub fn bind_ternary(
        &self,
        obj: &ObjectRef,
        property: &str,
        cond: Expr,
        then: Expr,
        otherwise: Expr,
        options: BindOptions,
    ) -> Result<DestinationListener, BindError> {
        self.bind(obj, property, Expr::ternary(cond, then, otherwise), options)
    }

    pub fn bind_unary(
        &self,
        obj: &ObjectRef,
        property: &str,
        op: UnaryOp,
        operand: Expr,
        options: BindOptions,
    ) -> Result<DestinationListener, BindError> {
        self.bind(obj, property, Expr::unary(op, operand), options)
    }

    pub fn bind_cast(
        &self,
        obj: &ObjectRef,
        property: &str,
        target: ValueType,
        operand: Expr,
        options: BindOptions,
    ) -> Result<DestinationListener, BindError> {
        self.bind(obj, property, operand.cast(target), options)
    }

    /// `obj.property := source.path[d0][d1]...`.
    pub fn bind_array_element(
        &self,
        obj: &ObjectRef,
        property: &str,
        source: &ObjectRef,
        path: &str,
        dims: Vec<Expr>,
        options: BindOptions,
    ) -> Result<DestinationListener, BindError> {
        let expr = dims.into_iter().fold(Expr::path(source, path), Expr::index);
        self.bind(obj, property, expr, options)
    }

    /// `obj.property := (array)[d0][d1]...`.
    pub fn bind_array_selector(
        &self,
        obj: &ObjectRef,
        property: &str,
        array: Expr,
        dims: Vec<Expr>,
        options: BindOptions,
    ) -> Result<DestinationListener, BindError> {
        let expr = Expr::ArraySelector {
            array: Box::new(array),
            dims,
        };
        self.bind(obj, property, expr, options)
    }

    /// `obj.property =: (target = value)`: when the destination changes,
    /// `value` is evaluated and written into `target`.
    pub fn bind_assignment(
        &self,
        obj: &ObjectRef,
        property: &str,
        target: Expr,
        value: Expr,
        options: BindOptions,
    ) -> Result<DestinationListener, BindError> {
        self.bind(obj, property, Expr::assign(target, value), options)
    }

    pub fn bind_new_object(
        &self,
        obj: &ObjectRef,
        property: &str,
        constructor: &MethodRef,
        args: Vec<Expr>,
        options: BindOptions,
    ) -> Result<DestinationListener, BindError> {
        self.bind(obj, property, Expr::construct(constructor, args), options)
    }

    pub fn bind_new_array(
        &self,
        obj: &ObjectRef,
        property: &str,
        elements: Vec<Expr>,
        options: BindOptions,
    ) -> Result<DestinationListener, BindError> {
        self.bind(obj, property, Expr::array(elements), options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accumulate() {
        let opts = BindOptions::new()
            .flags(BindingFlags::QUEUED)
            .flags(BindingFlags::TRACE);
        assert!(opts.flags.contains(BindingFlags::QUEUED | BindingFlags::TRACE));
        assert_eq!(opts.delivery(), DeliveryMode::Queued);
    }

    #[test]
    fn immediate_wins_over_queued() {
        let opts = BindOptions::new().flags(BindingFlags::QUEUED | BindingFlags::IMMEDIATE);
        assert_eq!(opts.delivery(), DeliveryMode::Immediate);
    }

    #[test]
    fn cross_scope_pins_creating_scope() {
        let plain = BindOptions::new();
        assert_eq!(plain.owning_scope(ScopeId(3)), None);
        let pinned = BindOptions::new().flags(BindingFlags::CROSS_SCOPE);
        assert_eq!(pinned.owning_scope(ScopeId(3)), Some(ScopeId(3)));
    }
}
