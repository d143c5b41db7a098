#![forbid(unsafe_code)]

//! Expression trees as plain data, compiled into binding nodes on `bind`.
//!
//! ```
//! use fluxbind_core::{ObjectRef, PropertyBag, Shape};
//! use fluxbind_runtime::expr::Expr;
//!
//! let shape = Shape::fixed("Order", ["qty", "price", "total"]);
//! let order: ObjectRef = PropertyBag::new(&shape);
//! let total = Expr::path(&order, "qty") * Expr::path(&order, "price");
//! assert_eq!(total.to_string(), "Order.qty * Order.price");
//! ```

use std::fmt;
use std::rc::Rc;

use fluxbind_core::{BindError, MethodRef, ObjectRef, Value, ValueType};

use crate::binding::arith::ArithmeticBinding;
use crate::binding::array::ArrayBinding;
use crate::binding::assign::AssignmentBinding;
use crate::binding::cast::CastBinding;
use crate::binding::condition::ConditionalBinding;
use crate::binding::construct::ConstructBinding;
use crate::binding::method::MethodBinding;
use crate::binding::path::{PathBinding, PathRoot};
use crate::binding::ternary::TernaryBinding;
use crate::binding::unary::UnaryBinding;
use crate::binding::{BindingNode, NodeKind};
use crate::engine::Engine;
use crate::ops::{ArithOp, CondOp, UnaryOp};

/// A binding expression.
#[derive(Clone)]
pub enum Expr {
    Constant(Value),
    /// `root.a.b` on a fixed root value.
    Path {
        root: Value,
        label: Rc<str>,
        props: Vec<Rc<str>>,
    },
    /// `(expr).a.b`.
    Selector { root: Box<Expr>, props: Vec<Rc<str>> },
    Method {
        target: Option<Box<Expr>>,
        method: MethodRef,
        args: Vec<Expr>,
    },
    Arithmetic { op: ArithOp, operands: Vec<Expr> },
    Conditional { op: CondOp, operands: Vec<Expr> },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Cast { target: ValueType, operand: Box<Expr> },
    /// `root.a.b[i][j]` on a fixed root value.
    ArrayElement {
        root: Value,
        label: Rc<str>,
        props: Vec<Rc<str>>,
        dims: Vec<Expr>,
    },
    /// `(expr)[i][j]`.
    ArraySelector { array: Box<Expr>, dims: Vec<Expr> },
    Assignment { target: Box<Expr>, value: Box<Expr> },
    NewObject { constructor: MethodRef, args: Vec<Expr> },
    NewArray { elements: Vec<Expr> },
}

fn split_path(path: &str) -> Vec<Rc<str>> {
    path.split('.').filter(|p| !p.is_empty()).map(Rc::from).collect()
}

impl Expr {
    pub fn constant(value: impl Into<Value>) -> Self {
        Self::Constant(value.into())
    }

    /// `obj.path`, where `path` is dot-separated.
    pub fn path(obj: &ObjectRef, path: &str) -> Self {
        Self::Path {
            root: Value::Object(Rc::clone(obj)),
            label: Rc::from(obj.type_name()),
            props: split_path(path),
        }
    }

    /// Like [`path`](Self::path) with an explicit display label for the root.
    pub fn named_path(label: &str, obj: &ObjectRef, path: &str) -> Self {
        Self::Path {
            root: Value::Object(Rc::clone(obj)),
            label: Rc::from(label),
            props: split_path(path),
        }
    }

    /// Follow `path` from the value of `self`.
    #[must_use]
    pub fn select(self, path: &str) -> Self {
        let props = split_path(path);
        match self {
            Self::Path {
                root,
                label,
                props: mut head,
            } => {
                head.extend(props);
                Self::Path { root, label, props: head }
            }
            other => Self::Selector {
                root: Box::new(other),
                props,
            },
        }
    }

    /// Free function call.
    pub fn call(method: &MethodRef, args: Vec<Expr>) -> Self {
        Self::Method {
            target: None,
            method: Rc::clone(method),
            args,
        }
    }

    /// Call `method` on the value of `self`.
    #[must_use]
    pub fn invoke(self, method: &MethodRef, args: Vec<Expr>) -> Self {
        Self::Method {
            target: Some(Box::new(self)),
            method: Rc::clone(method),
            args,
        }
    }

    pub fn arith(op: ArithOp, operands: Vec<Expr>) -> Self {
        Self::Arithmetic { op, operands }
    }

    pub fn compare(op: CondOp, a: Expr, b: Expr) -> Self {
        Self::Conditional { op, operands: vec![a, b] }
    }

    /// `a && b && ...`
    pub fn all(operands: Vec<Expr>) -> Self {
        Self::Conditional {
            op: CondOp::And,
            operands,
        }
    }

    /// `a || b || ...`
    pub fn any(operands: Vec<Expr>) -> Self {
        Self::Conditional {
            op: CondOp::Or,
            operands,
        }
    }

    pub fn ternary(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Self::Ternary {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Self::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    #[must_use]
    pub fn cast(self, target: ValueType) -> Self {
        Self::Cast {
            target,
            operand: Box::new(self),
        }
    }

    /// Index into the value of `self`. Adds a dimension when `self` is
    /// already an indexing expression.
    #[must_use]
    pub fn index(self, dim: Expr) -> Self {
        match self {
            Self::Path { root, label, props } => Self::ArrayElement {
                root,
                label,
                props,
                dims: vec![dim],
            },
            Self::ArrayElement {
                root,
                label,
                props,
                mut dims,
            } => {
                dims.push(dim);
                Self::ArrayElement {
                    root,
                    label,
                    props,
                    dims,
                }
            }
            Self::ArraySelector { array, mut dims } => {
                dims.push(dim);
                Self::ArraySelector { array, dims }
            }
            other => Self::ArraySelector {
                array: Box::new(other),
                dims: vec![dim],
            },
        }
    }

    /// `target = value`.
    pub fn assign(target: Expr, value: Expr) -> Self {
        Self::Assignment {
            target: Box::new(target),
            value: Box::new(value),
        }
    }

    pub fn construct(constructor: &MethodRef, args: Vec<Expr>) -> Self {
        Self::NewObject {
            constructor: Rc::clone(constructor),
            args,
        }
    }

    pub fn array(elements: Vec<Expr>) -> Self {
        Self::NewArray { elements }
    }

    /// Whether this expression can be a chained destination.
    #[must_use]
    pub fn is_assignable(&self) -> bool {
        matches!(
            self,
            Self::Path { .. } | Self::Selector { .. } | Self::ArrayElement { .. } | Self::ArraySelector { .. }
        )
    }

    fn fold(self, op: ArithOp, rhs: Expr) -> Self {
        match self {
            Self::Arithmetic { op: o, mut operands } if o == op => {
                operands.push(rhs);
                Self::Arithmetic { op, operands }
            }
            lhs => Self::Arithmetic {
                op,
                operands: vec![lhs, rhs],
            },
        }
    }

    /// Compile into a node tree. Construction-time failures are reported
    /// and leave the affected node permanently UNSET.
    pub(crate) fn build(&self, engine: &Engine) -> Rc<BindingNode> {
        let many = |xs: &[Expr]| xs.iter().map(|x| x.build(engine)).collect::<Vec<_>>();
        match self {
            Self::Constant(v) => BindingNode::new(engine, NodeKind::Constant(v.clone())),
            Self::Path { root, label, props } => {
                let path = PathBinding::new(
                    PathRoot::Fixed {
                        value: root.clone(),
                        label: Rc::clone(label),
                    },
                    props.clone(),
                );
                let check = path.resolve_first();
                let node = BindingNode::new(engine, NodeKind::Variable(path));
                unresolved_if(engine, &node, check);
                node
            }
            Self::Selector { root, props } => {
                let path = PathBinding::new(PathRoot::Expr(root.build(engine)), props.clone());
                BindingNode::new(engine, NodeKind::Selector(path))
            }
            Self::Method { target, method, args } => {
                let m = MethodBinding::new(Rc::clone(method), target.as_ref().map(|t| t.build(engine)), many(args));
                let check = m.check_arity();
                let node = BindingNode::new(engine, NodeKind::Method(m));
                unresolved_if(engine, &node, check);
                node
            }
            Self::Arithmetic { op, operands } => {
                BindingNode::new(engine, NodeKind::Arithmetic(ArithmeticBinding::new(*op, many(operands))))
            }
            Self::Conditional { op, operands } => {
                BindingNode::new(engine, NodeKind::Conditional(ConditionalBinding::new(*op, many(operands))))
            }
            Self::Ternary { cond, then, otherwise } => BindingNode::new(
                engine,
                NodeKind::Ternary(TernaryBinding::new(
                    cond.build(engine),
                    then.build(engine),
                    otherwise.build(engine),
                )),
            ),
            Self::Unary { op, operand } => {
                BindingNode::new(engine, NodeKind::Unary(UnaryBinding::new(*op, operand.build(engine))))
            }
            Self::Cast { target, operand } => {
                BindingNode::new(engine, NodeKind::Cast(CastBinding::new(*target, operand.build(engine))))
            }
            Self::ArrayElement { root, label, props, dims } => {
                let source = Self::Path {
                    root: root.clone(),
                    label: Rc::clone(label),
                    props: props.clone(),
                }
                .build(engine);
                BindingNode::new(engine, NodeKind::ArrayElement(ArrayBinding::new(source, many(dims))))
            }
            Self::ArraySelector { array, dims } => BindingNode::new(
                engine,
                NodeKind::ArraySelector(ArrayBinding::new(array.build(engine), many(dims))),
            ),
            Self::Assignment { target, value } => {
                if !target.is_assignable() {
                    engine.report(BindError::unsupported_reverse(
                        target.to_string(),
                        "assignment target must be a path or an indexing expression",
                    ));
                }
                BindingNode::new(
                    engine,
                    NodeKind::Assignment(AssignmentBinding::new(target.build(engine), value.build(engine))),
                )
            }
            Self::NewObject { constructor, args } => BindingNode::new(
                engine,
                NodeKind::NewObject(ConstructBinding::object(Rc::clone(constructor), many(args))),
            ),
            Self::NewArray { elements } => {
                BindingNode::new(engine, NodeKind::NewArray(ConstructBinding::array(many(elements))))
            }
        }
    }
}

fn unresolved_if(engine: &Engine, node: &BindingNode, check: Result<(), BindError>) {
    if let Err(err) = check {
        engine.report(err);
        node.mark_unresolved();
    }
}

macro_rules! arith_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl std::ops::$trait for Expr {
            type Output = Expr;

            fn $method(self, rhs: Expr) -> Expr {
                self.fold($op, rhs)
            }
        }
    };
}

arith_op!(Add, add, ArithOp::Add);
arith_op!(Sub, sub, ArithOp::Sub);
arith_op!(Mul, mul, ArithOp::Mul);
arith_op!(Div, div, ArithOp::Div);
arith_op!(Rem, rem, ArithOp::Rem);

impl std::ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, self)
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::unary(UnaryOp::Not, self)
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Self::Constant(v)
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, xs: &[Expr], sep: &str) -> fmt::Result {
    for (i, x) in xs.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write_operand(f, x)?;
    }
    Ok(())
}

fn write_args(f: &mut fmt::Formatter<'_>, xs: &[Expr]) -> fmt::Result {
    for (i, x) in xs.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{x}")?;
    }
    Ok(())
}

fn write_operand(f: &mut fmt::Formatter<'_>, x: &Expr) -> fmt::Result {
    match x {
        Expr::Arithmetic { .. } | Expr::Conditional { .. } | Expr::Ternary { .. } | Expr::Assignment { .. } => {
            write!(f, "({x})")
        }
        _ => write!(f, "{x}"),
    }
}

fn write_props(f: &mut fmt::Formatter<'_>, props: &[Rc<str>]) -> fmt::Result {
    for p in props {
        write!(f, ".{p}")?;
    }
    Ok(())
}

/// Same rendering as the compiled node tree.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(Value::Str(s)) => write!(f, "{s:?}"),
            Self::Constant(v) => write!(f, "{v}"),
            Self::Path { label, props, .. } => {
                f.write_str(label)?;
                write_props(f, props)
            }
            Self::Selector { root, props } => {
                write_operand(f, root)?;
                write_props(f, props)
            }
            Self::Method { target, method, args } => {
                if let Some(t) = target {
                    write_operand(f, t)?;
                    f.write_str(".")?;
                }
                write!(f, "{}(", method.name())?;
                write_args(f, args)?;
                f.write_str(")")
            }
            Self::Arithmetic { op, operands } => write_list(f, operands, &format!(" {op} ")),
            Self::Conditional { op, operands } => write_list(f, operands, &format!(" {op} ")),
            Self::Ternary { cond, then, otherwise } => {
                write_operand(f, cond)?;
                f.write_str(" ? ")?;
                write_operand(f, then)?;
                f.write_str(" : ")?;
                write_operand(f, otherwise)
            }
            Self::Unary { op, operand } => {
                f.write_str(op.symbol())?;
                write_operand(f, operand)
            }
            Self::Cast { target, operand } => {
                write!(f, "({target}) ")?;
                write_operand(f, operand)
            }
            Self::ArrayElement { label, props, dims, .. } => {
                f.write_str(label)?;
                write_props(f, props)?;
                dims.iter().try_for_each(|d| write!(f, "[{d}]"))
            }
            Self::ArraySelector { array, dims } => {
                write_operand(f, array)?;
                dims.iter().try_for_each(|d| write!(f, "[{d}]"))
            }
            Self::Assignment { target, value } => {
                write!(f, "{target} = ")?;
                write_operand(f, value)
            }
            Self::NewObject { constructor, args } => {
                write!(f, "new {}(", constructor.name())?;
                write_args(f, args)?;
                f.write_str(")")
            }
            Self::NewArray { elements } => {
                f.write_str("{")?;
                write_args(f, elements)?;
                f.write_str("}")
            }
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxbind_core::{FnMethod, PropertyBag, Shape};

    fn model() -> ObjectRef {
        PropertyBag::new(&Shape::fixed("M", ["a", "b", "items"]))
    }

    #[test]
    fn operators_fold_into_one_node() {
        let m = model();
        let e = Expr::path(&m, "a") + Expr::path(&m, "b") + Expr::constant(1);
        match &e {
            Expr::Arithmetic { operands, .. } => assert_eq!(operands.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(e.to_string(), "M.a + M.b + 1");
    }

    #[test]
    fn mixed_operators_parenthesize() {
        let m = model();
        let e = (Expr::path(&m, "a") + Expr::constant(1)) * Expr::constant(2);
        assert_eq!(e.to_string(), "(M.a + 1) * 2");
    }

    #[test]
    fn index_extends_dimensions() {
        let m = model();
        let e = Expr::path(&m, "items").index(Expr::constant(0)).index(Expr::constant(1));
        assert_eq!(e.to_string(), "M.items[0][1]");
        assert!(e.is_assignable());
    }

    #[test]
    fn display_of_calls_and_ternaries() {
        let m = model();
        let f = FnMethod::new("fmt", |_, _| Ok(Value::Null)).into_ref();
        let e = Expr::ternary(
            Expr::compare(CondOp::Gt, Expr::path(&m, "a"), Expr::constant(0)),
            Expr::call(&f, vec![Expr::path(&m, "b")]),
            Expr::constant("none"),
        );
        assert_eq!(e.to_string(), "(M.a > 0) ? fmt(M.b) : \"none\"");
    }

    #[test]
    fn select_on_path_extends_it() {
        let m = model();
        assert_eq!(Expr::path(&m, "a").select("b.c").to_string(), "M.a.b.c");
    }
}
