#![forbid(unsafe_code)]

//! Operator semantics shared by arithmetic, conditional and unary nodes.
//!
//! # Arithmetic rules
//!
//! | Operands | Result |
//! |----------|--------|
//! | `+` with a string on either side | concatenation; null and UNSET render as `null` |
//! | int, int | 64-bit wrapping arithmetic |
//! | any float | `f64` arithmetic |
//! | null or UNSET (no string) | UNSET |
//! | int `/` or `%` by zero | failure (UNSET at the node) |

use std::cmp::Ordering;
use std::fmt;

use fluxbind_core::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CondOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
}

impl ArithOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
        }
    }

    /// Whether a result of this operator can be solved for an operand.
    #[must_use]
    pub fn is_invertible(self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div | Self::BitXor)
    }

    /// `a op b`.
    pub fn apply(self, a: &Value, b: &Value) -> Result<Value, String> {
        if self == Self::Add && (matches!(a, Value::Str(_)) || matches!(b, Value::Str(_))) {
            return Ok(Value::str(format!("{}{}", render(a), render(b))));
        }
        if a.is_null_like() || b.is_null_like() {
            return Ok(Value::Unset);
        }
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => self.apply_int(*x, *y),
            (Value::Bool(x), Value::Bool(y)) => match self {
                Self::BitAnd => Ok(Value::Bool(*x & *y)),
                Self::BitOr => Ok(Value::Bool(*x | *y)),
                Self::BitXor => Ok(Value::Bool(*x ^ *y)),
                _ => Err(format!("operator {} is not defined on booleans", self.symbol())),
            },
            _ => match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => self.apply_float(x, y),
                _ => Err(format!(
                    "operator {} is not defined on {} and {}",
                    self.symbol(),
                    type_label(a),
                    type_label(b)
                )),
            },
        }
    }

    fn apply_int(self, x: i64, y: i64) -> Result<Value, String> {
        Ok(Value::Int(match self {
            Self::Add => x.wrapping_add(y),
            Self::Sub => x.wrapping_sub(y),
            Self::Mul => x.wrapping_mul(y),
            Self::Div if y == 0 => return Err("division by zero".to_string()),
            Self::Div => x.wrapping_div(y),
            Self::Rem if y == 0 => return Err("division by zero".to_string()),
            Self::Rem => x.wrapping_rem(y),
            Self::BitAnd => x & y,
            Self::BitOr => x | y,
            Self::BitXor => x ^ y,
            Self::Shl => x.wrapping_shl((y & 63) as u32),
            Self::Shr => x.wrapping_shr((y & 63) as u32),
        }))
    }

    fn apply_float(self, x: f64, y: f64) -> Result<Value, String> {
        Ok(Value::Float(match self {
            Self::Add => x + y,
            Self::Sub => x - y,
            Self::Mul => x * y,
            Self::Div => x / y,
            Self::Rem => x % y,
            _ => return Err(format!("operator {} is not defined on floats", self.symbol())),
        }))
    }

    /// Solve `a` in `a op right == result`.
    #[must_use]
    pub fn invert_left(self, result: &Value, right: &Value) -> Option<Value> {
        match self {
            Self::Add => match (result, right) {
                (Value::Str(r), Value::Str(b)) => r.strip_suffix(&**b).map(Value::str),
                _ => Self::Sub.apply(result, right).ok(),
            },
            Self::Sub => Self::Add.apply(result, right).ok(),
            Self::Mul => exact_div(result, right),
            Self::Div => Self::Mul.apply(result, right).ok(),
            Self::BitXor => Self::BitXor.apply(result, right).ok(),
            _ => None,
        }
        .filter(|v| !v.is_unset())
    }

    /// Solve `b` in `left op b == result`.
    #[must_use]
    pub fn invert_right(self, left: &Value, result: &Value) -> Option<Value> {
        match self {
            Self::Add => match (left, result) {
                (Value::Str(a), Value::Str(r)) => r.strip_prefix(&**a).map(Value::str),
                _ => Self::Sub.apply(result, left).ok(),
            },
            Self::Sub => Self::Sub.apply(left, result).ok(),
            Self::Mul => exact_div(result, left),
            Self::Div => exact_div(left, result),
            Self::BitXor => Self::BitXor.apply(result, left).ok(),
            _ => None,
        }
        .filter(|v| !v.is_unset())
    }
}

/// `a / b`, staying integral when the division is exact.
fn exact_div(a: &Value, b: &Value) -> Option<Value> {
    match (a, b) {
        (_, Value::Int(0)) => None,
        (Value::Int(x), Value::Int(y)) if x.checked_rem(*y) == Some(0) => x.checked_div(*y).map(Value::Int),
        _ => {
            let (x, y) = (a.as_float()?, b.as_float()?);
            (y != 0.0).then(|| Value::Float(x / y))
        }
    }
}

fn render(v: &Value) -> String {
    match v {
        Value::Unset | Value::Null => "null".to_string(),
        Value::Str(s) => s.to_string(),
        other => other.to_string(),
    }
}

pub(crate) fn type_label(v: &Value) -> String {
    v.value_type().map_or_else(|| "unset".to_string(), |t| t.to_string())
}

impl CondOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::And => "&&",
            Self::Or => "||",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    #[must_use]
    pub fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }

    /// Evaluate a comparison. UNSET on either side yields UNSET.
    pub fn compare(self, a: &Value, b: &Value) -> Result<Value, String> {
        if a.is_unset() || b.is_unset() {
            return Ok(Value::Unset);
        }
        match self {
            Self::Eq => Ok(Value::Bool(a.equals(b))),
            Self::Ne => Ok(Value::Bool(!a.equals(b))),
            Self::And | Self::Or => Err(format!("{} is not a comparison", self.symbol())),
            _ => {
                let ord = order(a, b).ok_or_else(|| {
                    format!("cannot order {} and {}", type_label(a), type_label(b))
                })?;
                Ok(Value::Bool(match self {
                    Self::Lt => ord == Ordering::Less,
                    Self::Le => ord != Ordering::Greater,
                    Self::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                }))
            }
        }
    }
}

fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => a.as_float()?.partial_cmp(&b.as_float()?),
    }
}

impl UnaryOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Neg => "-",
            Self::Plus => "+",
            Self::Not => "!",
            Self::BitNot => "~",
        }
    }

    /// Every unary operator is its own inverse.
    pub fn apply(self, v: &Value) -> Result<Value, String> {
        if v.is_null_like() {
            return Ok(Value::Unset);
        }
        match (self, v) {
            (Self::Plus, Value::Int(_) | Value::Float(_)) => Ok(v.clone()),
            (Self::Neg, Value::Int(i)) => Ok(Value::Int(i.wrapping_neg())),
            (Self::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
            (Self::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (Self::BitNot, Value::Int(i)) => Ok(Value::Int(!i)),
            _ => Err(format!("operator {} is not defined on {}", self.symbol(), type_label(v))),
        }
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl fmt::Display for CondOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}
