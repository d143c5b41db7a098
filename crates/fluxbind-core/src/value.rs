#![forbid(unsafe_code)]

//! Dynamic values flowing through a binding graph.
//!
//! A [`Value`] is either an ordinary host value or one of two sentinels:
//!
//! - [`Value::Unset`]: the expression could not be computed (a null link in a
//!   path, a failed method call, an arithmetic fault).
//! - [`Value::Pending`]: an asynchronous computation is outstanding.
//!
//! # Equality
//!
//! [`Value::equals`] is the "did this actually change" predicate used by the
//! whole engine. It never panics:
//!
//! | Left | Right | Rule |
//! |------|-------|------|
//! | `Int` | `Float` | numeric comparison |
//! | `Str` | `Str` | content |
//! | `Object` | `Object` | identity, or element-wise for lists |
//! | sentinel | sentinel | same sentinel |
//! | anything else | | `false` |

use std::fmt;
use std::rc::Rc;

use crate::list::ObservableList;
use crate::object::{ObjectId, ObjectRef};

/// A value stored in a property, produced by an expression, or one of the
/// two sentinels.
#[derive(Clone, Default)]
pub enum Value {
    /// Could not be computed.
    #[default]
    Unset,
    /// Asynchronous result not yet available.
    Pending,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Object(ObjectRef),
}

/// Runtime type tag of a non-sentinel [`Value`].
///
/// Used by casts to remember the representation a value arrived in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
pub enum ValueType {
    Null,
    Bool,
    Int,
    Float,
    Str,
    Object,
    List,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "string",
            Self::Object => "object",
            Self::List => "list",
        };
        f.write_str(name)
    }
}

impl Value {
    /// Build a string value.
    #[must_use]
    pub fn str(s: impl AsRef<str>) -> Self {
        Self::Str(Rc::from(s.as_ref()))
    }

    /// Wrap a host object.
    #[must_use]
    pub fn object(obj: ObjectRef) -> Self {
        Self::Object(obj)
    }

    /// Build a list value backed by a fresh [`ObservableList`].
    #[must_use]
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Self::Object(ObservableList::new(items.into_iter().collect()))
    }

    #[must_use]
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// True for `Unset` and `Pending`.
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Self::Unset | Self::Pending)
    }

    /// True for `Null` and `Unset`: the values a skip-null binding ignores.
    #[must_use]
    pub fn is_null_like(&self) -> bool {
        matches!(self, Self::Null | Self::Unset)
    }

    /// Map `Unset` to `Null`, the representation written to a destination.
    #[must_use]
    pub fn or_null(self) -> Self {
        match self {
            Self::Unset => Self::Null,
            other => other,
        }
    }

    /// Type tag, or `None` for sentinels.
    #[must_use]
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Self::Unset | Self::Pending => None,
            Self::Null => Some(ValueType::Null),
            Self::Bool(_) => Some(ValueType::Bool),
            Self::Int(_) => Some(ValueType::Int),
            Self::Float(_) => Some(ValueType::Float),
            Self::Str(_) => Some(ValueType::Str),
            Self::Object(obj) if obj.as_list().is_some() => Some(ValueType::List),
            Self::Object(_) => Some(ValueType::Object),
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view. Floats with no fractional part convert.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// List view when the value is an object backed by an [`ObservableList`].
    #[must_use]
    pub fn as_list(&self) -> Option<&ObservableList> {
        self.as_object().and_then(|obj| obj.as_list())
    }

    /// Identity of the wrapped object, if any.
    #[must_use]
    pub fn object_id(&self) -> Option<ObjectId> {
        self.as_object().map(ObjectId::of)
    }

    /// Boolean interpretation used by conditionals. Only `Bool` has one.
    #[must_use]
    pub fn truthy(&self) -> Option<bool> {
        self.as_bool()
    }

    /// Convert to another representation. Returns `None` when the conversion
    /// is not meaningful (e.g. an object to an int).
    #[must_use]
    pub fn convert_to(&self, target: ValueType) -> Option<Value> {
        if self.is_sentinel() {
            return Some(self.clone());
        }
        if self.value_type() == Some(target) {
            return Some(self.clone());
        }
        match (self, target) {
            (Self::Null, _) => Some(Self::Null),
            (_, ValueType::Str) => Some(Self::str(self.to_string())),
            (Self::Int(i), ValueType::Float) => Some(Self::Float(*i as f64)),
            (Self::Float(f), ValueType::Int) if f.is_finite() => Some(Self::Int(f.trunc() as i64)),
            (Self::Bool(b), ValueType::Int) => Some(Self::Int(i64::from(*b))),
            (Self::Int(i), ValueType::Bool) => Some(Self::Bool(*i != 0)),
            (Self::Str(s), ValueType::Int) => s.trim().parse::<i64>().ok().map(Self::Int),
            (Self::Str(s), ValueType::Float) => s.trim().parse::<f64>().ok().map(Self::Float),
            (Self::Str(s), ValueType::Bool) => match s.trim() {
                "true" => Some(Self::Bool(true)),
                "false" => Some(Self::Bool(false)),
                _ => None,
            },
            _ => None,
        }
    }

    /// The engine-wide change predicate. See the module docs for the rules.
    #[must_use]
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Unset, Self::Unset) | (Self::Pending, Self::Pending) | (Self::Null, Self::Null) => {
                true
            }
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => {
                if ObjectId::of(a) == ObjectId::of(b) {
                    return true;
                }
                match (a.as_list(), b.as_list()) {
                    (Some(la), Some(lb)) => la.content_equals(lb),
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Object(obj) => write!(f, "{}@{:x}", obj.type_name(), ObjectId::of(obj).raw()),
            other => fmt::Display::fmt(other, f),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => f.write_str("<unset>"),
            Self::Pending => f.write_str("<pending>"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
            Self::Object(obj) => match obj.as_list() {
                Some(list) => {
                    f.write_str("[")?;
                    for (i, item) in list.snapshot().iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{item}")?;
                    }
                    f.write_str("]")
                }
                None => write!(f, "{}@{:x}", obj.type_name(), ObjectId::of(obj).raw()),
            },
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Self::Object(obj)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
