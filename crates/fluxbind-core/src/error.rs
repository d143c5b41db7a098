#![forbid(unsafe_code)]

//! Error taxonomy for the binding engine.
//!
//! | Variant | Raised by | Policy |
//! |---------|-----------|--------|
//! | `Evaluation`, `PropertyAccess`, `TypeMismatch`, `InvalidIndex` | node evaluation | contained; node value becomes UNSET |
//! | `UnsupportedReverse` | reverse propagation | reported; reverse write skipped |
//! | `BindingLoop` | dispatcher | unwinds to the outermost dispatch frame |
//! | `ListenerNotFound`, `AlreadyRemoved` | registry / teardown | reported; execution continues |
//! | `UnresolvedProperty`, `UnresolvedMethod` | construction | reported; node stays UNSET |
//! | `RemoteFailure` | async method callback | contained; node value becomes UNSET |

use std::fmt;

use crate::object::ObjectId;

/// One recorded dispatch frame, kept once recursion passes the threshold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopFrame {
    pub object: ObjectId,
    pub type_name: String,
    pub property: String,
    pub listener: String,
}

impl fmt::Display for LoopFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}",
            self.type_name, self.property, self.listener
        )
    }
}

/// Errors and diagnostics produced by the binding engine.
#[derive(Debug, Clone)]
pub enum BindError {
    /// An expression failed to evaluate (arithmetic fault, method failure).
    Evaluation { expr: String, reason: String },
    /// A host property read or write failed.
    PropertyAccess {
        type_name: String,
        property: String,
        reason: String,
    },
    /// A property name did not resolve on the object's shape.
    UnresolvedProperty { type_name: String, property: String },
    /// A method could not be resolved or has the wrong arity.
    UnresolvedMethod { name: String, reason: String },
    /// Reverse propagation is impossible for this expression.
    UnsupportedReverse { expr: String, reason: String },
    /// Dispatch recursed into a cycle.
    BindingLoop { frames: Vec<LoopFrame> },
    /// `remove_listener` found no matching subscription.
    ListenerNotFound {
        object: String,
        property: String,
        listener: String,
    },
    /// A binding was removed twice.
    AlreadyRemoved { binding: String },
    /// An asynchronous method reported failure.
    RemoteFailure {
        method: String,
        code: i32,
        message: String,
    },
    /// An array index was out of range or not an integer.
    InvalidIndex { index: i64, len: usize },
    /// A value had the wrong type for the operation.
    TypeMismatch { expected: String, found: String },
}

impl BindError {
    #[must_use]
    pub fn evaluation(expr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Evaluation {
            expr: expr.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn unsupported_reverse(expr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedReverse {
            expr: expr.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn unresolved_property(type_name: impl Into<String>, property: impl Into<String>) -> Self {
        Self::UnresolvedProperty {
            type_name: type_name.into(),
            property: property.into(),
        }
    }

    #[must_use]
    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Whether this is a binding-loop failure.
    #[must_use]
    pub fn is_loop(&self) -> bool {
        matches!(self, Self::BindingLoop { .. })
    }

    /// Short machine-readable category.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Evaluation { .. } => "evaluation",
            Self::PropertyAccess { .. } => "property-access",
            Self::UnresolvedProperty { .. } => "unresolved-property",
            Self::UnresolvedMethod { .. } => "unresolved-method",
            Self::UnsupportedReverse { .. } => "unsupported-reverse",
            Self::BindingLoop { .. } => "binding-loop",
            Self::ListenerNotFound { .. } => "listener-not-found",
            Self::AlreadyRemoved { .. } => "already-removed",
            Self::RemoteFailure { .. } => "remote-failure",
            Self::InvalidIndex { .. } => "invalid-index",
            Self::TypeMismatch { .. } => "type-mismatch",
        }
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Evaluation { expr, reason } => {
                write!(f, "evaluation of '{expr}' failed: {reason}")
            }
            Self::PropertyAccess {
                type_name,
                property,
                reason,
            } => write!(f, "cannot access {type_name}.{property}: {reason}"),
            Self::UnresolvedProperty {
                type_name,
                property,
            } => write!(f, "no property '{property}' on {type_name}"),
            Self::UnresolvedMethod { name, reason } => {
                write!(f, "cannot resolve method '{name}': {reason}")
            }
            Self::UnsupportedReverse { expr, reason } => {
                write!(f, "reverse binding not supported for '{expr}': {reason}")
            }
            Self::BindingLoop { frames } => {
                write!(f, "recursive binding loop detected ({} frames)", frames.len())?;
                for frame in frames {
                    write!(f, "\n  {frame}")?;
                }
                Ok(())
            }
            Self::ListenerNotFound {
                object,
                property,
                listener,
            } => write!(
                f,
                "no listener {listener} registered on {object}.{property}"
            ),
            Self::AlreadyRemoved { binding } => {
                write!(f, "binding '{binding}' was already removed")
            }
            Self::RemoteFailure {
                method,
                code,
                message,
            } => write!(f, "remote method '{method}' failed with code {code}: {message}"),
            Self::InvalidIndex { index, len } => {
                write!(f, "index {index} out of range for length {len}")
            }
            Self::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {expected}, found {found}")
            }
        }
    }
}

impl std::error::Error for BindError {}
