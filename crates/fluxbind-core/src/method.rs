#![forbid(unsafe_code)]

//! Method and constructor hooks.
//!
//! A [`Method`] is anything a binding can call: an instance method, a static
//! function, or a constructor. Methods may be *remote*: they return
//! immediately and report their result later through a [`RemoteCallback`],
//! which the engine models with the PENDING sentinel.

use std::fmt;
use std::rc::Rc;

use crate::error::BindError;
use crate::value::Value;

/// Failure reported by a remote method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteError {
    pub code: i32,
    pub message: String,
}

impl RemoteError {
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RemoteError {}

/// Result delivered to a remote callback.
pub type RemoteResult = Result<Value, RemoteError>;

/// Completion callback for a remote method. May be invoked synchronously or
/// at any later point; invoking it after the binding was removed is harmless.
pub type RemoteCallback = Box<dyn FnOnce(RemoteResult)>;

/// A callable the engine can invoke from a method-call node.
pub trait Method {
    fn name(&self) -> &str;

    /// Expected argument count, when fixed. Checked once at construction.
    fn arity(&self) -> Option<usize> {
        None
    }

    /// Invoke synchronously. `this` is the receiver, if any.
    fn invoke(&self, this: Option<&Value>, args: &[Value]) -> Result<Value, BindError>;

    /// When true, any null or UNSET argument yields UNSET without invoking.
    fn skip_nulls(&self) -> bool {
        false
    }

    /// When true, the engine calls [`invoke_remote`](Self::invoke_remote).
    fn is_remote(&self) -> bool {
        false
    }

    /// Start an asynchronous invocation and report through `done`.
    fn invoke_remote(&self, this: Option<&Value>, args: &[Value], done: RemoteCallback) {
        done(
            self.invoke(this, args)
                .map_err(|e| RemoteError::new(-1, e.to_string())),
        );
    }

    /// Whether [`invert`](Self::invert) is implemented.
    fn has_inverse(&self) -> bool {
        false
    }

    /// Given the desired result, compute the value argument `slot` must take
    /// with all other arguments held at `args`.
    fn invert(&self, _args: &[Value], _slot: usize, _result: &Value) -> Option<Value> {
        None
    }
}

/// Shared handle to a method.
pub type MethodRef = Rc<dyn Method>;

type InvokeFn = dyn Fn(Option<&Value>, &[Value]) -> Result<Value, BindError>;
type InvertFn = dyn Fn(&[Value], usize, &Value) -> Option<Value>;
type RemoteFn = dyn Fn(&[Value], RemoteCallback);

/// Closure-backed [`Method`].
///
/// ```
/// use fluxbind_core::method::FnMethod;
/// use fluxbind_core::value::Value;
///
/// let double = FnMethod::new("double", |_, args| {
///     Ok(Value::Int(args[0].as_int().unwrap_or(0) * 2))
/// })
/// .with_inverse(|_, _, result| result.as_int().map(|r| Value::Int(r / 2)))
/// .into_ref();
/// assert!(double.has_inverse());
/// ```
pub struct FnMethod {
    name: String,
    invoke: Box<InvokeFn>,
    inverse: Option<Box<InvertFn>>,
    skip_nulls: bool,
    arity: Option<usize>,
}

impl FnMethod {
    pub fn new(
        name: impl Into<String>,
        invoke: impl Fn(Option<&Value>, &[Value]) -> Result<Value, BindError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            invoke: Box::new(invoke),
            inverse: None,
            skip_nulls: false,
            arity: None,
        }
    }

    /// Short-circuit to UNSET on null arguments.
    #[must_use]
    pub fn skipping_nulls(mut self) -> Self {
        self.skip_nulls = true;
        self
    }

    #[must_use]
    pub fn with_arity(mut self, arity: usize) -> Self {
        self.arity = Some(arity);
        self
    }

    #[must_use]
    pub fn with_inverse(
        mut self,
        inverse: impl Fn(&[Value], usize, &Value) -> Option<Value> + 'static,
    ) -> Self {
        self.inverse = Some(Box::new(inverse));
        self
    }

    #[must_use]
    pub fn into_ref(self) -> MethodRef {
        Rc::new(self)
    }
}

impl Method for FnMethod {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, this: Option<&Value>, args: &[Value]) -> Result<Value, BindError> {
        (self.invoke)(this, args)
    }

    fn arity(&self) -> Option<usize> {
        self.arity
    }

    fn skip_nulls(&self) -> bool {
        self.skip_nulls
    }

    fn has_inverse(&self) -> bool {
        self.inverse.is_some()
    }

    fn invert(&self, args: &[Value], slot: usize, result: &Value) -> Option<Value> {
        self.inverse.as_ref().and_then(|inv| inv(args, slot, result))
    }
}

impl fmt::Debug for FnMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMethod")
            .field("name", &self.name)
            .field("skip_nulls", &self.skip_nulls)
            .field("has_inverse", &self.inverse.is_some())
            .finish()
    }
}

/// A [`Method`] that always completes asynchronously through a host hook.
pub struct RemoteMethod {
    name: String,
    dispatch: Box<RemoteFn>,
}

impl RemoteMethod {
    pub fn new(name: impl Into<String>, dispatch: impl Fn(&[Value], RemoteCallback) + 'static) -> Self {
        Self {
            name: name.into(),
            dispatch: Box::new(dispatch),
        }
    }

    #[must_use]
    pub fn into_ref(self) -> MethodRef {
        Rc::new(self)
    }
}

impl Method for RemoteMethod {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, _this: Option<&Value>, _args: &[Value]) -> Result<Value, BindError> {
        Err(BindError::evaluation(
            self.name.clone(),
            "remote method cannot be invoked synchronously",
        ))
    }

    fn is_remote(&self) -> bool {
        true
    }

    fn invoke_remote(&self, _this: Option<&Value>, args: &[Value], done: RemoteCallback) {
        (self.dispatch)(args, done);
    }
}

impl fmt::Debug for RemoteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMethod")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
