#![forbid(unsafe_code)]

//! Core: values, sentinels, and the host object contract for fluxbind.
//!
//! This crate has no knowledge of the binding graph. It defines what flows
//! through it ([`value::Value`]), what it observes ([`object::BindableObject`],
//! [`list::ObservableList`]), what it calls ([`method::Method`]), and how it
//! reports failure ([`error::BindError`]).

pub mod config;
pub mod error;
pub mod flags;
pub mod list;
#[cfg(feature = "tracing-json")]
pub mod logging;
pub mod method;
pub mod object;
pub mod value;

pub use config::EngineConfig;
pub use error::{BindError, LoopFrame};
pub use flags::{BindingDirection, BindingFlags, DeliveryMode, EventMask};
pub use list::ObservableList;
pub use method::{FnMethod, Method, MethodRef, RemoteCallback, RemoteError, RemoteMethod, RemoteResult};
pub use object::{BindableObject, ListenerStorage, ObjectId, ObjectRef, PropertyBag, Shape, WeakObjectRef};
pub use value::{Value, ValueType};
