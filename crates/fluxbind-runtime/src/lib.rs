#![forbid(unsafe_code)]

//! Binding graph and change dispatch for fluxbind.
//!
//! This crate provides:
//! - [`Engine`]: listener registry, two-phase dispatch, binding contexts
//!   and loop detection behind one shared handle
//! - [`Expr`]: binding expressions, compiled into node trees by
//!   [`Engine::bind`]
//! - [`DestinationListener`]: the handle to one live binding
//! - [`BatchGuard`] and [`BindingScope`]: RAII control over delivery and
//!   binding lifetimes

pub mod bind;
pub mod binding;
pub mod context;
mod diagnostics;
mod dispatch;
pub mod engine;
pub mod event;
pub mod expr;
mod introspect;
pub mod ops;
mod recursion;
pub mod registry;
pub mod scope;

pub use bind::BindOptions;
pub use binding::BindingNode;
pub use binding::destination::DestinationListener;
pub use context::{BindingContext, BindingEvent, DeliveryFilter, ScopeId, ScopeProvider, SingleScope};
pub use engine::{Engine, WeakEngine};
pub use event::{BindingListener, EventDetail, EventInfo};
pub use expr::Expr;
pub use ops::{ArithOp, CondOp, UnaryOp};
pub use registry::{ListenerId, ListenerTarget, Registry, Subscription};
pub use scope::{BatchGuard, BindingScope};
