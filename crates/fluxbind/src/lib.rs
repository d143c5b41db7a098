#![forbid(unsafe_code)]

//! fluxbind public facade.
//!
//! Re-exports the value model from `fluxbind-core` and the engine from
//! `fluxbind-runtime`. Most hosts only need the [`prelude`].
//!
//! ```
//! use fluxbind::prelude::*;
//!
//! let engine = Engine::new();
//! let form: ObjectRef = PropertyBag::new(&Shape::fixed("Form", ["first", "last", "full"]));
//! engine.set_property(&form, "first", "Ada").unwrap();
//! engine.set_property(&form, "last", "Lovelace").unwrap();
//!
//! let full = Expr::path(&form, "first") + Expr::constant(" ") + Expr::path(&form, "last");
//! engine.bind(&form, "full", full, BindOptions::new()).unwrap();
//! assert_eq!(engine.get_property(&form, "full").unwrap(), Value::from("Ada Lovelace"));
//! ```

pub use fluxbind_core as model;
pub use fluxbind_runtime as runtime;

pub use fluxbind_core::{
    BindError, BindableObject, BindingDirection, BindingFlags, DeliveryMode, EngineConfig, EventMask, FnMethod,
    LoopFrame, Method, MethodRef, ObjectId, ObjectRef, ObservableList, PropertyBag, RemoteMethod, Shape, Value,
    ValueType,
};
pub use fluxbind_runtime::{
    ArithOp, BatchGuard, BindOptions, BindingListener, BindingScope, CondOp, DestinationListener, Engine, EventDetail,
    EventInfo, Expr, ScopeId, ScopeProvider, SingleScope, Subscription, UnaryOp,
};

#[cfg(feature = "tracing-json")]
pub use fluxbind_core::logging::init_json_logging;

/// Everything a typical host needs.
pub mod prelude {
    pub use crate::{
        ArithOp, BindError, BindOptions, BindableObject, BindingDirection, BindingFlags, BindingListener,
        BindingScope, CondOp, DestinationListener, Engine, EngineConfig, EventMask, Expr, FnMethod, ObjectRef,
        ObservableList, PropertyBag, Shape, UnaryOp, Value,
    };
}
