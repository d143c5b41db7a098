#![forbid(unsafe_code)]

//! Test harness and reference fixtures for fluxbind.
//!
//! - [`EventLog`] and [`RecordingListener`]: record deliveries in order
//! - [`ManualScopes`]: a scope provider tests can switch by hand
//! - model builders over [`PropertyBag`] and [`ObservableList`]
//! - [`values_json`]: a JSON view of an object's properties for assertions
//! - [`init_test_logging`] and [`capture_logs`]: `tracing` output in tests
//! - [`arb_scalar`]: proptest strategy for plain values

use std::cell::{Cell, RefCell};
use std::io;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use fluxbind_core::{BindError, ObjectRef, ObservableList, PropertyBag, Shape, Value};
use fluxbind_runtime::{BindingListener, Engine, EventInfo, ScopeId, ScopeProvider};
use proptest::prelude::*;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// Object with a fixed property set, tracked in the engine's side table.
#[must_use]
pub fn model(name: &str, props: &[&str]) -> ObjectRef {
    PropertyBag::new(&Shape::fixed(name, props.iter().copied()))
}

/// Object with a fixed property set and embedded listener storage.
#[must_use]
pub fn embedded_model(name: &str, props: &[&str]) -> ObjectRef {
    PropertyBag::with_embedded_listeners(&Shape::fixed(name, props.iter().copied()))
}

/// Object that gains properties on first write.
#[must_use]
pub fn dynamic_model(name: &str) -> ObjectRef {
    PropertyBag::dynamic(name)
}

/// Observable list holding `items`.
#[must_use]
pub fn list_of(items: impl IntoIterator<Item = Value>) -> ObjectRef {
    ObservableList::new(items.into_iter().collect())
}

/// Integers as an observable list.
#[must_use]
pub fn int_list(items: &[i64]) -> ObjectRef {
    list_of(items.iter().copied().map(Value::Int))
}

fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Unset => serde_json::Value::String("<unset>".to_string()),
        Value::Pending => serde_json::Value::String("<pending>".to_string()),
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(x) => serde_json::Number::from_f64(*x).map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Str(s) => serde_json::Value::String(s.to_string()),
        Value::Object(obj) => match obj.as_list() {
            Some(list) => serde_json::Value::Array(list.snapshot().iter().map(to_json).collect()),
            None => serde_json::Value::String(format!("{value:?}")),
        },
    }
}

/// Every property of `obj` as a JSON object, in slot order.
#[must_use]
pub fn values_json(obj: &ObjectRef) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    let mut slot = 0;
    while let Some(name) = obj.property_name(slot) {
        let value = obj.get_slot(slot).unwrap_or(Value::Unset);
        map.insert(name.to_string(), to_json(&value));
        slot += 1;
    }
    serde_json::Value::Object(map)
}

// ---------------------------------------------------------------------------
// Recording listeners
// ---------------------------------------------------------------------------

/// Shared, ordered record of deliveries.
#[derive(Clone, Default, Debug)]
pub struct EventLog(Rc<RefCell<Vec<String>>>);

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

type Action = Box<dyn Fn(&Engine, &EventInfo) -> Result<(), BindError>>;

/// Listener that writes `name:phase Type.prop` into an [`EventLog`].
pub struct RecordingListener {
    name: String,
    log: EventLog,
    reports_change: Cell<bool>,
    on_validate: Option<Action>,
}

impl RecordingListener {
    #[must_use]
    pub fn new(name: &str, log: &EventLog) -> Rc<Self> {
        Rc::new(Self {
            name: name.to_string(),
            log: log.clone(),
            reports_change: Cell::new(true),
            on_validate: None,
        })
    }

    /// Listener that also runs `action` on every applied validation.
    #[must_use]
    pub fn with_action(
        name: &str,
        log: &EventLog,
        action: impl Fn(&Engine, &EventInfo) -> Result<(), BindError> + 'static,
    ) -> Rc<Self> {
        Rc::new(Self {
            name: name.to_string(),
            log: log.clone(),
            reports_change: Cell::new(true),
            on_validate: Some(Box::new(action)),
        })
    }

    /// What a dependency query (`apply == false`) should answer.
    pub fn set_reports_change(&self, on: bool) {
        self.reports_change.set(on);
    }

    /// Upcast for the engine's listener API.
    #[must_use]
    pub fn as_listener(self: &Rc<Self>) -> Rc<dyn BindingListener> {
        Rc::clone(self) as Rc<dyn BindingListener>
    }

    fn record(&self, phase: &str, event: &EventInfo) {
        self.log.push(format!("{}:{} {}", self.name, phase, event.location()));
    }
}

impl BindingListener for RecordingListener {
    fn value_invalidated(&self, _engine: &Engine, event: &EventInfo, apply: bool) -> Result<bool, BindError> {
        if apply {
            self.record("invalidated", event);
        }
        Ok(self.reports_change.get())
    }

    fn value_validated(&self, engine: &Engine, event: &EventInfo, apply: bool) -> Result<bool, BindError> {
        if !apply {
            self.record("queried", event);
            return Ok(self.reports_change.get());
        }
        self.record("validated", event);
        if let Some(action) = &self.on_validate {
            action(engine, event)?;
        }
        Ok(true)
    }

    fn value_changed(&self, engine: &Engine, event: &EventInfo, apply: bool) -> Result<bool, BindError> {
        self.record("changed", event);
        if apply {
            if let Some(action) = &self.on_validate {
                action(engine, event)?;
            }
        }
        Ok(self.reports_change.get())
    }

    fn value_requested(&self, _engine: &Engine, event: &EventInfo) -> Result<(), BindError> {
        self.record("requested", event);
        Ok(())
    }

    fn listener_added(&self, _engine: &Engine, object: &ObjectRef, slot: Option<usize>) {
        let at = slot.map_or_else(|| "*".to_string(), |s| fluxbind_core::object::slot_label(object, s));
        self.log.push(format!("{}:added {}.{}", self.name, object.type_name(), at));
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

// ---------------------------------------------------------------------------
// Scopes
// ---------------------------------------------------------------------------

/// Scope provider whose current scope is set explicitly.
#[derive(Clone, Default, Debug)]
pub struct ManualScopes(Rc<Cell<ScopeId>>);

impl ManualScopes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, scope: ScopeId) {
        self.0.set(scope);
    }

    #[must_use]
    pub fn get(&self) -> ScopeId {
        self.0.get()
    }

    /// Switch to `scope` until the returned guard drops.
    #[must_use]
    pub fn enter(&self, scope: ScopeId) -> ScopeSwitch {
        let previous = self.0.replace(scope);
        ScopeSwitch {
            cell: Rc::clone(&self.0),
            previous,
        }
    }
}

impl ScopeProvider for ManualScopes {
    fn current_scope(&self) -> ScopeId {
        self.0.get()
    }
}

/// Restores the previous scope on drop.
pub struct ScopeSwitch {
    cell: Rc<Cell<ScopeId>>,
    previous: ScopeId,
}

impl Drop for ScopeSwitch {
    fn drop(&mut self) {
        self.cell.set(self.previous);
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Route `tracing` output to the test writer. Honors `RUST_LOG`; defaults
/// to `warn`. Safe to call from every test.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Ok(mut out) = self.0.lock() {
            out.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Capture {
    type Writer = Capture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run `f` with a thread-local subscriber at `filter` and return its
/// formatted output.
pub fn capture_logs<R>(filter: &str, f: impl FnOnce() -> R) -> (R, String) {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(capture.clone())
        .with_ansi(false)
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    let bytes = capture.0.lock().map(|b| b.clone()).unwrap_or_default();
    (out, String::from_utf8_lossy(&bytes).into_owned())
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Null, booleans, small integers and short strings.
pub fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1000i64..1000).prop_map(Value::Int),
        "[a-z]{0,6}".prop_map(Value::from),
    ]
}
