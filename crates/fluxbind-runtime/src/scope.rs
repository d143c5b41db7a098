#![forbid(unsafe_code)]

//! RAII helpers: batches and binding lifetimes.
//!
//! [`BatchGuard`] defers synchronous validation in the current scope until
//! the outermost guard is dropped. [`BindingScope`] owns a group of bindings
//! and removes them all when it goes away.
//!
//! # Invariants
//!
//! 1. Inside a batch, invalidation still happens immediately; only
//!    validation waits.
//! 2. Nested batches flush once, when the outermost one ends.
//! 3. Dropping a [`BindingScope`] removes each binding it holds exactly
//!    once; bindings already removed elsewhere are skipped silently.

use fluxbind_core::BindError;
use tracing::debug;

use crate::binding::destination::DestinationListener;
use crate::context::ScopeId;
use crate::engine::Engine;

/// Open batch in one scope. Created by [`Engine::batch`].
#[must_use = "a batch ends as soon as its guard is dropped"]
pub struct BatchGuard {
    engine: Engine,
    scope: ScopeId,
    finished: bool,
}

impl Engine {
    /// Start (or nest) a batch in the current scope.
    pub fn batch(&self) -> BatchGuard {
        let scope = self.current_scope();
        let depth = {
            let mut contexts = self.inner.contexts.borrow_mut();
            let ctx = contexts.entry(scope).or_default();
            ctx.batch_depth += 1;
            ctx.batch_depth
        };
        debug!(%scope, depth, "batch opened");
        BatchGuard {
            engine: self.clone(),
            scope,
            finished: false,
        }
    }

    /// Whether `scope` has an open batch.
    #[must_use]
    pub fn in_batch(&self, scope: ScopeId) -> bool {
        self.inner
            .contexts
            .borrow()
            .get(&scope)
            .is_some_and(|ctx| ctx.in_batch())
    }
}

impl BatchGuard {
    #[must_use]
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// End the batch now and return the flush result instead of reporting
    /// it.
    pub fn finish(mut self) -> Result<(), BindError> {
        self.finished = true;
        self.close()
    }

    fn close(&self) -> Result<(), BindError> {
        let outermost = {
            let mut contexts = self.engine.inner.contexts.borrow_mut();
            match contexts.get_mut(&self.scope) {
                Some(ctx) => {
                    ctx.batch_depth = ctx.batch_depth.saturating_sub(1);
                    ctx.batch_depth == 0
                }
                None => false,
            }
        };
        if !outermost {
            return Ok(());
        }
        debug!(scope = %self.scope, queued = self.engine.queued_len(self.scope), "batch closed");
        self.engine.flush_scope(self.scope)
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.close() {
            // Loops were reported by the outermost dispatch frame.
            if !err.is_loop() {
                self.engine.report(err);
            }
        }
    }
}

impl std::fmt::Debug for BatchGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchGuard")
            .field("scope", &self.scope)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Owns bindings and removes them on drop.
///
/// ```
/// use fluxbind_core::{ObjectRef, PropertyBag, Shape};
/// use fluxbind_runtime::{BindOptions, BindingScope, Engine, Expr};
///
/// let engine = Engine::new();
/// let m: ObjectRef = PropertyBag::new(&Shape::fixed("M", ["a", "b"]));
/// {
///     let mut scope = BindingScope::new();
///     scope.hold(engine.bind(&m, "b", Expr::path(&m, "a"), BindOptions::new()).unwrap());
///     assert_eq!(engine.binding_count(), 1);
/// }
/// assert_eq!(engine.binding_count(), 0);
/// ```
#[derive(Default)]
pub struct BindingScope {
    bindings: Vec<DestinationListener>,
}

impl BindingScope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a binding.
    pub fn hold(&mut self, binding: DestinationListener) -> &mut Self {
        self.bindings.push(binding);
        self
    }

    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Pause or resume every binding held.
    pub fn activate(&self, on: bool) -> Result<(), BindError> {
        self.bindings.iter().try_for_each(|b| b.activate(on))
    }

    /// Remove every binding now; the scope stays usable.
    pub fn clear(&mut self) {
        for binding in self.bindings.drain(..) {
            if binding.is_removed() {
                continue;
            }
            if let Err(err) = binding.remove_listener() {
                debug!(error = %err, "binding scope teardown failed");
            }
        }
    }
}

impl Drop for BindingScope {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for BindingScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingScope")
            .field("binding_count", &self.bindings.len())
            .finish()
    }
}
