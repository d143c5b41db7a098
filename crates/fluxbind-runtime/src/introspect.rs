#![forbid(unsafe_code)]

//! Human-readable dumps of bindings and subscriptions.

use std::fmt::Write as _;

use fluxbind_core::object::slot_label;
use fluxbind_core::{EventMask, ObjectRef};

use crate::engine::Engine;

impl Engine {
    /// One line per binding whose destination is on `obj`:
    ///
    /// ```text
    /// Cart: 1 binding(s), 3 subscription(s)
    ///   #4 Cart.total := Cart.qty * Cart.price = 10 [valid]
    /// ```
    #[must_use]
    pub fn print_bindings(&self, obj: &ObjectRef) -> String {
        let bindings = self.bindings_for(obj);
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{}: {} binding(s), {} subscription(s)",
            obj.type_name(),
            bindings.len(),
            self.registry().total_for(obj)
        );
        for b in &bindings {
            let mut state = Vec::new();
            if b.is_valid() {
                state.push("valid");
            }
            if !b.is_active() {
                state.push("inactive");
            }
            if b.is_constant() {
                state.push("constant");
            }
            let _ = writeln!(out, "  #{} {} = {} [{}]", b.id(), b, b.value(), state.join(", "));
        }
        out
    }

    /// Who listens to `slot` of `obj` (object-level listeners included), in
    /// delivery order.
    #[must_use]
    pub fn describe_listeners(&self, obj: &ObjectRef, slot: Option<usize>) -> Vec<String> {
        let all = EventMask::ALL_CHANGES | EventMask::VALUE_REQUESTED | EventMask::LISTENER_ADDED;
        self.registry()
            .snapshot(obj, slot, all)
            .into_iter()
            .map(|sub| {
                let at = slot.map_or_else(|| "*".to_string(), |s| slot_label(obj, s));
                format!(
                    "{}.{} <- {} ({}, priority {})",
                    obj.type_name(),
                    at,
                    sub.target.describe(),
                    sub.mask.label(),
                    sub.priority
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::bind::BindOptions;
    use crate::engine::Engine;
    use crate::expr::Expr;
    use fluxbind_core::{ObjectRef, PropertyBag, Shape};

    #[test]
    fn dump_lists_each_binding() {
        let engine = Engine::new();
        let m: ObjectRef = PropertyBag::new(&Shape::fixed("Cart", ["qty", "price", "total"]));
        engine.set_property(&m, "qty", 2).unwrap();
        engine.set_property(&m, "price", 5).unwrap();
        engine
            .bind(
                &m,
                "total",
                Expr::path(&m, "qty") * Expr::path(&m, "price"),
                BindOptions::new(),
            )
            .unwrap();
        let dump = engine.print_bindings(&m);
        assert!(dump.starts_with("Cart: 1 binding(s), 2 subscription(s)"), "{dump}");
        assert!(dump.contains("Cart.total := Cart.qty * Cart.price = 10 [valid]"), "{dump}");
    }

    #[test]
    fn listeners_are_described_in_order() {
        let engine = Engine::new();
        let m: ObjectRef = PropertyBag::new(&Shape::fixed("M", ["a", "b"]));
        engine
            .bind(&m, "b", Expr::path(&m, "a"), BindOptions::new())
            .unwrap();
        let lines = engine.describe_listeners(&m, m.property_slot("a"));
        assert_eq!(lines, ["M.a <- M.a (changed, priority 0)"]);
    }
}
