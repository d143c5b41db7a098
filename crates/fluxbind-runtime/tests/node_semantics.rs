//! Behaviour of each expression variant once bound to a destination.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use fluxbind_core::{
    BindError, BindingFlags, EventMask, FnMethod, MethodRef, ObjectRef, RemoteCallback, RemoteError, RemoteMethod,
    Value, ValueType,
};
use fluxbind_harness::{EventLog, RecordingListener, capture_logs, int_list, model, values_json};
use fluxbind_runtime::{BindOptions, BindingScope, CondOp, Engine, Expr, UnaryOp};
use serde_json::json;

/// A method that counts its invocations and returns `tag(args...)`.
fn counted(tag: &'static str) -> (MethodRef, Rc<Cell<usize>>) {
    let calls = Rc::new(Cell::new(0));
    let seen = Rc::clone(&calls);
    let method = FnMethod::new(tag, move |_, args| {
        seen.set(seen.get() + 1);
        let rendered: Vec<String> = args.iter().map(ToString::to_string).collect();
        Ok(Value::str(format!("{tag}({})", rendered.join(","))))
    })
    .into_ref();
    (method, calls)
}

fn count_of(engine: &Engine, obj: &ObjectRef, prop: &str) -> usize {
    engine.registry().count(obj, obj.property_slot(prop))
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

#[test]
fn null_intermediate_makes_the_chain_unset() {
    let engine = Engine::new();
    let root = model("Root", &["child", "out"]);
    let h = engine
        .bind(&root, "out", Expr::path(&root, "child.name"), BindOptions::new())
        .unwrap();

    assert!(h.value().is_unset());
    assert_eq!(engine.get_property(&root, "out").unwrap(), Value::Null);
    assert!(engine.diagnostics().is_empty());

    let child = model("Child", &["name"]);
    engine.set_property(&child, "name", "ada").unwrap();
    engine.set_property(&root, "child", Value::object(child.clone())).unwrap();
    assert_eq!(engine.get_property(&root, "out").unwrap(), Value::str("ada"));

    engine.set_property(&child, "name", "grace").unwrap();
    assert_eq!(engine.get_property(&root, "out").unwrap(), Value::str("grace"));
}

#[test]
fn path_follows_a_replaced_intermediate() {
    let engine = Engine::new();
    let root = model("Root", &["child", "out"]);
    let first = model("Child", &["name"]);
    let second = model("Child", &["name"]);
    engine.set_property(&first, "name", "one").unwrap();
    engine.set_property(&second, "name", "two").unwrap();
    engine.set_property(&root, "child", Value::object(first.clone())).unwrap();
    engine
        .bind(&root, "out", Expr::path(&root, "child.name"), BindOptions::new())
        .unwrap();
    assert_eq!(count_of(&engine, &first, "name"), 1);

    engine.set_property(&root, "child", Value::object(second.clone())).unwrap();
    assert_eq!(engine.get_property(&root, "out").unwrap(), Value::str("two"));
    assert_eq!(count_of(&engine, &first, "name"), 0);
    assert_eq!(count_of(&engine, &second, "name"), 1);

    // The old child no longer drives the binding.
    engine.set_property(&first, "name", "stale").unwrap();
    assert_eq!(engine.get_property(&root, "out").unwrap(), Value::str("two"));
}

#[test]
fn selector_paths_start_from_a_computed_root() {
    let engine = Engine::new();
    let left = model("Side", &["name"]);
    let right = model("Side", &["name"]);
    engine.set_property(&left, "name", "L").unwrap();
    engine.set_property(&right, "name", "R").unwrap();
    let (l, r) = (left.clone(), right.clone());
    let pick = FnMethod::new("pick", move |_, args| {
        Ok(Value::object(if args[0].as_bool() == Some(true) { l.clone() } else { r.clone() }))
    })
    .into_ref();
    let m = model("M", &["left", "out"]);
    engine.set_property(&m, "left", true).unwrap();

    let h = engine
        .bind(
            &m,
            "out",
            Expr::call(&pick, vec![Expr::path(&m, "left")]).select("name"),
            BindOptions::new(),
        )
        .unwrap();
    assert_eq!(h.expression(), "pick(M.left).name");
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::str("L"));

    engine.set_property(&m, "left", false).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::str("R"));
    engine.set_property(&right, "name", "R2").unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::str("R2"));
}

// ---------------------------------------------------------------------------
// Reverse propagation
// ---------------------------------------------------------------------------

#[test]
fn bidirectional_round_trip_does_not_echo() {
    let engine = Engine::new();
    let m = model("M", &["x", "y"]);
    engine.set_property(&m, "x", 5).unwrap();
    engine
        .bind(&m, "y", Expr::path(&m, "x"), BindOptions::new().bidirectional())
        .unwrap();
    assert_eq!(engine.get_property(&m, "y").unwrap(), Value::Int(5));

    let log = EventLog::new();
    let mut watchers = Vec::new();
    for prop in ["x", "y"] {
        let l = RecordingListener::new(prop, &log);
        engine
            .add_listener(&m, Some(prop), &l.as_listener(), EventMask::VALUE_VALIDATED, 0)
            .unwrap();
        watchers.push(l);
    }
    let heard = |log: &EventLog| {
        let mut entries = log.entries();
        entries.sort();
        entries
    };

    engine.set_property(&m, "y", 7).unwrap();
    assert_eq!(engine.get_property(&m, "x").unwrap(), Value::Int(7));
    assert_eq!(heard(&log), ["x:validated M.x", "y:validated M.y"]);

    log.clear();
    engine.set_property(&m, "x", 9).unwrap();
    assert_eq!(engine.get_property(&m, "y").unwrap(), Value::Int(9));
    assert_eq!(heard(&log), ["x:validated M.x", "y:validated M.y"]);
    assert!(engine.diagnostics().is_empty());
}

#[test]
fn arithmetic_inverts_through_its_single_free_operand() {
    let engine = Engine::new();
    let m = model("M", &["x", "z"]);
    engine.set_property(&m, "x", 1).unwrap();
    engine
        .bind(
            &m,
            "z",
            Expr::path(&m, "x") + Expr::constant(3),
            BindOptions::new().bidirectional(),
        )
        .unwrap();
    assert_eq!(engine.get_property(&m, "z").unwrap(), Value::Int(4));

    engine.set_property(&m, "z", 10).unwrap();
    assert_eq!(engine.get_property(&m, "x").unwrap(), Value::Int(7));
    assert_eq!(engine.get_property(&m, "z").unwrap(), Value::Int(10));
}

#[test]
fn non_commutative_operators_invert_on_either_side() {
    let engine = Engine::new();
    let m = model("M", &["x", "y", "left", "right"]);
    engine.set_property(&m, "x", 2).unwrap();
    engine.set_property(&m, "y", 2).unwrap();
    engine
        .bind(&m, "left", Expr::constant(100) - Expr::path(&m, "x"), BindOptions::new().bidirectional())
        .unwrap();
    engine
        .bind(&m, "right", Expr::path(&m, "y") * Expr::constant(4), BindOptions::new().bidirectional())
        .unwrap();

    engine.set_property(&m, "left", 60).unwrap();
    engine.set_property(&m, "right", 12).unwrap();

    assert_eq!(engine.get_property(&m, "x").unwrap(), Value::Int(40));
    assert_eq!(engine.get_property(&m, "y").unwrap(), Value::Int(3));
}

#[test]
fn two_free_operands_cannot_be_inverted() {
    let engine = Engine::new();
    let m = model("M", &["x", "y", "z"]);
    engine.set_property(&m, "x", 1).unwrap();
    engine.set_property(&m, "y", 2).unwrap();
    let h = engine
        .bind(&m, "z", Expr::path(&m, "x") + Expr::path(&m, "y"), BindOptions::new().bidirectional())
        .unwrap();
    assert!(!h.is_reversible());

    engine.set_property(&m, "z", 10).unwrap();

    assert_eq!(engine.get_property(&m, "x").unwrap(), Value::Int(1));
    assert_eq!(engine.get_property(&m, "y").unwrap(), Value::Int(2));
    let diags = engine.take_diagnostics();
    assert_eq!(diags.len(), 1);
    assert!(matches!(diags[0], BindError::UnsupportedReverse { .. }));

    // Forward still works afterwards.
    engine.set_property(&m, "x", 5).unwrap();
    assert_eq!(engine.get_property(&m, "z").unwrap(), Value::Int(7));
}

#[test]
fn unary_cast_and_method_invert() {
    let engine = Engine::new();
    let m = model("M", &["a", "neg", "n", "text", "d", "doubled"]);
    engine.set_property(&m, "a", 3).unwrap();
    engine.set_property(&m, "n", 12).unwrap();
    engine.set_property(&m, "d", 4).unwrap();
    let double = FnMethod::new("double", |_, args| Ok(Value::Int(args[0].as_int().unwrap_or(0) * 2)))
        .with_inverse(|_, _, result| result.as_int().map(|r| Value::Int(r / 2)))
        .into_ref();
    let both = BindOptions::new().bidirectional();

    engine.bind_unary(&m, "neg", UnaryOp::Neg, Expr::path(&m, "a"), both).unwrap();
    engine.bind(&m, "text", Expr::path(&m, "n").cast(ValueType::Str), both).unwrap();
    engine
        .bind(&m, "doubled", Expr::call(&double, vec![Expr::path(&m, "d")]), both)
        .unwrap();
    assert_eq!(engine.get_property(&m, "neg").unwrap(), Value::Int(-3));
    assert_eq!(engine.get_property(&m, "text").unwrap(), Value::str("12"));
    assert_eq!(engine.get_property(&m, "doubled").unwrap(), Value::Int(8));

    engine.set_property(&m, "neg", 4).unwrap();
    engine.set_property(&m, "text", "42").unwrap();
    engine.set_property(&m, "doubled", 30).unwrap();

    assert_eq!(engine.get_property(&m, "a").unwrap(), Value::Int(-4));
    assert_eq!(engine.get_property(&m, "n").unwrap(), Value::Int(42));
    assert_eq!(engine.get_property(&m, "d").unwrap(), Value::Int(15));
    assert!(engine.diagnostics().is_empty());
}

#[test]
fn cast_rejects_values_it_cannot_convert_back() {
    let engine = Engine::new();
    let m = model("M", &["n", "text"]);
    engine.set_property(&m, "n", 1).unwrap();
    engine
        .bind(&m, "text", Expr::path(&m, "n").cast(ValueType::Str), BindOptions::new().bidirectional())
        .unwrap();

    engine.set_property(&m, "text", "not a number").unwrap();

    assert_eq!(engine.get_property(&m, "n").unwrap(), Value::Int(1));
    assert!(matches!(engine.diagnostics()[..], [BindError::UnsupportedReverse { .. }]));
}

#[test]
fn reverse_only_assignment_never_writes_its_destination() {
    let engine = Engine::new();
    let m = model("M", &["trigger", "source", "log"]);
    engine.set_property(&m, "source", "hello").unwrap();
    let h = engine
        .bind(
            &m,
            "trigger",
            Expr::assign(Expr::path(&m, "log"), Expr::path(&m, "source")),
            BindOptions::new().reverse(),
        )
        .unwrap();
    assert_eq!(h.expression(), "M.log = M.source");
    // Binding alone performs no write.
    assert_eq!(engine.get_property(&m, "log").unwrap(), Value::Null);

    engine.set_property(&m, "trigger", 1).unwrap();
    assert_eq!(engine.get_property(&m, "log").unwrap(), Value::str("hello"));
    assert_eq!(engine.get_property(&m, "trigger").unwrap(), Value::Int(1));

    // Source changes alone do nothing; the next trigger picks them up.
    engine.set_property(&m, "source", "again").unwrap();
    assert_eq!(engine.get_property(&m, "log").unwrap(), Value::str("hello"));
    engine.set_property(&m, "trigger", 2).unwrap();
    assert_eq!(engine.get_property(&m, "log").unwrap(), Value::str("again"));
    assert_eq!(engine.get_property(&m, "trigger").unwrap(), Value::Int(2));
}

#[test]
fn forward_assignment_writes_its_target_as_a_side_effect() {
    let engine = Engine::new();
    let m = model("M", &["source", "mirror", "out"]);
    engine.set_property(&m, "source", 1).unwrap();
    engine
        .bind_assignment(&m, "out", Expr::path(&m, "mirror"), Expr::path(&m, "source"), BindOptions::new())
        .unwrap();

    engine.set_property(&m, "source", 2).unwrap();

    assert_eq!(values_json(&m), json!({ "source": 2, "mirror": 2, "out": 2 }));
}

// ---------------------------------------------------------------------------
// Control flow
// ---------------------------------------------------------------------------

#[test]
fn ternary_runs_only_the_taken_branch() {
    let engine = Engine::new();
    let m = model("M", &["flag", "x", "y", "out"]);
    let (b, b_calls) = counted("b");
    let (c, c_calls) = counted("c");
    engine.set_property(&m, "flag", true).unwrap();
    engine.set_property(&m, "x", 1).unwrap();
    engine.set_property(&m, "y", 1).unwrap();

    engine
        .bind_ternary(
            &m,
            "out",
            Expr::path(&m, "flag"),
            Expr::call(&b, vec![Expr::path(&m, "x")]),
            Expr::call(&c, vec![Expr::path(&m, "y")]),
            BindOptions::new(),
        )
        .unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::str("b(1)"));
    assert_eq!((b_calls.get(), c_calls.get()), (1, 0));
    assert_eq!(count_of(&engine, &m, "y"), 0);

    engine.set_property(&m, "flag", false).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::str("c(1)"));
    assert_eq!((b_calls.get(), c_calls.get()), (1, 1));
    assert_eq!(count_of(&engine, &m, "x"), 0);
    assert_eq!(count_of(&engine, &m, "y"), 1);

    // The untaken branch is not invoked while its source changes.
    engine.set_property(&m, "x", 2).unwrap();
    engine.set_property(&m, "x", 3).unwrap();
    assert_eq!(b_calls.get(), 1);

    engine.set_property(&m, "flag", true).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::str("b(3)"));
    assert_eq!(b_calls.get(), 2);
}

#[test]
fn ternary_reverse_writes_into_the_taken_branch() {
    let engine = Engine::new();
    let m = model("M", &["flag", "a", "b", "out"]);
    engine.set_property(&m, "flag", false).unwrap();
    engine
        .bind_ternary(
            &m,
            "out",
            Expr::path(&m, "flag"),
            Expr::path(&m, "a"),
            Expr::path(&m, "b"),
            BindOptions::new().bidirectional(),
        )
        .unwrap();

    engine.set_property(&m, "out", "to-b").unwrap();

    assert_eq!(engine.get_property(&m, "a").unwrap(), Value::Null);
    assert_eq!(engine.get_property(&m, "b").unwrap(), Value::str("to-b"));
}

#[test]
fn logical_and_releases_operands_after_a_false() {
    let engine = Engine::new();
    let m = model("M", &["a", "b", "out"]);
    engine.set_property(&m, "a", true).unwrap();
    engine.set_property(&m, "b", true).unwrap();
    engine
        .bind(&m, "out", Expr::all(vec![Expr::path(&m, "a"), Expr::path(&m, "b")]), BindOptions::new())
        .unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Bool(true));
    assert_eq!(count_of(&engine, &m, "b"), 1);

    engine.set_property(&m, "a", false).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Bool(false));
    assert_eq!(count_of(&engine, &m, "b"), 0);

    engine.set_property(&m, "b", false).unwrap();
    engine.set_property(&m, "a", true).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Bool(false));
    assert_eq!(count_of(&engine, &m, "b"), 1);
}

#[test]
fn logical_or_stops_at_the_first_true() {
    let engine = Engine::new();
    let m = model("M", &["a", "b", "out"]);
    let calls = Rc::new(Cell::new(0));
    let seen = Rc::clone(&calls);
    let is_set = FnMethod::new("is_set", move |_, args| {
        seen.set(seen.get() + 1);
        Ok(Value::Bool(!args[0].is_null_like()))
    })
    .into_ref();
    engine.set_property(&m, "a", true).unwrap();

    engine
        .bind_conditional(
            &m,
            "out",
            CondOp::Or,
            vec![Expr::path(&m, "a"), Expr::call(&is_set, vec![Expr::path(&m, "b")])],
            BindOptions::new(),
        )
        .unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Bool(true));
    assert_eq!(calls.get(), 0);

    engine.set_property(&m, "a", false).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Bool(false));
    assert_eq!(calls.get(), 1);

    engine.set_property(&m, "b", 1).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Bool(true));
}

#[test]
fn comparisons_feed_conditions() {
    let engine = Engine::new();
    let m = model("M", &["n", "label"]);
    engine.set_property(&m, "n", 5).unwrap();
    let h = engine
        .bind(
            &m,
            "label",
            Expr::ternary(
                Expr::compare(CondOp::Gt, Expr::path(&m, "n"), Expr::constant(3)),
                Expr::constant("big"),
                Expr::constant("small"),
            ),
            BindOptions::new(),
        )
        .unwrap();
    assert_eq!(engine.get_property(&m, "label").unwrap(), Value::str("big"));
    engine.set_property(&m, "n", 1).unwrap();
    assert_eq!(engine.get_property(&m, "label").unwrap(), Value::str("small"));
    assert_eq!(h.expression(), r#"(M.n > 3) ? "big" : "small""#);
}

// ---------------------------------------------------------------------------
// Methods
// ---------------------------------------------------------------------------

#[test]
fn skip_null_methods_are_not_invoked_on_missing_arguments() {
    let engine = Engine::new();
    let m = model("M", &["name", "out"]);
    let calls = Rc::new(Cell::new(0));
    let seen = Rc::clone(&calls);
    let upper = FnMethod::new("upper", move |_, args| {
        seen.set(seen.get() + 1);
        Ok(Value::str(args[0].as_str().unwrap_or_default().to_uppercase()))
    })
    .skipping_nulls()
    .into_ref();

    engine
        .bind(&m, "out", Expr::call(&upper, vec![Expr::path(&m, "name")]), BindOptions::new())
        .unwrap();
    assert_eq!(calls.get(), 0);
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Null);

    engine.set_property(&m, "name", "ada").unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::str("ADA"));
    assert_eq!(calls.get(), 1);
}

#[test]
fn failing_methods_degrade_to_unset() {
    let engine = Engine::new();
    let m = model("M", &["a", "out"]);
    let fragile = FnMethod::new("fragile", |_, args| match args[0].as_int() {
        Some(0) => Err(BindError::evaluation("fragile(0)", "zero")),
        Some(n) => Ok(Value::Int(100 / n)),
        None => Ok(Value::Null),
    })
    .into_ref();
    engine.set_property(&m, "a", 4).unwrap();
    engine
        .bind(&m, "out", Expr::call(&fragile, vec![Expr::path(&m, "a")]), BindOptions::new())
        .unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Int(25));

    engine.set_property(&m, "a", 0).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Null);
    assert!(matches!(engine.diagnostics()[..], [BindError::Evaluation { .. }]));
}

#[test]
fn wrong_arity_is_reported_at_construction() {
    let engine = Engine::new();
    let m = model("M", &["a", "out"]);
    let one = FnMethod::new("one", |_, _| Ok(Value::Int(1))).with_arity(1).into_ref();

    let h = engine
        .bind(&m, "out", Expr::call(&one, vec![Expr::path(&m, "a"), Expr::constant(2)]), BindOptions::new())
        .unwrap();

    assert!(h.value().is_unset());
    assert!(matches!(engine.diagnostics()[..], [BindError::UnresolvedMethod { .. }]));
}

type PendingCalls = Rc<RefCell<Vec<(Vec<Value>, RemoteCallback)>>>;

fn remote(name: &'static str) -> (MethodRef, PendingCalls) {
    let pending: PendingCalls = Rc::default();
    let queue = Rc::clone(&pending);
    let method = RemoteMethod::new(name, move |args, done| {
        queue.borrow_mut().push((args.to_vec(), done));
    })
    .into_ref();
    (method, pending)
}

#[test]
fn remote_method_is_pending_until_its_callback_runs() {
    let engine = Engine::new();
    let m = model("M", &["q", "out"]);
    let (fetch, pending) = remote("fetch");
    engine.set_property(&m, "q", "a").unwrap();
    engine.set_property(&m, "out", "before").unwrap();

    let h = engine
        .bind(&m, "out", Expr::call(&fetch, vec![Expr::path(&m, "q")]), BindOptions::new())
        .unwrap();
    assert!(h.value().is_pending());
    // Nothing is written while the answer is outstanding.
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::str("before"));

    let (args, done) = pending.borrow_mut().remove(0);
    assert_eq!(args, [Value::str("a")]);
    done(Ok(Value::str("A")));

    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::str("A"));
    assert!(pending.borrow().is_empty());
}

#[test]
fn stale_remote_completions_are_dropped() {
    let engine = Engine::new();
    let m = model("M", &["q", "out"]);
    let (fetch, pending) = remote("fetch");
    engine.set_property(&m, "q", "a").unwrap();
    engine
        .bind(&m, "out", Expr::call(&fetch, vec![Expr::path(&m, "q")]), BindOptions::new())
        .unwrap();
    engine.set_property(&m, "q", "b").unwrap();

    let mut calls = std::mem::take(&mut *pending.borrow_mut());
    assert_eq!(calls.len(), 2);
    let (_, newer) = calls.pop().unwrap();
    let (_, older) = calls.pop().unwrap();

    newer(Ok(Value::str("B")));
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::str("B"));
    older(Ok(Value::str("A")));
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::str("B"));
}

#[test]
fn remote_failure_is_reported_and_unset() {
    let engine = Engine::new();
    let m = model("M", &["q", "out"]);
    let (fetch, pending) = remote("fetch");
    engine.set_property(&m, "q", 1).unwrap();
    engine.set_property(&m, "out", "before").unwrap();
    engine
        .bind(&m, "out", Expr::call(&fetch, vec![Expr::path(&m, "q")]), BindOptions::new())
        .unwrap();

    let (_, done) = pending.borrow_mut().remove(0);
    done(Err(RemoteError::new(503, "unavailable")));

    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Null);
    assert!(matches!(
        engine.diagnostics()[..],
        [BindError::RemoteFailure { code: 503, .. }]
    ));
}

#[test]
fn completion_after_removal_is_harmless() {
    let engine = Engine::new();
    let m = model("M", &["q", "out"]);
    let (fetch, pending) = remote("fetch");
    engine.set_property(&m, "q", 1).unwrap();
    let h = engine
        .bind(&m, "out", Expr::call(&fetch, vec![Expr::path(&m, "q")]), BindOptions::new())
        .unwrap();
    h.remove_listener().unwrap();

    let (_, done) = pending.borrow_mut().remove(0);
    done(Ok(Value::Int(7)));

    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Null);
}

// ---------------------------------------------------------------------------
// Arrays
// ---------------------------------------------------------------------------

#[test]
fn array_element_updates_only_for_its_index() {
    let engine = Engine::new();
    let m = model("M", &["items", "out"]);
    let items = int_list(&[10, 20, 30]);
    engine.set_property(&m, "items", Value::object(items.clone())).unwrap();
    let (show, calls) = counted("show");

    engine
        .bind(
            &m,
            "out",
            Expr::call(&show, vec![Expr::path(&m, "items").index(Expr::constant(1))]),
            BindOptions::new(),
        )
        .unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::str("show(20)"));
    assert_eq!(calls.get(), 1);

    engine.set_element(&items, 0, Value::Int(99)).unwrap();
    engine.set_element(&items, 2, Value::Int(99)).unwrap();
    assert_eq!(calls.get(), 1);

    engine.set_element(&items, 1, Value::Int(25)).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::str("show(25)"));
    assert_eq!(calls.get(), 2);

    // A size change re-reads the element at the watched index.
    engine.push_element(&items, Value::Int(40)).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::str("show(25)"));

    engine.remove_element(&items, 0).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::str("show(99)"));
}

#[test]
fn array_index_expressions_are_live() {
    let engine = Engine::new();
    let m = model("M", &["items", "i", "out"]);
    engine.set_property(&m, "items", Value::object(int_list(&[1, 2, 3]))).unwrap();
    engine.set_property(&m, "i", 0).unwrap();
    engine
        .bind_array_element(&m, "out", &m, "items", vec![Expr::path(&m, "i")], BindOptions::new())
        .unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Int(1));

    engine.set_property(&m, "i", 2).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Int(3));

    engine.set_property(&m, "items", Value::object(int_list(&[7, 8, 9]))).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Int(9));

    engine.set_property(&m, "i", 5).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Null);
    assert!(matches!(
        engine.diagnostics()[..],
        [BindError::InvalidIndex { index: 5, len: 3 }]
    ));
}

#[test]
fn nested_array_elements_write_back() {
    let engine = Engine::new();
    let m = model("M", &["grid", "cell"]);
    let row0 = int_list(&[1, 2]);
    let row1 = int_list(&[3, 4]);
    let grid = fluxbind_harness::list_of([Value::object(row0.clone()), Value::object(row1.clone())]);
    engine.set_property(&m, "grid", Value::object(grid)).unwrap();

    engine
        .bind(
            &m,
            "cell",
            Expr::path(&m, "grid").index(Expr::constant(1)).index(Expr::constant(0)),
            BindOptions::new().bidirectional(),
        )
        .unwrap();
    assert_eq!(engine.get_property(&m, "cell").unwrap(), Value::Int(3));

    engine.set_element(&row1, 0, Value::Int(30)).unwrap();
    assert_eq!(engine.get_property(&m, "cell").unwrap(), Value::Int(30));

    engine.set_property(&m, "cell", 33).unwrap();
    assert_eq!(row1.as_list().and_then(|l| l.get(0)), Some(Value::Int(33)));
    assert_eq!(row0.as_list().and_then(|l| l.get(0)), Some(Value::Int(1)));
}

#[test]
fn array_selector_indexes_a_computed_list() {
    let engine = Engine::new();
    let m = model("M", &["n", "out"]);
    let range = FnMethod::new("range", |_, args| {
        let n = args[0].as_int().unwrap_or(0);
        Ok(Value::list((0..n).map(|i| Value::Int(i * i))))
    })
    .into_ref();
    engine.set_property(&m, "n", 4).unwrap();

    engine
        .bind_array_selector(
            &m,
            "out",
            Expr::call(&range, vec![Expr::path(&m, "n")]),
            vec![Expr::constant(3)],
            BindOptions::new(),
        )
        .unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Int(9));

    engine.set_property(&m, "n", 2).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Null);
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

#[test]
fn constructors_skip_unset_arguments() {
    let engine = Engine::new();
    let m = model("M", &["child", "x", "point", "pair"]);
    let point = FnMethod::new("Point", |_, args| Ok(Value::str(format!("({},{})", args[0], args[1])))).into_ref();
    engine.set_property(&m, "x", 1).unwrap();

    engine
        .bind_new_object(
            &m,
            "point",
            &point,
            vec![Expr::path(&m, "x"), Expr::path(&m, "child.y")],
            BindOptions::new(),
        )
        .unwrap();
    engine
        .bind_new_array(&m, "pair", vec![Expr::path(&m, "x"), Expr::constant(2)], BindOptions::new())
        .unwrap();
    assert_eq!(engine.get_property(&m, "point").unwrap(), Value::Null);
    assert_eq!(values_json(&m)["pair"], json!([1, 2]));

    let child = model("Child", &["y"]);
    engine.set_property(&child, "y", 5).unwrap();
    engine.set_property(&m, "child", Value::object(child)).unwrap();
    assert_eq!(engine.get_property(&m, "point").unwrap(), Value::str("(1,5)"));

    engine.set_property(&m, "x", 3).unwrap();
    assert_eq!(values_json(&m)["pair"], json!([3, 2]));
}

#[test]
fn constructed_values_cannot_be_written_back() {
    let engine = Engine::new();
    let m = model("M", &["x", "pair"]);
    engine.set_property(&m, "x", 1).unwrap();
    engine
        .bind(&m, "pair", Expr::array(vec![Expr::path(&m, "x")]), BindOptions::new().bidirectional())
        .unwrap();

    engine.set_property(&m, "pair", "replaced").unwrap();

    assert_eq!(engine.get_property(&m, "x").unwrap(), Value::Int(1));
    assert!(matches!(
        engine.diagnostics()[..],
        [BindError::UnsupportedReverse { .. }]
    ));
}

// ---------------------------------------------------------------------------
// Destinations and flags
// ---------------------------------------------------------------------------

#[test]
fn a_second_forward_binding_replaces_the_first() {
    let engine = Engine::new();
    let m = model("M", &["a", "b", "out"]);
    let first = engine.bind(&m, "out", Expr::path(&m, "a"), BindOptions::new()).unwrap();
    let second = engine.bind(&m, "out", Expr::path(&m, "b"), BindOptions::new()).unwrap();

    assert!(first.is_removed());
    assert!(!second.is_removed());
    assert_eq!(count_of(&engine, &m, "a"), 0);

    engine.set_property(&m, "a", 1).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Null);
    engine.set_property(&m, "b", 2).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Int(2));
}

#[test]
fn reverse_only_bindings_accumulate() {
    let engine = Engine::new();
    let m = model("M", &["a", "b", "out"]);
    let first = engine.bind(&m, "out", Expr::path(&m, "a"), BindOptions::new().reverse()).unwrap();
    let second = engine.bind(&m, "out", Expr::path(&m, "b"), BindOptions::new().reverse()).unwrap();
    assert!(!first.is_removed() && !second.is_removed());

    engine.set_property(&m, "out", 8).unwrap();

    assert_eq!(engine.get_property(&m, "a").unwrap(), Value::Int(8));
    assert_eq!(engine.get_property(&m, "b").unwrap(), Value::Int(8));
}

#[test]
fn chained_destination_follows_its_path() {
    let engine = Engine::new();
    let src = model("Src", &["v"]);
    let owner = model("Owner", &["child"]);
    let first = model("Child", &["name"]);
    let second = model("Child", &["name"]);
    engine.set_property(&owner, "child", Value::object(first.clone())).unwrap();
    engine.set_property(&src, "v", "x").unwrap();

    let h = engine
        .bind_to(Expr::path(&owner, "child.name"), Expr::path(&src, "v"), BindOptions::new())
        .unwrap();
    assert_eq!(h.to_string(), "Owner.child.name := Src.v");
    assert_eq!(engine.get_property(&first, "name").unwrap(), Value::str("x"));

    engine.set_property(&owner, "child", Value::object(second.clone())).unwrap();
    engine.set_property(&src, "v", "y").unwrap();
    assert_eq!(engine.get_property(&first, "name").unwrap(), Value::str("x"));
    assert_eq!(engine.get_property(&second, "name").unwrap(), Value::str("y"));
}

#[test]
fn bidirectional_chained_destination_writes_back() {
    let engine = Engine::new();
    let src = model("Src", &["v"]);
    let owner = model("Owner", &["child"]);
    let child = model("Child", &["name"]);
    engine.set_property(&owner, "child", Value::object(child.clone())).unwrap();
    engine.set_property(&src, "v", "x").unwrap();
    engine
        .bind_to(Expr::path(&owner, "child.name"), Expr::path(&src, "v"), BindOptions::new().bidirectional())
        .unwrap();

    engine.set_property(&child, "name", "edited").unwrap();

    assert_eq!(engine.get_property(&src, "v").unwrap(), Value::str("edited"));
    assert!(engine.diagnostics().is_empty());
}

#[test]
fn chained_destination_must_be_assignable() {
    let engine = Engine::new();
    let m = model("M", &["a"]);
    let err = engine
        .bind_to(Expr::constant(1), Expr::path(&m, "a"), BindOptions::new())
        .unwrap_err();
    assert!(matches!(err, BindError::UnsupportedReverse { .. }));
}

#[test]
fn skip_null_keeps_the_last_real_value() {
    let engine = Engine::new();
    let m = model("M", &["a", "out"]);
    engine.set_property(&m, "out", 1).unwrap();
    engine
        .bind(&m, "out", Expr::path(&m, "a"), BindOptions::new().flags(BindingFlags::SKIP_NULL))
        .unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Int(1));

    engine.set_property(&m, "a", 2).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Int(2));
    engine.set_property(&m, "a", Value::Null).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Int(2));
}

#[test]
fn no_initial_waits_for_the_first_change() {
    let engine = Engine::new();
    let m = model("M", &["a", "out"]);
    engine.set_property(&m, "a", 5).unwrap();
    engine
        .bind(&m, "out", Expr::path(&m, "a"), BindOptions::new().flags(BindingFlags::NO_INITIAL))
        .unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Null);

    engine.set_property(&m, "a", 6).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Int(6));
}

#[test]
fn inactive_bindings_start_paused() {
    let engine = Engine::new();
    let m = model("M", &["a", "out"]);
    engine.set_property(&m, "a", 5).unwrap();
    let h = engine
        .bind(&m, "out", Expr::path(&m, "a"), BindOptions::new().flags(BindingFlags::INACTIVE))
        .unwrap();
    assert!(!h.is_active());
    assert_eq!(count_of(&engine, &m, "a"), 0);
    engine.set_property(&m, "a", 6).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Null);

    h.activate(true).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Int(6));
    assert_eq!(count_of(&engine, &m, "a"), 1);

    h.activate(false).unwrap();
    engine.set_property(&m, "a", 7).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Int(6));
}

#[test]
fn removing_twice_is_reported_and_harmless() {
    let engine = Engine::new();
    let m = model("M", &["a", "b", "out"]);
    let h = engine.bind(&m, "out", Expr::path(&m, "a"), BindOptions::new()).unwrap();

    h.remove_listener().unwrap();
    let err = h.remove_listener().unwrap_err();
    assert!(matches!(err, BindError::AlreadyRemoved { .. }));
    assert!(matches!(engine.diagnostics()[..], [BindError::AlreadyRemoved { .. }]));
    assert_eq!(engine.registry().total_for(&m), 0);

    engine.bind(&m, "out", Expr::path(&m, "b"), BindOptions::new()).unwrap();
    engine.set_property(&m, "b", 3).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Int(3));
}

#[test]
fn remove_bindings_and_scopes_release_everything() {
    let engine = Engine::new();
    let src = model("Src", &["a"]);
    let view = model("View", &["x", "y", "z"]);
    engine.bind(&view, "x", Expr::path(&src, "a"), BindOptions::new()).unwrap();
    engine.bind(&view, "y", Expr::path(&src, "a") * Expr::constant(2), BindOptions::new()).unwrap();
    {
        let mut scope = BindingScope::new();
        scope.hold(engine.bind(&view, "z", Expr::path(&src, "a"), BindOptions::new()).unwrap());
        assert_eq!(engine.bindings_for(&view).len(), 3);
    }
    assert_eq!(engine.bindings_for(&view).len(), 2);

    assert_eq!(engine.remove_bindings(&view), 2);
    assert_eq!(engine.binding_count(), 0);
    assert_eq!(engine.registry().total_for(&src), 0);
}

#[test]
fn dropping_a_scope_tears_down_two_way_bindings_cleanly() {
    let engine = Engine::new();
    let src = model("Src", &["a"]);
    let view = model("View", &["x"]);

    let ((), logs) = capture_logs("fluxbind_runtime=debug", || {
        let mut scope = BindingScope::new();
        scope.hold(
            engine
                .bind(&view, "x", Expr::path(&src, "a"), BindOptions::new().bidirectional())
                .unwrap(),
        );
        engine.set_property(&view, "x", 3).unwrap();
        assert_eq!(engine.get_property(&src, "a").unwrap(), Value::Int(3));
    });

    assert!(!logs.contains("teardown failed"), "{logs}");
    assert_eq!(engine.binding_count(), 0);
    assert_eq!(engine.registry().total_for(&src), 0);
    assert_eq!(engine.registry().total_for(&view), 0);
    assert!(engine.diagnostics().is_empty());
}

#[test]
fn refresh_rewrites_a_tampered_destination() {
    let engine = Engine::new();
    let m = model("M", &["a", "out"]);
    engine.set_property(&m, "a", 1).unwrap();
    let h = engine.bind(&m, "out", Expr::path(&m, "a"), BindOptions::new()).unwrap();
    let slot = m.property_slot("out").unwrap();

    m.set_slot(slot, Value::Int(99)).unwrap();
    engine.refresh_bindings(&m).unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Int(1));

    m.set_slot(slot, Value::Int(98)).unwrap();
    h.refresh().unwrap();
    assert_eq!(engine.get_property(&m, "out").unwrap(), Value::Int(1));
}

#[test]
fn string_concatenation_renders_missing_values() {
    let engine = Engine::new();
    let m = model("M", &["first", "last", "full"]);
    engine.set_property(&m, "first", "Ada").unwrap();
    engine
        .bind(
            &m,
            "full",
            Expr::path(&m, "first") + Expr::constant(" ") + Expr::path(&m, "last"),
            BindOptions::new(),
        )
        .unwrap();
    engine.set_property(&m, "last", "Lovelace").unwrap();
    assert_eq!(engine.get_property(&m, "full").unwrap(), Value::str("Ada Lovelace"));
}
