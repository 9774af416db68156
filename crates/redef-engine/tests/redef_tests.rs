//! Integration tests for the redefinition engine
//!
//! Tests cover:
//! - Replacement installation and unconditional restoration
//! - Call recording: counts, receivers, argument snapshots, global order
//! - Wiretap and empty behaviors
//! - Short-name disambiguation and recorder views
//! - Error propagation and batch-atomic validation
//! - Nested sessions on disjoint descriptors

use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use redef_engine::{
    Arity, BlockFn, MethodDef, MethodScope, Receiver, Redef, RedefError, ReplacementBehavior,
    Target, TypeHandle, TypeRegistry, Value,
};

/// A stateful `Counter` type: `#increment` bumps and returns a per-object
/// count, `.make` builds instances.
fn setup() -> (Redef, TypeHandle) {
    let registry = Rc::new(TypeRegistry::new());
    let counter = registry.register("Counter");
    counter.define_instance_method(
        "increment",
        MethodDef::public(Arity::Fixed(0), |recv, _, _| {
            if let Receiver::Object(obj) = recv {
                let next = match obj.get("count") {
                    Some(Value::Int(n)) => n + 1,
                    _ => 1,
                };
                obj.set("count", Value::Int(next));
                Value::Int(next)
            } else {
                Value::Null
            }
        }),
    );
    counter.define_singleton_method(
        "make",
        MethodDef::public(Arity::Fixed(0), |recv, _, _| {
            if let Receiver::Type(ty) = recv {
                Value::Object(ty.instantiate())
            } else {
                Value::Null
            }
        }),
    );
    (Redef::new(registry), counter)
}

fn order_names(session: &redef_engine::Session) -> Vec<String> {
    session
        .call_order()
        .iter()
        .map(|d| d.canonical())
        .collect()
}

#[test]
fn test_redefine_records_and_restores() {
    let (engine, counter) = setup();
    let a = counter.instantiate();
    let b = counter.instantiate();

    engine
        .redefine(
            vec![(
                "Counter#increment".into(),
                ReplacementBehavior::callable(Arity::Fixed(0), |_, _, _| Value::str("new")),
            )],
            |session| {
                assert_eq!(
                    a.call("increment", &[Value::str("foo")]).unwrap(),
                    Value::str("new")
                );
                assert_eq!(b.call("increment", &[]).unwrap(), Value::str("new"));

                assert_eq!(session.called(None).unwrap(), 2);
                assert_eq!(
                    session.receivers(None).unwrap(),
                    vec![Receiver::Object(a.clone()), Receiver::Object(b.clone())]
                );
                assert_eq!(
                    session.arguments(None).unwrap(),
                    vec![vec![Value::str("foo")], vec![]]
                );
            },
        )
        .unwrap();

    // Originals restored on both receivers; neither was incremented inside.
    assert_eq!(a.call("increment", &[]).unwrap(), Value::Int(1));
    assert_eq!(b.call("increment", &[]).unwrap(), Value::Int(1));
}

#[test]
fn test_called_counts_and_reset() {
    let (engine, counter) = setup();
    let obj = counter.instantiate();

    engine
        .redefine(
            vec![("Counter#increment".into(), ReplacementBehavior::Empty)],
            |session| {
                for _ in 0..3 {
                    assert_eq!(obj.call("increment", &[]).unwrap(), Value::Null);
                }
                assert_eq!(session.called(None).unwrap(), 3);
                assert_eq!(session.arguments(None).unwrap().len(), 3);
                assert!(session.called_at_least_once(None).unwrap());

                session.reset(None).unwrap();
                assert_eq!(session.called(None).unwrap(), 0);
                assert!(session.arguments(None).unwrap().is_empty());
                assert!(!session.called_at_least_once(None).unwrap());
            },
        )
        .unwrap();

    // Empty never ran the original, so the count starts fresh.
    assert_eq!(obj.get("count"), None);
    assert_eq!(obj.call("increment", &[]).unwrap(), Value::Int(1));
}

#[test]
fn test_wiretap_preserves_behavior_while_recording() {
    let (engine, counter) = setup();
    let obj = counter.instantiate();
    assert_eq!(obj.call("increment", &[]).unwrap(), Value::Int(1));

    engine
        .redefine(
            vec![("Counter#increment".into(), ReplacementBehavior::Wiretap)],
            |session| {
                assert_eq!(obj.call("increment", &[]).unwrap(), Value::Int(2));
                assert_eq!(obj.call("increment", &[]).unwrap(), Value::Int(3));
                assert_eq!(session.called(None).unwrap(), 2);
            },
        )
        .unwrap();

    assert_eq!(obj.call("increment", &[]).unwrap(), Value::Int(4));
}

#[test]
fn test_call_order_interleaves_and_survives_reset() {
    let (engine, counter) = setup();
    let obj = counter.instantiate();

    engine
        .redefine(
            vec![
                ("Counter#increment".into(), ReplacementBehavior::Empty),
                ("Counter.make".into(), ReplacementBehavior::Empty),
            ],
            |session| {
                obj.call("increment", &[]).unwrap();
                counter.call("make", &[]).unwrap();
                obj.call("increment", &[]).unwrap();

                assert_eq!(
                    order_names(session),
                    vec!["Counter#increment", "Counter.make", "Counter#increment"]
                );

                session.reset(Some("increment")).unwrap();
                assert_eq!(session.called(Some("increment")).unwrap(), 0);
                assert_eq!(session.called(Some("make")).unwrap(), 1);
                // Per-descriptor reset never touches the global order.
                assert_eq!(order_names(session).len(), 3);
            },
        )
        .unwrap();
}

#[test]
fn test_short_name_and_view() {
    let (engine, counter) = setup();
    let obj = counter.instantiate();

    engine
        .redefine(
            vec![
                ("Counter#increment".into(), ReplacementBehavior::Empty),
                ("Counter.make".into(), ReplacementBehavior::Empty),
            ],
            |session| {
                obj.call("increment", &[Value::Int(9)]).unwrap();

                // Omitted name is ambiguous with two active descriptors.
                assert!(matches!(
                    session.called(None),
                    Err(RedefError::AmbiguousName(_))
                ));

                // Distinct method names disambiguate by bare name.
                assert_eq!(session.called(Some("increment")).unwrap(), 1);
                assert_eq!(session.called(Some("make")).unwrap(), 0);

                let view = session.view("increment").unwrap();
                assert_eq!(view.called(), 1);
                assert_eq!(view.arguments(), vec![vec![Value::Int(9)]]);
                assert_eq!(view.receivers(), vec![Receiver::Object(obj.clone())]);
                view.reset();
                assert_eq!(view.called(), 0);

                let by_canonical = session.view("Counter.make").unwrap();
                assert_eq!(by_canonical.called(), 0);
            },
        )
        .unwrap();
}

#[test]
fn test_shared_method_name_needs_qualifier() {
    let (engine, counter) = setup();
    counter.define_singleton_method(
        "increment",
        MethodDef::public(Arity::Fixed(0), |_, _, _| Value::str("class-level")),
    );
    let obj = counter.instantiate();

    engine
        .redefine(
            vec![
                ("Counter#increment".into(), ReplacementBehavior::Empty),
                ("Counter.increment".into(), ReplacementBehavior::Empty),
            ],
            |session| {
                obj.call("increment", &[]).unwrap();

                // The two scopes never alias each other.
                assert_eq!(session.called(Some("Counter#increment")).unwrap(), 1);
                assert_eq!(session.called(Some("Counter.increment")).unwrap(), 0);

                // Bare name matches both descriptors.
                assert!(matches!(
                    session.called(Some("increment")),
                    Err(RedefError::AmbiguousName(_))
                ));
            },
        )
        .unwrap();

    assert_eq!(
        counter.call("increment", &[]).unwrap(),
        Value::str("class-level")
    );
    assert_eq!(obj.call("increment", &[]).unwrap(), Value::Int(1));
}

#[test]
fn test_block_result_and_errors_pass_through() {
    let (engine, counter) = setup();
    let obj = counter.instantiate();

    let value = engine
        .redefine(
            vec![("Counter#increment".into(), ReplacementBehavior::Empty)],
            |_session| 41 + 1,
        )
        .unwrap();
    assert_eq!(value, 42);

    // A block expressing failure through its own Result comes back
    // unchanged.
    let failed: Result<(), String> = engine
        .redefine(
            vec![("Counter#increment".into(), ReplacementBehavior::Empty)],
            |_session| Err("user failure".to_string()),
        )
        .unwrap();
    assert_eq!(failed, Err("user failure".to_string()));
    assert_eq!(obj.call("increment", &[]).unwrap(), Value::Int(1));
}

#[test]
fn test_panic_in_block_restores_then_propagates() {
    let (engine, counter) = setup();
    let obj = counter.instantiate();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        engine.redefine(
            vec![("Counter#increment".into(), ReplacementBehavior::Empty)],
            |_session| {
                obj.call("increment", &[]).unwrap();
                panic!("kaboom");
            },
        )
    }));

    let payload = outcome.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"kaboom"));

    assert!(!counter.has_method(MethodScope::Instance, "increment_redef"));
    assert_eq!(obj.call("increment", &[]).unwrap(), Value::Int(1));
}

#[test]
fn test_batch_validation_is_all_or_nothing() {
    let (engine, counter) = setup();
    let obj = counter.instantiate();

    let result = engine.redefine(
        vec![
            ("Counter#increment".into(), ReplacementBehavior::Empty),
            ("Counter#missing".into(), ReplacementBehavior::Empty),
        ],
        |_session| {},
    );
    assert!(matches!(result, Err(RedefError::NameResolution(_))));

    // The valid target was never touched.
    assert!(!counter.has_method(MethodScope::Instance, "increment_redef"));
    assert_eq!(obj.call("increment", &[]).unwrap(), Value::Int(1));
}

#[test]
fn test_fixed_arity_truncates_forwarded_arguments() {
    let (engine, counter) = setup();
    let obj = counter.instantiate();

    engine
        .redefine(
            vec![(
                "Counter#increment".into(),
                ReplacementBehavior::callable(Arity::Fixed(1), |_, args, _| {
                    Value::Int(args.len() as i64)
                }),
            )],
            |session| {
                let seen = obj
                    .call(
                        "increment",
                        &[Value::Int(1), Value::Int(2), Value::Int(3)],
                    )
                    .unwrap();
                // The behavior saw one argument; recording saw all three.
                assert_eq!(seen, Value::Int(1));
                assert_eq!(session.arguments(None).unwrap()[0].len(), 3);
            },
        )
        .unwrap();
}

#[test]
fn test_variable_arity_is_never_truncated() {
    let (engine, counter) = setup();
    let obj = counter.instantiate();

    engine
        .redefine(
            vec![(
                "Counter#increment".into(),
                ReplacementBehavior::callable(Arity::Variable, |_, args, _| {
                    Value::Int(args.len() as i64)
                }),
            )],
            |_session| {
                let seen = obj
                    .call("increment", &[Value::Int(1), Value::Int(2)])
                    .unwrap();
                assert_eq!(seen, Value::Int(2));
            },
        )
        .unwrap();
}

#[test]
fn test_block_argument_forwarded() {
    let (engine, counter) = setup();
    let obj = counter.instantiate();

    engine
        .redefine(
            vec![(
                "Counter#increment".into(),
                ReplacementBehavior::callable(Arity::Variable, |_, _, block| match block {
                    Some(callback) => callback(&[Value::Int(5)]),
                    None => Value::Null,
                }),
            )],
            |_session| {
                let doubler: BlockFn = Rc::new(|args| match args[0] {
                    Value::Int(n) => Value::Int(n * 2),
                    _ => Value::Null,
                });
                let result = obj
                    .call_with_block("increment", &[], Some(&doubler))
                    .unwrap();
                assert_eq!(result, Value::Int(10));
            },
        )
        .unwrap();
}

#[test]
fn test_argument_snapshots_survive_mutation() {
    let (engine, counter) = setup();
    let obj = counter.instantiate();

    engine
        .redefine(
            vec![("Counter#increment".into(), ReplacementBehavior::Empty)],
            |session| {
                let arg = Value::list(vec![Value::str("before")]);
                obj.call("increment", &[arg.clone()]).unwrap();

                if let Value::List(items) = &arg {
                    items.borrow_mut().push(Value::str("after"));
                }
                assert_eq!(
                    session.arguments(None).unwrap(),
                    vec![vec![Value::list(vec![Value::str("before")])]]
                );
            },
        )
        .unwrap();
}

#[test]
fn test_explicit_pair_targets() {
    let (engine, counter) = setup();
    let a = counter.instantiate();
    let b = counter.instantiate();

    // An instance target binds its runtime type's instance scope, so every
    // instance sees the replacement.
    engine
        .redefine(
            vec![(
                Target::Object(a.clone(), "increment".to_string()),
                ReplacementBehavior::callable(Arity::Fixed(0), |_, _, _| Value::str("swapped")),
            )],
            |_session| {
                assert_eq!(a.call("increment", &[]).unwrap(), Value::str("swapped"));
                assert_eq!(b.call("increment", &[]).unwrap(), Value::str("swapped"));
            },
        )
        .unwrap();

    // A type target binds the singleton scope.
    engine
        .redefine(
            vec![(
                Target::Type(counter.clone(), "make".to_string()),
                ReplacementBehavior::Empty,
            )],
            |session| {
                assert_eq!(counter.call("make", &[]).unwrap(), Value::Null);
                assert_eq!(session.called(None).unwrap(), 1);
                assert_eq!(
                    session.receivers(None).unwrap(),
                    vec![Receiver::Type(counter.clone())]
                );
            },
        )
        .unwrap();

    assert!(matches!(
        counter.call("make", &[]).unwrap(),
        Value::Object(_)
    ));
}

#[test]
fn test_nested_sessions_on_disjoint_descriptors() {
    let (engine, counter) = setup();
    let obj = counter.instantiate();

    engine
        .redefine(
            vec![(
                "Counter#increment".into(),
                ReplacementBehavior::callable(Arity::Fixed(0), |_, _, _| Value::str("outer")),
            )],
            |outer| {
                engine
                    .redefine(
                        vec![("Counter.make".into(), ReplacementBehavior::Empty)],
                        |inner| {
                            assert_eq!(
                                obj.call("increment", &[]).unwrap(),
                                Value::str("outer")
                            );
                            assert_eq!(counter.call("make", &[]).unwrap(), Value::Null);
                            assert_eq!(inner.called(None).unwrap(), 1);
                        },
                    )
                    .unwrap();

                // Inner session restored; outer still active.
                assert!(matches!(
                    counter.call("make", &[]).unwrap(),
                    Value::Object(_)
                ));
                assert_eq!(obj.call("increment", &[]).unwrap(), Value::str("outer"));
                assert_eq!(outer.called(Some("increment")).unwrap(), 2);
            },
        )
        .unwrap();

    assert_eq!(obj.call("increment", &[]).unwrap(), Value::Int(1));
}

#[test]
fn test_publicize_through_engine() {
    let (engine, counter) = setup();
    counter.define_instance_method(
        "internal_state",
        MethodDef::new(
            Arity::Fixed(0),
            redef_engine::Visibility::Private,
            |_, _, _| Value::str("secret"),
        ),
    );
    let obj = counter.instantiate();

    assert!(matches!(
        obj.call("internal_state", &[]),
        Err(RedefError::MethodNotVisible(_))
    ));

    engine
        .publicize(&["Counter#internal_state".into()], || {
            assert_eq!(
                obj.call("internal_state", &[]).unwrap(),
                Value::str("secret")
            );
        })
        .unwrap();

    assert!(matches!(
        obj.call("internal_state", &[]),
        Err(RedefError::MethodNotVisible(_))
    ));
}
