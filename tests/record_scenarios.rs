//! Integration tests for schema-validated records
//!
//! Construction and validation, evolution, removal, forward type references,
//! serialization round trips, equality overrides and hashing.

use std::collections::HashSet;
use std::sync::Arc;

use octofhir_persistent::record::{InvariantFailure, Message, RecordSnapshot, SnapshotValue, check};
use octofhir_persistent::{
    Field, FieldType, InvariantViolation, PathStep, PersistentError, PersistentVector, Record,
    Schema, SchemaRegistry, ValidationConfig, Value,
};
use pretty_assertions::assert_eq;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn point_builder() -> octofhir_persistent::record::SchemaBuilder {
    Schema::builder("Point")
        .field(
            "x",
            Field::new()
                .of_type(FieldType::Integer)
                .mandatory()
                .invariant(|v| (v.as_integer().is_some_and(|x| x >= 0), "X negative")),
        )
        .field(
            "y",
            Field::new()
                .of_type(FieldType::Integer)
                .serializer(|format, y| format(y)),
        )
        .field("z", Field::new().of_type(FieldType::Integer).initial(0))
}

fn point() -> Arc<Schema> {
    point_builder().build()
}

fn line(point: &Arc<Schema>) -> Arc<Schema> {
    Schema::builder("Line")
        .field("p1", Field::new().of_type(FieldType::record(point)))
        .field("p2", Field::new().of_type(FieldType::record(point)))
        .build()
}

fn identity(value: &Value) -> Value {
    value.clone()
}

fn line_source() -> Value {
    Value::dict([
        ("p1", Value::dict([("x", 1), ("y", 2), ("z", 3)])),
        ("p2", Value::dict([("x", 10), ("y", 20), ("z", 30)])),
    ])
}

#[test]
fn test_construction_validates_mandatory_invariants_and_initials() {
    init_logging();
    let point = point();

    assert_eq!(
        point.create([("y", 1)]).unwrap_err(),
        PersistentError::MissingMandatoryField(InvariantViolation {
            invariant_errors: vec![],
            missing_fields: vec!["Point.x".to_string()],
        })
    );

    assert_eq!(
        point.create([("x", -1)]).unwrap_err(),
        PersistentError::InvariantViolation(InvariantViolation {
            invariant_errors: vec![InvariantFailure::Single("X negative".to_string())],
            missing_fields: vec![],
        })
    );

    let p = point.create([("x", 1)]).unwrap();
    assert_eq!(p.get("z"), Some(&Value::from(0)));
    assert_eq!(p.get("y"), None);
}

#[test]
fn test_set_returns_new_version_and_keeps_original() {
    let p = point().create([("x", 1), ("y", 2)]).unwrap();
    let x = p.field("x").unwrap().as_integer().unwrap();
    let p2 = p.set("x", x + 2).unwrap();
    assert_eq!(p2.get("x"), Some(&Value::from(3)));
    assert_eq!(p.get("x"), Some(&Value::from(1)));
    assert_eq!(p2.get("y"), Some(&Value::from(2)));

    assert!(matches!(
        p.set("x", -5),
        Err(PersistentError::InvariantViolation(_))
    ));
    assert!(matches!(
        p.set("x", "one"),
        Err(PersistentError::TypeMismatch { field, .. }) if field == "Point.x"
    ));
}

#[test]
fn test_remove_mandatory_and_undeclared_fields() {
    let p = point().create([("x", 1), ("y", 2)]).unwrap();

    assert_eq!(
        p.remove("x").unwrap_err(),
        PersistentError::InvariantViolation(InvariantViolation {
            invariant_errors: vec![],
            missing_fields: vec!["Point.x".to_string()],
        })
    );
    assert_eq!(
        p.remove("w").unwrap_err(),
        PersistentError::undeclared("Point", "w")
    );

    let without_y = p.remove("y").unwrap();
    assert_eq!(without_y.get("y"), None);
    assert_eq!(without_y.get("z"), Some(&Value::from(0)));
    assert_eq!(
        without_y.remove("y").unwrap_err(),
        PersistentError::undeclared("Point", "y")
    );
}

#[test]
fn test_forward_reference_resolves_once_registered() {
    init_logging();
    let registry = SchemaRegistry::new();
    let segment = registry.register(
        Schema::builder("Segment").field(
            "start",
            Field::new().of_type(FieldType::named("Vertex")).mandatory(),
        ),
    );
    let source = Value::dict([("start", Value::dict([("x", 1)]))]);

    assert_eq!(
        segment.create_from(source.clone()).unwrap_err(),
        PersistentError::UnresolvedType {
            name: "Vertex".to_string()
        }
    );

    let vertex = registry.register(
        Schema::builder("Vertex").field("x", Field::new().of_type(FieldType::Integer)),
    );
    let s = segment.create_from(source).unwrap();
    let start = s.field("start").unwrap().as_record().unwrap();
    assert!(Arc::ptr_eq(start.schema(), &vertex));
    assert_eq!(s.to_string(), "Segment(start=Vertex(x=1))");

    assert_eq!(
        segment.create([("start", 5)]).unwrap_err(),
        PersistentError::TypeMismatch {
            field: "Segment.start".to_string(),
            expected: vec!["Vertex".to_string()],
            actual: "int".to_string(),
        }
    );
}

#[test]
fn test_recursive_schema_with_checked_vector() {
    let registry = SchemaRegistry::new();
    let list = registry.register(
        Schema::builder("LinkedList")
            .field("value", Field::vector_of(FieldType::Integer))
            .field(
                "next",
                Field::new()
                    .of_type(FieldType::optional(FieldType::named("LinkedList")))
                    .initial(Value::None),
            ),
    );

    let l = list
        .create_from(Value::dict([
            ("value", Value::list([1, 2])),
            (
                "next",
                Value::dict([("value", Value::list([3])), ("next", Value::None)]),
            ),
        ]))
        .unwrap();

    let head: PersistentVector<Value> = [1, 2].into_iter().map(Value::from).collect();
    assert_eq!(l.get("value"), Some(&Value::Vector(head)));
    let next = l.field("next").unwrap().as_record().unwrap();
    assert_eq!(next.get("next"), Some(&Value::None));
    assert_eq!(
        next.field("value").unwrap().as_vector().map(|v| v.len()),
        Some(1)
    );

    let err = list
        .create([("value", Value::list([Value::from(1), Value::from("a")]))])
        .unwrap_err();
    assert_eq!(
        err,
        PersistentError::TypeMismatch {
            field: "pvector[int]".to_string(),
            expected: vec!["int".to_string()],
            actual: "str".to_string(),
        }
    );

    let empty = list.create_empty().unwrap();
    assert_eq!(empty.get("value"), Some(&Value::Vector(PersistentVector::new())));
}

#[test]
fn test_validation_errors_aggregate_in_one_pass() {
    let schema = Schema::builder("Aggregate")
        .field("a", Field::new().invariant(|_| (false, "a failed")))
        .field("b", Field::new().invariant(|_| (false, "b failed")))
        .field("c", Field::new().mandatory())
        .build();

    assert_eq!(
        schema.create([("a", 1), ("b", 2)]).unwrap_err(),
        PersistentError::InvariantViolation(InvariantViolation {
            invariant_errors: vec![
                InvariantFailure::Single("a failed".to_string()),
                InvariantFailure::Single("b failed".to_string()),
            ],
            missing_fields: vec!["Aggregate.c".to_string()],
        })
    );
}

#[test]
fn test_multiple_checks_per_invariant() {
    let schema = Schema::builder("Multi")
        .field(
            "one",
            Field::new()
                .invariant(|_| [check(false, "one_one"), check(false, "one_two")])
                .invariant(|_| (true, "never")),
        )
        .field("two", Field::new().invariant(|_| (false, "two_one")))
        .build();

    let err = schema.create([("one", 1), ("two", 2)]).unwrap_err();
    assert_eq!(
        err.violation().unwrap().invariant_errors,
        vec![
            InvariantFailure::Multiple(vec!["one_one".to_string(), "one_two".to_string()]),
            InvariantFailure::Single("two_one".to_string()),
        ]
    );

    let global = Schema::builder("GlobalMulti")
        .field("x", Field::new())
        .invariant(|_| [check(false, "x"), check(false, "y")])
        .build();
    assert_eq!(
        global.create([("x", 1)]).unwrap_err(),
        PersistentError::InvariantViolation(InvariantViolation {
            invariant_errors: vec![InvariantFailure::Multiple(vec![
                "x".to_string(),
                "y".to_string()
            ])],
            missing_fields: vec![],
        })
    );
}

#[test]
fn test_global_invariant_checked_on_create_and_set() {
    let circle = Schema::builder("UnitCirclePoint")
        .field("x", Field::new().of_type(FieldType::Float))
        .field("y", Field::new().of_type(FieldType::Float))
        .invariant(|r| {
            let x = r.get("x").and_then(Value::as_float).unwrap_or(0.0);
            let y = r.get("y").and_then(Value::as_float).unwrap_or(0.0);
            ((x * x + y * y - 1.0).abs() < 1e-9, "Point not on unit circle")
        })
        .build();

    let p = circle.create([("x", 1.0), ("y", 0.0)]).unwrap();
    let err = circle.create([("x", 2.0), ("y", 0.0)]).unwrap_err();
    assert_eq!(
        err.violation().unwrap().messages().collect::<Vec<_>>(),
        vec!["Point not on unit circle"]
    );

    assert!(p.set("x", 0.5).is_err());
    let rotated = p.set_many([("x", 0.0), ("y", 1.0)]).unwrap();
    assert_eq!(rotated.get("y"), Some(&Value::from(1.0)));
}

#[test]
fn test_initial_producers_are_checked() {
    let wrong_type = Schema::builder("Lazy")
        .field(
            "v",
            Field::new()
                .of_type(FieldType::Integer)
                .initial_with(|| Value::from("not a number")),
        )
        .build();
    assert!(matches!(
        wrong_type.create_empty(),
        Err(PersistentError::TypeMismatch { field, .. }) if field == "Lazy.v"
    ));

    let too_large = Schema::builder("Lazy")
        .field(
            "v",
            Field::new()
                .of_type(FieldType::Integer)
                .initial_with(|| Value::from(5))
                .invariant(|v| {
                    let x = v.as_integer().unwrap_or(0);
                    check(x < 5, Message::lazy(move || format!("{x} is too large")))
                }),
        )
        .build();
    let err = too_large.create_empty().unwrap_err();
    assert_eq!(
        err.violation().unwrap().messages().collect::<Vec<_>>(),
        vec!["5 is too large"]
    );
    assert!(too_large.create([("v", 4)]).is_ok());
}

#[test]
fn test_nested_create_and_serialize_round_trip() {
    let point = point();
    let line = line(&point);
    let l = line.create_from(line_source()).unwrap();

    let p1 = l.field("p1").unwrap().as_record().unwrap();
    assert_eq!(p1.get("x"), Some(&Value::from(1)));
    assert_eq!(p1.get("z"), Some(&Value::from(3)));

    let serialized = l.serialize(&identity);
    assert_eq!(serialized, line_source());
    assert_eq!(line.create_from(serialized).unwrap(), l);
}

#[test]
fn test_custom_serializer_receives_format() {
    let p = point().create([("x", 1), ("y", 1), ("z", 1)]).unwrap();
    let plus_seventeen = |v: &Value| Value::from(v.as_integer().unwrap_or(0) + 17);
    assert_eq!(
        p.serialize(&plus_seventeen),
        Value::dict([("x", 1), ("y", 18), ("z", 1)])
    );
}

#[test]
fn test_strict_config_rejects_plain_nested_data() {
    let point = point();
    let strict_line = Schema::builder("Line")
        .field("p1", Field::new().of_type(FieldType::record(&point)))
        .config(ValidationConfig::strict())
        .build();
    assert!(matches!(
        strict_line.create([("p1", Value::dict([("x", 1)]))]),
        Err(PersistentError::TypeMismatch { actual, .. }) if actual == "dict"
    ));

    let nested = point.create([("x", 1)]).unwrap();
    assert!(strict_line.create([("p1", nested)]).is_ok());
}

#[test]
fn test_ignore_extra_arguments() {
    let point = point();
    assert_eq!(
        point.create([("x", 1), ("extra", 2)]).unwrap_err(),
        PersistentError::undeclared("Point", "extra")
    );
    let p = point
        .create_with([("x", 1), ("extra", 2)], &ValidationConfig::lenient())
        .unwrap();
    assert_eq!(p.to_string(), "Point(x=1, z=0)");
}

#[test]
fn test_evolver_noop_keeps_identity() {
    let p = point().create([("x", 1), ("y", 2)]).unwrap();
    assert!(p.evolver().persistent().unwrap().ptr_eq(&p));
    assert!(p.set("x", 1).unwrap().ptr_eq(&p));

    let mut evolver = p.evolver();
    evolver.set("x", 5).unwrap().set("y", 6).unwrap();
    assert_eq!(evolver.get("x"), Some(&Value::from(5)));
    let p2 = evolver.persistent().unwrap();
    assert_eq!(p2.to_string(), "Point(x=5, y=6, z=0)");
    assert!(!p2.ptr_eq(&p));
}

#[test]
fn test_transform_nested_path() {
    let point = point();
    let l = line(&point).create_from(line_source()).unwrap();
    let l2 = l
        .transform(&[PathStep::from("p1"), PathStep::from("x")], Value::from(3))
        .unwrap();

    let x_of = |record: &Record| {
        record.field("p1").unwrap().as_record().unwrap().get("x").cloned()
    };
    assert_eq!(x_of(&l2), Some(Value::from(3)));
    assert_eq!(x_of(&l), Some(Value::from(1)));
    assert!(l.transform(&["p1".into(), "x".into()], Value::from(-3)).is_err());
}

#[test]
fn test_equality_and_hash_overrides() {
    let point = point();
    let hash_cloner = Schema::builder("HashCloner")
        .field("other", Field::new())
        .hash_with(|r| r.get("other").map_or(Ok(0), Value::try_hash))
        .build();
    let total_cloner = Schema::builder("TotalCloner")
        .field("other", Field::new())
        .hash_with(|r| r.get("other").map_or(Ok(0), Value::try_hash))
        .eq_with(|this, other| this.get("other") == Some(&Value::Record(other.clone())))
        .build();

    let p = point.create([("x", 1), ("y", 2)]).unwrap();
    let p_like = hash_cloner.create([("other", p.clone())]).unwrap();
    let p_exactly_like = total_cloner.create([("other", p.clone())]).unwrap();

    assert_eq!(p_like.try_hash().unwrap(), p.try_hash().unwrap());
    assert_ne!(p, p_like);
    assert_ne!(p_like, p);

    assert_eq!(p_exactly_like.try_hash().unwrap(), p.try_hash().unwrap());
    assert_eq!(p, p_exactly_like);
    assert_eq!(p_exactly_like, p);
}

#[test]
fn test_unhashable_field_value() {
    let bag = Schema::builder("Bag").field("contents", Field::new()).build();
    let b = bag
        .create([("contents", Value::dict([("a", 1)]))])
        .unwrap();
    let message = b.try_hash().unwrap_err().to_string();
    assert!(message.contains("unhashable"));
    assert!(message.contains("dict"));
    assert!(b.hashable().is_err());
}

#[test]
fn test_hashable_records_key_std_collections() {
    let point = point();
    let mut seen = HashSet::new();
    seen.insert(point.create([("x", 1), ("y", 2)]).unwrap().hashable().unwrap());
    seen.insert(point.create([("y", 2), ("x", 1)]).unwrap().hashable().unwrap());
    seen.insert(point.create([("x", 2)]).unwrap().hashable().unwrap());
    assert_eq!(seen.len(), 2);
}

#[test]
fn test_snapshot_json_round_trip() {
    init_logging();
    let registry = SchemaRegistry::new();
    registry.register(point_builder());
    let line = registry.register(
        Schema::builder("Line")
            .field("p1", Field::new().of_type(FieldType::named("Point")))
            .field("p2", Field::new().of_type(FieldType::named("Point"))),
    );
    let l = line.create_from(line_source()).unwrap();

    let json = l.snapshot().to_json().unwrap();
    let snapshot = RecordSnapshot::from_json(&json).unwrap();
    assert_eq!(snapshot.schema, "Line");
    let restored = registry.restore(&snapshot).unwrap();
    assert_eq!(restored, l);

    let unknown = RecordSnapshot {
        schema: "Unknown".to_string(),
        fields: vec![("a".to_string(), SnapshotValue::Integer(1))],
    };
    assert!(matches!(
        registry.restore(&unknown),
        Err(PersistentError::UnresolvedType { .. })
    ));
}

#[test]
fn test_typed_map_field() {
    let tags = Schema::builder("Tagged")
        .field("tags", Field::map_of(FieldType::String))
        .build();
    let t = tags
        .create([("tags", Value::dict([("env", "prod"), ("tier", "web")]))])
        .unwrap();
    let map = t.field("tags").unwrap().as_map().unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map.get("env"), Some(&Value::from("prod")));

    assert!(matches!(
        tags.create([("tags", Value::dict([("env", 1)]))]),
        Err(PersistentError::TypeMismatch { field, .. }) if field == "pmap[str]"
    ));
}

#[test]
fn test_weak_record_does_not_keep_alive() {
    let p = point().create([("x", 1)]).unwrap();
    let weak = p.downgrade();
    assert!(weak.upgrade().is_some());
    drop(p);
    assert!(weak.upgrade().is_none());
}

#[test]
fn test_snapshot_keeps_container_and_record_kinds() {
    init_logging();
    let registry = SchemaRegistry::new();
    let point = registry.register(point_builder());
    let holder = registry.register(
        Schema::builder("Holder")
            .field("payload", Field::new())
            .field("items", Field::new())
            .field("plain", Field::new()),
    );
    let p = point.create([("x", 4), ("y", 5)]).unwrap();
    let items: PersistentVector<Value> = (1..=3).map(Value::from).collect();
    let h = holder
        .create([
            ("payload", Value::from(p.clone())),
            ("items", Value::from(items)),
            ("plain", Value::list([1, 2])),
        ])
        .unwrap();

    let json = h.snapshot().to_json().unwrap();
    let restored = registry.restore(&RecordSnapshot::from_json(&json).unwrap()).unwrap();
    assert_eq!(restored, h);
    assert_eq!(restored.field("payload").unwrap().as_record(), Some(&p));
    assert!(restored.field("items").unwrap().as_vector().is_some());
    assert_eq!(restored.field("plain").unwrap().type_name(), "list");
}

#[test]
fn test_edits_that_restore_values_keep_identity() {
    let point = point();
    let p = point.create([("x", 1), ("y", 2)]).unwrap();
    let mut evolver = p.evolver();
    evolver.set("x", 9).unwrap().remove("y").unwrap();
    evolver.set("x", 1).unwrap().set("y", 2).unwrap();
    assert!(evolver.persistent().unwrap().ptr_eq(&p));

    let l = line(&point).create_from(line_source()).unwrap();
    let same = l
        .set("p1", Value::dict([("x", 1), ("y", 2), ("z", 3)]))
        .unwrap();
    assert!(same.ptr_eq(&l));
}

#[test]
fn test_untouched_fields_are_shared_between_versions() {
    let point = point();
    let l = line(&point).create_from(line_source()).unwrap();
    let p2_of = |record: &Record| record.field("p2").unwrap().as_record().unwrap().clone();

    let set = l.set("p1", point.create([("x", 7)]).unwrap()).unwrap();
    assert!(p2_of(&set).ptr_eq(&p2_of(&l)));

    let transformed = l.transform(&["p1".into(), "y".into()], Value::from(8)).unwrap();
    assert!(p2_of(&transformed).ptr_eq(&p2_of(&l)));
    let p1_x = |record: &Record| record.field("p1").unwrap().as_record().unwrap().get("x").cloned();
    assert_eq!(p1_x(&transformed), Some(Value::from(1)));

    let many = l
        .set_many([
            ("p1", Value::from(point.create([("x", 5)]).unwrap())),
            ("p2", Value::from(p2_of(&l))),
        ])
        .unwrap();
    assert!(p2_of(&many).ptr_eq(&p2_of(&l)));
    assert!(!many.ptr_eq(&l));
}

#[test]
fn test_reregistered_name_is_picked_up_by_references() {
    init_logging();
    let registry = SchemaRegistry::new();
    let segment = registry.register(
        Schema::builder("Segment").field("start", Field::new().of_type(FieldType::named("Vertex"))),
    );
    let first = registry.register(
        Schema::builder("Vertex").field("x", Field::new().of_type(FieldType::Integer)),
    );
    let s1 = segment
        .create_from(Value::dict([("start", Value::dict([("x", 1)]))]))
        .unwrap();
    assert!(Arc::ptr_eq(s1.field("start").unwrap().as_record().unwrap().schema(), &first));

    let second = registry.register(
        Schema::builder("Vertex").field("label", Field::new().of_type(FieldType::String)),
    );
    let s2 = segment
        .create_from(Value::dict([("start", Value::dict([("label", "a")]))]))
        .unwrap();
    assert!(Arc::ptr_eq(s2.field("start").unwrap().as_record().unwrap().schema(), &second));
    assert!(matches!(
        segment.create([("start", Value::from(first.create([("x", 2)]).unwrap()))]),
        Err(PersistentError::TypeMismatch { .. })
    ));
}

#[test]
fn test_named_checked_vector_type() {
    init_logging();
    let registry = SchemaRegistry::new();
    let holder = registry.register(
        Schema::builder("Holder").field("numbers", Field::new().of_type(FieldType::named("Numbers"))),
    );
    assert_eq!(
        holder.create([("numbers", Value::list([1]))]).unwrap_err(),
        PersistentError::UnresolvedType {
            name: "Numbers".to_string()
        }
    );

    registry.register_type("Numbers", FieldType::vector_of(FieldType::Integer));
    let h = holder.create([("numbers", Value::list([1, 2]))]).unwrap();
    let numbers: PersistentVector<Value> = [1, 2].into_iter().map(Value::from).collect();
    assert_eq!(h.get("numbers"), Some(&Value::Vector(numbers)));

    assert_eq!(
        holder
            .create([("numbers", Value::list([Value::from("a")]))])
            .unwrap_err(),
        PersistentError::TypeMismatch {
            field: "pvector[int]".to_string(),
            expected: vec!["int".to_string()],
            actual: "str".to_string(),
        }
    );
}
