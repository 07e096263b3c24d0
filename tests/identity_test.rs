use graphex::{CodecError, Config, Externalizer, Registry, Value};
use std::rc::Rc;
use std::sync::Arc;

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
struct Node {
    label: i32,
    next: Value,
}

#[derive(Default)]
struct Point {
    x: i32,
    y: i32,
}

fn registry() -> Arc<Registry> {
    let registry = Arc::new(Registry::new());
    registry
        .register::<Node>("demo.Node", |b| {
            b.field_i32("label", |n| n.label, |n, v| n.label = v)
                .field_value("next", |n| n.next.clone(), |n, v| n.next = v)
        })
        .unwrap();
    registry
        .register::<Point>("demo.Point", |b| {
            b.field_i32("x", |p| p.x, |p, v| p.x = v)
                .field_i32("y", |p| p.y, |p, v| p.y = v)
                .immutable()
        })
        .unwrap();
    registry
}

fn roundtrip(value: &Value) -> Value {
    let codec = Externalizer::new(registry());
    let bytes = codec.encode(value).unwrap();
    codec.decode(&bytes).unwrap()
}

// =============================================================================
// Shared references
// =============================================================================

#[test]
fn shared_object_decodes_once() {
    let shared = Value::object(Node { label: 5, next: Value::Null });
    let back = roundtrip(&Value::array(vec![shared.clone(), shared]));
    let items = match back {
        Value::Array(rc) => rc,
        other => panic!("expected Array, got {other:?}"),
    };
    let items = items.borrow();
    let a = items[0].as_object().unwrap();
    let b = items[1].as_object().unwrap();
    assert!(Rc::ptr_eq(a, b));
}

#[test]
fn shared_reference_is_smaller_than_two_copies() {
    let codec = Externalizer::new(registry());
    let shared = Value::object(Node { label: 5, next: Value::Null });
    let once = codec.encode(&Value::array(vec![shared.clone(), shared])).unwrap();
    let twice = codec
        .encode(&Value::array(vec![
            Value::object(Node { label: 5, next: Value::Null }),
            Value::object(Node { label: 5, next: Value::Null }),
        ]))
        .unwrap();
    assert!(once.len() < twice.len());
}

#[test]
fn shared_array_decodes_once() {
    let inner = Value::ints(vec![1, 2, 3]);
    let back = roundtrip(&Value::array(vec![inner.clone(), inner]));
    let items = match back {
        Value::Array(rc) => rc,
        other => panic!("expected Array, got {other:?}"),
    };
    let items = items.borrow();
    assert_eq!(items[0].identity(), items[1].identity());
}

// =============================================================================
// Cycles
// =============================================================================

#[test]
fn self_cycle_roundtrip() {
    let node = Value::object(Node { label: 1, next: Value::Null });
    {
        let rc = node.as_object().unwrap();
        rc.borrow_mut().downcast_mut::<Node>().unwrap().next = node.clone();
    }
    let back = roundtrip(&node);
    let rc = back.as_object().unwrap();
    let guard = rc.borrow();
    let n = guard.downcast_ref::<Node>().unwrap();
    assert_eq!(n.label, 1);
    assert!(Rc::ptr_eq(rc, n.next.as_object().unwrap()));
}

#[test]
fn two_node_cycle_roundtrip() {
    let a = Value::object(Node { label: 1, next: Value::Null });
    let b = Value::object(Node { label: 2, next: a.clone() });
    a.as_object()
        .unwrap()
        .borrow_mut()
        .downcast_mut::<Node>()
        .unwrap()
        .next = b.clone();

    let back = roundtrip(&a);
    let first = back.as_object().unwrap();
    let second = {
        let guard = first.borrow();
        let n = guard.downcast_ref::<Node>().unwrap();
        assert_eq!(n.label, 1);
        n.next.as_object().unwrap().clone()
    };
    let guard = second.borrow();
    let n = guard.downcast_ref::<Node>().unwrap();
    assert_eq!(n.label, 2);
    assert!(Rc::ptr_eq(first, n.next.as_object().unwrap()));
}

// =============================================================================
// Value-equality interning
// =============================================================================

#[test]
fn equal_immutable_instances_collapse() {
    // Two separate allocations with equal contents; the type is immutable so
    // the second occurrence travels as a back-reference.
    let pair = Value::array(vec![
        Value::object(Point { x: 4, y: 2 }),
        Value::object(Point { x: 4, y: 2 }),
    ]);
    let back = roundtrip(&pair);
    let items = match back {
        Value::Array(rc) => rc,
        other => panic!("expected Array, got {other:?}"),
    };
    let items = items.borrow();
    assert!(Rc::ptr_eq(items[0].as_object().unwrap(), items[1].as_object().unwrap()));

    let codec = Externalizer::new(registry());
    let equal = codec.encode(&pair).unwrap();
    let distinct = codec
        .encode(&Value::array(vec![
            Value::object(Point { x: 4, y: 2 }),
            Value::object(Point { x: 4, y: 3 }),
        ]))
        .unwrap();
    assert!(equal.len() < distinct.len());
}

#[test]
fn repeated_strings_are_interned() {
    let codec = Externalizer::new(registry());
    let repeated = codec
        .encode(&Value::array(vec![Value::from("hello"), Value::from("hello")]))
        .unwrap();
    let distinct = codec
        .encode(&Value::array(vec![Value::from("hello"), Value::from("world")]))
        .unwrap();
    assert!(repeated.len() < distinct.len());

    let back = roundtrip(&Value::array(vec![Value::from("dup"), Value::from("dup")]));
    let items = match back {
        Value::Array(rc) => rc,
        other => panic!("expected Array, got {other:?}"),
    };
    let items = items.borrow();
    assert_eq!(items[0].as_str(), Some("dup"));
    assert_eq!(items[1].as_str(), Some("dup"));
}

#[derive(Default)]
struct Wrap {
    inner: Value,
}

#[test]
fn deep_immutable_nesting_is_rejected() {
    // Structural interning walks the whole value; past the recursion cap the
    // probe fails and the failure must reach the caller instead of silently
    // degrading into identity interning.
    let registry = Arc::new(Registry::new());
    registry
        .register::<Wrap>("demo.Wrap", |b| {
            b.field_value("inner", |w| w.inner.clone(), |w, v| w.inner = v)
                .immutable()
        })
        .unwrap();
    let codec = Externalizer::new(registry);
    let mut value = Value::object(Wrap::default());
    for _ in 0..80 {
        value = Value::object(Wrap { inner: value });
    }
    assert!(matches!(codec.encode(&value), Err(CodecError::Unsupported(_))));
}

#[test]
fn repeated_ints_are_interned_in_primitive_arrays() {
    let codec = Externalizer::new(registry());
    let repeated = codec.encode(&Value::ints(vec![700; 50])).unwrap();
    let distinct = codec.encode(&Value::ints((700..750).collect())).unwrap();
    assert!(repeated.len() < distinct.len());
}

// =============================================================================
// Table growth
// =============================================================================

#[test]
fn graphs_outgrow_initial_table_capacity() {
    // Tiny initial tables force several bucket-array expansions mid-stream;
    // run with logging live so the growth traces are observable.
    init_logs();
    let config = Config { table_initial_size: 4, ..Config::default() };
    let codec = Externalizer::with_config(registry(), config);
    let values: Vec<Value> = (0..300).map(Value::I32).collect();
    let bytes = codec.encode(&Value::array(values)).unwrap();
    let back = codec.decode(&bytes).unwrap();
    let items = match back {
        Value::Array(rc) => rc,
        other => panic!("expected Array, got {other:?}"),
    };
    let items = items.borrow();
    assert_eq!(items.len(), 300);
    for (i, item) in items.iter().enumerate() {
        assert_eq!(item.as_i32(), Some(i as i32));
    }
}
