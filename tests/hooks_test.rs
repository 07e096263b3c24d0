use graphex::{CodecError, Externalizer, Registry, Value};
use std::rc::Rc;
use std::sync::Arc;

// =============================================================================
// Write/read hooks
// =============================================================================

#[derive(Default)]
struct Celsius {
    deg: i32,
}

#[test]
fn hooks_own_the_section_payload() {
    let registry = Arc::new(Registry::new());
    registry
        .register::<Celsius>("demo.Celsius", |b| {
            // The offset stands in for a legacy on-wire representation.
            b.write_hook(|c: &Celsius, out| out.write_i32(c.deg + 273))
                .read_hook(|c: &mut Celsius, input| {
                    c.deg = input.read_i32()? - 273;
                    Ok(())
                })
        })
        .unwrap();
    let codec = Externalizer::new(registry);
    let bytes = codec.encode(&Value::object(Celsius { deg: 21 })).unwrap();
    let back = codec.decode(&bytes).unwrap();
    let obj = back.as_object().unwrap().borrow();
    assert_eq!(obj.downcast_ref::<Celsius>().unwrap().deg, 21);
}

#[derive(Default)]
struct Packet {
    seq: i32,
    twice: i32,
}

#[test]
fn hooks_can_delegate_to_default_fields() {
    let registry = Arc::new(Registry::new());
    registry
        .register::<Packet>("demo.Packet", |b| {
            b.field_i32("seq", |p| p.seq, |p, v| p.seq = v)
                .write_hook(|p: &Packet, out| {
                    out.default_fields(p)?;
                    out.write_i32(p.seq * 2)
                })
                .read_hook(|p: &mut Packet, input| {
                    input.default_fields(p)?;
                    p.twice = input.read_i32()?;
                    Ok(())
                })
        })
        .unwrap();
    let codec = Externalizer::new(registry);
    let bytes = codec.encode(&Value::object(Packet { seq: 21, twice: 0 })).unwrap();
    let back = codec.decode(&bytes).unwrap();
    let obj = back.as_object().unwrap().borrow();
    let p = obj.downcast_ref::<Packet>().unwrap();
    assert_eq!(p.seq, 21);
    assert_eq!(p.twice, 42);
}

#[derive(Default)]
struct Doomed {
    n: i32,
}

#[test]
fn hook_failures_are_wrapped() {
    let registry = Arc::new(Registry::new());
    registry
        .register::<Doomed>("demo.Doomed", |b| {
            b.write_hook(|_: &Doomed, _| Err(CodecError::Corrupt("boom".into())))
        })
        .unwrap();
    let codec = Externalizer::new(registry);
    let err = codec.encode(&Value::object(Doomed { n: 1 })).unwrap_err();
    assert!(matches!(err, CodecError::Hook(_)));
}

// =============================================================================
// Write replacement
// =============================================================================

#[derive(Default)]
struct Ghost {
    seen: bool,
}

#[test]
fn replacement_with_null_suppresses_the_object() {
    let registry = Arc::new(Registry::new());
    registry
        .register::<Ghost>("demo.Ghost", |b| {
            b.field_bool("seen", |g| g.seen, |g, v| g.seen = v)
                .replace_on_write(|_: &Ghost| Ok(Value::Null))
        })
        .unwrap();
    let codec = Externalizer::new(registry);
    let bytes = codec.encode(&Value::object(Ghost { seen: true })).unwrap();
    assert!(codec.decode(&bytes).unwrap().is_null());
}

#[derive(Default)]
struct Draft {
    x: i32,
}

#[derive(Default)]
struct Publication {
    x: i32,
}

#[test]
fn replacement_with_another_type_writes_that_type() {
    let registry = Arc::new(Registry::new());
    registry
        .register::<Draft>("demo.Draft", |b| {
            b.field_i32("x", |d| d.x, |d, v| d.x = v)
                .replace_on_write(|d: &Draft| Ok(Value::object(Publication { x: d.x })))
        })
        .unwrap();
    registry
        .register::<Publication>("demo.Publication", |b| {
            b.field_i32("x", |p| p.x, |p, v| p.x = v)
        })
        .unwrap();
    let codec = Externalizer::new(registry);
    let bytes = codec.encode(&Value::object(Draft { x: 8 })).unwrap();
    let back = codec.decode(&bytes).unwrap();
    let obj = back.as_object().unwrap().borrow();
    assert_eq!(obj.downcast_ref::<Publication>().unwrap().x, 8);
}

#[test]
fn suppressed_object_shared_twice_decodes_as_null() {
    let registry = Arc::new(Registry::new());
    registry
        .register::<Ghost>("demo.Ghost", |b| {
            b.field_bool("seen", |g| g.seen, |g, v| g.seen = v)
                .replace_on_write(|_: &Ghost| Ok(Value::Null))
        })
        .unwrap();
    let codec = Externalizer::new(registry);
    let shared = Value::object(Ghost { seen: true });
    let bytes = codec.encode(&Value::array(vec![shared.clone(), shared])).unwrap();
    let back = codec.decode(&bytes).unwrap();
    let items = match back {
        Value::Array(rc) => rc,
        other => panic!("expected Array, got {other:?}"),
    };
    let items = items.borrow();
    assert_eq!(items.len(), 2);
    assert!(items[0].is_null());
    assert!(items[1].is_null());
}

#[test]
fn retyped_object_shared_twice_decodes_to_one_replacement() {
    let registry = Arc::new(Registry::new());
    registry
        .register::<Draft>("demo.Draft", |b| {
            b.field_i32("x", |d| d.x, |d, v| d.x = v)
                .replace_on_write(|d: &Draft| Ok(Value::object(Publication { x: d.x })))
        })
        .unwrap();
    registry
        .register::<Publication>("demo.Publication", |b| {
            b.field_i32("x", |p| p.x, |p, v| p.x = v)
        })
        .unwrap();
    let codec = Externalizer::new(registry);
    let shared = Value::object(Draft { x: 8 });
    let bytes = codec.encode(&Value::array(vec![shared.clone(), shared])).unwrap();
    let back = codec.decode(&bytes).unwrap();
    let items = match back {
        Value::Array(rc) => rc,
        other => panic!("expected Array, got {other:?}"),
    };
    let items = items.borrow();
    // The second occurrence travels as a back-reference to the replacement.
    assert!(Rc::ptr_eq(items[0].as_object().unwrap(), items[1].as_object().unwrap()));
    let obj = items[0].as_object().unwrap().borrow();
    assert_eq!(obj.downcast_ref::<Publication>().unwrap().x, 8);
}

#[derive(Default)]
struct Echo {
    n: i32,
}

#[test]
fn same_type_replacement_keeps_the_original() {
    let registry = Arc::new(Registry::new());
    registry
        .register::<Echo>("demo.Echo", |b| {
            b.field_i32("n", |e| e.n, |e, v| e.n = v)
                .replace_on_write(|e: &Echo| Ok(Value::object(Echo { n: e.n + 100 })))
        })
        .unwrap();
    let codec = Externalizer::new(registry);
    let bytes = codec.encode(&Value::object(Echo { n: 3 })).unwrap();
    let back = codec.decode(&bytes).unwrap();
    let obj = back.as_object().unwrap().borrow();
    assert_eq!(obj.downcast_ref::<Echo>().unwrap().n, 3);
}

// =============================================================================
// Read resolution
// =============================================================================

#[derive(Default)]
struct Interned {
    key: i32,
}

#[test]
fn resolution_rebinds_shared_references() {
    let registry = Arc::new(Registry::new());
    registry
        .register::<Interned>("demo.Interned", |b| {
            b.field_i32("key", |i| i.key, |i, v| i.key = v)
                .resolve_on_read(|v| {
                    let key = {
                        let guard = v.as_object().unwrap().borrow();
                        guard.downcast_ref::<Interned>().unwrap().key
                    };
                    Ok(Value::object(Interned { key: key + 1 }))
                })
        })
        .unwrap();
    let codec = Externalizer::new(registry);
    let shared = Value::object(Interned { key: 10 });
    let bytes = codec.encode(&Value::array(vec![shared.clone(), shared])).unwrap();
    let back = codec.decode(&bytes).unwrap();
    let items = match back {
        Value::Array(rc) => rc,
        other => panic!("expected Array, got {other:?}"),
    };
    let items = items.borrow();
    // Both occurrences point at the resolved instance.
    assert!(Rc::ptr_eq(items[0].as_object().unwrap(), items[1].as_object().unwrap()));
    let obj = items[0].as_object().unwrap().borrow();
    assert_eq!(obj.downcast_ref::<Interned>().unwrap().key, 11);
}

#[derive(Default)]
struct Proto {
    x: i32,
}

#[derive(Default)]
struct Final {
    x: i32,
    note: String,
}

#[test]
fn resolution_to_another_type_rereads_matching_sections() {
    let registry = Arc::new(Registry::new());
    registry
        .register::<Proto>("demo.Proto", |b| {
            b.field_i32("x", |p| p.x, |p, v| p.x = v)
                .resolve_on_read(|_| Ok(Value::object(Final::default())))
        })
        .unwrap();
    registry
        .register::<Final>("demo.Final", |b| {
            b.ancestor("demo.Proto", |s| {
                s.field_i32("x", |f| f.x, |f, v| f.x = v);
            })
            .read_no_data(|f: &mut Final| {
                f.note = "resolved".into();
                Ok(())
            })
        })
        .unwrap();
    let codec = Externalizer::new(registry);
    let bytes = codec.encode(&Value::object(Proto { x: 77 })).unwrap();
    let back = codec.decode(&bytes).unwrap();
    let obj = back.as_object().unwrap().borrow();
    let f = obj.downcast_ref::<Final>().unwrap();
    // The shared section was re-read from the payload; the section the
    // writer never produced got its no-data hook.
    assert_eq!(f.x, 77);
    assert_eq!(f.note, "resolved");
}

// =============================================================================
// Self-managed types
// =============================================================================

#[derive(Default)]
struct Blob {
    data: Vec<u8>,
    tag: String,
}

#[test]
fn external_type_owns_its_whole_form() {
    let registry = Arc::new(Registry::new());
    registry
        .register::<Blob>("demo.Blob", |b| {
            b.external(
                |blob: &Blob, out| {
                    out.write_i32(blob.data.len() as i32)?;
                    for &byte in &blob.data {
                        out.write_i32(byte as i32)?;
                    }
                    out.write_str(&blob.tag)
                },
                |blob: &mut Blob, input| {
                    let len = input.read_i32()?;
                    blob.data.clear();
                    for _ in 0..len {
                        blob.data.push(input.read_i32()? as u8);
                    }
                    blob.tag = input.read_str()?;
                    Ok(())
                },
            )
        })
        .unwrap();
    let codec = Externalizer::new(registry);
    let bytes = codec
        .encode(&Value::object(Blob { data: vec![9, 8, 7, 8, 9], tag: "checksum".into() }))
        .unwrap();
    let back = codec.decode(&bytes).unwrap();
    let obj = back.as_object().unwrap().borrow();
    let blob = obj.downcast_ref::<Blob>().unwrap();
    assert_eq!(blob.data, vec![9, 8, 7, 8, 9]);
    assert_eq!(blob.tag, "checksum");
}
