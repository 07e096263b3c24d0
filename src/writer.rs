//! Graph writer: recursive descent over a value graph.
//!
//! The writer owns one session's worth of state: the five reference tables
//! (type names, mutable identity, immutable equality, ints, longs) and the
//! current-object stack that hook-driven default field writes consult. The
//! mutable and immutable object tables share one id sequence so that a
//! `TAG_REFERENCE` on the wire is unambiguous without naming its table.

use crate::codec::Config;
use crate::descriptor::TypeDescriptor;
use crate::registry::Registry;
use crate::table::{mix64, RefTable};
use crate::value::{same_runtime_type, structural_eq, structural_hash, Value};
use crate::wire::*;
use crate::{hook_error, mutf8, num, reflect, CodecError, Result};
use bytes::{BufMut, BytesMut};
use std::any::Any;
use std::cell::Cell;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Serializes one graph into `out`. All session state dies with the call.
pub(crate) fn write_graph(
    reg: &Registry,
    cfg: &Config,
    out: &mut BytesMut,
    value: &Value,
) -> Result<()> {
    GraphWriter::new(reg, cfg, out).write_value(value)
}

pub(crate) struct Frame {
    pub(crate) desc: Arc<TypeDescriptor>,
    pub(crate) section: usize,
}

/// Identity key for the mutable-object table: hashed and compared by
/// allocation address, holding a clone so the address stays live for the
/// whole session.
struct IdentKey {
    ptr: usize,
    _keep: Value,
}

/// Outcome of a write-replacement hook, memoized by the original object's
/// identity so every occurrence of the same object agrees on it.
struct Replaced {
    outcome: Value,
    _keep: Value,
}

pub(crate) struct GraphWriter<'a> {
    reg: &'a Registry,
    cfg: &'a Config,
    pub(crate) out: &'a mut BytesMut,
    types: RefTable<String>,
    mutables: RefTable<IdentKey>,
    immutables: RefTable<Value>,
    ints: RefTable<i32>,
    longs: RefTable<i64>,
    next_obj_id: u32,
    stack: Vec<Frame>,
    /// Objects whose write-replacement suppressed or retyped them, keyed by
    /// identity. These never get an id of their own; later occurrences
    /// re-emit the outcome instead of a back-reference.
    replaced: HashMap<usize, Replaced>,
}

fn hash_str(s: &str) -> u64 {
    let mut h = DefaultHasher::new();
    s.hash(&mut h);
    h.finish()
}

impl<'a> GraphWriter<'a> {
    pub(crate) fn new(reg: &'a Registry, cfg: &'a Config, out: &'a mut BytesMut) -> Self {
        GraphWriter {
            reg,
            cfg,
            out,
            types: cfg.new_table(),
            mutables: cfg.new_table(),
            immutables: cfg.new_table(),
            ints: cfg.new_table(),
            longs: cfg.new_table(),
            next_obj_id: 0,
            stack: Vec::new(),
            replaced: HashMap::new(),
        }
    }

    /// Writes one tagged value unit.
    pub(crate) fn write_value(&mut self, value: &Value) -> Result<()> {
        if value.is_null() {
            self.out.put_u8(TAG_NULL);
            return Ok(());
        }
        // Write replacement resolves before any id is assigned, so an object
        // that is suppressed or retyped never occupies an id that a later
        // back-reference would point at.
        if matches!(value, Value::Object(_)) {
            if let Some(outcome) = self.resolve_replacement(value)? {
                if outcome.is_null() {
                    self.out.put_u8(TAG_NULL);
                    return Ok(());
                }
                return self.write_value(&outcome);
            }
        }
        let assigned = self.assign(value)?;
        if assigned < 0 {
            self.out.put_u8(TAG_REFERENCE);
            num::write_id(self.out, -assigned as u32);
            return Ok(());
        }
        let id = assigned as u32;
        match value {
            Value::Object(_) => self.write_object(value, id),
            Value::Array(_)
            | Value::I32Array(_)
            | Value::I64Array(_)
            | Value::F32Array(_)
            | Value::F64Array(_)
            | Value::ByteArray(_) => self.write_array(value, id),
            Value::Str(s) => {
                self.out.put_u8(TAG_VALUE);
                num::write_id(self.out, id);
                self.write_type_name(NAME_STRING)?;
                mutf8::write_string(self.out, s);
                Ok(())
            }
            Value::Bool(b) => {
                self.out.put_u8(TAG_VALUE);
                num::write_id(self.out, id);
                self.write_type_name(NAME_BOOLEAN)?;
                self.out.put_u8(*b as u8);
                Ok(())
            }
            Value::I32(v) => {
                self.out.put_u8(TAG_VALUE);
                num::write_id(self.out, id);
                self.write_type_name(NAME_INT)?;
                num::write_i32(self.out, *v);
                Ok(())
            }
            Value::I64(v) => {
                self.out.put_u8(TAG_VALUE);
                num::write_id(self.out, id);
                self.write_type_name(NAME_LONG)?;
                num::write_i64(self.out, *v);
                Ok(())
            }
            Value::F32(v) => {
                self.out.put_u8(TAG_VALUE);
                num::write_id(self.out, id);
                self.write_type_name(NAME_FLOAT)?;
                num::write_i32_raw(self.out, v.to_bits() as i32);
                Ok(())
            }
            Value::F64(v) => {
                self.out.put_u8(TAG_VALUE);
                num::write_id(self.out, id);
                self.write_type_name(NAME_DOUBLE)?;
                num::write_i64_raw(self.out, v.to_bits() as i64);
                Ok(())
            }
            Value::Null => unreachable!("null handled above"),
        }
    }

    /// Runs the type's write-replacement hook, if it has one. Returns the
    /// substituted value when the object is suppressed (null) or replaced by
    /// a different runtime type; a same-type substitution is ignored and the
    /// original is written. The outcome is memoized by identity so shared
    /// occurrences of the same object all resolve to one wire unit.
    fn resolve_replacement(&mut self, value: &Value) -> Result<Option<Value>> {
        let rc = match value {
            Value::Object(rc) => rc,
            _ => return Ok(None),
        };
        let ptr = value
            .identity()
            .ok_or_else(|| CodecError::Unsupported("value without identity".into()))?;
        if let Some(entry) = self.replaced.get(&ptr) {
            return Ok(Some(entry.outcome.clone()));
        }
        let desc = {
            let guard = rc.borrow();
            self.reg.descriptor_by_type_id(Any::type_id(&*guard))?
        };
        let replacement = match desc.replace_on_write() {
            Some(replace) => {
                let guard = rc.borrow();
                replace(&*guard).map_err(hook_error)?
            }
            None => return Ok(None),
        };
        if !replacement.is_null() && same_runtime_type(&replacement, value) {
            return Ok(None);
        }
        self.replaced
            .insert(ptr, Replaced { outcome: replacement.clone(), _keep: value.clone() });
        Ok(Some(replacement))
    }

    /// Interns the value into the table its immutability selects. Positive
    /// result: first occurrence under a fresh id. Negative: the negation of
    /// the id assigned earlier.
    fn assign(&mut self, value: &Value) -> Result<i32> {
        let immutable = match value {
            Value::Str(_)
            | Value::Bool(_)
            | Value::I32(_)
            | Value::I64(_)
            | Value::F32(_)
            | Value::F64(_) => true,
            Value::Object(rc) => {
                let guard = rc.borrow();
                let desc = self.reg.descriptor_by_type_id(Any::type_id(&*guard))?;
                desc.is_immutable()
            }
            _ => false,
        };
        let candidate = self.next_obj_id + 1;
        let assigned = if immutable {
            let hash = structural_hash(self.reg, value)?;
            let reg = self.reg;
            // The eq callback is infallible by signature; stash any failure
            // from the structural probe and surface it after the call.
            let failure = Cell::new(None);
            let assigned = self.immutables.assign_at(
                value.clone(),
                hash,
                |a, b| match structural_eq(reg, a, b) {
                    Ok(eq) => eq,
                    Err(e) => {
                        failure.set(Some(e));
                        false
                    }
                },
                candidate,
            );
            if let Some(e) = failure.take() {
                return Err(e);
            }
            assigned
        } else {
            let ptr = value
                .identity()
                .ok_or_else(|| CodecError::Unsupported("value without identity".into()))?;
            self.mutables.assign_at(
                IdentKey { ptr, _keep: value.clone() },
                mix64(ptr as u64),
                |a, b| a.ptr == b.ptr,
                candidate,
            )
        };
        if assigned > 0 {
            self.next_obj_id = candidate;
        }
        Ok(assigned)
    }

    fn write_object(&mut self, whole: &Value, id: u32) -> Result<()> {
        let rc = match whole {
            Value::Object(rc) => rc,
            _ => unreachable!("write_object on non-object"),
        };
        let desc = {
            let guard = rc.borrow();
            self.reg.descriptor_by_type_id(Any::type_id(&*guard))?
        };
        self.out.put_u8(TAG_VALUE);
        num::write_id(self.out, id);
        self.write_type_name(desc.name())?;

        let guard = rc.borrow();
        let obj: &dyn Any = &*guard;
        if let Some(ext) = desc.external() {
            self.stack.push(Frame { desc: desc.clone(), section: desc.sections().len() - 1 });
            let result = (ext.write)(obj, &mut ObjectOutput(self)).map_err(hook_error);
            self.stack.pop();
            return result;
        }
        for index in 0..desc.sections().len() {
            self.stack.push(Frame { desc: desc.clone(), section: index });
            let section = &desc.sections()[index];
            let result = match section.write_hook() {
                Some(hook) => hook(obj, &mut ObjectOutput(self)).map_err(hook_error),
                None => reflect::write_fields(self, obj, section.fields()),
            };
            self.stack.pop();
            result?;
        }
        Ok(())
    }

    fn write_array(&mut self, value: &Value, id: u32) -> Result<()> {
        self.out.put_u8(TAG_ARRAY);
        match value {
            Value::Array(rc) => {
                let items = rc.borrow();
                num::write_i32(self.out, items.len() as i32);
                num::write_id(self.out, id);
                self.out.put_u8(ELEM_REF);
                for item in items.iter() {
                    self.write_value(item)?;
                }
            }
            Value::I32Array(rc) => {
                let items = rc.borrow();
                num::write_i32(self.out, items.len() as i32);
                num::write_id(self.out, id);
                self.out.put_u8(ELEM_I32);
                for &item in items.iter() {
                    self.write_i32_field(item);
                }
            }
            Value::I64Array(rc) => {
                let items = rc.borrow();
                num::write_i32(self.out, items.len() as i32);
                num::write_id(self.out, id);
                self.out.put_u8(ELEM_I64);
                for &item in items.iter() {
                    self.write_i64_field(item);
                }
            }
            Value::F32Array(rc) => {
                let items = rc.borrow();
                num::write_i32(self.out, items.len() as i32);
                num::write_id(self.out, id);
                self.out.put_u8(ELEM_F32);
                for &item in items.iter() {
                    self.write_f32_field(item);
                }
            }
            Value::F64Array(rc) => {
                let items = rc.borrow();
                num::write_i32(self.out, items.len() as i32);
                num::write_id(self.out, id);
                self.out.put_u8(ELEM_F64);
                for &item in items.iter() {
                    self.write_f64_field(item);
                }
            }
            Value::ByteArray(rc) => {
                let items = rc.borrow();
                num::write_i32(self.out, items.len() as i32);
                num::write_id(self.out, id);
                self.out.put_u8(ELEM_BYTE);
                self.out.put_slice(&items);
            }
            _ => unreachable!("write_array on non-array"),
        }
        Ok(())
    }

    /// Writes a type reference: the name string on first occurrence, a
    /// back-reference afterwards. Type names have their own id space.
    fn write_type_name(&mut self, name: &str) -> Result<()> {
        let assigned = self.types.assign(name.to_owned(), hash_str(name), |a, b| a == b);
        if assigned < 0 {
            self.out.put_u8(TAG_REFERENCE);
            num::write_id(self.out, -assigned as u32);
        } else {
            self.out.put_u8(TAG_VALUE);
            num::write_id(self.out, assigned as u32);
            mutf8::write_string(self.out, name);
        }
        Ok(())
    }

    /// True when ints/longs of the active type are selector-compressed.
    fn compress_active(&self) -> bool {
        self.cfg.use_number_compression
            && !self
                .stack
                .last()
                .map(|f| f.desc.number_compression_disabled())
                .unwrap_or(false)
    }

    pub(crate) fn write_bool_field(&mut self, v: bool) {
        self.out.put_u8(v as u8);
    }

    pub(crate) fn write_i32_field(&mut self, v: i32) {
        if self.cfg.use_int_table {
            let assigned = self.ints.assign(v, mix64(v as u32 as u64), |a, b| a == b);
            if assigned < 0 {
                self.out.put_u8(TAG_REFERENCE);
                num::write_id(self.out, -assigned as u32);
                return;
            }
            self.out.put_u8(TAG_VALUE);
            num::write_id(self.out, assigned as u32);
        }
        if self.compress_active() {
            num::write_i32(self.out, v);
        } else {
            num::write_i32_raw(self.out, v);
        }
    }

    pub(crate) fn write_i64_field(&mut self, v: i64) {
        if self.cfg.use_long_table {
            let assigned = self.longs.assign(v, mix64(v as u64), |a, b| a == b);
            if assigned < 0 {
                self.out.put_u8(TAG_REFERENCE);
                num::write_id(self.out, -assigned as u32);
                return;
            }
            self.out.put_u8(TAG_VALUE);
            num::write_id(self.out, assigned as u32);
        }
        if self.compress_active() {
            num::write_i64(self.out, v);
        } else {
            num::write_i64_raw(self.out, v);
        }
    }

    /// Floats intern their bit pattern but the payload is never range-coded.
    pub(crate) fn write_f32_field(&mut self, v: f32) {
        let bits = v.to_bits() as i32;
        if self.cfg.use_int_table {
            let assigned = self.ints.assign(bits, mix64(bits as u32 as u64), |a, b| a == b);
            if assigned < 0 {
                self.out.put_u8(TAG_REFERENCE);
                num::write_id(self.out, -assigned as u32);
                return;
            }
            self.out.put_u8(TAG_VALUE);
            num::write_id(self.out, assigned as u32);
        }
        num::write_i32_raw(self.out, bits);
    }

    pub(crate) fn write_f64_field(&mut self, v: f64) {
        let bits = v.to_bits() as i64;
        if self.cfg.use_long_table {
            let assigned = self.longs.assign(bits, mix64(bits as u64), |a, b| a == b);
            if assigned < 0 {
                self.out.put_u8(TAG_REFERENCE);
                num::write_id(self.out, -assigned as u32);
                return;
            }
            self.out.put_u8(TAG_VALUE);
            num::write_id(self.out, assigned as u32);
        }
        num::write_i64_raw(self.out, bits);
    }

    fn active_frame(&self) -> Result<(Arc<TypeDescriptor>, usize)> {
        self.stack
            .last()
            .map(|f| (f.desc.clone(), f.section))
            .ok_or_else(|| CodecError::Unsupported("no object is being written".into()))
    }
}

/// The stream handle passed to write hooks and external writers.
pub struct ObjectOutput<'w, 'a>(pub(crate) &'w mut GraphWriter<'a>);

impl ObjectOutput<'_, '_> {
    /// Writes the declared fields of the section the hook replaces.
    pub fn default_fields(&mut self, obj: &dyn std::any::Any) -> Result<()> {
        let (desc, section) = self.0.active_frame()?;
        reflect::write_fields(self.0, obj, desc.sections()[section].fields())
    }

    /// Writes a raw boolean.
    pub fn write_bool(&mut self, v: bool) -> Result<()> {
        self.0.write_bool_field(v);
        Ok(())
    }

    /// Writes an int through the numeric codec.
    pub fn write_i32(&mut self, v: i32) -> Result<()> {
        self.0.write_i32_field(v);
        Ok(())
    }

    /// Writes a long through the numeric codec.
    pub fn write_i64(&mut self, v: i64) -> Result<()> {
        self.0.write_i64_field(v);
        Ok(())
    }

    /// Writes a float bit pattern.
    pub fn write_f32(&mut self, v: f32) -> Result<()> {
        self.0.write_f32_field(v);
        Ok(())
    }

    /// Writes a double bit pattern.
    pub fn write_f64(&mut self, v: f64) -> Result<()> {
        self.0.write_f64_field(v);
        Ok(())
    }

    /// Writes a string as an interned value unit.
    pub fn write_str(&mut self, v: &str) -> Result<()> {
        self.0.write_value(&Value::Str(v.to_owned()))
    }

    /// Writes any value as a tagged unit.
    pub fn write_value(&mut self, v: &Value) -> Result<()> {
        self.0.write_value(v)
    }
}
