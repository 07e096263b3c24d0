//! Graph reader: mirror of the writer's recursive descent.
//!
//! The key asymmetry is registration order: a blank instance is interned
//! under its reference id before any field is populated, so self-references
//! and shared references encountered later resolve to the same instance
//! instead of recursing forever.

use crate::codec::Config;
use crate::descriptor::TypeDescriptor;
use crate::registry::Registry;
use crate::table::RefTable;
use crate::value::{same_runtime_type, ObjRef, Value};
use crate::wire::*;
use crate::{hook_error, mutf8, num, reflect, CodecError, Result};
use bytes::{Buf, Bytes};
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// Deserializes one graph from `input`. Trailing bytes are ignored.
pub(crate) fn read_graph(reg: &Registry, cfg: &Config, input: Bytes) -> Result<Value> {
    GraphReader::new(reg, cfg, input).read_value()
}

/// A resolved type reference from the stream's type-name table.
#[derive(Clone)]
enum TypeRef {
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Str,
    User(Arc<TypeDescriptor>),
}

struct Frame {
    desc: Arc<TypeDescriptor>,
    section: usize,
}

pub(crate) struct GraphReader<'a> {
    reg: &'a Registry,
    cfg: &'a Config,
    input: Bytes,
    /// One table for both mutable and immutable objects; the writer shares
    /// one id sequence across its two tables for exactly this reason.
    objects: RefTable<Value>,
    types: RefTable<TypeRef>,
    ints: RefTable<i32>,
    longs: RefTable<i64>,
    stack: Vec<Frame>,
    /// Set while re-populating through a resolved type's descriptor; ids met
    /// again on that second pass re-register instead of failing.
    redispatching: bool,
}

impl<'a> GraphReader<'a> {
    pub(crate) fn new(reg: &'a Registry, cfg: &'a Config, input: Bytes) -> Self {
        GraphReader {
            reg,
            cfg,
            input,
            objects: cfg.new_table(),
            types: cfg.new_table(),
            ints: cfg.new_table(),
            longs: cfg.new_table(),
            stack: Vec::new(),
            redispatching: false,
        }
    }

    /// Reads one tagged value unit.
    pub(crate) fn read_value(&mut self) -> Result<Value> {
        num::need(&self.input, 1, "value tag")?;
        match self.input.get_u8() {
            TAG_NULL => Ok(Value::Null),
            TAG_REFERENCE => {
                let id = num::read_id(&mut self.input)?;
                self.objects
                    .lookup(id)
                    .cloned()
                    .ok_or_else(|| CodecError::Corrupt(format!("dangling reference id {id}")))
            }
            TAG_VALUE => self.read_unit(),
            TAG_ARRAY => self.read_array(),
            other => Err(CodecError::Corrupt(format!("unexpected tag byte {other}"))),
        }
    }

    fn read_unit(&mut self) -> Result<Value> {
        let id = num::read_id(&mut self.input)?;
        let type_ref = self.read_type()?;
        match type_ref {
            TypeRef::Str => {
                let s = mutf8::read_string(&mut self.input)?;
                let value = Value::Str(s);
                self.register(id, value.clone())?;
                Ok(value)
            }
            TypeRef::Boolean => {
                num::need(&self.input, 1, "boolean payload")?;
                let value = match self.input.get_u8() {
                    0 => Value::Bool(false),
                    1 => Value::Bool(true),
                    other => {
                        return Err(CodecError::Corrupt(format!("boolean payload byte {other}")))
                    }
                };
                self.register(id, value.clone())?;
                Ok(value)
            }
            TypeRef::Int => {
                let value = Value::I32(num::read_i32(&mut self.input)?);
                self.register(id, value.clone())?;
                Ok(value)
            }
            TypeRef::Long => {
                let value = Value::I64(num::read_i64(&mut self.input)?);
                self.register(id, value.clone())?;
                Ok(value)
            }
            TypeRef::Float => {
                let bits = num::read_i32_raw(&mut self.input)?;
                let value = Value::F32(f32::from_bits(bits as u32));
                self.register(id, value.clone())?;
                Ok(value)
            }
            TypeRef::Double => {
                let bits = num::read_i64_raw(&mut self.input)?;
                let value = Value::F64(f64::from_bits(bits as u64));
                self.register(id, value.clone())?;
                Ok(value)
            }
            TypeRef::User(desc) => self.read_user(desc, id),
        }
    }

    fn read_user(&mut self, desc: Arc<TypeDescriptor>, id: u32) -> Result<Value> {
        // Blank instance first, registered before any field is read.
        let obj = desc.create()?;
        let value = Value::Object(obj.clone());
        self.register(id, value.clone())?;
        let payload_start = self.input.clone();
        self.populate(&desc, &obj)?;
        if let Some(resolve) = desc.resolve_on_read() {
            let resolved = resolve(value.clone()).map_err(hook_error)?;
            self.objects.replace(id, resolved.clone())?;
            if !same_runtime_type(&resolved, &value) {
                if let Value::Object(new_rc) = &resolved {
                    let new_desc = {
                        let guard = new_rc.borrow();
                        self.reg.descriptor_by_type_id(Any::type_id(&*guard))?
                    };
                    self.redispatch(&desc, &new_desc, new_rc, payload_start)?;
                }
            }
            return Ok(resolved);
        }
        Ok(value)
    }

    fn populate(&mut self, desc: &Arc<TypeDescriptor>, obj: &ObjRef) -> Result<()> {
        if let Some(ext) = desc.external() {
            self.stack.push(Frame { desc: desc.clone(), section: desc.sections().len() - 1 });
            let result = {
                let mut guard = obj.borrow_mut();
                (ext.read)(&mut *guard, &mut ObjectInput(self)).map_err(hook_error)
            };
            self.stack.pop();
            return result;
        }
        for index in 0..desc.sections().len() {
            self.populate_section(desc, obj, index)?;
        }
        Ok(())
    }

    fn populate_section(
        &mut self,
        desc: &Arc<TypeDescriptor>,
        obj: &ObjRef,
        index: usize,
    ) -> Result<()> {
        self.stack.push(Frame { desc: desc.clone(), section: index });
        let section = &desc.sections()[index];
        let result = match section.read_hook() {
            Some(hook) => {
                let mut guard = obj.borrow_mut();
                hook(&mut *guard, &mut ObjectInput(self)).map_err(hook_error)
            }
            None => {
                let mut guard = obj.borrow_mut();
                reflect::read_fields(self, &mut *guard, section.fields())
            }
        };
        self.stack.pop();
        result
    }

    /// Re-populates a resolved instance of a different type from the payload
    /// already consumed. Sections present in the written type are re-read;
    /// sections the writer never knew about get their no-data hook.
    fn redispatch(
        &mut self,
        written: &Arc<TypeDescriptor>,
        resolved: &Arc<TypeDescriptor>,
        obj: &ObjRef,
        payload: Bytes,
    ) -> Result<()> {
        let main = std::mem::replace(&mut self.input, payload);
        let was = std::mem::replace(&mut self.redispatching, true);
        let result = (|| {
            if resolved.external().is_some() {
                return self.populate(resolved, obj);
            }
            for index in 0..resolved.sections().len() {
                let has_data = {
                    let section = &resolved.sections()[index];
                    written.sections().iter().any(|s| s.name() == section.name())
                };
                if has_data {
                    self.populate_section(resolved, obj, index)?;
                } else if let Some(no_data) = resolved.sections()[index].read_no_data() {
                    let mut guard = obj.borrow_mut();
                    no_data(&mut *guard).map_err(hook_error)?;
                }
            }
            Ok(())
        })();
        self.redispatching = was;
        self.input = main;
        result
    }

    fn read_array(&mut self) -> Result<Value> {
        let len = num::read_i32(&mut self.input)?;
        if len < 0 {
            return Err(CodecError::Corrupt(format!("negative array length {len}")));
        }
        let len = len as usize;
        let id = num::read_id(&mut self.input)?;
        num::need(&self.input, 1, "array element kind")?;
        match self.input.get_u8() {
            ELEM_REF => {
                let rc = Rc::new(RefCell::new(Vec::with_capacity(len.min(4096))));
                let value = Value::Array(rc.clone());
                self.register(id, value.clone())?;
                for _ in 0..len {
                    let item = self.read_value()?;
                    rc.borrow_mut().push(item);
                }
                Ok(value)
            }
            ELEM_I32 => {
                let rc = Rc::new(RefCell::new(Vec::with_capacity(len.min(4096))));
                let value = Value::I32Array(rc.clone());
                self.register(id, value.clone())?;
                for _ in 0..len {
                    let item = self.read_i32_field()?;
                    rc.borrow_mut().push(item);
                }
                Ok(value)
            }
            ELEM_I64 => {
                let rc = Rc::new(RefCell::new(Vec::with_capacity(len.min(4096))));
                let value = Value::I64Array(rc.clone());
                self.register(id, value.clone())?;
                for _ in 0..len {
                    let item = self.read_i64_field()?;
                    rc.borrow_mut().push(item);
                }
                Ok(value)
            }
            ELEM_F32 => {
                let rc = Rc::new(RefCell::new(Vec::with_capacity(len.min(4096))));
                let value = Value::F32Array(rc.clone());
                self.register(id, value.clone())?;
                for _ in 0..len {
                    let item = self.read_f32_field()?;
                    rc.borrow_mut().push(item);
                }
                Ok(value)
            }
            ELEM_F64 => {
                let rc = Rc::new(RefCell::new(Vec::with_capacity(len.min(4096))));
                let value = Value::F64Array(rc.clone());
                self.register(id, value.clone())?;
                for _ in 0..len {
                    let item = self.read_f64_field()?;
                    rc.borrow_mut().push(item);
                }
                Ok(value)
            }
            ELEM_BYTE => {
                num::need(&self.input, len, "byte array payload")?;
                let bytes = self.input.copy_to_bytes(len).to_vec();
                let value = Value::bytes(bytes);
                self.register(id, value.clone())?;
                Ok(value)
            }
            other => Err(CodecError::Corrupt(format!("unexpected array element kind {other}"))),
        }
    }

    fn read_type(&mut self) -> Result<TypeRef> {
        num::need(&self.input, 1, "type tag")?;
        match self.input.get_u8() {
            TAG_VALUE => {
                let tid = num::read_id(&mut self.input)?;
                let name = mutf8::read_string(&mut self.input)?;
                let type_ref = self.resolve_type(&name)?;
                if self.redispatching && self.types.lookup(tid).is_some() {
                    self.types.replace(tid, type_ref.clone())?;
                } else {
                    self.types.insert(type_ref.clone(), 0, tid)?;
                }
                Ok(type_ref)
            }
            TAG_REFERENCE => {
                let tid = num::read_id(&mut self.input)?;
                self.types
                    .lookup(tid)
                    .cloned()
                    .ok_or_else(|| CodecError::Corrupt(format!("dangling type id {tid}")))
            }
            other => Err(CodecError::Corrupt(format!("unexpected type tag {other}"))),
        }
    }

    fn resolve_type(&self, name: &str) -> Result<TypeRef> {
        Ok(match name {
            NAME_BOOLEAN => TypeRef::Boolean,
            NAME_INT => TypeRef::Int,
            NAME_LONG => TypeRef::Long,
            NAME_FLOAT => TypeRef::Float,
            NAME_DOUBLE => TypeRef::Double,
            NAME_STRING => TypeRef::Str,
            user => TypeRef::User(self.reg.descriptor_by_name(user)?),
        })
    }

    fn register(&mut self, id: u32, value: Value) -> Result<()> {
        if self.redispatching && self.objects.lookup(id).is_some() {
            self.objects.replace(id, value)
        } else {
            self.objects.insert(value, 0, id)
        }
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

    pub(crate) fn read_bool_field(&mut self) -> Result<bool> {
        num::need(&self.input, 1, "boolean field")?;
        match self.input.get_u8() {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::Corrupt(format!("boolean field byte {other}"))),
        }
    }

    pub(crate) fn read_i32_field(&mut self) -> Result<i32> {
        if self.cfg.use_int_table {
            num::need(&self.input, 1, "int tag")?;
            return match self.input.get_u8() {
                TAG_VALUE => {
                    let id = num::read_id(&mut self.input)?;
                    let v = self.read_i32_payload()?;
                    if self.redispatching && self.ints.lookup(id).is_some() {
                        self.ints.replace(id, v)?;
                    } else {
                        self.ints.insert(v, 0, id)?;
                    }
                    Ok(v)
                }
                TAG_REFERENCE => {
                    let id = num::read_id(&mut self.input)?;
                    self.ints
                        .lookup(id)
                        .copied()
                        .ok_or_else(|| CodecError::Corrupt(format!("dangling int id {id}")))
                }
                other => Err(CodecError::Corrupt(format!("unexpected int tag {other}"))),
            };
        }
        self.read_i32_payload()
    }

    fn read_i32_payload(&mut self) -> Result<i32> {
        if self.compress_active() {
            num::read_i32(&mut self.input)
        } else {
            num::read_i32_raw(&mut self.input)
        }
    }

    pub(crate) fn read_i64_field(&mut self) -> Result<i64> {
        if self.cfg.use_long_table {
            num::need(&self.input, 1, "long tag")?;
            return match self.input.get_u8() {
                TAG_VALUE => {
                    let id = num::read_id(&mut self.input)?;
                    let v = self.read_i64_payload()?;
                    if self.redispatching && self.longs.lookup(id).is_some() {
                        self.longs.replace(id, v)?;
                    } else {
                        self.longs.insert(v, 0, id)?;
                    }
                    Ok(v)
                }
                TAG_REFERENCE => {
                    let id = num::read_id(&mut self.input)?;
                    self.longs
                        .lookup(id)
                        .copied()
                        .ok_or_else(|| CodecError::Corrupt(format!("dangling long id {id}")))
                }
                other => Err(CodecError::Corrupt(format!("unexpected long tag {other}"))),
            };
        }
        self.read_i64_payload()
    }

    fn read_i64_payload(&mut self) -> Result<i64> {
        if self.compress_active() {
            num::read_i64(&mut self.input)
        } else {
            num::read_i64_raw(&mut self.input)
        }
    }

    pub(crate) fn read_f32_field(&mut self) -> Result<f32> {
        let bits = if self.cfg.use_int_table {
            num::need(&self.input, 1, "float tag")?;
            match self.input.get_u8() {
                TAG_VALUE => {
                    let id = num::read_id(&mut self.input)?;
                    let v = num::read_i32_raw(&mut self.input)?;
                    if self.redispatching && self.ints.lookup(id).is_some() {
                        self.ints.replace(id, v)?;
                    } else {
                        self.ints.insert(v, 0, id)?;
                    }
                    v
                }
                TAG_REFERENCE => {
                    let id = num::read_id(&mut self.input)?;
                    self.ints
                        .lookup(id)
                        .copied()
                        .ok_or_else(|| CodecError::Corrupt(format!("dangling float id {id}")))?
                }
                other => return Err(CodecError::Corrupt(format!("unexpected float tag {other}"))),
            }
        } else {
            num::read_i32_raw(&mut self.input)?
        };
        Ok(f32::from_bits(bits as u32))
    }

    pub(crate) fn read_f64_field(&mut self) -> Result<f64> {
        let bits = if self.cfg.use_long_table {
            num::need(&self.input, 1, "double tag")?;
            match self.input.get_u8() {
                TAG_VALUE => {
                    let id = num::read_id(&mut self.input)?;
                    let v = num::read_i64_raw(&mut self.input)?;
                    if self.redispatching && self.longs.lookup(id).is_some() {
                        self.longs.replace(id, v)?;
                    } else {
                        self.longs.insert(v, 0, id)?;
                    }
                    v
                }
                TAG_REFERENCE => {
                    let id = num::read_id(&mut self.input)?;
                    self.longs
                        .lookup(id)
                        .copied()
                        .ok_or_else(|| CodecError::Corrupt(format!("dangling double id {id}")))?
                }
                other => {
                    return Err(CodecError::Corrupt(format!("unexpected double tag {other}")))
                }
            }
        } else {
            num::read_i64_raw(&mut self.input)?
        };
        Ok(f64::from_bits(bits as u64))
    }

    fn active_frame(&self) -> Result<(Arc<TypeDescriptor>, usize)> {
        self.stack
            .last()
            .map(|f| (f.desc.clone(), f.section))
            .ok_or_else(|| CodecError::Unsupported("no object is being read".into()))
    }
}

/// The stream handle passed to read hooks and external readers.
pub struct ObjectInput<'r, 'a>(pub(crate) &'r mut GraphReader<'a>);

impl ObjectInput<'_, '_> {
    /// Reads the declared fields of the section the hook replaces into `obj`.
    pub fn default_fields(&mut self, obj: &mut dyn Any) -> Result<()> {
        let (desc, section) = self.0.active_frame()?;
        reflect::read_fields(self.0, obj, desc.sections()[section].fields())
    }

    /// Reads a raw boolean.
    pub fn read_bool(&mut self) -> Result<bool> {
        self.0.read_bool_field()
    }

    /// Reads an int through the numeric codec.
    pub fn read_i32(&mut self) -> Result<i32> {
        self.0.read_i32_field()
    }

    /// Reads a long through the numeric codec.
    pub fn read_i64(&mut self) -> Result<i64> {
        self.0.read_i64_field()
    }

    /// Reads a float bit pattern.
    pub fn read_f32(&mut self) -> Result<f32> {
        self.0.read_f32_field()
    }

    /// Reads a double bit pattern.
    pub fn read_f64(&mut self) -> Result<f64> {
        self.0.read_f64_field()
    }

    /// Reads a string unit written by [`crate::ObjectOutput::write_str`].
    pub fn read_str(&mut self) -> Result<String> {
        match self.0.read_value()? {
            Value::Str(s) => Ok(s),
            other => Err(CodecError::Corrupt(format!("expected string unit, got {other:?}"))),
        }
    }

    /// Reads any tagged value unit.
    pub fn read_value(&mut self) -> Result<Value> {
        self.0.read_value()
    }
}
