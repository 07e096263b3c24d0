//! The dynamic value model carried through the codec.
//!
//! Graphs are built out of [`Value`]s. Objects and arrays are held behind
//! `Rc<RefCell<..>>` so that shared references and cycles survive a round
//! trip: the writer interns them by pointer identity, and the reader registers
//! a blank instance before populating its fields.

use crate::registry::Registry;
use crate::{CodecError, Result};
use std::any::Any;
use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// A shared, interiorly-mutable handle to an instance of a registered type.
pub type ObjRef = Rc<RefCell<dyn Any>>;

/// Recursion cap for structural hashing/equality of immutable values.
const MAX_IMMUTABLE_DEPTH: usize = 64;

/// A node in an object graph.
#[derive(Clone, Default)]
pub enum Value {
    /// The null reference.
    #[default]
    Null,
    /// A boxed boolean.
    Bool(bool),
    /// A boxed 32-bit integer.
    I32(i32),
    /// A boxed 64-bit integer.
    I64(i64),
    /// A boxed 32-bit float.
    F32(f32),
    /// A boxed 64-bit float.
    F64(f64),
    /// A string; always interned by value equality.
    Str(String),
    /// An instance of a registered type.
    Object(ObjRef),
    /// An array of values.
    Array(Rc<RefCell<Vec<Value>>>),
    /// A primitive int array.
    I32Array(Rc<RefCell<Vec<i32>>>),
    /// A primitive long array.
    I64Array(Rc<RefCell<Vec<i64>>>),
    /// A primitive float array.
    F32Array(Rc<RefCell<Vec<f32>>>),
    /// A primitive double array.
    F64Array(Rc<RefCell<Vec<f64>>>),
    /// A raw byte array.
    ByteArray(Rc<RefCell<Vec<u8>>>),
}

impl Value {
    /// Wraps an instance of a registered type.
    pub fn object<T: Any>(value: T) -> Value {
        Value::Object(Rc::new(RefCell::new(value)))
    }

    /// Wraps an object array.
    pub fn array(values: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(values)))
    }

    /// Wraps a primitive int array.
    pub fn ints(values: Vec<i32>) -> Value {
        Value::I32Array(Rc::new(RefCell::new(values)))
    }

    /// Wraps a primitive long array.
    pub fn longs(values: Vec<i64>) -> Value {
        Value::I64Array(Rc::new(RefCell::new(values)))
    }

    /// Wraps a raw byte array.
    pub fn bytes(values: Vec<u8>) -> Value {
        Value::ByteArray(Rc::new(RefCell::new(values)))
    }

    /// Returns the object handle if this value is an object.
    pub fn as_object(&self) -> Option<&ObjRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Returns the string if this value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if this value is a boxed i32.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the long if this value is a boxed i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns true for the null reference.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The allocation address backing this value, if it has one. Two values
    /// share identity exactly when their addresses match.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::Object(rc) => Some(Rc::as_ptr(rc) as *const () as usize),
            Value::Array(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::I32Array(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::I64Array(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::F32Array(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::F64Array(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::ByteArray(rc) => Some(Rc::as_ptr(rc) as usize),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::I32(v) => write!(f, "I32({v})"),
            Value::I64(v) => write!(f, "I64({v})"),
            Value::F32(v) => write!(f, "F32({v})"),
            Value::F64(v) => write!(f, "F64({v})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Object(rc) => write!(f, "Object(0x{:x})", Rc::as_ptr(rc) as *const () as usize),
            Value::Array(rc) => write!(f, "Array(len={})", rc.borrow().len()),
            Value::I32Array(rc) => write!(f, "I32Array(len={})", rc.borrow().len()),
            Value::I64Array(rc) => write!(f, "I64Array(len={})", rc.borrow().len()),
            Value::F32Array(rc) => write!(f, "F32Array(len={})", rc.borrow().len()),
            Value::F64Array(rc) => write!(f, "F64Array(len={})", rc.borrow().len()),
            Value::ByteArray(rc) => write!(f, "ByteArray(len={})", rc.borrow().len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// True when the two values have the same runtime type. For objects this
/// compares the concrete `TypeId`; for every other pairing it compares the
/// variant only.
pub(crate) fn same_runtime_type(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => {
            let x = x.borrow();
            let y = y.borrow();
            (*x).type_id() == (*y).type_id()
        }
        _ => std::mem::discriminant(a) == std::mem::discriminant(b),
    }
}

/// Structural hash used by the equality-based (immutable) reference table.
/// Objects are hashed through their descriptor's field accessors.
pub(crate) fn structural_hash(reg: &Registry, v: &Value) -> Result<u64> {
    let mut h = DefaultHasher::new();
    hash_into(reg, v, &mut h, 0)?;
    Ok(h.finish())
}

fn hash_into(reg: &Registry, v: &Value, h: &mut DefaultHasher, depth: usize) -> Result<()> {
    if depth > MAX_IMMUTABLE_DEPTH {
        return Err(CodecError::Unsupported(
            "immutable value nests deeper than the interning limit".into(),
        ));
    }
    std::mem::discriminant(v).hash(h);
    match v {
        Value::Null => {}
        Value::Bool(b) => b.hash(h),
        Value::I32(i) => i.hash(h),
        Value::I64(i) => i.hash(h),
        Value::F32(f) => f.to_bits().hash(h),
        Value::F64(f) => f.to_bits().hash(h),
        Value::Str(s) => s.hash(h),
        Value::Object(rc) => {
            let guard = rc.borrow();
            let obj: &dyn Any = &*guard;
            let desc = reg.descriptor_by_type_id(obj.type_id())?;
            desc.name().hash(h);
            for section in desc.sections() {
                for field in section.fields() {
                    hash_into(reg, &field.get(obj)?, h, depth + 1)?;
                }
            }
        }
        Value::Array(rc) => {
            for item in rc.borrow().iter() {
                hash_into(reg, item, h, depth + 1)?;
            }
        }
        Value::I32Array(rc) => rc.borrow().hash(h),
        Value::I64Array(rc) => rc.borrow().hash(h),
        Value::F32Array(rc) => {
            for f in rc.borrow().iter() {
                f.to_bits().hash(h);
            }
        }
        Value::F64Array(rc) => {
            for f in rc.borrow().iter() {
                f.to_bits().hash(h);
            }
        }
        Value::ByteArray(rc) => rc.borrow().hash(h),
    }
    Ok(())
}

/// Structural equality used by the equality-based (immutable) reference table.
pub(crate) fn structural_eq(reg: &Registry, a: &Value, b: &Value) -> Result<bool> {
    eq_at(reg, a, b, 0)
}

fn eq_at(reg: &Registry, a: &Value, b: &Value, depth: usize) -> Result<bool> {
    if depth > MAX_IMMUTABLE_DEPTH {
        return Err(CodecError::Unsupported(
            "immutable value nests deeper than the interning limit".into(),
        ));
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ok(true),
        (Value::Bool(x), Value::Bool(y)) => Ok(x == y),
        (Value::I32(x), Value::I32(y)) => Ok(x == y),
        (Value::I64(x), Value::I64(y)) => Ok(x == y),
        (Value::F32(x), Value::F32(y)) => Ok(x.to_bits() == y.to_bits()),
        (Value::F64(x), Value::F64(y)) => Ok(x.to_bits() == y.to_bits()),
        (Value::Str(x), Value::Str(y)) => Ok(x == y),
        (Value::Object(x), Value::Object(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let xg = x.borrow();
            let yg = y.borrow();
            let xo: &dyn Any = &*xg;
            let yo: &dyn Any = &*yg;
            if xo.type_id() != yo.type_id() {
                return Ok(false);
            }
            let desc = reg.descriptor_by_type_id(xo.type_id())?;
            for section in desc.sections() {
                for field in section.fields() {
                    if !eq_at(reg, &field.get(xo)?, &field.get(yo)?, depth + 1)? {
                        return Ok(false);
                    }
                }
            }
            Ok(true)
        }
        (Value::Array(x), Value::Array(y)) => {
            let xs = x.borrow();
            let ys = y.borrow();
            if xs.len() != ys.len() {
                return Ok(false);
            }
            for (xi, yi) in xs.iter().zip(ys.iter()) {
                if !eq_at(reg, xi, yi, depth + 1)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::I32Array(x), Value::I32Array(y)) => Ok(*x.borrow() == *y.borrow()),
        (Value::I64Array(x), Value::I64Array(y)) => Ok(*x.borrow() == *y.borrow()),
        (Value::F32Array(x), Value::F32Array(y)) => Ok(x
            .borrow()
            .iter()
            .map(|f| f.to_bits())
            .eq(y.borrow().iter().map(|f| f.to_bits()))),
        (Value::F64Array(x), Value::F64Array(y)) => Ok(x
            .borrow()
            .iter()
            .map(|f| f.to_bits())
            .eq(y.borrow().iter().map(|f| f.to_bits()))),
        (Value::ByteArray(x), Value::ByteArray(y)) => Ok(*x.borrow() == *y.borrow()),
        _ => Ok(false),
    }
}
