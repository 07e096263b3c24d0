//! Field reflector: bulk field transfer for one section, dispatched by the
//! primitive type code each field was declared with. Field order is the
//! name-sorted order fixed at descriptor construction, so no names travel.

use crate::descriptor::{FieldDescriptor, FieldKind};
use crate::reader::GraphReader;
use crate::value::Value;
use crate::writer::GraphWriter;
use crate::{CodecError, Result};
use std::any::Any;

pub(crate) fn write_fields(
    w: &mut GraphWriter<'_>,
    obj: &dyn Any,
    fields: &[FieldDescriptor],
) -> Result<()> {
    for field in fields {
        let value = field.get(obj)?;
        match (field.kind(), &value) {
            (FieldKind::Bool, Value::Bool(v)) => w.write_bool_field(*v),
            (FieldKind::I32, Value::I32(v)) => w.write_i32_field(*v),
            (FieldKind::I64, Value::I64(v)) => w.write_i64_field(*v),
            (FieldKind::F32, Value::F32(v)) => w.write_f32_field(*v),
            (FieldKind::F64, Value::F64(v)) => w.write_f64_field(*v),
            (FieldKind::Ref, v) => w.write_value(v)?,
            (kind, v) => {
                return Err(CodecError::Unsupported(format!(
                    "field '{}' declared {kind:?} but accessor produced {v:?}",
                    field.name()
                )))
            }
        }
    }
    Ok(())
}

pub(crate) fn read_fields(
    r: &mut GraphReader<'_>,
    obj: &mut dyn Any,
    fields: &[FieldDescriptor],
) -> Result<()> {
    for field in fields {
        let value = match field.kind() {
            FieldKind::Bool => Value::Bool(r.read_bool_field()?),
            FieldKind::I32 => Value::I32(r.read_i32_field()?),
            FieldKind::I64 => Value::I64(r.read_i64_field()?),
            FieldKind::F32 => Value::F32(r.read_f32_field()?),
            FieldKind::F64 => Value::F64(r.read_f64_field()?),
            FieldKind::Ref => r.read_value()?,
        };
        field.set(obj, value)?;
    }
    Ok(())
}
