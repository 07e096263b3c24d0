//! Per-type serialization metadata.
//!
//! A [`TypeDescriptor`] is built once per type and cached process-wide by the
//! [`crate::Registry`]. It carries the wire name, the immutability and
//! number-compression flags, the blank-instance factory, the optional hooks,
//! and an ancestor chain of sections, base-first, each holding a name-sorted
//! field list. Field access goes through accessor closures captured at
//! registration time, so no per-call reflection happens anywhere.

use crate::reader::ObjectInput;
use crate::value::{ObjRef, Value};
use crate::writer::ObjectOutput;
use crate::{CodecError, Result};
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::rc::Rc;

/// Primitive/reference type tag of a field, used by the field reflector to
/// pick the wire form without transmitting the field name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// One byte on the wire.
    Bool,
    /// Numeric codec, int width.
    I32,
    /// Numeric codec, long width.
    I64,
    /// Bit pattern through the int path, fixed payload width.
    F32,
    /// Bit pattern through the long path, fixed payload width.
    F64,
    /// A tagged value unit (object, string, array, boxed primitive or null).
    Ref,
}

type GetFn = Box<dyn Fn(&dyn Any) -> Result<Value> + Send + Sync>;
type SetFn = Box<dyn Fn(&mut dyn Any, Value) -> Result<()> + Send + Sync>;
type WriteHookFn = Box<dyn Fn(&dyn Any, &mut ObjectOutput<'_, '_>) -> Result<()> + Send + Sync>;
type ReadHookFn = Box<dyn Fn(&mut dyn Any, &mut ObjectInput<'_, '_>) -> Result<()> + Send + Sync>;
type ReadNoDataFn = Box<dyn Fn(&mut dyn Any) -> Result<()> + Send + Sync>;
type ReplaceFn = Box<dyn Fn(&dyn Any) -> Result<Value> + Send + Sync>;
type ResolveFn = Box<dyn Fn(Value) -> Result<Value> + Send + Sync>;
type FactoryFn = Box<dyn Fn() -> Result<ObjRef> + Send + Sync>;

/// One field of one section: name, wire kind, and the typed accessors.
pub struct FieldDescriptor {
    name: String,
    kind: FieldKind,
    get: GetFn,
    set: SetFn,
}

impl FieldDescriptor {
    /// The declared field name. Names are sorted at descriptor construction
    /// so writer and reader agree on order without transmitting them.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wire kind of this field.
    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub(crate) fn get(&self, obj: &dyn Any) -> Result<Value> {
        (self.get)(obj)
    }

    pub(crate) fn set(&self, obj: &mut dyn Any, v: Value) -> Result<()> {
        (self.set)(obj, v)
    }
}

/// One level of a type's ancestor chain: its declared fields plus its own
/// optional write/read hooks.
pub struct Section {
    name: String,
    fields: Vec<FieldDescriptor>,
    write_hook: Option<WriteHookFn>,
    read_hook: Option<ReadHookFn>,
    read_no_data: Option<ReadNoDataFn>,
}

impl Section {
    /// The ancestor name this section belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name-sorted field list.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub(crate) fn write_hook(&self) -> Option<&WriteHookFn> {
        self.write_hook.as_ref()
    }

    pub(crate) fn read_hook(&self) -> Option<&ReadHookFn> {
        self.read_hook.as_ref()
    }

    pub(crate) fn read_no_data(&self) -> Option<&ReadNoDataFn> {
        self.read_no_data.as_ref()
    }
}

pub(crate) struct ExternalCodec {
    pub(crate) write: WriteHookFn,
    pub(crate) read: ReadHookFn,
}

/// Cached serialization metadata for one registered type. Immutable after
/// construction and safe for concurrent lookup.
pub struct TypeDescriptor {
    name: String,
    type_id: TypeId,
    immutable: bool,
    number_compression_disabled: bool,
    factory: FactoryFn,
    external: Option<ExternalCodec>,
    replace_on_write: Option<ReplaceFn>,
    resolve_on_read: Option<ResolveFn>,
    /// Ancestor chain, base-first; the concrete type's section is last.
    sections: Vec<Section>,
}

impl TypeDescriptor {
    /// The wire name of the type.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The concrete Rust type this descriptor was registered for.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// True when instances are interned by value equality rather than
    /// identity.
    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    /// True when ints and longs inside this type are written fixed-width.
    pub fn number_compression_disabled(&self) -> bool {
        self.number_compression_disabled
    }

    /// The ancestor chain, base-first.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub(crate) fn external(&self) -> Option<&ExternalCodec> {
        self.external.as_ref()
    }

    pub(crate) fn replace_on_write(&self) -> Option<&ReplaceFn> {
        self.replace_on_write.as_ref()
    }

    pub(crate) fn resolve_on_read(&self) -> Option<&ResolveFn> {
        self.resolve_on_read.as_ref()
    }

    /// Creates a blank, default-constructed instance.
    pub(crate) fn create(&self) -> Result<ObjRef> {
        (self.factory)()
    }

    pub(crate) fn set_immutable(&mut self) {
        self.immutable = true;
    }

    pub(crate) fn set_number_compression_disabled(&mut self) {
        self.number_compression_disabled = true;
    }
}

fn cast_ref<T: Any>(obj: &dyn Any) -> Result<&T> {
    obj.downcast_ref::<T>()
        .ok_or_else(|| CodecError::Unsupported("accessor applied to a foreign type".into()))
}

fn cast_mut<T: Any>(obj: &mut dyn Any) -> Result<&mut T> {
    obj.downcast_mut::<T>()
        .ok_or_else(|| CodecError::Unsupported("accessor applied to a foreign type".into()))
}

/// Collects the fields and hooks of one ancestor level.
pub struct SectionBuilder<T> {
    section: Section,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T: Any> SectionBuilder<T> {
    fn new(name: &str) -> Self {
        SectionBuilder {
            section: Section {
                name: name.to_owned(),
                fields: Vec::new(),
                write_hook: None,
                read_hook: None,
                read_no_data: None,
            },
            _marker: std::marker::PhantomData,
        }
    }

    fn push_field(
        &mut self,
        name: &str,
        kind: FieldKind,
        get: GetFn,
        set: SetFn,
    ) -> &mut Self {
        self.section.fields.push(FieldDescriptor { name: name.to_owned(), kind, get, set });
        self
    }

    /// Declares a boolean field.
    pub fn field_bool(
        &mut self,
        name: &str,
        get: impl Fn(&T) -> bool + Send + Sync + 'static,
        set: impl Fn(&mut T, bool) + Send + Sync + 'static,
    ) -> &mut Self {
        self.push_field(
            name,
            FieldKind::Bool,
            Box::new(move |o| Ok(Value::Bool(get(cast_ref::<T>(o)?)))),
            Box::new(move |o, v| match v {
                Value::Bool(b) => {
                    set(cast_mut::<T>(o)?, b);
                    Ok(())
                }
                other => Err(CodecError::Corrupt(format!("expected bool field, got {other:?}"))),
            }),
        )
    }

    /// Declares an int field.
    pub fn field_i32(
        &mut self,
        name: &str,
        get: impl Fn(&T) -> i32 + Send + Sync + 'static,
        set: impl Fn(&mut T, i32) + Send + Sync + 'static,
    ) -> &mut Self {
        self.push_field(
            name,
            FieldKind::I32,
            Box::new(move |o| Ok(Value::I32(get(cast_ref::<T>(o)?)))),
            Box::new(move |o, v| match v {
                Value::I32(i) => {
                    set(cast_mut::<T>(o)?, i);
                    Ok(())
                }
                other => Err(CodecError::Corrupt(format!("expected int field, got {other:?}"))),
            }),
        )
    }

    /// Declares a long field.
    pub fn field_i64(
        &mut self,
        name: &str,
        get: impl Fn(&T) -> i64 + Send + Sync + 'static,
        set: impl Fn(&mut T, i64) + Send + Sync + 'static,
    ) -> &mut Self {
        self.push_field(
            name,
            FieldKind::I64,
            Box::new(move |o| Ok(Value::I64(get(cast_ref::<T>(o)?)))),
            Box::new(move |o, v| match v {
                Value::I64(i) => {
                    set(cast_mut::<T>(o)?, i);
                    Ok(())
                }
                other => Err(CodecError::Corrupt(format!("expected long field, got {other:?}"))),
            }),
        )
    }

    /// Declares a float field.
    pub fn field_f32(
        &mut self,
        name: &str,
        get: impl Fn(&T) -> f32 + Send + Sync + 'static,
        set: impl Fn(&mut T, f32) + Send + Sync + 'static,
    ) -> &mut Self {
        self.push_field(
            name,
            FieldKind::F32,
            Box::new(move |o| Ok(Value::F32(get(cast_ref::<T>(o)?)))),
            Box::new(move |o, v| match v {
                Value::F32(f) => {
                    set(cast_mut::<T>(o)?, f);
                    Ok(())
                }
                other => Err(CodecError::Corrupt(format!("expected float field, got {other:?}"))),
            }),
        )
    }

    /// Declares a double field.
    pub fn field_f64(
        &mut self,
        name: &str,
        get: impl Fn(&T) -> f64 + Send + Sync + 'static,
        set: impl Fn(&mut T, f64) + Send + Sync + 'static,
    ) -> &mut Self {
        self.push_field(
            name,
            FieldKind::F64,
            Box::new(move |o| Ok(Value::F64(get(cast_ref::<T>(o)?)))),
            Box::new(move |o, v| match v {
                Value::F64(f) => {
                    set(cast_mut::<T>(o)?, f);
                    Ok(())
                }
                other => Err(CodecError::Corrupt(format!("expected double field, got {other:?}"))),
            }),
        )
    }

    /// Declares a string field. Written as a reference unit, so repeated
    /// strings are interned.
    pub fn field_str(
        &mut self,
        name: &str,
        get: impl Fn(&T) -> String + Send + Sync + 'static,
        set: impl Fn(&mut T, String) + Send + Sync + 'static,
    ) -> &mut Self {
        self.push_field(
            name,
            FieldKind::Ref,
            Box::new(move |o| Ok(Value::Str(get(cast_ref::<T>(o)?)))),
            Box::new(move |o, v| match v {
                Value::Str(s) => {
                    set(cast_mut::<T>(o)?, s);
                    Ok(())
                }
                other => Err(CodecError::Corrupt(format!("expected string field, got {other:?}"))),
            }),
        )
    }

    /// Declares a reference field carrying any [`Value`].
    pub fn field_value(
        &mut self,
        name: &str,
        get: impl Fn(&T) -> Value + Send + Sync + 'static,
        set: impl Fn(&mut T, Value) + Send + Sync + 'static,
    ) -> &mut Self {
        self.push_field(
            name,
            FieldKind::Ref,
            Box::new(move |o| Ok(get(cast_ref::<T>(o)?))),
            Box::new(move |o, v| {
                set(cast_mut::<T>(o)?, v);
                Ok(())
            }),
        )
    }

    /// Replaces the default field dump of this section with a custom hook.
    /// The hook may call [`ObjectOutput::default_fields`] to emit the declared
    /// fields at a point of its choosing.
    pub fn write_hook(
        &mut self,
        f: impl Fn(&T, &mut ObjectOutput<'_, '_>) -> Result<()> + Send + Sync + 'static,
    ) -> &mut Self {
        self.section.write_hook = Some(Box::new(move |o, out| f(cast_ref::<T>(o)?, out)));
        self
    }

    /// Mirror of [`SectionBuilder::write_hook`] on the read side.
    pub fn read_hook(
        &mut self,
        f: impl Fn(&mut T, &mut ObjectInput<'_, '_>) -> Result<()> + Send + Sync + 'static,
    ) -> &mut Self {
        self.section.read_hook = Some(Box::new(move |o, input| f(cast_mut::<T>(o)?, input)));
        self
    }

    /// Invoked during read-resolution redispatch when the stream carries no
    /// data for this section.
    pub fn read_no_data(
        &mut self,
        f: impl Fn(&mut T) -> Result<()> + Send + Sync + 'static,
    ) -> &mut Self {
        self.section.read_no_data = Some(Box::new(move |o| f(cast_mut::<T>(o)?)));
        self
    }

    fn finish(mut self) -> Section {
        self.section.fields.sort_by(|a, b| a.name.cmp(&b.name));
        self.section
    }
}

/// Fluent construction of a [`TypeDescriptor`]. Obtained through
/// [`crate::Registry::register`].
pub struct DescriptorBuilder<T> {
    name: String,
    ancestors: Vec<Section>,
    concrete: SectionBuilder<T>,
    immutable: bool,
    number_compression_disabled: bool,
    factory: FactoryFn,
    external: Option<ExternalCodec>,
    replace_on_write: Option<ReplaceFn>,
    resolve_on_read: Option<ResolveFn>,
}

impl<T: Any> DescriptorBuilder<T> {
    pub(crate) fn with_factory(
        name: &str,
        factory: impl Fn() -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        let type_name = name.to_owned();
        DescriptorBuilder {
            name: name.to_owned(),
            ancestors: Vec::new(),
            concrete: SectionBuilder::new(name),
            immutable: false,
            number_compression_disabled: false,
            factory: Box::new(move || {
                let value = factory().map_err(|_| CodecError::Creation(type_name.clone()))?;
                Ok(Rc::new(RefCell::new(value)) as ObjRef)
            }),
            external: None,
            replace_on_write: None,
            resolve_on_read: None,
        }
    }

    /// Declares an ancestor level. Ancestors must be declared base-first;
    /// fields added directly on the builder belong to the concrete type and
    /// are always written last.
    pub fn ancestor(mut self, name: &str, f: impl FnOnce(&mut SectionBuilder<T>)) -> Self {
        let mut section = SectionBuilder::new(name);
        f(&mut section);
        self.ancestors.push(section.finish());
        self
    }

    /// Declares a boolean field on the concrete section.
    pub fn field_bool(
        mut self,
        name: &str,
        get: impl Fn(&T) -> bool + Send + Sync + 'static,
        set: impl Fn(&mut T, bool) + Send + Sync + 'static,
    ) -> Self {
        self.concrete.field_bool(name, get, set);
        self
    }

    /// Declares an int field on the concrete section.
    pub fn field_i32(
        mut self,
        name: &str,
        get: impl Fn(&T) -> i32 + Send + Sync + 'static,
        set: impl Fn(&mut T, i32) + Send + Sync + 'static,
    ) -> Self {
        self.concrete.field_i32(name, get, set);
        self
    }

    /// Declares a long field on the concrete section.
    pub fn field_i64(
        mut self,
        name: &str,
        get: impl Fn(&T) -> i64 + Send + Sync + 'static,
        set: impl Fn(&mut T, i64) + Send + Sync + 'static,
    ) -> Self {
        self.concrete.field_i64(name, get, set);
        self
    }

    /// Declares a float field on the concrete section.
    pub fn field_f32(
        mut self,
        name: &str,
        get: impl Fn(&T) -> f32 + Send + Sync + 'static,
        set: impl Fn(&mut T, f32) + Send + Sync + 'static,
    ) -> Self {
        self.concrete.field_f32(name, get, set);
        self
    }

    /// Declares a double field on the concrete section.
    pub fn field_f64(
        mut self,
        name: &str,
        get: impl Fn(&T) -> f64 + Send + Sync + 'static,
        set: impl Fn(&mut T, f64) + Send + Sync + 'static,
    ) -> Self {
        self.concrete.field_f64(name, get, set);
        self
    }

    /// Declares a string field on the concrete section.
    pub fn field_str(
        mut self,
        name: &str,
        get: impl Fn(&T) -> String + Send + Sync + 'static,
        set: impl Fn(&mut T, String) + Send + Sync + 'static,
    ) -> Self {
        self.concrete.field_str(name, get, set);
        self
    }

    /// Declares a reference field on the concrete section.
    pub fn field_value(
        mut self,
        name: &str,
        get: impl Fn(&T) -> Value + Send + Sync + 'static,
        set: impl Fn(&mut T, Value) + Send + Sync + 'static,
    ) -> Self {
        self.concrete.field_value(name, get, set);
        self
    }

    /// Installs a write hook on the concrete section.
    pub fn write_hook(
        mut self,
        f: impl Fn(&T, &mut ObjectOutput<'_, '_>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.concrete.write_hook(f);
        self
    }

    /// Installs a read hook on the concrete section.
    pub fn read_hook(
        mut self,
        f: impl Fn(&mut T, &mut ObjectInput<'_, '_>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.concrete.read_hook(f);
        self
    }

    /// Installs a no-data hook on the concrete section. See
    /// [`SectionBuilder::read_no_data`].
    pub fn read_no_data(
        mut self,
        f: impl Fn(&mut T) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.concrete.read_no_data(f);
        self
    }

    /// Lets the value substitute a different value before it is encoded.
    /// Returning `Value::Null` suppresses the object entirely.
    pub fn replace_on_write(
        mut self,
        f: impl Fn(&T) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.replace_on_write = Some(Box::new(move |o| f(cast_ref::<T>(o)?)));
        self
    }

    /// Lets the decoded value be substituted after its fields are populated.
    /// The result is re-registered under the same reference id.
    pub fn resolve_on_read(
        mut self,
        f: impl Fn(Value) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.resolve_on_read = Some(Box::new(f));
        self
    }

    /// Marks the type as fully self-managed: the two closures own the whole
    /// binary form and no field list is consulted.
    pub fn external(
        mut self,
        write: impl Fn(&T, &mut ObjectOutput<'_, '_>) -> Result<()> + Send + Sync + 'static,
        read: impl Fn(&mut T, &mut ObjectInput<'_, '_>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.external = Some(ExternalCodec {
            write: Box::new(move |o, out| write(cast_ref::<T>(o)?, out)),
            read: Box::new(move |o, input| read(cast_mut::<T>(o)?, input)),
        });
        self
    }

    /// Interns instances by value equality rather than identity.
    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    /// Writes ints and longs inside this type fixed-width.
    pub fn disable_number_compression(mut self) -> Self {
        self.number_compression_disabled = true;
        self
    }

    pub(crate) fn build(self) -> TypeDescriptor {
        let mut sections = self.ancestors;
        sections.push(self.concrete.finish());
        TypeDescriptor {
            name: self.name,
            type_id: TypeId::of::<T>(),
            immutable: self.immutable,
            number_compression_disabled: self.number_compression_disabled,
            factory: self.factory,
            external: self.external,
            replace_on_write: self.replace_on_write,
            resolve_on_read: self.resolve_on_read,
            sections,
        }
    }
}

impl<T: Any + Default> DescriptorBuilder<T> {
    pub(crate) fn new(name: &str) -> Self {
        Self::with_factory(name, || Ok(T::default()))
    }
}
