//! Process-wide type descriptor cache.
//!
//! The [`Registry`] is the only state shared across encode/decode calls. It
//! is read-mostly: registration stores a lazy builder, and the descriptor is
//! constructed on first encounter with double-checked locking so racing
//! threads converge on one published `Arc<TypeDescriptor>`. Built descriptors
//! are never evicted or mutated.

use crate::descriptor::{DescriptorBuilder, TypeDescriptor};
use crate::{CodecError, Result};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type BuildFn = Arc<dyn Fn() -> TypeDescriptor + Send + Sync>;

#[derive(Default)]
struct Inner {
    builders: HashMap<TypeId, BuildFn>,
    built: HashMap<TypeId, Arc<TypeDescriptor>>,
    by_name: HashMap<String, TypeId>,
    /// Wire names whose instances are interned by value equality.
    immutable_names: Vec<String>,
    /// Wire names (type or ancestor) with fixed-width numbers, in
    /// registration order.
    fixed_number_names: Vec<String>,
}

/// Registry of type descriptors, shared by every session of a codec.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registers a default-constructible type under a stable wire name. The
    /// descriptor itself is built lazily on first use.
    pub fn register<T: Any + Default>(
        &self,
        name: &str,
        configure: impl Fn(DescriptorBuilder<T>) -> DescriptorBuilder<T> + Send + Sync + 'static,
    ) -> Result<()> {
        let wire_name = name.to_owned();
        self.register_builder::<T>(
            name,
            Arc::new(move || configure(DescriptorBuilder::<T>::new(&wire_name)).build()),
        )
    }

    /// Registers a type with an explicit blank-instance factory, for types
    /// without a usable `Default`.
    pub fn register_with_factory<T: Any>(
        &self,
        name: &str,
        factory: impl Fn() -> Result<T> + Send + Sync + Clone + 'static,
        configure: impl Fn(DescriptorBuilder<T>) -> DescriptorBuilder<T> + Send + Sync + 'static,
    ) -> Result<()> {
        let wire_name = name.to_owned();
        self.register_builder::<T>(
            name,
            Arc::new(move || {
                configure(DescriptorBuilder::<T>::with_factory(&wire_name, factory.clone()))
                    .build()
            }),
        )
    }

    fn register_builder<T: Any>(&self, name: &str, build: BuildFn) -> Result<()> {
        let mut inner = self.write_lock();
        let type_id = TypeId::of::<T>();
        if inner.builders.contains_key(&type_id) || inner.built.contains_key(&type_id) {
            return Err(CodecError::Unsupported(format!(
                "type already registered under '{name}'"
            )));
        }
        if inner.by_name.contains_key(name) {
            return Err(CodecError::Unsupported(format!(
                "wire name '{name}' already registered"
            )));
        }
        inner.by_name.insert(name.to_owned(), type_id);
        inner.builders.insert(type_id, build);
        Ok(())
    }

    /// Declares a wire name immutable. Applies to descriptors built after
    /// this call, so configure the registry before the first encode.
    pub fn declare_immutable(&self, name: &str) {
        self.write_lock().immutable_names.push(name.to_owned());
    }

    /// Disables number compression for a wire name. A type matches when the
    /// name is its own or the nearest ancestor in its chain; the match is
    /// evaluated once, when the descriptor is built.
    pub fn disable_number_compression(&self, name: &str) {
        self.write_lock().fixed_number_names.push(name.to_owned());
    }

    /// Looks up (building if necessary) the descriptor for a concrete type.
    pub fn descriptor_by_type_id(&self, type_id: TypeId) -> Result<Arc<TypeDescriptor>> {
        if let Some(d) = self.read_lock().built.get(&type_id) {
            return Ok(d.clone());
        }
        let build = self
            .read_lock()
            .builders
            .get(&type_id)
            .cloned()
            .ok_or_else(|| CodecError::UnknownType(format!("{type_id:?}")))?;
        // Build outside the lock; the first writer publishes, later racers
        // discard their copy.
        let mut descriptor = build();
        self.finalize(&mut descriptor);
        let mut inner = self.write_lock();
        if let Some(existing) = inner.built.get(&type_id) {
            return Ok(existing.clone());
        }
        log::debug!(
            "built descriptor for '{}' ({} sections)",
            descriptor.name(),
            descriptor.sections().len()
        );
        let descriptor = Arc::new(descriptor);
        inner.built.insert(type_id, descriptor.clone());
        Ok(descriptor)
    }

    /// Looks up (building if necessary) the descriptor for a wire name read
    /// from the stream.
    pub fn descriptor_by_name(&self, name: &str) -> Result<Arc<TypeDescriptor>> {
        let type_id = self
            .read_lock()
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| CodecError::UnknownType(name.to_owned()))?;
        self.descriptor_by_type_id(type_id)
    }

    /// Applies registry-level overrides the builder did not set itself.
    fn finalize(&self, descriptor: &mut TypeDescriptor) {
        let inner = self.read_lock();
        if inner.immutable_names.iter().any(|n| n == descriptor.name()) {
            descriptor.set_immutable();
        }
        if !descriptor.number_compression_disabled() {
            // Nearest-ancestor match: scan the chain concrete-first; the
            // first section found in the override list wins, regardless of
            // the order the overrides were registered in.
            let matched = descriptor
                .sections()
                .iter()
                .rev()
                .find(|s| inner.fixed_number_names.iter().any(|n| n == s.name()));
            if matched.is_some() {
                descriptor.set_number_compression_disabled();
            }
        }
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}
