//! Type descriptors and the process-wide type registry.
//!
//! Grounded on `PStruct` (`persistds.py`): a type is a name plus an ordered
//! list of `(field_name, default_value)` pairs, created once and interned
//! so later loads can re-hydrate field lists by name instead of position
//! alone. Per spec.md's design notes, each field additionally records
//! whether it is expected to hold an [`Oid`] so the GC knows which fields
//! to chase without inspecting runtime values.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::field::Field;

/// One field of a [`TypeDescriptor`]: its name, default value, and whether
/// it is expected to carry an [`Oid`](crate::oid::Oid) reference.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub default: Field,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, default: Field) -> Self {
        FieldSpec {
            name: name.into(),
            default,
        }
    }

    pub fn is_oid(&self) -> bool {
        self.default.is_oid()
    }
}

/// `(type_name, [(field_name, default_value), ...])` — created once per
/// distinct type and interned in the [`TypeRegistry`].
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub type_name: String,
    pub fields: Vec<FieldSpec>,
}

impl TypeDescriptor {
    pub fn new(type_name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        TypeDescriptor {
            type_name: type_name.into(),
            fields,
        }
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Indices of fields whose default indicates an Oid-valued field, in
    /// declared field order — the order copy_collect walks them.
    pub fn oid_field_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_oid())
            .map(|(i, _)| i)
    }
}

/// Process-global, lazily-populated map from type name to its interned
/// [`TypeDescriptor`] — the systems-language analogue of `PStruct.mkpstruct`'s
/// `psobj_table`.
#[derive(Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<String, Arc<TypeDescriptor>>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `descriptor`, returning the interned instance. Calling this
    /// again with the same `type_name` returns the first registration
    /// (descriptors are immutable once interned, matching `mkpstruct`).
    pub fn register(&self, descriptor: TypeDescriptor) -> Arc<TypeDescriptor> {
        let mut types = self.types.write();
        types
            .entry(descriptor.type_name.clone())
            .or_insert_with(|| Arc::new(descriptor))
            .clone()
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<TypeDescriptor>> {
        self.types.read().get(type_name).cloned()
    }

    pub fn require(&self, type_name: &str) -> Result<Arc<TypeDescriptor>> {
        self.get(type_name)
            .ok_or_else(|| Error::NotFound(format!("type '{type_name}' not registered")))
    }

    /// Remove every registered type. Tests that need a clean registry
    /// between runs should call this explicitly.
    pub fn reset(&self) {
        self.types.write().clear();
    }
}
