//! The object graph façade: wires the cache in front of the object store
//! and uses the name directory as the GC root-enumeration source.
//!
//! Grounded on `PtrieTester`/`tester.py`
//! (`examples/original_source/ptrie-tester.py`), which owns exactly these
//! three collaborators together and drives them through the same small
//! operation set implemented here.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{Cache, CacheField, Handle};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::field::Field;
use crate::name_directory::NameDirectory;
use crate::object_store::{open_store, ObjectStore};
use crate::oid::Oid;
use crate::type_registry::TypeRegistry;

const OBJECTS_DIR: &str = "objects";
const NAMES_DIR: &str = "names";

/// The engine's public entry point: create/flush objects, name them, and
/// run garbage collection.
pub struct ObjectGraphAPI {
    store: Arc<ObjectStore>,
    cache: Cache,
    directory: NameDirectory,
    types: TypeRegistry,
}

impl ObjectGraphAPI {
    /// Open (creating if absent) the engine rooted at `config.store.dir`.
    pub fn open(config: &EngineConfig) -> Result<Self> {
        let store = open_store(config.store.dir.join(OBJECTS_DIR))?;
        let names_dir = config.store.dir.join(NAMES_DIR);
        std::fs::create_dir_all(&names_dir)?;
        let directory_store = open_store(names_dir.join("nodes"))?;
        let directory = NameDirectory::open(directory_store, &names_dir)?;
        let cache = Cache::new(store.clone(), config.store.cache_capacity, config.store.sweep_threshold);
        Ok(ObjectGraphAPI {
            store,
            cache,
            directory,
            types: TypeRegistry::new(),
        })
    }

    pub fn register_type(&self, descriptor: crate::type_registry::TypeDescriptor) -> Arc<crate::type_registry::TypeDescriptor> {
        self.types.register(descriptor)
    }

    pub fn store(&self) -> &Arc<ObjectStore> {
        &self.store
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn directory(&self) -> &NameDirectory {
        &self.directory
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Create a draft object of `type_name`, filling any field left out of
    /// `field_dict` with its declared default.
    pub fn create_object(&self, type_name: &str, mut field_dict: HashMap<String, CacheField>) -> Result<Handle> {
        let descriptor = self.types.require(type_name)?;
        let mut fields = Vec::with_capacity(descriptor.fields.len());
        for spec in &descriptor.fields {
            let value = field_dict
                .remove(&spec.name)
                .unwrap_or_else(|| self.default_cache_field(&spec.default));
            fields.push(value);
        }
        Ok(self.cache.create(type_name, fields))
    }

    fn default_cache_field(&self, default: &Field) -> CacheField {
        match default {
            Field::Null => CacheField::Null,
            Field::Bool(b) => CacheField::Bool(*b),
            Field::Int(i) => CacheField::Int(*i),
            Field::Bytes(b) => CacheField::Bytes(b.clone()),
            Field::Oid(oid) => CacheField::Ref(self.cache.read(oid)),
        }
    }

    /// The current field values of `handle`, keyed by declared field name.
    pub fn get_fields(&self, handle: &Handle) -> Result<HashMap<String, CacheField>> {
        let type_name = handle.type_name();
        let descriptor = self.types.require(&type_name)?;
        let values = self.cache.fields(handle)?;
        Ok(descriptor
            .fields
            .iter()
            .zip(values)
            .map(|(spec, value)| (spec.name.clone(), value))
            .collect())
    }

    /// Flush `handle` and bind `name` to its persisted OID.
    pub fn store_named(&self, handle: &Handle, name: &str) -> Result<Oid> {
        let oid = self.cache.flush(handle)?;
        self.directory.insert(name.as_bytes(), oid.clone())?;
        Ok(oid)
    }

    /// Look up `name`, returning a handle to [`Oid::null`] if absent.
    pub fn load_named(&self, name: &str) -> Result<Handle> {
        let oid = self.directory.find(name.as_bytes())?;
        Ok(self.cache.read(&oid))
    }

    pub fn remove_named(&self, name: &str) -> Result<()> {
        self.directory.delete(name.as_bytes())
    }

    /// Flush all outstanding drafts, then garbage-collect every store the
    /// directory's entries reach, finishing with the directory's own store.
    pub fn collect(&self, extra_roots: &[Oid]) -> Result<()> {
        self.cache.flush_all()?;
        self.directory.collect(extra_roots)
    }

    /// Flush all outstanding drafts without collecting.
    pub fn close(&self) -> Result<()> {
        self.cache.flush_all()?;
        self.store.close()
    }
}
