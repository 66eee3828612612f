//! End-to-end scenarios driving the engine the way the REPL in `main.rs`
//! does: through [`ObjectGraphAPI`] alone, no direct access to its
//! collaborators.

use std::collections::HashMap;

use pdstore::cache::CacheField;
use pdstore::config::{EngineConfig, StoreConfig};
use pdstore::field::Field;
use pdstore::graph::ObjectGraphAPI;
use pdstore::type_registry::{FieldSpec, TypeDescriptor};
use tempfile::tempdir;

fn open(dir: &std::path::Path) -> ObjectGraphAPI {
    let config = EngineConfig {
        store: StoreConfig {
            dir: dir.to_path_buf(),
            cache_capacity: 64,
            sweep_threshold: 0.4,
        },
    };
    let graph = ObjectGraphAPI::open(&config).unwrap();
    graph.register_type(TypeDescriptor::new(
        "counter",
        vec![FieldSpec::new("value", Field::Int(0))],
    ));
    graph
}

#[test]
fn a_single_integer_object_round_trips_through_a_name() {
    let dir = tempdir().unwrap();
    let graph = open(dir.path());

    let mut fields = HashMap::new();
    fields.insert("value".to_string(), CacheField::Int(42));
    let handle = graph.create_object("counter", fields).unwrap();
    graph.store_named(&handle, "answer").unwrap();

    let loaded = graph.load_named("answer").unwrap();
    let loaded_fields = graph.get_fields(&loaded).unwrap();
    assert!(matches!(loaded_fields["value"], CacheField::Int(42)));
}

#[test]
fn reopening_the_engine_after_close_resumes_every_name() {
    let dir = tempdir().unwrap();
    {
        let graph = open(dir.path());
        let mut fields = HashMap::new();
        fields.insert("value".to_string(), CacheField::Int(7));
        let handle = graph.create_object("counter", fields).unwrap();
        graph.store_named(&handle, "persisted").unwrap();
        graph.close().unwrap();
    }

    let graph = open(dir.path());
    let loaded = graph.load_named("persisted").unwrap();
    assert!(!loaded.is_null());
    let fields = graph.get_fields(&loaded).unwrap();
    assert!(matches!(fields["value"], CacheField::Int(7)));
}

#[test]
fn garbage_collection_preserves_named_objects_and_reclaims_unnamed_ones() {
    let dir = tempdir().unwrap();
    let graph = open(dir.path());

    let mut kept_fields = HashMap::new();
    kept_fields.insert("value".to_string(), CacheField::Int(1));
    let kept = graph.create_object("counter", kept_fields).unwrap();
    graph.store_named(&kept, "kept").unwrap();

    // Unnamed drafts: flushed by `collect`'s internal `flush_all`, but
    // never reachable from the directory, so they're reclaimed.
    for i in 0..200 {
        let mut fields = HashMap::new();
        fields.insert("value".to_string(), CacheField::Int(i));
        graph.create_object("counter", fields).unwrap();
    }

    let before = graph.store().active_size_bytes().unwrap();
    graph.collect(&[]).unwrap();
    let after = graph.store().active_size_bytes().unwrap();
    assert!(after < before, "unnamed drafts should have been reclaimed");

    let loaded = graph.load_named("kept").unwrap();
    let fields = graph.get_fields(&loaded).unwrap();
    assert!(matches!(fields["value"], CacheField::Int(1)));
}

#[test]
fn deleting_a_name_makes_it_unfindable_after_a_collection() {
    let dir = tempdir().unwrap();
    let graph = open(dir.path());

    let mut fields = HashMap::new();
    fields.insert("value".to_string(), CacheField::Int(3));
    let handle = graph.create_object("counter", fields).unwrap();
    graph.store_named(&handle, "transient").unwrap();
    graph.remove_named("transient").unwrap();

    graph.collect(&[]).unwrap();

    let reloaded = graph.load_named("transient").unwrap();
    assert!(reloaded.is_null());
}
