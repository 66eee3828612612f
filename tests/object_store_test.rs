//! Integration coverage for the copying-collector object store: identity
//! across shared subtrees, forwarding correctness, and garbage reclamation
//! at a scale too large to be an inline unit test.

use pdstore::field::Field;
use pdstore::object_store::open_store;
use pdstore::oid::Oid;
use tempfile::tempdir;

#[test]
fn a_thousand_garbage_objects_collect_down_to_the_one_live_root() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).unwrap();

    let mut last = Oid::null();
    for i in 0..1000i64 {
        last = store.create("garbage", &[Field::Int(i)]).unwrap();
    }
    let before = store.active_size_bytes().unwrap();

    let new_roots = store.copy_collect(&[last]).unwrap();
    let after = store.active_size_bytes().unwrap();

    assert!(after < before, "collection should have shrunk the active half");
    assert_eq!(store.read(&new_roots[0]).unwrap(), vec![Field::Int(999)]);
}

#[test]
fn repeated_collections_are_stable_and_reusable() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).unwrap();

    let oid = store.create("counter", &[Field::Int(1)]).unwrap();
    let roots1 = store.copy_collect(&[oid]).unwrap();
    assert_eq!(store.read(&roots1[0]).unwrap(), vec![Field::Int(1)]);

    let roots2 = store.copy_collect(&roots1).unwrap();
    assert_eq!(store.read(&roots2[0]).unwrap(), vec![Field::Int(1)]);
}

#[test]
fn a_diamond_shaped_graph_keeps_a_single_copy_of_its_shared_tail() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).unwrap();

    let tail = store.create("leaf", &[Field::Int(0)]).unwrap();
    let left = store.create("branch", &[Field::Oid(tail.clone())]).unwrap();
    let right = store.create("branch", &[Field::Oid(tail.clone())]).unwrap();
    let top = store
        .create("join", &[Field::Oid(left), Field::Oid(right)])
        .unwrap();

    let new_roots = store.copy_collect(&[top]).unwrap();
    let top_fields = store.read(&new_roots[0]).unwrap();
    let left_fields = store.read(top_fields[0].as_oid().unwrap()).unwrap();
    let right_fields = store.read(top_fields[1].as_oid().unwrap()).unwrap();
    assert_eq!(left_fields[0], right_fields[0], "both branches must share one surviving tail");
}

#[test]
fn opening_the_same_directory_twice_returns_the_same_store_handle() {
    let dir = tempdir().unwrap();
    let a = open_store(dir.path()).unwrap();
    let b = open_store(dir.path()).unwrap();
    assert!(std::sync::Arc::ptr_eq(&a, &b));
}
