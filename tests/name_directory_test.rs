//! Integration coverage for the persistent name trie: traversal ordering
//! and survival of named values across a directory-wide collection.

use pdstore::field::Field;
use pdstore::object_store::open_store;
use pdstore::name_directory::NameDirectory;
use tempfile::tempdir;

#[test]
fn deleting_a_prefix_leaves_its_longer_siblings_in_lexicographic_order() {
    let dir = tempdir().unwrap();
    let node_store = open_store(dir.path().join("nodes")).unwrap();
    let directory = NameDirectory::open(node_store.clone(), dir.path()).unwrap();
    let values = open_store(dir.path().join("values")).unwrap();

    for (i, name) in ["apple", "app", "apricot", "banana"].iter().enumerate() {
        let oid = values.create("leaf", &[Field::Int(i as i64)]).unwrap();
        directory.insert(name.as_bytes(), oid).unwrap();
    }
    directory.delete(b"app").unwrap();

    let as_names = |pairs: &[(Vec<u8>, pdstore::oid::Oid)]| -> Vec<String> {
        pairs
            .iter()
            .map(|(k, _)| String::from_utf8(k.clone()).unwrap())
            .collect()
    };
    let df = directory.depth_first().unwrap();
    let bf = directory.breadth_first().unwrap();
    assert_eq!(as_names(&df), vec!["apple", "apricot", "banana"]);
    // breadth-first groups by depth, not lexicographically: "apple" (depth
    // 5) and "banana" (depth 6) both precede "apricot" (depth 7) here.
    assert_eq!(as_names(&bf), vec!["apple", "banana", "apricot"]);
    assert!(directory.find(b"app").unwrap().is_null());
}

#[test]
fn collecting_the_directory_keeps_every_named_value_reachable_under_new_oids() {
    let dir = tempdir().unwrap();
    let node_store = open_store(dir.path().join("nodes")).unwrap();
    let directory = NameDirectory::open(node_store, dir.path()).unwrap();
    let values = open_store(dir.path().join("values")).unwrap();

    let mut expected = Vec::new();
    for (i, name) in ["alpha", "beta", "gamma", "delta"].iter().enumerate() {
        let oid = values.create("leaf", &[Field::Int(i as i64)]).unwrap();
        directory.insert(name.as_bytes(), oid).unwrap();
        expected.push((*name, i as i64));
    }

    directory.collect(&[]).unwrap();

    for (name, i) in expected {
        let oid = directory.find(name.as_bytes()).unwrap();
        assert!(!oid.is_null());
        assert_eq!(values.read(&oid).unwrap(), vec![Field::Int(i)]);
    }
}
