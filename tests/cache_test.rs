//! Integration coverage for the write-back cache sitting in front of an
//! object store: draft graphs, flush ordering, and cold reloads.

use pdstore::cache::{Cache, CacheField};
use pdstore::object_store::open_store;
use tempfile::tempdir;

#[test]
fn a_chain_of_drafts_flushes_in_one_call_and_reloads_cold() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).unwrap();
    let cache = Cache::new(store, 16, 0.4);

    let mut chain = cache.create("link", vec![CacheField::Int(0), CacheField::Null]);
    for i in 1..20 {
        chain = cache.create("link", vec![CacheField::Int(i), CacheField::Ref(chain)]);
    }

    let head_oid = cache.flush(&chain).unwrap();

    let reloaded = cache.read(&head_oid);
    let mut count = 0;
    let mut cur = reloaded;
    loop {
        let fields = cache.fields(&cur).unwrap();
        count += 1;
        match &fields[1] {
            CacheField::Ref(next) if !next.is_null() => cur = next.clone(),
            _ => break,
        }
    }
    assert_eq!(count, 20);
}

#[test]
fn flush_all_persists_every_outstanding_draft_even_after_handles_drop() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).unwrap();
    let cache = Cache::new(store, 16, 0.4);

    {
        let _a = cache.create("x", vec![CacheField::Int(1)]);
        let _b = cache.create("x", vec![CacheField::Int(2)]);
        // both handles drop at the end of this block
    }

    cache.flush_all().unwrap();
    // every draft reached the store even though nothing external held it
    assert!(cache.len() >= 2);
}
