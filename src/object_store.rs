//! The structured object store: a pair of [`PoolSet`] half-spaces plus a
//! Cheney-style copying garbage collector.
//!
//! Grounded on `PStructStor` (`examples/original_source/pstructstor.py`):
//! `active`/`standby` pds pairs living under `mem1/`/`mem2/`, an `active`
//! symlink recording which is current, and a recursive `_move` that copies
//! only OIDs stamped by this same store. The active/standby swap-then-
//! truncate sequencing is additionally cross-checked against the
//! rotate/expunge idiom in `RollingStore`/`DbGarbageCollector`
//! (`examples/simbahebinbo-forest/node/db/src/rolling/*.rs`), though that
//! crate rotates whole time-bucketed pool directories rather than
//! copy-collecting into a twin half-space.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::field::{decode_field_list, encode_field_list, Field};
use crate::oid::Oid;
use crate::pool_set::PoolSet;

const MEM1: &str = "mem1";
const MEM2: &str = "mem2";
const ACTIVE_LINK: &str = "active";
const FORWARD_PTR_SIZE: u64 = 8;

/// Process-wide registry of open stores, keyed by canonical directory path,
/// mirroring `PStructStor._pstor_table`: re-opening the same directory
/// within a process returns the same handle instead of racing two
/// independent stores against one file set.
static STORE_REGISTRY: Mutex<Option<HashMap<PathBuf, Weak<ObjectStore>>>> = Mutex::new(None);

/// Open (or return the already-open) store rooted at `dir`. `dir` is
/// created if absent and must be representable as an absolute path once
/// canonicalized.
pub fn open_store(dir: impl AsRef<Path>) -> Result<Arc<ObjectStore>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let canonical = dir.canonicalize()?;

    let mut registry = STORE_REGISTRY.lock();
    let map = registry.get_or_insert_with(HashMap::new);
    if let Some(existing) = map.get(&canonical).and_then(Weak::upgrade) {
        return Ok(existing);
    }

    let store = Arc::new(ObjectStore::open(canonical.clone())?);
    map.insert(canonical, Arc::downgrade(&store));
    Ok(store)
}

/// Pair of [`PoolSet`] half-spaces with a copying GC between them.
pub struct ObjectStore {
    dir: PathBuf,
    pool_id: Arc<str>,
    mem1: PoolSet,
    mem2: PoolSet,
    /// `true` when `mem1` is the active half-space.
    active_is_mem1: Mutex<bool>,
    collecting: AtomicBool,
}

impl ObjectStore {
    fn open(dir: PathBuf) -> Result<Self> {
        let mem1_dir = dir.join(MEM1);
        let mem2_dir = dir.join(MEM2);
        let mem1 = PoolSet::open(&mem1_dir)?;
        let mem2 = PoolSet::open(&mem2_dir)?;

        let active_link = dir.join(ACTIVE_LINK);
        let active_is_mem1 = if active_link.exists() {
            let target = fs::read_link(&active_link)?;
            let target_name = target.file_name().map(|n| n.to_string_lossy().to_string());
            match target_name.as_deref() {
                Some(MEM1) => true,
                Some(MEM2) => false,
                _ => {
                    return Err(Error::Corrupt(format!(
                        "active symlink at {} points to unexpected target {:?}",
                        active_link.display(),
                        target
                    )))
                }
            }
        } else {
            symlink_dir(Path::new(MEM1), &active_link)?;
            true
        };

        let pool_id: Arc<str> = Arc::from(dir.to_string_lossy().as_ref());
        Ok(ObjectStore {
            dir,
            pool_id,
            mem1,
            mem2,
            active_is_mem1: Mutex::new(active_is_mem1),
            collecting: AtomicBool::new(false),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    fn active(&self) -> &PoolSet {
        if *self.active_is_mem1.lock() {
            &self.mem1
        } else {
            &self.mem2
        }
    }

    fn standby(&self) -> &PoolSet {
        if *self.active_is_mem1.lock() {
            &self.mem2
        } else {
            &self.mem1
        }
    }

    /// Serialise `fields`, prepend a zero forwarding pointer, and append the
    /// record into the active half-space.
    pub fn create(&self, type_name: &str, fields: &[Field]) -> Result<Oid> {
        let (slot_size, seq) = self.write_record(self.active(), fields)?;
        Ok(Oid::new(seq, slot_size, self.pool_id.clone(), type_name.to_string()))
    }

    fn write_record(&self, pool_set: &PoolSet, fields: &[Field]) -> Result<(u64, u64)> {
        let mut payload = Vec::new();
        payload.write_u64::<LittleEndian>(0)?; // forward_ptr = 0 (not yet copied)
        payload.extend_from_slice(&encode_field_list(fields));
        pool_set.create(&payload)
    }

    /// Read the field list stored at `oid`. Does not follow nested OIDs.
    pub fn read(&self, oid: &Oid) -> Result<Vec<Field>> {
        if oid.is_null() {
            return Ok(Vec::new());
        }
        let (_, fields) = self.read_record(self.active(), oid)?;
        Ok(fields)
    }

    /// Returns `(forward_ptr, fields)` for the record backing `oid` in
    /// `pool_set`.
    fn read_record(&self, pool_set: &PoolSet, oid: &Oid) -> Result<(u64, Vec<Field>)> {
        let raw = pool_set.retrieve(oid.size(), oid.seq())?;
        if raw.len() < FORWARD_PTR_SIZE as usize {
            return Err(Error::Corrupt("record shorter than forwarding pointer".into()));
        }
        let mut forward_ptr_bytes = &raw[..FORWARD_PTR_SIZE as usize];
        let forward_ptr = forward_ptr_bytes.read_u64::<LittleEndian>()?;
        let fields = decode_field_list(&raw[FORWARD_PTR_SIZE as usize..])?;
        Ok((forward_ptr, fields))
    }

    /// Copy every object reachable from `roots` out of the active
    /// half-space into standby, swap the halves, and truncate what is now
    /// standby (the pre-collection active half). Returns the new OIDs for
    /// each root, in input order.
    pub fn copy_collect(&self, roots: &[Oid]) -> Result<Vec<Oid>> {
        if self
            .collecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Busy);
        }
        let result = self.run_collection(roots);
        self.collecting.store(false, Ordering::SeqCst);
        result
    }

    fn run_collection(&self, roots: &[Oid]) -> Result<Vec<Oid>> {
        info!(store = %self.dir.display(), roots = roots.len(), "garbage collection started");
        let new_roots: Vec<Oid> = roots
            .iter()
            .map(|root| self.move_oid(root))
            .collect::<Result<Vec<_>>>()?;

        // Commit point: atomically flip which half-space is active.
        let was_mem1 = {
            let mut flag = self.active_is_mem1.lock();
            let was = *flag;
            *flag = !was;
            was
        };
        self.swap_active_symlink(!was_mem1)?;

        // The half that was active during this collection is now garbage.
        let old_active = if was_mem1 { &self.mem1 } else { &self.mem2 };
        old_active.expunge_all()?;

        info!(store = %self.dir.display(), "garbage collection finished");
        Ok(new_roots)
    }

    /// Recursively copy `oid` (and anything it reaches that belongs to this
    /// store) from active into standby, following Cheney's forwarding-
    /// pointer discipline.
    fn move_oid(&self, oid: &Oid) -> Result<Oid> {
        if oid.is_null() {
            return Ok(Oid::null());
        }

        let (forward_ptr, mut fields) = self.read_record(self.active(), oid)?;
        if forward_ptr != 0 {
            // Already visited: the forwarding pointer doubles as a
            // dedup marker for shared subtrees.
            return Ok(oid.with_seq(forward_ptr));
        }

        for field in fields.iter_mut() {
            if let Field::Oid(inner) = field {
                if !inner.is_null() && inner.belongs_to(&self.pool_id) {
                    *inner = self.move_oid(inner)?;
                }
                // Foreign-store OIDs are left untouched: opaque to this GC.
            }
        }

        let (new_slot_size, new_seq) = self.write_record(self.standby(), &fields)?;
        let new_oid = Oid::new(new_seq, new_slot_size, self.pool_id.clone(), oid.type_name().to_string());

        // Stamp the source record's forwarding pointer so later references
        // to the same oid resolve to this copy instead of duplicating it.
        self.active()
            .update(oid.size(), oid.seq(), 0, &new_seq.to_le_bytes())?;

        Ok(new_oid)
    }

    fn swap_active_symlink(&self, new_active_is_mem1: bool) -> Result<()> {
        let target = if new_active_is_mem1 { MEM1 } else { MEM2 };
        let active_link = self.dir.join(ACTIVE_LINK);
        let tmp_link = self.dir.join(format!("{ACTIVE_LINK}.tmp"));
        if tmp_link.exists() {
            fs::remove_file(&tmp_link)?;
        }
        symlink_dir(Path::new(target), &tmp_link)?;
        fs::rename(&tmp_link, &active_link)?;
        debug!(store = %self.dir.display(), target, "active half-space swapped");
        Ok(())
    }

    /// Total bytes currently occupied by the active half-space.
    pub fn active_size_bytes(&self) -> Result<u64> {
        self.active().total_bytes()
    }

    /// Total bytes currently occupied by the standby half-space.
    pub fn standby_size_bytes(&self) -> Result<u64> {
        self.standby().total_bytes()
    }

    /// Release this store's resources. Each `RecordPool` keeps its file
    /// open for the store's whole lifetime (spec.md §5), so there is
    /// nothing to flush or close out of band; this exists so callers have
    /// a single, explicit lifecycle operation to call on shutdown rather
    /// than relying on `Drop`.
    pub fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
fn symlink_dir(original: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(original, link)?;
    Ok(())
}

#[cfg(not(unix))]
fn symlink_dir(_original: &Path, _link: &Path) -> Result<()> {
    Err(Error::Corrupt(
        "active/standby symlink swap requires a unix-like filesystem".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store(dir: &Path) -> ObjectStore {
        ObjectStore::open(dir.to_path_buf()).unwrap()
    }

    #[test]
    fn create_then_read_round_trips_fields() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let fields = vec![Field::Int(42), Field::Bool(true)];
        let oid = store.create("counter", &fields).unwrap();
        assert_eq!(store.read(&oid).unwrap(), fields);
    }

    #[test]
    fn reading_null_oid_yields_empty_fields() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        assert_eq!(store.read(&Oid::null()).unwrap(), Vec::<Field>::new());
    }

    #[test]
    fn collect_preserves_shared_subtree_identity() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let child = store.create("leaf", &[Field::Int(1)]).unwrap();
        let parent1 = store
            .create("node", &[Field::Oid(child.clone())])
            .unwrap();
        let parent2 = store
            .create("node", &[Field::Oid(child.clone())])
            .unwrap();

        let new_roots = store.copy_collect(&[parent1, parent2]).unwrap();
        let f1 = store.read(&new_roots[0]).unwrap();
        let f2 = store.read(&new_roots[1]).unwrap();
        assert_eq!(f1[0], f2[0], "both parents must share the same new child oid");
    }

    #[test]
    fn collect_follows_long_chains_and_reclaims_unreachable() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        let mut head = Oid::null();
        for i in (0..1000).rev() {
            head = store
                .create("link", &[Field::Int(i), Field::Oid(head)])
                .unwrap();
        }

        let new_roots = store.copy_collect(&[head]).unwrap();
        let mut count = 0;
        let mut cur = new_roots[0].clone();
        loop {
            let fields = store.read(&cur).unwrap();
            count += 1;
            match &fields[1] {
                Field::Oid(next) if !next.is_null() => cur = next.clone(),
                _ => break,
            }
        }
        assert_eq!(count, 1000);
    }

    #[test]
    fn collect_reclaims_garbage_down_to_one_root() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        let mut last = Oid::null();
        for i in 0..1000 {
            last = store.create("garbage", &[Field::Int(i)]).unwrap();
        }
        let slot_size = last.size();

        let new_roots = store.copy_collect(&[last]).unwrap();
        // The post-collection active half holds only the reserved slot 0
        // plus the one surviving root: everything else was unreachable.
        assert_eq!(store.active_size_bytes().unwrap(), slot_size * 2);
        assert_eq!(store.read(&new_roots[0]).unwrap()[0], Field::Int(999));
    }

    #[test]
    fn concurrent_collect_attempt_is_busy() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.collecting.store(true, Ordering::SeqCst);
        assert!(matches!(store.copy_collect(&[]), Err(Error::Busy)));
    }

    #[test]
    fn reopening_store_resumes_from_the_active_half() {
        let dir = tempdir().unwrap();
        let oid = {
            let store = store(dir.path());
            let oid = store.create("counter", &[Field::Int(7)]).unwrap();
            store.copy_collect(&[oid.clone()]).unwrap();
            store.copy_collect(&[oid.clone()]).unwrap()[0].clone()
        };
        let store = store(dir.path());
        assert_eq!(store.read(&oid).unwrap(), vec![Field::Int(7)]);
    }
}
