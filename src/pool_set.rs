//! Per-directory set of [`RecordPool`]s keyed by record size.
//!
//! Grounded on `FixszPDS` (`fixszPDS.py`): a directory holding one
//! `size_<N>` file per distinct power-of-two record size, created lazily on
//! first use and reopened from disk on startup.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use crate::error::Result;
use crate::record_pool::{RecordPool, MIN_SLOT_SIZE};

fn round_up_to_power_of_two(n: u64) -> u64 {
    if n <= MIN_SLOT_SIZE {
        return MIN_SLOT_SIZE;
    }
    n.next_power_of_two()
}

fn pool_file_name(slot_size: u64) -> String {
    format!("size_{slot_size}")
}

/// A directory containing one [`RecordPool`] file per record size.
pub struct PoolSet {
    dir: PathBuf,
    pools: RwLock<HashMap<u64, RecordPool>>,
}

impl PoolSet {
    /// Open `dir`, creating it if absent, and eagerly reopen any existing
    /// `size_<N>` files already present.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let mut pools = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(size_str) = name.strip_prefix("size_") {
                if let Ok(slot_size) = size_str.parse::<u64>() {
                    let pool = RecordPool::open(entry.path(), slot_size)?;
                    debug!(slot_size, dir = %dir.display(), "reopened existing record pool");
                    pools.insert(slot_size, pool);
                }
            }
        }
        Ok(PoolSet {
            dir,
            pools: RwLock::new(pools),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Route a payload of `payload_len` bytes to its pool, creating the
    /// pool file if this is the first record of that rounded-up size.
    fn slot_size_for(&self, payload_len: usize) -> u64 {
        round_up_to_power_of_two(payload_len as u64)
    }

    fn ensure_pool(&self, slot_size: u64) -> Result<()> {
        if self.pools.read().contains_key(&slot_size) {
            return Ok(());
        }
        let mut pools = self.pools.write();
        pools
            .entry(slot_size)
            .or_insert(RecordPool::open(self.dir.join(pool_file_name(slot_size)), slot_size)?);
        Ok(())
    }

    /// Append `payload`, routing it to the pool sized for `payload.len()`.
    /// Returns `(slot_size, seq)`.
    pub fn create(&self, payload: &[u8]) -> Result<(u64, u64)> {
        let slot_size = self.slot_size_for(payload.len());
        self.ensure_pool(slot_size)?;
        let pools = self.pools.read();
        let seq = pools[&slot_size].create(payload)?;
        Ok((slot_size, seq))
    }

    pub fn retrieve(&self, slot_size: u64, seq: u64) -> Result<Vec<u8>> {
        self.ensure_pool(slot_size)?;
        let pools = self.pools.read();
        pools[&slot_size].retrieve(seq)
    }

    pub fn update(&self, slot_size: u64, seq: u64, offset: u64, partial: &[u8]) -> Result<()> {
        self.ensure_pool(slot_size)?;
        let pools = self.pools.read();
        pools[&slot_size].update(seq, offset, partial)
    }

    /// Truncate every pool back to its single reserved slot.
    pub fn expunge_all(&self) -> Result<()> {
        for pool in self.pools.read().values() {
            pool.expunge()?;
        }
        Ok(())
    }

    /// Total byte size of every pool file, used to report store occupancy.
    pub fn total_bytes(&self) -> Result<u64> {
        let mut total = 0u64;
        for pool in self.pools.read().values() {
            total += pool.slot_count()? * pool.slot_size();
        }
        Ok(total)
    }

    pub fn sizes(&self) -> Vec<u64> {
        let mut sizes: Vec<u64> = self.pools.read().keys().copied().collect();
        sizes.sort_unstable();
        sizes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rounds_payload_length_up_to_power_of_two() {
        let dir = tempdir().unwrap();
        let set = PoolSet::open(dir.path()).unwrap();
        let (slot_size, _seq) = set.create(&vec![0u8; 50]).unwrap();
        assert_eq!(slot_size, 64);
        assert!(dir.path().join("size_64").exists());
    }

    #[test]
    fn minimum_slot_size_is_eight() {
        let dir = tempdir().unwrap();
        let set = PoolSet::open(dir.path()).unwrap();
        let (slot_size, _seq) = set.create(&[1, 2]).unwrap();
        assert_eq!(slot_size, 8);
    }

    #[test]
    fn reopen_discovers_existing_pool_files() {
        let dir = tempdir().unwrap();
        let seq = {
            let set = PoolSet::open(dir.path()).unwrap();
            let (slot_size, seq) = set.create(&vec![1u8; 20]).unwrap();
            assert_eq!(slot_size, 32);
            seq
        };
        let set = PoolSet::open(dir.path()).unwrap();
        let rec = set.retrieve(32, seq).unwrap();
        assert_eq!(&rec[..20], &vec![1u8; 20][..]);
    }
}
