//! Fixed-size record pool — a raw, append-oriented file of slots of one
//! power-of-two size, addressed by sequence number.
//!
//! Grounded on `ChunkPool` (onurtuna-OasisNvr's `storage/chunk_pool.rs`) and
//! `StorPool` (the `PersistDS` original, `fixszPDS.py`): both manage a flat
//! file of fixed-size slots, appending on write and seeking on read. Unlike
//! `ChunkPool` this pool never rotates or wraps — records live until a GC
//! expunges the whole half-space (see [`crate::object_store`]).
//!
//! ## File layout
//!
//! ```text
//! [ slot 0 (reserved) ][ slot 1 ][ slot 2 ] ...
//! ```
//! Each slot is exactly `slot_size` bytes:
//! ```text
//! [ forward_ptr : u64 little-endian ][ payload : slot_size - 8 bytes ]
//! ```
//! `forward_ptr == 0` means "not yet copied during GC" (see
//! [`crate::object_store::ObjectStore::copy_collect`]).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

/// Smallest meaningful record size: the width of the forwarding pointer.
pub const MIN_SLOT_SIZE: u64 = 8;

/// A single file of fixed-size slots. Slot 0 is reserved so that `seq == 0`
/// can mean "null" on the wire ([`crate::oid::Oid::null`]).
pub struct RecordPool {
    path: PathBuf,
    slot_size: u64,
    file: Mutex<File>,
}

impl RecordPool {
    /// Open (creating if absent) the pool file at `path` with slots of
    /// `slot_size` bytes. If the file is freshly created, it is
    /// pre-truncated to one slot to reserve slot 0.
    pub fn open(path: impl Into<PathBuf>, slot_size: u64) -> Result<Self> {
        assert!(slot_size >= MIN_SLOT_SIZE, "slot_size below minimum");
        let path = path.into();
        let existed = path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let pool = RecordPool {
            path,
            slot_size,
            file: Mutex::new(file),
        };
        if !existed {
            pool.file.lock().set_len(slot_size)?;
            debug!(path = %pool.path.display(), slot_size, "created record pool, reserved slot 0");
        }
        Ok(pool)
    }

    pub fn slot_size(&self) -> u64 {
        self.slot_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of slots currently in the file, including the reserved slot 0.
    pub fn slot_count(&self) -> Result<u64> {
        let len = self.file.lock().metadata()?.len();
        if len % self.slot_size != 0 {
            return Err(Error::Corrupt(format!(
                "pool file {} has length {len}, not a multiple of slot size {}",
                self.path.display(),
                self.slot_size
            )));
        }
        Ok(len / self.slot_size)
    }

    fn check_in_range(&self, seq: u64) -> Result<()> {
        let pool_len = self.slot_count()?;
        if seq >= pool_len {
            return Err(Error::OutOfRange { seqnum: seq, pool_len });
        }
        Ok(())
    }

    /// Append `payload` (right-padded with zeros if shorter than a slot) at
    /// the end of the file, aligned to a slot boundary. Returns the new
    /// slot's sequence number.
    pub fn create(&self, payload: &[u8]) -> Result<u64> {
        if payload.len() as u64 > self.slot_size {
            return Err(Error::Overflow {
                offset: 0,
                len: payload.len(),
                slot_size: self.slot_size,
            });
        }
        let mut file = self.file.lock();
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(payload)?;
        let padding = self.slot_size - payload.len() as u64;
        if padding > 0 {
            file.write_all(&vec![0u8; padding as usize])?;
        }
        let seq = offset / self.slot_size;
        Ok(seq)
    }

    /// Read the full `slot_size` bytes at `seq`.
    pub fn retrieve(&self, seq: u64) -> Result<Vec<u8>> {
        self.check_in_range(seq)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(seq * self.slot_size))?;
        let mut buf = vec![0u8; self.slot_size as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Overwrite `partial` at `(seq * slot_size + offset)`. Used only to set
    /// forwarding pointers during GC.
    pub fn update(&self, seq: u64, offset: u64, partial: &[u8]) -> Result<()> {
        self.check_in_range(seq)?;
        if offset + partial.len() as u64 > self.slot_size {
            return Err(Error::Overflow {
                offset,
                len: partial.len(),
                slot_size: self.slot_size,
            });
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(seq * self.slot_size + offset))?;
        file.write_all(partial)?;
        Ok(())
    }

    /// Truncate the file back to a single reserved slot.
    pub fn expunge(&self) -> Result<()> {
        let file = self.file.lock();
        file.set_len(self.slot_size)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reserves_slot_zero_on_fresh_file() {
        let dir = tempdir().unwrap();
        let pool = RecordPool::open(dir.path().join("size_32"), 32).unwrap();
        assert_eq!(pool.slot_count().unwrap(), 1);
    }

    #[test]
    fn create_then_retrieve_round_trips_with_padding() {
        let dir = tempdir().unwrap();
        let pool = RecordPool::open(dir.path().join("size_32"), 32).unwrap();
        let seq = pool.create(b"hello").unwrap();
        assert_eq!(seq, 1);
        let got = pool.retrieve(seq).unwrap();
        let mut expected = b"hello".to_vec();
        expected.resize(32, 0);
        assert_eq!(got, expected);
    }

    #[test]
    fn retrieve_out_of_range_errors() {
        let dir = tempdir().unwrap();
        let pool = RecordPool::open(dir.path().join("size_32"), 32).unwrap();
        assert!(matches!(pool.retrieve(99), Err(Error::OutOfRange { .. })));
    }

    #[test]
    fn create_too_large_errors() {
        let dir = tempdir().unwrap();
        let pool = RecordPool::open(dir.path().join("size_32"), 32).unwrap();
        assert!(matches!(
            pool.create(&vec![0u8; 33]),
            Err(Error::Overflow { .. })
        ));
    }

    #[test]
    fn update_overwrites_forward_pointer_region() {
        let dir = tempdir().unwrap();
        let pool = RecordPool::open(dir.path().join("size_32"), 32).unwrap();
        let seq = pool.create(b"payload-bytes").unwrap();
        pool.update(seq, 0, &42u64.to_le_bytes()).unwrap();
        let rec = pool.retrieve(seq).unwrap();
        assert_eq!(&rec[..8], &42u64.to_le_bytes());
    }

    #[test]
    fn update_overflow_errors() {
        let dir = tempdir().unwrap();
        let pool = RecordPool::open(dir.path().join("size_32"), 32).unwrap();
        let seq = pool.create(b"x").unwrap();
        assert!(matches!(
            pool.update(seq, 30, &[1, 2, 3, 4]),
            Err(Error::Overflow { .. })
        ));
    }

    #[test]
    fn expunge_truncates_to_one_slot() {
        let dir = tempdir().unwrap();
        let pool = RecordPool::open(dir.path().join("size_32"), 32).unwrap();
        pool.create(b"a").unwrap();
        pool.create(b"b").unwrap();
        assert_eq!(pool.slot_count().unwrap(), 3);
        pool.expunge().unwrap();
        assert_eq!(pool.slot_count().unwrap(), 1);
    }

    #[test]
    fn reopening_existing_pool_preserves_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("size_32");
        let seq = {
            let pool = RecordPool::open(&path, 32).unwrap();
            pool.create(b"persisted").unwrap()
        };
        let pool = RecordPool::open(&path, 32).unwrap();
        let mut expected = b"persisted".to_vec();
        expected.resize(32, 0);
        assert_eq!(pool.retrieve(seq).unwrap(), expected);
    }
}
