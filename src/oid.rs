//! Object identifiers.
//!
//! An [`Oid`] names a record in some [`crate::object_store::ObjectStore`].
//! `Oid::NULL` is the distinguished sentinel for "no object" — it is never
//! written to a pool and compares equal only to itself.

use std::fmt;
use std::sync::Arc;

/// Opaque handle to a stored record.
///
/// Two `Oid`s refer to the same record iff `(pool_id, size, seq)` match.
/// `seq` never changes once a record is written; a garbage collection
/// produces a *new* `Oid` rather than mutating an existing one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Oid {
    seq: u64,
    size: u64,
    pool_id: Arc<str>,
    type_name: Arc<str>,
}

impl Oid {
    /// Build a non-null `Oid`. `seq` must be non-zero — slot 0 is reserved.
    pub fn new(seq: u64, size: u64, pool_id: impl Into<Arc<str>>, type_name: impl Into<Arc<str>>) -> Self {
        assert_ne!(seq, 0, "seq == 0 is reserved for Oid::NULL");
        Oid {
            seq,
            size,
            pool_id: pool_id.into(),
            type_name: type_name.into(),
        }
    }

    /// The distinguished "no object" sentinel. Never stored in a pool.
    pub fn null() -> Self {
        Oid {
            seq: 0,
            size: 0,
            pool_id: Arc::from(""),
            type_name: Arc::from(""),
        }
    }

    pub fn is_null(&self) -> bool {
        self.seq == 0
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// True if this Oid was stamped by the store identified by `pool_id`.
    pub fn belongs_to(&self, pool_id: &str) -> bool {
        self.pool_id.as_ref() == pool_id
    }

    /// Build the Oid a copying GC would produce: same store/size/type, new seq.
    pub fn with_seq(&self, seq: u64) -> Self {
        Oid {
            seq,
            size: self.size,
            pool_id: self.pool_id.clone(),
            type_name: self.type_name.clone(),
        }
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "<Oid::NULL>")
        } else {
            write!(
                f,
                "<Oid '{}' seq={} size={} pool={}>",
                self.type_name, self.seq, self.size, self.pool_id
            )
        }
    }
}
