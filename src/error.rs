use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("slot {seqnum} is out of range (pool has {pool_len} slots)")]
    OutOfRange { seqnum: u64, pool_len: u64 },

    #[error("write of {len} bytes at offset {offset} overflows a {slot_size}-byte slot")]
    Overflow {
        offset: u64,
        len: usize,
        slot_size: u64,
    },

    #[error("a garbage collection is already in progress on this store")]
    Busy,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("OID type mismatch: expected '{expected}', got '{actual}'")]
    TypeMismatch { expected: String, actual: String },

    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
