//! Shared types used across the storage engine: page/log/txn ids, the
//! engine-wide error and result types, runtime configuration, and the CRC32
//! checksum helper used by every on-disk structure.

use std::path::PathBuf;

pub mod checksum;

pub use checksum::crc32;

/// Identifies a fixed-size page within the database file. Page `0` is the
/// file header and doubles as the reserved "none" sentinel: the allocator
/// never hands it out as a data page id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub u32);

impl PageId {
    pub const NONE: PageId = PageId(0);

    pub fn is_valid(self) -> bool {
        self != Self::NONE
    }
}

impl From<u32> for PageId {
    fn from(v: u32) -> Self {
        PageId(v)
    }
}

/// Monotonically increasing log sequence number. `0` means "no LSN yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const NONE: Lsn = Lsn(0);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

/// Identifies a transaction. `0` is reserved and never assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId(pub u64);

impl TxnId {
    pub const NONE: TxnId = TxnId(0);
}

/// Engine-wide error taxonomy. Every fallible operation in this workspace
/// returns one of these variants rather than panicking.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("key not found")]
    NotFound,

    #[error("key already exists")]
    AlreadyExists,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("buffer pool is full, no frame available to evict")]
    BufferPoolFull,

    #[error("page {0:?} is pinned and cannot be evicted")]
    PagePinned(PageId),

    #[error("write-ahead log error: {0}")]
    Wal(String),

    #[error("no space left in page or file")]
    OutOfSpace,

    #[error("internal engine invariant violated: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Runtime configuration for an open store.
///
/// `data_dir` holds three files: `dam.db` (paged heap), `dam.wal`
/// (write-ahead log) and `dam.meta` (store metadata).
#[derive(Debug, Clone, bon::Builder)]
pub struct Config {
    pub data_dir: PathBuf,

    #[builder(default = 512)]
    pub buffer_pool_pages: usize,

    #[builder(default = true)]
    pub wal_enabled: bool,

    #[builder(default = false)]
    pub verbose: bool,
}

impl Config {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("dam.db")
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("dam.wal")
    }

    pub fn meta_path(&self) -> PathBuf {
        self.data_dir.join("dam.meta")
    }
}

#[cfg(test)]
mod tests;
