//! Ties the disk manager, buffer pool, B+ tree, and write-ahead log into a
//! single embedded key-value store (`spec.md` §2, §6).
//!
//! `Store` is the crate's one public entry point. Opening it bootstraps or
//! reopens `dam.db`/`dam.wal`/`dam.meta` under [`common::Config::data_dir`],
//! replays the write-ahead log through [`recovery::StoreRecoveryHandler`]
//! when one exists, and exposes both a plain (non-durable) key-value API
//! and a transactional one that logs before it mutates.

mod meta;
mod recovery;

use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};

use btree::BPlusTree;
use buffer::BufferPool;
use common::{Config, EngineError, EngineResult, Lsn, PageId, TxnId};
use storage::DiskManager;
use wal::Wal;

pub use meta::StoreMetadata;

use recovery::{undo_action, StoreRecoveryHandler, UndoAction};

/// An open, embedded key-value store: a paged B+ tree over a single file,
/// optionally backed by a write-ahead log for crash recovery.
pub struct Store {
    config: Config,
    disk: Arc<DiskManager>,
    pool: Arc<BufferPool>,
    tree: Arc<BPlusTree>,
    wal: Option<Wal>,
    meta: Mutex<StoreMetadata>,
    pending: Mutex<HashMap<TxnId, Vec<UndoAction>>>,
}

impl Store {
    /// Opens (or bootstraps) a store at `config.data_dir`, running WAL
    /// recovery first when `config.wal_enabled` and a log already exists
    /// with unflushed work in it (`spec.md` §4.6, §7).
    pub fn open(config: Config) -> EngineResult<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let disk = Arc::new(DiskManager::open(&config.db_path())?);
        let pool = Arc::new(BufferPool::new(disk.clone(), config.buffer_pool_pages));
        let meta = StoreMetadata::load(&config.meta_path())?;
        let tree = Arc::new(BPlusTree::open(
            pool.clone(),
            meta.snippet_primary_root,
            meta.snippet_count,
        )?);

        let wal = if config.wal_enabled {
            let wal = Wal::open(config.wal_path())?;
            let handler = StoreRecoveryHandler::new(pool.clone(), tree.clone());
            let summary = wal.recover(&handler)?;
            log::info!(
                "recovery complete: {} redone, {} undone, {} transactions rolled back",
                summary.redone,
                summary.undone,
                summary.rolled_back_txns
            );
            pool.flush_all_pages()?;
            Some(wal)
        } else {
            None
        };

        Ok(Self {
            config,
            disk,
            pool,
            tree,
            wal,
            meta: Mutex::new(meta),
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Flushes every dirty page, the write-ahead log, and the metadata file
    /// in that order (`spec.md` §6: metadata is "written atomically at
    /// clean shutdown"). Safe to call more than once.
    pub fn close(&self) -> EngineResult<()> {
        self.pool.flush_all_pages()?;
        if let Some(wal) = &self.wal {
            wal.flush()?;
        }
        self.disk.flush()?;
        let mut meta = self.meta.lock().unwrap();
        meta.snippet_primary_root = self.tree.root_page_id();
        meta.snippet_count = self.tree.size();
        meta.save(&self.config.meta_path())
    }

    /// Current root/count snapshot as it would be written to `dam.meta`.
    pub fn metadata(&self) -> StoreMetadata {
        let mut meta = *self.meta.lock().unwrap();
        meta.snippet_primary_root = self.tree.root_page_id();
        meta.snippet_count = self.tree.size();
        meta
    }

    /// Writes a new "by name" index root into the persisted metadata
    /// without opening a tree over it — interpreting and populating that
    /// root belongs to the layer above this crate (`spec.md` §1).
    pub fn set_name_root(&self, root: PageId) {
        self.meta.lock().unwrap().snippet_name_root = root;
    }

    pub fn name_root(&self) -> PageId {
        self.meta.lock().unwrap().snippet_name_root
    }

    /// Writes a new tag-index root (see [`Store::set_name_root`]).
    pub fn set_tag_root(&self, root: PageId) {
        self.meta.lock().unwrap().tag_root = root;
    }

    pub fn tag_root(&self) -> PageId {
        self.meta.lock().unwrap().tag_root
    }

    /// Allocates and returns the next free id from the metadata's
    /// monotonic counter, without persisting it until the next
    /// [`Store::close`].
    pub fn next_id(&self) -> u64 {
        let mut meta = self.meta.lock().unwrap();
        let id = meta.next_id;
        meta.next_id += 1;
        id
    }

    // --- Non-transactional key-value API (`spec.md` §4.5, §5) ---

    pub fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        self.tree.find(key)
    }

    pub fn contains(&self, key: &[u8]) -> EngineResult<bool> {
        self.tree.contains(key)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> EngineResult<bool> {
        self.tree.insert(key, value)
    }

    pub fn update(&self, key: &[u8], value: &[u8]) -> EngineResult<bool> {
        self.tree.update(key, value)
    }

    pub fn delete(&self, key: &[u8]) -> EngineResult<bool> {
        self.tree.remove(key)
    }

    pub fn range(&self, lo: &[u8], hi: &[u8]) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.tree.range(lo, hi)
    }

    pub fn scan(&self, from: &[u8], limit: usize) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.tree.scan(from, limit)
    }

    pub fn for_each(&self, callback: impl FnMut(&[u8], &[u8]) -> bool) -> EngineResult<()> {
        self.tree.for_each(callback)
    }

    pub fn size(&self) -> u64 {
        self.tree.size()
    }

    pub fn height(&self) -> EngineResult<u32> {
        self.tree.height()
    }

    pub fn verify(&self) -> EngineResult<bool> {
        self.tree.verify()
    }

    // --- Transactional API (`spec.md` §4.6, §7) ---

    fn wal(&self) -> EngineResult<&Wal> {
        self.wal
            .as_ref()
            .ok_or_else(|| EngineError::InvalidArgument("this store was opened with wal_enabled = false".into()))
    }

    /// Begins a transaction: a BEGIN record plus an in-memory undo stack
    /// that [`Store::abort`] can replay without re-reading the log.
    pub fn begin(&self) -> EngineResult<TxnId> {
        let txn = self.wal()?.begin_transaction()?;
        self.pending.lock().unwrap().insert(txn, Vec::new());
        Ok(txn)
    }

    fn record_undo(&self, txn: TxnId, action: UndoAction) {
        if let Some(stack) = self.pending.lock().unwrap().get_mut(&txn) {
            stack.push(action);
        }
    }

    /// Logs then applies an insert under `txn`. Returns `false` (and logs
    /// nothing) if `key` already exists, mirroring [`BPlusTree::insert`]'s
    /// duplicate-key behavior.
    pub fn put_txn(&self, txn: TxnId, key: &[u8], value: &[u8]) -> EngineResult<bool> {
        if self.tree.contains(key)? {
            return Ok(false);
        }
        let wal = self.wal()?;
        let lsn = wal.log_insert(txn, PageId::NONE, key, value)?;
        let inserted = self.tree.insert_with_lsn(key, value, lsn)?;
        if inserted {
            self.record_undo(txn, UndoAction::UndoInsert { key: key.to_vec() });
        }
        Ok(inserted)
    }

    /// Logs then applies an update under `txn`. Never inserts on a missing
    /// key (`spec.md` §9, resolved in `DESIGN.md`): returns `false` and
    /// logs nothing.
    pub fn update_txn(&self, txn: TxnId, key: &[u8], value: &[u8]) -> EngineResult<bool> {
        let Some(old_value) = self.tree.find(key)? else {
            return Ok(false);
        };
        let wal = self.wal()?;
        let lsn = wal.log_update(txn, PageId::NONE, key, value, &old_value)?;
        let updated = self.tree.update_with_lsn(key, value, lsn)?;
        if updated {
            self.record_undo(
                txn,
                UndoAction::UndoUpdate {
                    key: key.to_vec(),
                    old_value,
                },
            );
        }
        Ok(updated)
    }

    /// Logs then applies a delete under `txn`. Returns `false` and logs
    /// nothing if `key` is absent.
    pub fn delete_txn(&self, txn: TxnId, key: &[u8]) -> EngineResult<bool> {
        let Some(old_value) = self.tree.find(key)? else {
            return Ok(false);
        };
        let wal = self.wal()?;
        let lsn = wal.log_delete(txn, PageId::NONE, key, &old_value)?;
        let removed = self.tree.remove_with_lsn(key, lsn)?;
        if removed {
            self.record_undo(
                txn,
                UndoAction::UndoDelete {
                    key: key.to_vec(),
                    old_value,
                },
            );
        }
        Ok(removed)
    }

    /// Commits `txn`: appends and force-flushes a COMMIT record. The
    /// transaction's pages may already be sitting dirty in the buffer pool
    /// and do not need to be flushed here — they are safe to evict at any
    /// point after this call returns, since redo can reconstruct them from
    /// the now-durable log (`spec.md` §4.6).
    pub fn commit(&self, txn: TxnId) -> EngineResult<()> {
        self.wal()?.commit(txn)?;
        self.pending.lock().unwrap().remove(&txn);
        Ok(())
    }

    /// Aborts `txn`: reverses its effects using the in-memory undo stack
    /// built up by `put_txn`/`update_txn`/`delete_txn`, then appends an
    /// ABORT record. A transaction that never reaches this call (the
    /// process crashes instead) is rolled back by [`Store::open`]'s
    /// recovery pass instead, which replays the same compensations from
    /// the log (`spec.md` §4.6's undo phase).
    pub fn abort(&self, txn: TxnId) -> EngineResult<()> {
        let actions = self.pending.lock().unwrap().remove(&txn).unwrap_or_default();
        for action in actions.iter().rev() {
            undo_action(&self.tree, action)?;
        }
        self.wal()?.abort(txn)
    }

    /// Forces a checkpoint: flushes every dirty page, then writes
    /// CHECKPOINT_BEGIN/CHECKPOINT_END (`spec.md` §4.6). A coarser
    /// approximation of ARIES fuzzy checkpointing, adequate for a
    /// single-writer store with no concurrent checkpoint thread.
    pub fn checkpoint(&self) -> EngineResult<Lsn> {
        self.pool.flush_all_pages()?;
        self.wal()?.checkpoint()
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("error closing store: {e}");
        }
    }
}
