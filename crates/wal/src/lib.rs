//! Write-ahead log: append-only record stream, transaction lifecycle, group
//! commit, and ARIES-style crash recovery (`spec.md` §4.6).
//!
//! Records are framed as `u32` little-endian length prefix followed by the
//! [`LogRecord`] wire layout (`record` module). They accumulate in a
//! fixed-size in-memory buffer and are written through together on
//! `commit`, `abort`, buffer-full, or an explicit [`Wal::flush`] — group
//! commit, per `spec.md` §4.6 and the glossary term it names.

mod record;


use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use common::{EngineError, EngineResult, Lsn, PageId, TxnId};

pub use record::{LogRecord, RecordKind};

/// Default capacity, in bytes, of the in-memory group-commit buffer before
/// a write to any of it is forced.
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnStatus {
    Active,
    Committed,
    Aborted,
}

struct TxnEntry {
    last_lsn: Lsn,
    status: TxnStatus,
}

struct Inner {
    file: File,
    buffer: Vec<u8>,
    buffer_capacity: usize,
    current_lsn: u64,
    flushed_lsn: u64,
    buffer_max_lsn: u64,
    next_txn_id: u64,
    transactions: HashMap<TxnId, TxnEntry>,
}

/// Append-only write-ahead log backing a single store (`spec.md` §4.6).
/// All mutation serializes on one mutex; there is no page-level latching.
pub struct Wal {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl Wal {
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        Self::open_with_capacity(path, DEFAULT_BUFFER_CAPACITY)
    }

    pub fn open_with_capacity(path: impl AsRef<Path>, buffer_capacity: usize) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        log::debug!("opened WAL file {:?}", path);
        Ok(Self {
            path,
            inner: Mutex::new(Inner {
                file,
                buffer: Vec::with_capacity(buffer_capacity),
                buffer_capacity,
                current_lsn: 0,
                flushed_lsn: 0,
                buffer_max_lsn: 0,
                next_txn_id: 0,
                transactions: HashMap::new(),
            }),
        })
    }

    /// Starts a new transaction, returning its id and appending a BEGIN
    /// record. Does not itself force a flush (`spec.md` §4.6: only
    /// COMMIT/ABORT are guaranteed durable synchronously).
    pub fn begin_transaction(&self) -> EngineResult<TxnId> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_txn_id += 1;
        let txn_id = TxnId(inner.next_txn_id);
        let lsn = Self::append_locked(
            &mut inner,
            LogRecord {
                lsn: Lsn::NONE,
                prev_lsn: Lsn::NONE,
                txn_id,
                kind: RecordKind::Begin,
                page_id: PageId::NONE,
                key: Vec::new(),
                value: Vec::new(),
                old_value: Vec::new(),
            },
        )?;
        inner.transactions.insert(
            txn_id,
            TxnEntry {
                last_lsn: lsn,
                status: TxnStatus::Active,
            },
        );
        Ok(txn_id)
    }

    fn require_active(inner: &Inner, txn_id: TxnId) -> EngineResult<Lsn> {
        match inner.transactions.get(&txn_id) {
            Some(entry) if entry.status == TxnStatus::Active => Ok(entry.last_lsn),
            Some(_) => Err(EngineError::Wal(format!(
                "transaction {txn_id:?} is no longer active"
            ))),
            None => Err(EngineError::Wal(format!("unknown transaction {txn_id:?}"))),
        }
    }

    fn log_data_record(
        &self,
        txn_id: TxnId,
        kind: RecordKind,
        page_id: PageId,
        key: &[u8],
        value: &[u8],
        old_value: &[u8],
    ) -> EngineResult<Lsn> {
        let mut inner = self.inner.lock().unwrap();
        let prev_lsn = Self::require_active(&inner, txn_id)?;
        let lsn = Self::append_locked(
            &mut inner,
            LogRecord {
                lsn: Lsn::NONE,
                prev_lsn,
                txn_id,
                kind,
                page_id,
                key: key.to_vec(),
                value: value.to_vec(),
                old_value: old_value.to_vec(),
            },
        )?;
        if let Some(entry) = inner.transactions.get_mut(&txn_id) {
            entry.last_lsn = lsn;
        }
        Ok(lsn)
    }

    pub fn log_insert(&self, txn_id: TxnId, page_id: PageId, key: &[u8], value: &[u8]) -> EngineResult<Lsn> {
        self.log_data_record(txn_id, RecordKind::Insert, page_id, key, value, &[])
    }

    pub fn log_delete(&self, txn_id: TxnId, page_id: PageId, key: &[u8], old_value: &[u8]) -> EngineResult<Lsn> {
        self.log_data_record(txn_id, RecordKind::Delete, page_id, key, &[], old_value)
    }

    pub fn log_update(
        &self,
        txn_id: TxnId,
        page_id: PageId,
        key: &[u8],
        value: &[u8],
        old_value: &[u8],
    ) -> EngineResult<Lsn> {
        self.log_data_record(txn_id, RecordKind::Update, page_id, key, value, old_value)
    }

    /// Logs a structural split of `page_id` into a new sibling whose id is
    /// carried in `value` (little-endian `u32`), with `key` as the
    /// promoted separator (`spec.md` §3, §4.4). Structural records are
    /// physiological, not transactional: `spec.md` §9's "absent underflow
    /// handling" note and §4.6's ARIES framing treat split/merge as
    /// redo-only bookkeeping rather than something a transaction's undo
    /// reverses, so `txn_id` may be [`TxnId::NONE`].
    pub fn log_page_split(&self, txn_id: TxnId, page_id: PageId, promoted_key: &[u8], new_page_id: PageId) -> EngineResult<Lsn> {
        let mut inner = self.inner.lock().unwrap();
        let prev_lsn = if txn_id == TxnId::NONE {
            Lsn::NONE
        } else {
            Self::require_active(&inner, txn_id)?
        };
        let lsn = Self::append_locked(
            &mut inner,
            LogRecord {
                lsn: Lsn::NONE,
                prev_lsn,
                txn_id,
                kind: RecordKind::PageSplit,
                page_id,
                key: promoted_key.to_vec(),
                value: new_page_id.0.to_le_bytes().to_vec(),
                old_value: Vec::new(),
            },
        )?;
        if let Some(entry) = inner.transactions.get_mut(&txn_id) {
            entry.last_lsn = lsn;
        }
        Ok(lsn)
    }

    /// Commits `txn_id`: appends a COMMIT record and force-flushes the
    /// buffer before returning, guaranteeing durability-on-commit
    /// (`spec.md` §4.6). An unflushable COMMIT is treated as an ABORT for
    /// durability purposes, matching `spec.md` §7.
    pub fn commit(&self, txn_id: TxnId) -> EngineResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let prev_lsn = Self::require_active(&inner, txn_id)?;
        let commit_lsn = Self::append_locked(
            &mut inner,
            LogRecord {
                lsn: Lsn::NONE,
                prev_lsn,
                txn_id,
                kind: RecordKind::Commit,
                page_id: PageId::NONE,
                key: Vec::new(),
                value: Vec::new(),
                old_value: Vec::new(),
            },
        )?;
        let _ = commit_lsn;
        match Self::flush_locked(&mut inner) {
            Ok(()) => {
                inner.transactions.get_mut(&txn_id).unwrap().status = TxnStatus::Committed;
                Ok(())
            }
            Err(e) => {
                log::warn!("commit of {txn_id:?} failed to flush: {e}; treating as abort");
                inner.transactions.get_mut(&txn_id).unwrap().status = TxnStatus::Aborted;
                Err(e)
            }
        }
    }

    /// Aborts `txn_id`: appends an ABORT record and force-flushes, the
    /// same as commit but leaving the transaction's effects for the
    /// caller to undo (the WAL itself does not perform undo outside
    /// [`Wal::recover`]).
    pub fn abort(&self, txn_id: TxnId) -> EngineResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let prev_lsn = Self::require_active(&inner, txn_id)?;
        Self::append_locked(
            &mut inner,
            LogRecord {
                lsn: Lsn::NONE,
                prev_lsn,
                txn_id,
                kind: RecordKind::Abort,
                page_id: PageId::NONE,
                key: Vec::new(),
                value: Vec::new(),
                old_value: Vec::new(),
            },
        )?;
        inner.transactions.get_mut(&txn_id).unwrap().status = TxnStatus::Aborted;
        Self::flush_locked(&mut inner)
    }

    /// Writes a CHECKPOINT_BEGIN record (carrying the current active-txn
    /// snapshot as a packed `u64` list in its `value` field — the
    /// Open Question in `spec.md` §9, resolved in `DESIGN.md`) followed by
    /// a CHECKPOINT_END, then flushes. Returns the CHECKPOINT_END LSN, the
    /// point `spec.md` §4.6 says recovery should be able to restart from.
    pub fn checkpoint(&self) -> EngineResult<Lsn> {
        let mut inner = self.inner.lock().unwrap();
        let active: Vec<u8> = inner
            .transactions
            .iter()
            .filter(|(_, e)| e.status == TxnStatus::Active)
            .flat_map(|(id, _)| id.0.to_le_bytes())
            .collect();
        Self::append_locked(
            &mut inner,
            LogRecord {
                lsn: Lsn::NONE,
                prev_lsn: Lsn::NONE,
                txn_id: TxnId::NONE,
                kind: RecordKind::CheckpointBegin,
                page_id: PageId::NONE,
                key: Vec::new(),
                value: active,
                old_value: Vec::new(),
            },
        )?;
        let end_lsn = Self::append_locked(
            &mut inner,
            LogRecord {
                lsn: Lsn::NONE,
                prev_lsn: Lsn::NONE,
                txn_id: TxnId::NONE,
                kind: RecordKind::CheckpointEnd,
                page_id: PageId::NONE,
                key: Vec::new(),
                value: Vec::new(),
                old_value: Vec::new(),
            },
        )?;
        Self::flush_locked(&mut inner)?;
        log::debug!("checkpoint written at lsn {end_lsn:?}");
        Ok(end_lsn)
    }

    pub fn flushed_lsn(&self) -> Lsn {
        Lsn(self.inner.lock().unwrap().flushed_lsn)
    }

    pub fn current_lsn(&self) -> Lsn {
        Lsn(self.inner.lock().unwrap().current_lsn)
    }

    /// Ensures `lsn` is durable, flushing the buffer if it is not already.
    /// `spec.md` §5 leaves it to the integrator to call this before
    /// flushing a dirty data page stamped with `lsn`, or to always flush
    /// the log on commit (this crate's callers use the latter).
    pub fn flush_to(&self, lsn: Lsn) -> EngineResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.flushed_lsn < lsn.0 {
            Self::flush_locked(&mut inner)?;
        }
        Ok(())
    }

    pub fn flush(&self) -> EngineResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::flush_locked(&mut inner)
    }

    /// Appends one record's framed bytes to the in-memory buffer,
    /// assigning it the next LSN. Flushes first if the buffer would
    /// overflow; rejects (without assigning an LSN) a record that could
    /// never fit even in an empty buffer (`spec.md` §8's boundary
    /// behavior for an oversize record).
    fn append_locked(inner: &mut Inner, mut record: LogRecord) -> EngineResult<Lsn> {
        let encoded_len = {
            // lsn is not yet known; encode a placeholder-sized record to
            // measure it, since lsn/prev_lsn/txn_id/page_id are fixed-width.
            record.lsn = Lsn(u64::MAX);
            record.encode().len()
        };
        let framed_len = 4 + encoded_len;
        if framed_len > inner.buffer_capacity {
            return Err(EngineError::Wal(format!(
                "record of {encoded_len} bytes exceeds the {}-byte WAL buffer",
                inner.buffer_capacity
            )));
        }
        if inner.buffer.len() + framed_len > inner.buffer_capacity {
            Self::flush_locked(inner)?;
        }

        inner.current_lsn += 1;
        let lsn = Lsn(inner.current_lsn);
        record.lsn = lsn;
        let bytes = record.encode();
        inner.buffer.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        inner.buffer.extend_from_slice(&bytes);
        inner.buffer_max_lsn = inner.current_lsn;
        Ok(lsn)
    }

    /// Writes the in-memory buffer through to the file and fsyncs it.
    fn flush_locked(inner: &mut Inner) -> EngineResult<()> {
        if inner.buffer.is_empty() {
            return Ok(());
        }
        inner.file.write_all(&inner.buffer)?;
        inner.file.sync_all()?;
        inner.flushed_lsn = inner.buffer_max_lsn;
        inner.buffer.clear();
        Ok(())
    }

    /// Reads every complete, framed record currently on disk, in file
    /// order. Stops silently at a torn tail (a length prefix or record
    /// body the file does not fully contain — the signature of a crash
    /// mid-write) rather than erroring, since that is expected after an
    /// unclean shutdown; a record that fully decodes but carries an
    /// unrecognized kind byte or trailing garbage is reported as
    /// [`EngineError::Corruption`], since that indicates real corruption
    /// rather than a torn write.
    pub fn read_all_records(&self) -> EngineResult<Vec<LogRecord>> {
        let inner = self.inner.lock().unwrap();
        Self::read_all_records_from(&self.path, inner.buffer_max_lsn)
    }

    fn read_all_records_from(path: &Path, _hint: u64) -> EngineResult<Vec<LogRecord>> {
        let mut file = OpenOptions::new().read(true).open(path)?;
        file.seek(SeekFrom::Start(0))?;
        let mut records = Vec::new();
        loop {
            let mut len_buf = [0u8; 4];
            match file.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut buf = vec![0u8; len];
            match file.read_exact(&mut buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            records.push(LogRecord::decode(&buf)?);
        }
        Ok(records)
    }
}

/// Callback surface [`Wal::recover`] uses to apply redo/undo actions
/// against the actual store (buffer pool + B+ tree), which this crate has
/// no knowledge of (`spec.md` §4.6's three-phase protocol is generic over
/// "the page" and "the logical operation").
pub trait RecoveryHandler {
    /// Current `page_lsn` of `page_id` as stored on disk/in the buffer
    /// pool, truncated to 32 bits the same way `storage::PageHeader`
    /// stores it.
    fn page_lsn(&self, page_id: PageId) -> EngineResult<u32>;

    /// Re-applies the logical effect of `record` going forward.
    fn apply_redo(&self, record: &LogRecord) -> EngineResult<()>;

    /// Applies the inverse of `record` (a compensating action) during
    /// undo.
    fn apply_undo(&self, record: &LogRecord) -> EngineResult<()>;
}

/// Outcome of a [`Wal::recover`] pass, useful for tests and logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    pub redone: usize,
    pub undone: usize,
    pub rolled_back_txns: usize,
}

impl Wal {
    /// ARIES-style recovery: Analysis, Redo, Undo (`spec.md` §4.6).
    ///
    /// Analysis rebuilds the set of transactions that were active (never
    /// reached COMMIT/ABORT) when the log ends. Redo replays every
    /// page-mutating record whose LSN exceeds its target page's current
    /// `page_lsn` — idempotent, since a successful redo stamps the page
    /// with the record's LSN. Undo walks each still-active transaction
    /// backward via `prev_lsn`, emitting compensating actions until BEGIN.
    pub fn recover(&self, handler: &dyn RecoveryHandler) -> EngineResult<RecoverySummary> {
        let records = self.read_all_records()?;

        // --- Analysis ---
        let mut active: HashMap<TxnId, Lsn> = HashMap::new();
        let mut by_lsn: HashMap<Lsn, &LogRecord> = HashMap::new();
        for rec in &records {
            by_lsn.insert(rec.lsn, rec);
            match rec.kind {
                RecordKind::Begin => {
                    active.insert(rec.txn_id, rec.lsn);
                }
                RecordKind::Commit | RecordKind::Abort => {
                    active.remove(&rec.txn_id);
                }
                _ if rec.txn_id != TxnId::NONE && active.contains_key(&rec.txn_id) => {
                    active.insert(rec.txn_id, rec.lsn);
                }
                _ => {}
            }
        }
        log::debug!(
            "recovery analysis: {} records, {} transactions left active",
            records.len(),
            active.len()
        );

        // --- Redo ---
        let mut redone = 0;
        for rec in &records {
            if !rec.kind.is_page_mutation() {
                continue;
            }
            let page_lsn = handler.page_lsn(rec.page_id)?;
            if (rec.lsn.0 as u32) > page_lsn {
                handler.apply_redo(rec)?;
                redone += 1;
            }
        }

        // --- Undo ---
        let mut undone = 0;
        for (_, mut cursor) in active.iter().map(|(t, lsn)| (*t, *lsn)) {
            loop {
                let Some(rec) = by_lsn.get(&cursor) else {
                    break;
                };
                if rec.kind.is_page_mutation() {
                    handler.apply_undo(rec)?;
                    undone += 1;
                }
                if rec.kind == RecordKind::Begin || rec.prev_lsn == Lsn::NONE {
                    break;
                }
                cursor = rec.prev_lsn;
            }
        }

        Ok(RecoverySummary {
            redone,
            undone,
            rolled_back_txns: active.len(),
        })
    }
}
