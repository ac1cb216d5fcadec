//! Log record format: a length-prefixed, hand-rolled binary layout mirroring
//! the bit-exact shape `spec.md` §4.6 and §6 specify, the same way
//! `storage::Page` and `storage::FileHeader` hand-roll their own encodings
//! rather than reach for a general-purpose serializer. WAL records need an
//! exact, versioned wire format more than they need serde's convenience, so
//! this crate drops the teacher's `bincode`/`serde` pair for this type
//! (documented in `DESIGN.md`).

use common::{EngineError, EngineResult, Lsn, PageId, TxnId};

/// Discriminant for the ten record kinds `spec.md` §3 lists. Stored as a
/// single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Begin,
    Commit,
    Abort,
    Insert,
    Delete,
    Update,
    PageSplit,
    PageMerge,
    CheckpointBegin,
    CheckpointEnd,
}

impl RecordKind {
    fn to_byte(self) -> u8 {
        match self {
            RecordKind::Begin => 0,
            RecordKind::Commit => 1,
            RecordKind::Abort => 2,
            RecordKind::Insert => 3,
            RecordKind::Delete => 4,
            RecordKind::Update => 5,
            RecordKind::PageSplit => 6,
            RecordKind::PageMerge => 7,
            RecordKind::CheckpointBegin => 8,
            RecordKind::CheckpointEnd => 9,
        }
    }

    fn from_byte(b: u8) -> EngineResult<Self> {
        Ok(match b {
            0 => RecordKind::Begin,
            1 => RecordKind::Commit,
            2 => RecordKind::Abort,
            3 => RecordKind::Insert,
            4 => RecordKind::Delete,
            5 => RecordKind::Update,
            6 => RecordKind::PageSplit,
            7 => RecordKind::PageMerge,
            8 => RecordKind::CheckpointBegin,
            9 => RecordKind::CheckpointEnd,
            other => {
                return Err(EngineError::Corruption(format!(
                    "unrecognized WAL record kind byte {other}"
                )))
            }
        });
    }

    pub fn is_txn_boundary(self) -> bool {
        matches!(self, RecordKind::Begin | RecordKind::Commit | RecordKind::Abort)
    }

    pub fn is_checkpoint(self) -> bool {
        matches!(self, RecordKind::CheckpointBegin | RecordKind::CheckpointEnd)
    }

    pub fn is_page_mutation(self) -> bool {
        matches!(
            self,
            RecordKind::Insert
                | RecordKind::Delete
                | RecordKind::Update
                | RecordKind::PageSplit
                | RecordKind::PageMerge
        )
    }
}

/// One logical change to the store, as described in `spec.md` §3: `{lsn,
/// prev_lsn, txn_id, kind, page_id, key, value, old_value}`. `prev_lsn`
/// chains records of the same transaction backwards for undo; COMMIT and
/// ABORT records also carry it, pointing at the transaction's last data
/// record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub prev_lsn: Lsn,
    pub txn_id: TxnId,
    pub kind: RecordKind,
    pub page_id: PageId,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub old_value: Vec<u8>,
}

impl LogRecord {
    /// Encodes the fixed `spec.md` §4.6 wire layout: `lsn(8) | prev_lsn(8)
    /// | txn_id(8) | kind(1) | page_id(4) | klen(4) | key | vlen(4) |
    /// value | olen(4) | old_value`. Does not include the `u32` length
    /// prefix — that is the log file's framing, added by the caller.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(33 + self.key.len() + self.value.len() + self.old_value.len());
        out.extend_from_slice(&self.lsn.0.to_le_bytes());
        out.extend_from_slice(&self.prev_lsn.0.to_le_bytes());
        out.extend_from_slice(&self.txn_id.0.to_le_bytes());
        out.push(self.kind.to_byte());
        out.extend_from_slice(&self.page_id.0.to_le_bytes());
        out.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&(self.value.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.value);
        out.extend_from_slice(&(self.old_value.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.old_value);
        out
    }

    /// Decodes a single record from `buf`, which must contain exactly one
    /// record's bytes (the caller has already consumed the length
    /// prefix). A length field that runs past the end of `buf` is
    /// reported as [`EngineError::Corruption`] (a truncated record).
    pub fn decode(buf: &[u8]) -> EngineResult<Self> {
        let mut cur = Cursor::new(buf);
        let lsn = Lsn(cur.take_u64()?);
        let prev_lsn = Lsn(cur.take_u64()?);
        let txn_id = TxnId(cur.take_u64()?);
        let kind = RecordKind::from_byte(cur.take_u8()?)?;
        let page_id = PageId(cur.take_u32()?);
        let key = cur.take_bytes(cur.take_u32()? as usize)?;
        let value = cur.take_bytes(cur.take_u32()? as usize)?;
        let old_value = cur.take_bytes(cur.take_u32()? as usize)?;
        if !cur.is_empty() {
            return Err(EngineError::Corruption(
                "WAL record has trailing bytes past its declared fields".into(),
            ));
        }
        Ok(Self {
            lsn,
            prev_lsn,
            txn_id,
            kind,
            page_id,
            key,
            value,
            old_value,
        })
    }
}

/// Minimal cursor over a byte slice, reporting [`EngineError::Corruption`]
/// instead of panicking on a short read (truncated-record safety per
/// `spec.md` §7).
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn take(&mut self, n: usize) -> EngineResult<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(EngineError::Corruption(
                "WAL record truncated mid-field".into(),
            ));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> EngineResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_u32(&mut self) -> EngineResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn take_u64(&mut self) -> EngineResult<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn take_bytes(&mut self, n: usize) -> EngineResult<Vec<u8>> {
        Ok(self.take(n)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_kind() {
        let kinds = [
            RecordKind::Begin,
            RecordKind::Commit,
            RecordKind::Abort,
            RecordKind::Insert,
            RecordKind::Delete,
            RecordKind::Update,
            RecordKind::PageSplit,
            RecordKind::PageMerge,
            RecordKind::CheckpointBegin,
            RecordKind::CheckpointEnd,
        ];
        for kind in kinds {
            let rec = LogRecord {
                lsn: Lsn(7),
                prev_lsn: Lsn(3),
                txn_id: TxnId(1),
                kind,
                page_id: PageId(9),
                key: b"k".to_vec(),
                value: b"value".to_vec(),
                old_value: b"old".to_vec(),
            };
            let encoded = rec.encode();
            let decoded = LogRecord::decode(&encoded).unwrap();
            assert_eq!(rec, decoded);
        }
    }

    #[test]
    fn empty_fields_round_trip() {
        let rec = LogRecord {
            lsn: Lsn(1),
            prev_lsn: Lsn::NONE,
            txn_id: TxnId(1),
            kind: RecordKind::Begin,
            page_id: PageId::NONE,
            key: Vec::new(),
            value: Vec::new(),
            old_value: Vec::new(),
        };
        let decoded = LogRecord::decode(&rec.encode()).unwrap();
        assert_eq!(rec, decoded);
    }

    #[test]
    fn truncated_record_is_corruption() {
        let rec = LogRecord {
            lsn: Lsn(1),
            prev_lsn: Lsn::NONE,
            txn_id: TxnId(1),
            kind: RecordKind::Insert,
            page_id: PageId(1),
            key: b"k".to_vec(),
            value: b"v".to_vec(),
            old_value: Vec::new(),
        };
        let mut encoded = rec.encode();
        encoded.truncate(encoded.len() - 2);
        assert!(matches!(
            LogRecord::decode(&encoded),
            Err(EngineError::Corruption(_))
        ));
    }

    #[test]
    fn unrecognized_kind_byte_is_corruption() {
        assert!(matches!(
            RecordKind::from_byte(250),
            Err(EngineError::Corruption(_))
        ));
    }
}
