//! `dam.meta`: the store metadata file `spec.md` §6 fixes bit-exact.
//!
//! This crate treats the three tree roots as opaque pass-through state —
//! which root belongs to the "primary" snippet index versus the "by name"
//! or "tag" index is a decision the (out-of-scope, per `spec.md` §1)
//! snippet/tag layer makes, not this engine. `Store` persists and returns
//! them verbatim; only `snippet_primary_root` ever backs a live
//! [`btree::BPlusTree`], opened once in `Store::open`.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use common::{EngineError, EngineResult, PageId};

/// Magic stamped into `dam.meta`'s first four bytes (`spec.md` §6).
pub const MAGIC: u32 = 0xDAD0_1234;

/// Fixed record size: magic(4) + 3 roots(4 each) + next_id(8) + count(8).
pub const META_SIZE: usize = 4 + 4 * 3 + 8 + 8;

/// The atomically-written metadata record described in `spec.md` §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreMetadata {
    pub snippet_primary_root: PageId,
    pub snippet_name_root: PageId,
    pub tag_root: PageId,
    pub next_id: u64,
    pub snippet_count: u64,
}

impl StoreMetadata {
    /// A fresh store's metadata: no trees yet allocated, nothing assigned.
    pub fn fresh() -> Self {
        Self {
            snippet_primary_root: PageId::NONE,
            snippet_name_root: PageId::NONE,
            tag_root: PageId::NONE,
            next_id: 1,
            snippet_count: 0,
        }
    }

    pub fn encode(&self) -> [u8; META_SIZE] {
        let mut buf = [0u8; META_SIZE];
        buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&self.snippet_primary_root.0.to_le_bytes());
        buf[8..12].copy_from_slice(&self.snippet_name_root.0.to_le_bytes());
        buf[12..16].copy_from_slice(&self.tag_root.0.to_le_bytes());
        buf[16..24].copy_from_slice(&self.next_id.to_le_bytes());
        buf[24..32].copy_from_slice(&self.snippet_count.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; META_SIZE]) -> EngineResult<Self> {
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(EngineError::Corruption("dam.meta magic mismatch".into()));
        }
        Ok(Self {
            snippet_primary_root: PageId(u32::from_le_bytes(buf[4..8].try_into().unwrap())),
            snippet_name_root: PageId(u32::from_le_bytes(buf[8..12].try_into().unwrap())),
            tag_root: PageId(u32::from_le_bytes(buf[12..16].try_into().unwrap())),
            next_id: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            snippet_count: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
        })
    }

    /// Loads `path`, or [`StoreMetadata::fresh`] if it does not exist
    /// (`spec.md` §6: "missing file => fresh store").
    pub fn load(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            return Ok(Self::fresh());
        }
        let mut file = File::open(path)?;
        let mut buf = [0u8; META_SIZE];
        file.read_exact(&mut buf)?;
        Self::decode(&buf)
    }

    /// Writes `path` atomically: encode to a sibling `.tmp` file, flush,
    /// then rename over the destination (`spec.md` §6: "written atomically
    /// at clean shutdown").
    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let tmp_path = path.with_extension("meta.tmp");
        {
            let mut tmp = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            tmp.write_all(&self.encode())?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_encode_decode() {
        let meta = StoreMetadata {
            snippet_primary_root: PageId(4),
            snippet_name_root: PageId(7),
            tag_root: PageId(11),
            next_id: 42,
            snippet_count: 9,
        };
        assert_eq!(StoreMetadata::decode(&meta.encode()).unwrap(), meta);
    }

    #[test]
    fn missing_file_yields_fresh_store() {
        let dir = tempdir().unwrap();
        let meta = StoreMetadata::load(&dir.path().join("dam.meta")).unwrap();
        assert_eq!(meta, StoreMetadata::fresh());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dam.meta");
        let meta = StoreMetadata {
            snippet_primary_root: PageId(1),
            snippet_name_root: PageId(2),
            tag_root: PageId(3),
            next_id: 5,
            snippet_count: 2,
        };
        meta.save(&path).unwrap();
        assert_eq!(StoreMetadata::load(&path).unwrap(), meta);
    }

    #[test]
    fn corrupted_magic_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dam.meta");
        fs::write(&path, [0u8; META_SIZE]).unwrap();
        assert!(matches!(
            StoreMetadata::load(&path),
            Err(EngineError::Corruption(_))
        ));
    }
}
