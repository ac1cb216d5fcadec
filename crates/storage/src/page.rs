use common::{crc32, PageId};

use crate::PAGE_SIZE;

/// Size in bytes of the fixed page header (`spec.md` §6).
pub const HEADER_SIZE: usize = 32;

/// Discriminant for the two kinds of B+ tree page. Stored as a single byte
/// in the page header; transitions only `Uninitialized -> Leaf` or
/// `Uninitialized -> Internal`, and never changes again except through a
/// full page reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Uninitialized,
    Leaf,
    Internal,
}

impl NodeKind {
    fn to_byte(self) -> u8 {
        match self {
            NodeKind::Uninitialized => 0,
            NodeKind::Leaf => 1,
            NodeKind::Internal => 2,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(NodeKind::Uninitialized),
            1 => Some(NodeKind::Leaf),
            2 => Some(NodeKind::Internal),
            _ => None,
        }
    }
}

/// The fixed 32-byte page header described in `spec.md` §3 and laid out
/// bit-exactly in §6.
///
/// `page_lsn` is stored on disk as the low 32 bits of the engine's 64-bit
/// LSN (`spec.md` §6 fixes the on-disk header at 32 bytes total, which only
/// leaves room for a `u32`); the WAL itself tracks the full 64-bit LSN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub page_id: PageId,
    pub parent_page_id: PageId,
    pub page_lsn: u32,
    pub checksum: u32,
    pub num_keys: u16,
    pub node_kind: NodeKind,
}

impl PageHeader {
    pub fn uninitialized(page_id: PageId) -> Self {
        Self {
            page_id,
            parent_page_id: PageId::NONE,
            page_lsn: 0,
            checksum: 0,
            num_keys: 0,
            node_kind: NodeKind::Uninitialized,
        }
    }

    fn encode(&self, out: &mut [u8; HEADER_SIZE]) {
        out[0..4].copy_from_slice(&self.page_id.0.to_le_bytes());
        out[4..8].copy_from_slice(&self.parent_page_id.0.to_le_bytes());
        out[8..12].copy_from_slice(&self.page_lsn.to_le_bytes());
        out[12..16].copy_from_slice(&self.checksum.to_le_bytes());
        out[16..18].copy_from_slice(&self.num_keys.to_le_bytes());
        out[18] = self.node_kind.to_byte();
        // bytes 19..32 are reserved and left zeroed.
    }

    fn decode(buf: &[u8; HEADER_SIZE]) -> Option<Self> {
        let page_id = PageId(u32::from_le_bytes(buf[0..4].try_into().unwrap()));
        let parent_page_id = PageId(u32::from_le_bytes(buf[4..8].try_into().unwrap()));
        let page_lsn = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let checksum = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let num_keys = u16::from_le_bytes(buf[16..18].try_into().unwrap());
        let node_kind = NodeKind::from_byte(buf[18])?;
        Some(Self {
            page_id,
            parent_page_id,
            page_lsn,
            checksum,
            num_keys,
            node_kind,
        })
    }
}

/// An in-memory copy of one on-disk page: a 32-byte header plus
/// `PAGE_SIZE - HEADER_SIZE` bytes of opaque data the leaf/internal layer
/// interprets.
#[derive(Debug, Clone)]
pub struct Page {
    bytes: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    /// A zero-initialized, uninitialized-kind page for `page_id`.
    pub fn new(page_id: PageId) -> Self {
        let mut page = Self {
            bytes: Box::new([0u8; PAGE_SIZE]),
        };
        page.set_header(PageHeader::uninitialized(page_id));
        page
    }

    /// Wraps a raw `PAGE_SIZE`-byte buffer read from disk.
    pub fn from_bytes(bytes: [u8; PAGE_SIZE]) -> Self {
        Self {
            bytes: Box::new(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.bytes
    }

    /// The opaque data region a leaf/internal page layout operates on.
    pub fn data(&self) -> &[u8] {
        &self.bytes[HEADER_SIZE..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[HEADER_SIZE..]
    }

    /// Reads the header. Returns `None` on an unrecognized `node_kind` byte
    /// (impossible field value, per `spec.md` §7's `Corruption` category).
    pub fn header(&self) -> Option<PageHeader> {
        let fixed: [u8; HEADER_SIZE] = self.bytes[..HEADER_SIZE].try_into().unwrap();
        PageHeader::decode(&fixed)
    }

    pub fn set_header(&mut self, header: PageHeader) {
        let mut fixed = [0u8; HEADER_SIZE];
        header.encode(&mut fixed);
        self.bytes[..HEADER_SIZE].copy_from_slice(&fixed);
    }

    /// Recomputes and stores the CRC32 of the data region. Must be called
    /// before any write to disk (`spec.md` §3 invariant (i)).
    pub fn recompute_checksum(&mut self) {
        let sum = crc32(self.data());
        let mut header = self.header().expect("valid header before checksum");
        header.checksum = sum;
        self.set_header(header);
    }

    /// `true` iff the stored checksum matches the data region's CRC32.
    pub fn verify_checksum(&self) -> bool {
        match self.header() {
            Some(h) => h.checksum == crc32(self.data()),
            None => false,
        }
    }

    /// Resets the page back to an uninitialized, zeroed state in place,
    /// preserving the page id (`spec.md` §3: the only way `node_kind` may
    /// change after its first transition).
    pub fn reset(&mut self) {
        let page_id = self.header().map(|h| h.page_id).unwrap_or(PageId::NONE);
        self.bytes.fill(0);
        self.set_header(PageHeader::uninitialized(page_id));
    }
}
