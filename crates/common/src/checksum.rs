//! CRC32 (reflected IEEE 802.3, polynomial 0xEDB88320) used for every
//! on-disk structure in this workspace: page data regions, WAL records, and
//! the fixed fields of the file header.

/// Computes the checksum over `bytes`.
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}
