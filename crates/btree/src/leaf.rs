//! Leaf page layout: a 12-byte sub-header, a forward-growing slot array,
//! and a backward-growing key/value heap (`spec.md` §3, §4.4).

use common::PageId;
use storage::{NodeKind, Page, PAGE_SIZE};

const SUBHEADER: usize = 12;
const SLOT_SIZE: usize = 6;
const DATA_REGION_SIZE: usize = PAGE_SIZE - storage::HEADER_SIZE;

/// Largest `key.len() + value.len()` that can ever fit in a leaf, used to
/// reject oversize entries before any tree descent (`spec.md` §7
/// `InvalidArgument`).
pub const MAX_ENTRY_SIZE: usize = DATA_REGION_SIZE - SUBHEADER - SLOT_SIZE;

/// Outcome of attempting an in-place value update (`spec.md` §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    NotFound,
    /// The new value no longer fits in the existing slot; the caller must
    /// fall back to remove+insert.
    NeedsReinsert,
}

/// Resets `page` to an empty leaf: zeroes it, stamps `node_kind = Leaf`,
/// and initializes the sub-header. Destroys any existing contents.
pub fn init(page: &mut Page) {
    page.reset();
    let mut header = page.header().expect("reset header decodes");
    header.node_kind = NodeKind::Leaf;
    header.num_keys = 0;
    page.set_header(header);

    let data = page.data_mut();
    data[0..4].copy_from_slice(&PageId::NONE.0.to_le_bytes());
    data[4..8].copy_from_slice(&PageId::NONE.0.to_le_bytes());
    write_u16(data, 8, SUBHEADER as u16);
    write_u16(data, 10, DATA_REGION_SIZE as u16);
}

fn write_u16(data: &mut [u8], offset: usize, v: u16) {
    data[offset..offset + 2].copy_from_slice(&v.to_le_bytes());
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap())
}

pub fn prev_leaf(page: &Page) -> PageId {
    PageId(u32::from_le_bytes(page.data()[0..4].try_into().unwrap()))
}

pub fn set_prev_leaf(page: &mut Page, id: PageId) {
    page.data_mut()[0..4].copy_from_slice(&id.0.to_le_bytes());
}

pub fn next_leaf(page: &Page) -> PageId {
    PageId(u32::from_le_bytes(page.data()[4..8].try_into().unwrap()))
}

pub fn set_next_leaf(page: &mut Page, id: PageId) {
    page.data_mut()[4..8].copy_from_slice(&id.0.to_le_bytes());
}

fn free_space_offset(page: &Page) -> u16 {
    read_u16(page.data(), 8)
}

fn set_free_space_offset(page: &mut Page, v: u16) {
    write_u16(page.data_mut(), 8, v);
}

fn data_offset(page: &Page) -> u16 {
    read_u16(page.data(), 10)
}

fn set_data_offset(page: &mut Page, v: u16) {
    write_u16(page.data_mut(), 10, v);
}

fn num_keys(page: &Page) -> u16 {
    page.header().expect("valid leaf header").num_keys
}

fn set_num_keys(page: &mut Page, n: u16) {
    let mut header = page.header().expect("valid leaf header");
    header.num_keys = n;
    page.set_header(header);
}

struct Slot {
    offset: u16,
    key_len: u16,
    value_len: u16,
}

fn slot_at(page: &Page, idx: u16) -> Slot {
    let start = SUBHEADER + idx as usize * SLOT_SIZE;
    let data = page.data();
    Slot {
        offset: read_u16(data, start),
        key_len: read_u16(data, start + 2),
        value_len: read_u16(data, start + 4),
    }
}

fn set_slot_at(page: &mut Page, idx: u16, slot: &Slot) {
    let start = SUBHEADER + idx as usize * SLOT_SIZE;
    let data = page.data_mut();
    write_u16(data, start, slot.offset);
    write_u16(data, start + 2, slot.key_len);
    write_u16(data, start + 4, slot.value_len);
}

fn key_at(page: &Page, idx: u16) -> Vec<u8> {
    let slot = slot_at(page, idx);
    let start = slot.offset as usize;
    page.data()[start..start + slot.key_len as usize].to_vec()
}

fn entry_at(page: &Page, idx: u16) -> (Vec<u8>, Vec<u8>) {
    let slot = slot_at(page, idx);
    let kstart = slot.offset as usize;
    let vstart = kstart + slot.key_len as usize;
    let key = page.data()[kstart..vstart].to_vec();
    let value = page.data()[vstart..vstart + slot.value_len as usize].to_vec();
    (key, value)
}

/// Binary search over the slot array. `Ok(idx)` on an exact match,
/// `Err(idx)` with the sorted insertion point otherwise.
fn find_slot(page: &Page, key: &[u8]) -> Result<u16, u16> {
    let n = num_keys(page);
    let mut lo = 0u16;
    let mut hi = n;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match key_at(page, mid).as_slice().cmp(key) {
            std::cmp::Ordering::Equal => return Ok(mid),
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Greater => hi = mid,
        }
    }
    Err(lo)
}

pub fn find(page: &Page, key: &[u8]) -> Option<Vec<u8>> {
    match find_slot(page, key) {
        Ok(idx) => Some(entry_at(page, idx).1),
        Err(_) => None,
    }
}

pub fn min_key(page: &Page) -> Option<Vec<u8>> {
    if num_keys(page) == 0 {
        None
    } else {
        Some(key_at(page, 0))
    }
}

pub fn has_space(page: &Page, key_len: usize, value_len: usize) -> bool {
    let n = num_keys(page) as usize;
    let slots_end = SUBHEADER + (n + 1) * SLOT_SIZE;
    let needed = key_len + value_len;
    (data_offset(page) as usize).saturating_sub(slots_end) >= needed
}

/// Inserts `(key, value)`. Returns `Ok(false)` if `key` is already
/// present (leaf keys are unique). `Err(OutOfSpace)` if the entry does not
/// fit; the caller is then expected to split.
pub fn insert(page: &mut Page, key: &[u8], value: &[u8]) -> common::EngineResult<bool> {
    match find_slot(page, key) {
        Ok(_) => Ok(false),
        Err(pos) => {
            if !has_space(page, key.len(), value.len()) {
                return Err(common::EngineError::OutOfSpace);
            }
            let new_offset = data_offset(page) - (key.len() + value.len()) as u16;
            {
                let data = page.data_mut();
                let start = new_offset as usize;
                data[start..start + key.len()].copy_from_slice(key);
                data[start + key.len()..start + key.len() + value.len()].copy_from_slice(value);
            }
            set_data_offset(page, new_offset);

            let n = num_keys(page);
            for i in (pos..n).rev() {
                let s = slot_at(page, i);
                set_slot_at(page, i + 1, &s);
            }
            set_slot_at(
                page,
                pos,
                &Slot {
                    offset: new_offset,
                    key_len: key.len() as u16,
                    value_len: value.len() as u16,
                },
            );
            set_num_keys(page, n + 1);
            set_free_space_offset(page, (SUBHEADER + (n as usize + 1) * SLOT_SIZE) as u16);
            Ok(true)
        }
    }
}

/// Removes `key` if present. Heap space of the removed entry is not
/// reclaimed (matching `spec.md` §4.5's choice not to compact on delete);
/// only the slot array shrinks.
pub fn remove(page: &mut Page, key: &[u8]) -> bool {
    match find_slot(page, key) {
        Err(_) => false,
        Ok(pos) => {
            let n = num_keys(page);
            for i in pos..n - 1 {
                let s = slot_at(page, i + 1);
                set_slot_at(page, i, &s);
            }
            set_num_keys(page, n - 1);
            set_free_space_offset(page, (SUBHEADER + (n as usize - 1) * SLOT_SIZE) as u16);
            true
        }
    }
}

/// Attempts an in-place value update.
pub fn update(page: &mut Page, key: &[u8], new_value: &[u8]) -> UpdateOutcome {
    match find_slot(page, key) {
        Err(_) => UpdateOutcome::NotFound,
        Ok(idx) => {
            let slot = slot_at(page, idx);
            if new_value.len() as u16 <= slot.value_len {
                let vstart = slot.offset as usize + slot.key_len as usize;
                page.data_mut()[vstart..vstart + new_value.len()].copy_from_slice(new_value);
                set_slot_at(
                    page,
                    idx,
                    &Slot {
                        offset: slot.offset,
                        key_len: slot.key_len,
                        value_len: new_value.len() as u16,
                    },
                );
                UpdateOutcome::Updated
            } else {
                UpdateOutcome::NeedsReinsert
            }
        }
    }
}

pub fn get_all(page: &Page) -> Vec<(Vec<u8>, Vec<u8>)> {
    (0..num_keys(page)).map(|i| entry_at(page, i)).collect()
}

/// Redistributes `left`'s current entries plus the triggering
/// `(pending_key, pending_value)` insert across `left` and `right`,
/// reinitializing both. Returns the promoted key (`right`'s minimum key).
/// Sibling pointers are the caller's responsibility (`spec.md` §4.4).
pub fn split(left: &mut Page, right: &mut Page, pending_key: &[u8], pending_value: &[u8]) -> Vec<u8> {
    let parent = left.header().expect("valid leaf header").parent_page_id;
    let mut entries = get_all(left);
    let pos = entries.partition_point(|(k, _)| k.as_slice() < pending_key);
    entries.insert(pos, (pending_key.to_vec(), pending_value.to_vec()));

    let mid = entries.len().div_ceil(2);
    let (left_entries, right_entries) = entries.split_at(mid);

    init(left);
    for (k, v) in left_entries {
        insert(left, k, v).expect("left half of a split always fits");
    }
    let mut left_header = left.header().expect("valid leaf header");
    left_header.parent_page_id = parent;
    left.set_header(left_header);

    init(right);
    for (k, v) in right_entries {
        insert(right, k, v).expect("right half of a split always fits");
    }
    right_entries[0].0.clone()
}
