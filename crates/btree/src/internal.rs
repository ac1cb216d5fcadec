//! Internal page layout: an 8-byte sub-header carrying `first_child`, plus
//! a slot array where slot `i` pairs key `i` with its right child
//! (`spec.md` §3, §4.4).

use common::PageId;
use storage::{NodeKind, Page, PAGE_SIZE};

const SUBHEADER: usize = 8;
const SLOT_SIZE: usize = 8;
const DATA_REGION_SIZE: usize = PAGE_SIZE - storage::HEADER_SIZE;

/// Largest separator key this page can ever hold.
pub const MAX_KEY_SIZE: usize = DATA_REGION_SIZE - SUBHEADER - SLOT_SIZE;

pub fn init(page: &mut Page) {
    page.reset();
    let mut header = page.header().expect("reset header decodes");
    header.node_kind = NodeKind::Internal;
    header.num_keys = 0;
    page.set_header(header);

    let data = page.data_mut();
    data[0..4].copy_from_slice(&PageId::NONE.0.to_le_bytes());
    write_u16(data, 4, SUBHEADER as u16);
    write_u16(data, 6, DATA_REGION_SIZE as u16);
}

fn write_u16(data: &mut [u8], offset: usize, v: u16) {
    data[offset..offset + 2].copy_from_slice(&v.to_le_bytes());
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap())
}

pub fn first_child(page: &Page) -> PageId {
    PageId(u32::from_le_bytes(page.data()[0..4].try_into().unwrap()))
}

pub fn set_first_child(page: &mut Page, id: PageId) {
    page.data_mut()[0..4].copy_from_slice(&id.0.to_le_bytes());
}

fn free_space_offset(page: &Page) -> u16 {
    read_u16(page.data(), 4)
}

fn set_free_space_offset(page: &mut Page, v: u16) {
    write_u16(page.data_mut(), 4, v);
}

fn data_offset(page: &Page) -> u16 {
    read_u16(page.data(), 6)
}

fn set_data_offset(page: &mut Page, v: u16) {
    write_u16(page.data_mut(), 6, v);
}

fn num_keys(page: &Page) -> u16 {
    page.header().expect("valid internal header").num_keys
}

fn set_num_keys(page: &mut Page, n: u16) {
    let mut header = page.header().expect("valid internal header");
    header.num_keys = n;
    page.set_header(header);
}

struct Slot {
    child: PageId,
    offset: u16,
    key_len: u16,
}

fn slot_at(page: &Page, idx: u16) -> Slot {
    let start = SUBHEADER + idx as usize * SLOT_SIZE;
    let data = page.data();
    let child = PageId(u32::from_le_bytes(data[start..start + 4].try_into().unwrap()));
    Slot {
        child,
        offset: read_u16(data, start + 4),
        key_len: read_u16(data, start + 6),
    }
}

fn set_slot_at(page: &mut Page, idx: u16, slot: &Slot) {
    let start = SUBHEADER + idx as usize * SLOT_SIZE;
    let data = page.data_mut();
    data[start..start + 4].copy_from_slice(&slot.child.0.to_le_bytes());
    write_u16(data, start + 4, slot.offset);
    write_u16(data, start + 6, slot.key_len);
}

fn key_at(page: &Page, idx: u16) -> Vec<u8> {
    let slot = slot_at(page, idx);
    let start = slot.offset as usize;
    page.data()[start..start + slot.key_len as usize].to_vec()
}

fn entry_at(page: &Page, idx: u16) -> (Vec<u8>, PageId) {
    let slot = slot_at(page, idx);
    (key_at(page, idx), slot.child)
}

/// Returns the child whose subtree may contain `key`: `first_child` if
/// `key` is smaller than every separator key, otherwise the right child of
/// the largest separator key `<= key` (`spec.md` §4.4).
pub fn find_child(page: &Page, key: &[u8]) -> PageId {
    let n = num_keys(page);
    if n == 0 || key_at(page, 0).as_slice() > key {
        return first_child(page);
    }
    // Largest index i with key_at(i) <= key.
    let mut lo = 0u16;
    let mut hi = n;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if key_at(page, mid).as_slice() <= key {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    slot_at(page, lo - 1).child
}

pub fn has_space(page: &Page, key_len: usize) -> bool {
    let n = num_keys(page) as usize;
    let slots_end = SUBHEADER + (n + 1) * SLOT_SIZE;
    (data_offset(page) as usize).saturating_sub(slots_end) >= key_len
}

/// Inserts `key` with its right child in sorted position.
/// `Err(OutOfSpace)` if it does not fit; the caller must then split.
pub fn insert(page: &mut Page, key: &[u8], right_child: PageId) -> common::EngineResult<()> {
    if !has_space(page, key.len()) {
        return Err(common::EngineError::OutOfSpace);
    }
    let n = num_keys(page);
    let mut lo = 0u16;
    let mut hi = n;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if key_at(page, mid).as_slice() < key {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    let pos = lo;

    let new_offset = data_offset(page) - key.len() as u16;
    page.data_mut()[new_offset as usize..new_offset as usize + key.len()].copy_from_slice(key);
    set_data_offset(page, new_offset);

    for i in (pos..n).rev() {
        let s = slot_at(page, i);
        set_slot_at(page, i + 1, &s);
    }
    set_slot_at(
        page,
        pos,
        &Slot {
            child: right_child,
            offset: new_offset,
            key_len: key.len() as u16,
        },
    );
    set_num_keys(page, n + 1);
    set_free_space_offset(page, (SUBHEADER + (n as usize + 1) * SLOT_SIZE) as u16);
    Ok(())
}

pub fn get_all_entries(page: &Page) -> Vec<(Vec<u8>, PageId)> {
    (0..num_keys(page)).map(|i| entry_at(page, i)).collect()
}

/// All child ids this page currently references (`first_child` plus every
/// slot's right child), used by callers that need to fix up parent
/// pointers.
pub fn children(page: &Page) -> Vec<PageId> {
    let mut out = vec![first_child(page)];
    out.extend(get_all_entries(page).into_iter().map(|(_, c)| c));
    out
}

/// Redistributes `left`'s current entries plus the triggering
/// `(pending_key, pending_right_child)` insert across `left` and `right`.
/// The middle key is promoted rather than copied into either side
/// (`spec.md` §4.4). Returns `(promoted_key, children_now_owned_by_right)`
/// so the caller can reparent them.
pub fn split(
    left: &mut Page,
    right: &mut Page,
    pending_key: &[u8],
    pending_child: PageId,
) -> (Vec<u8>, Vec<PageId>) {
    let first_child_id = first_child(left);
    let parent = left.header().expect("valid internal header").parent_page_id;
    let mut combined = get_all_entries(left);
    let pos = combined.partition_point(|(k, _)| k.as_slice() < pending_key);
    combined.insert(pos, (pending_key.to_vec(), pending_child));

    let mid = combined.len() / 2;
    let promoted = combined[mid].0.clone();
    let new_first_child = combined[mid].1;
    let left_entries = combined[0..mid].to_vec();
    let right_entries = combined[mid + 1..].to_vec();

    init(left);
    set_first_child(left, first_child_id);
    for (k, c) in &left_entries {
        insert(left, k, *c).expect("left half of an internal split always fits");
    }
    let mut left_header = left.header().expect("valid internal header");
    left_header.parent_page_id = parent;
    left.set_header(left_header);

    init(right);
    set_first_child(right, new_first_child);
    for (k, c) in &right_entries {
        insert(right, k, *c).expect("right half of an internal split always fits");
    }

    let mut moved = vec![new_first_child];
    moved.extend(right_entries.iter().map(|(_, c)| *c));
    (promoted, moved)
}
