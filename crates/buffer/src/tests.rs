use super::*;
use std::sync::Arc;
use tempfile::tempdir;

fn pool(pool_size: usize) -> (BufferPool, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let disk = Arc::new(DiskManager::open(&dir.path().join("dam.db")).unwrap());
    (BufferPool::new(disk, pool_size), dir)
}

#[test]
fn new_page_is_pinned_and_dirty() {
    let (pool, _dir) = pool(4);
    let id = pool.new_page().unwrap();
    assert_eq!(pool.pin_count(id), Some(1));
    assert!(pool.contains_page(id));
}

#[test]
fn fetch_existing_page_reuses_frame_and_increments_pin() {
    let (pool, _dir) = pool(4);
    let id = pool.new_page().unwrap();
    pool.unpin_page(id, true).unwrap();
    pool.fetch_page(id).unwrap();
    assert_eq!(pool.pin_count(id), Some(1));
    pool.fetch_page(id).unwrap();
    assert_eq!(pool.pin_count(id), Some(2));
}

#[test]
fn unpin_on_zero_pin_count_errors() {
    let (pool, _dir) = pool(4);
    let id = pool.new_page().unwrap();
    pool.unpin_page(id, false).unwrap();
    assert!(pool.unpin_page(id, false).is_err());
}

#[test]
fn mutated_page_survives_eviction_round_trip() {
    let (pool, _dir) = pool(1);
    let id = pool.new_page().unwrap();
    pool.with_page_mut(id, |p| p.data_mut()[0..3].copy_from_slice(b"abc"))
        .unwrap();
    pool.unpin_page(id, true).unwrap();

    // Force eviction of the only frame by fetching a second page.
    let id2 = pool.new_page().unwrap();
    pool.unpin_page(id2, true).unwrap();
    assert!(!pool.contains_page(id));

    pool.fetch_page(id).unwrap();
    pool.with_page(id, |p| assert_eq!(&p.data()[0..3], b"abc"))
        .unwrap();
    pool.unpin_page(id, false).unwrap();
}

#[test]
fn pool_exhaustion_then_retry_after_unpin() {
    let (pool, _dir) = pool(4);
    let ids: Vec<_> = (0..4).map(|_| pool.new_page().unwrap()).collect();

    let fifth = pool.new_page();
    assert!(matches!(fifth, Err(EngineError::BufferPoolFull)));

    pool.unpin_page(ids[0], false).unwrap();
    let fifth = pool.new_page();
    assert!(fifth.is_ok());
}

#[test]
fn delete_pinned_page_fails() {
    let (pool, _dir) = pool(4);
    let id = pool.new_page().unwrap();
    assert!(matches!(
        pool.delete_page(id),
        Err(EngineError::PagePinned(_))
    ));
}

#[test]
fn delete_unpinned_page_frees_frame_for_reuse() {
    let (pool, _dir) = pool(1);
    let id = pool.new_page().unwrap();
    pool.unpin_page(id, true).unwrap();
    pool.delete_page(id).unwrap();
    assert!(!pool.contains_page(id));

    // Frame should be free, not requiring eviction.
    let id2 = pool.new_page().unwrap();
    assert!(pool.contains_page(id2));
}

#[test]
fn fifth_fetch_evicts_least_recently_used_page() {
    // `spec.md` §8 scenario 5: pool_size=4, fetch 1..=4, then fetch 5 should
    // evict page 1 (the first one fetched, never re-touched) rather than
    // any other resident page.
    let (pool, _dir) = pool(4);
    for raw in 1..=4u32 {
        pool.fetch_page(PageId(raw)).unwrap();
        pool.unpin_page(PageId(raw), false).unwrap();
    }
    pool.fetch_page(PageId(5)).unwrap();
    assert!(!pool.contains_page(PageId(1)));
    assert!(pool.contains_page(PageId(5)));
    for raw in 2..=4u32 {
        assert!(pool.contains_page(PageId(raw)));
    }
}

#[test]
fn flush_all_pages_writes_through_to_disk() {
    let dir = tempdir().unwrap();
    let disk = Arc::new(DiskManager::open(&dir.path().join("dam.db")).unwrap());
    let pool = BufferPool::new(disk.clone(), 4);

    let id = pool.new_page().unwrap();
    pool.with_page_mut(id, |p| p.data_mut()[0] = 9).unwrap();
    pool.unpin_page(id, true).unwrap();
    pool.flush_all_pages().unwrap();

    let mut buf = [0u8; PAGE_SIZE];
    disk.read_page(id, &mut buf).unwrap();
    let page = Page::from_bytes(buf);
    assert!(page.verify_checksum());
    assert_eq!(page.data()[0], 9);
}
