use super::*;
use common::PageId;
use tempfile::tempdir;

#[test]
fn fresh_file_bootstraps_header() {
    let dir = tempdir().unwrap();
    let dm = DiskManager::open(&dir.path().join("dam.db")).unwrap();
    assert_eq!(dm.num_pages(), 1);
}

#[test]
fn allocate_then_reopen_preserves_counts() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dam.db");
    {
        let dm = DiskManager::open(&path).unwrap();
        let p1 = dm.allocate_page().unwrap();
        let p2 = dm.allocate_page().unwrap();
        assert_eq!(p1, PageId(1));
        assert_eq!(p2, PageId(2));
        dm.flush().unwrap();
    }
    let dm = DiskManager::open(&path).unwrap();
    assert_eq!(dm.num_pages(), 3);
    assert_eq!(dm.allocate_page().unwrap(), PageId(3));
}

#[test]
fn deallocate_then_allocate_reuses_lifo() {
    let dir = tempdir().unwrap();
    let dm = DiskManager::open(&dir.path().join("dam.db")).unwrap();
    let p1 = dm.allocate_page().unwrap();
    let p2 = dm.allocate_page().unwrap();
    dm.deallocate_page(p1).unwrap();
    dm.deallocate_page(p2).unwrap();
    assert_eq!(dm.allocate_page().unwrap(), p2);
    assert_eq!(dm.allocate_page().unwrap(), p1);
}

#[test]
fn allocate_never_returns_zero() {
    let dir = tempdir().unwrap();
    let dm = DiskManager::open(&dir.path().join("dam.db")).unwrap();
    for _ in 0..8 {
        assert!(dm.allocate_page().unwrap().is_valid());
    }
}

#[test]
fn read_beyond_file_is_zeroed() {
    let dir = tempdir().unwrap();
    let dm = DiskManager::open(&dir.path().join("dam.db")).unwrap();
    let id = PageId(999);
    let mut buf = [0xAAu8; PAGE_SIZE];
    dm.read_page(id, &mut buf).unwrap();
    assert!(buf.iter().all(|b| *b == 0));
}

#[test]
fn write_then_read_round_trips() {
    let dir = tempdir().unwrap();
    let dm = DiskManager::open(&dir.path().join("dam.db")).unwrap();
    let id = dm.allocate_page().unwrap();
    let mut page = Page::new(id);
    page.data_mut()[0..5].copy_from_slice(b"hello");
    page.recompute_checksum();
    dm.write_page(id, page.as_bytes()).unwrap();

    let mut buf = [0u8; PAGE_SIZE];
    dm.read_page(id, &mut buf).unwrap();
    let read_back = Page::from_bytes(buf);
    assert!(read_back.verify_checksum());
    assert_eq!(&read_back.data()[0..5], b"hello");
}

#[test]
fn corrupt_header_fails_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dam.db");
    {
        DiskManager::open(&path).unwrap();
    }
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[0] ^= 0xFF;
    std::fs::write(&path, bytes).unwrap();

    let err = DiskManager::open(&path).unwrap_err();
    assert!(matches!(err, common::EngineError::Corruption(_)));
}

#[test]
fn page_header_round_trips() {
    let mut page = Page::new(PageId(7));
    let mut header = page.header().unwrap();
    header.node_kind = NodeKind::Leaf;
    header.num_keys = 3;
    header.parent_page_id = PageId(2);
    page.set_header(header);

    let roundtrip = page.header().unwrap();
    assert_eq!(roundtrip.node_kind, NodeKind::Leaf);
    assert_eq!(roundtrip.num_keys, 3);
    assert_eq!(roundtrip.parent_page_id, PageId(2));
}

#[test]
fn checksum_detects_tampering() {
    let mut page = Page::new(PageId(1));
    page.data_mut()[10] = 42;
    page.recompute_checksum();
    assert!(page.verify_checksum());

    page.as_bytes_mut()[HEADER_SIZE + 10] ^= 0xFF;
    assert!(!page.verify_checksum());
}

#[test]
fn reset_clears_page_but_keeps_id() {
    let mut page = Page::new(PageId(5));
    let mut header = page.header().unwrap();
    header.node_kind = NodeKind::Leaf;
    header.num_keys = 9;
    page.set_header(header);
    page.data_mut()[0] = 1;

    page.reset();
    let header = page.header().unwrap();
    assert_eq!(header.page_id, PageId(5));
    assert_eq!(header.node_kind, NodeKind::Uninitialized);
    assert_eq!(header.num_keys, 0);
    assert_eq!(page.data()[0], 0);
}
