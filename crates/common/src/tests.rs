use super::*;
use std::path::PathBuf;

#[test]
fn config_defaults_are_sane() {
    let cfg = Config::builder().data_dir(PathBuf::from("./db_data")).build();
    assert_eq!(cfg.buffer_pool_pages, 512);
    assert!(cfg.wal_enabled);
    assert!(!cfg.verbose);
}

#[test]
fn config_paths_are_scoped_to_data_dir() {
    let cfg = Config::builder().data_dir(PathBuf::from("/tmp/store")).build();
    assert_eq!(cfg.db_path(), PathBuf::from("/tmp/store/dam.db"));
    assert_eq!(cfg.wal_path(), PathBuf::from("/tmp/store/dam.wal"));
    assert_eq!(cfg.meta_path(), PathBuf::from("/tmp/store/dam.meta"));
}

#[test]
fn engine_error_formats_cleanly() {
    let err = EngineError::Corruption("bad header checksum".into());
    assert!(format!("{err}").contains("bad header checksum"));
}

#[test]
fn io_error_converts() {
    let e = std::io::Error::other("oops");
    let engine_err: EngineError = e.into();
    assert!(matches!(engine_err, EngineError::Io(_)));
}

#[test]
fn page_id_none_sentinel() {
    assert!(!PageId::NONE.is_valid());
    assert!(PageId(1).is_valid());
}

#[test]
fn lsn_none_sentinel() {
    assert!(Lsn::NONE.is_none());
    assert!(!Lsn(1).is_none());
}

#[test]
fn crc32_matches_known_vector() {
    // "123456789" is the standard CRC-32/ISO-HDLC check value.
    assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
}
