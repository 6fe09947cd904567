use quill::blueline::{KvCursor, RegionStore, StoreWriter};
use quill::core::config::StoreConfig;
use quill::core::error::ErrorKind;
use tempfile::TempDir;

fn key(i: usize) -> Vec<u8> {
    format!("k{:04}", i).into_bytes()
}

fn value(i: usize) -> Vec<u8> {
    format!("v{:04}", i).into_bytes()
}

fn small_regions() -> StoreConfig {
    StoreConfig {
        region_size: 256,
        ..StoreConfig::default()
    }
}

#[test]
fn buffered_writes_are_servable_then_survive_commit() {
    let dir = TempDir::new().unwrap();
    let mut writer =
        StoreWriter::open(dir.path(), "idx", StoreConfig::default(), true).unwrap();
    for i in 0..1000 {
        writer.insert(&key(i), &value(i)).unwrap();
    }

    // Still buffered: nothing flushed, reads come straight from the buffer.
    assert_eq!(writer.buffered(), 1000);
    assert_eq!(writer.get(&key(500)).unwrap(), Some(value(500)));

    writer.commit().unwrap();

    let store = RegionStore::open(dir.path(), "idx", StoreConfig::default()).unwrap();
    assert_eq!(store.len(), 1000);
    assert_eq!(store.get(&key(500)).unwrap(), Some(value(500)));
}

#[test]
fn point_range_and_full_iteration_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut writer = StoreWriter::open(dir.path(), "idx", small_regions(), true).unwrap();
    for i in 0..200 {
        writer.insert(&key(i), &value(i)).unwrap();
    }
    writer.commit().unwrap();

    let store = RegionStore::open(dir.path(), "idx", small_regions()).unwrap();
    for i in [0usize, 1, 99, 100, 199] {
        assert_eq!(store.get(&key(i)).unwrap(), Some(value(i)));
    }
    assert_eq!(store.get(b"k9999").unwrap(), None);
    assert_eq!(store.get(b"a").unwrap(), None);

    let err = store.require(b"zzz").unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    let range = store.key_range(&key(10), &key(20)).unwrap();
    assert_eq!(range.len(), 10);
    assert_eq!(range[0], key(10));
    assert_eq!(range[9], key(19));

    let items = store.items().unwrap();
    assert_eq!(items.len(), 200);
    assert!(items.windows(2).all(|w| w[0].0 < w[1].0));
}

#[test]
fn serial_cursor_walks_all_regions_in_order() {
    let dir = TempDir::new().unwrap();
    let mut writer = StoreWriter::open(dir.path(), "idx", small_regions(), true).unwrap();
    for i in 0..300 {
        writer.insert(&key(i), &value(i)).unwrap();
    }
    writer.commit().unwrap();

    let store = RegionStore::open(dir.path(), "idx", small_regions()).unwrap();
    let mut cursor = store.cursor();
    cursor.first().unwrap();
    let mut seen = 0;
    while cursor.is_valid() {
        assert_eq!(cursor.key().unwrap(), Some(key(seen)));
        cursor.next().unwrap();
        seen += 1;
    }
    assert_eq!(seen, 300);

    cursor.seek(&key(123)).unwrap();
    assert_eq!(cursor.key().unwrap(), Some(key(123)));
    cursor.seek(b"k0150x").unwrap();
    assert_eq!(cursor.key().unwrap(), Some(key(151)));
    cursor.seek(b"zzzz").unwrap();
    assert!(!cursor.is_valid());
}

#[test]
fn second_writer_fails_fast_on_lock_conflict() {
    let dir = TempDir::new().unwrap();
    let writer = StoreWriter::open(dir.path(), "idx", StoreConfig::default(), false).unwrap();
    let err = StoreWriter::open(dir.path(), "idx", StoreConfig::default(), false).unwrap_err();
    assert_eq!(err.kind, ErrorKind::LockConflict);

    writer.cancel().unwrap();
    StoreWriter::open(dir.path(), "idx", StoreConfig::default(), false).unwrap();
}

#[test]
fn updates_and_deletes_rewrite_only_touched_regions() {
    let dir = TempDir::new().unwrap();
    let mut writer = StoreWriter::open(dir.path(), "idx", small_regions(), true).unwrap();
    for i in 0..200 {
        writer.insert(&key(i), &value(i)).unwrap();
    }
    writer.commit().unwrap();

    let mut writer = StoreWriter::open(dir.path(), "idx", small_regions(), true).unwrap();
    writer.insert(&key(50), b"updated").unwrap();
    writer.delete(&key(51)).unwrap();
    writer.insert(b"k0050a", b"inserted").unwrap();
    writer.commit().unwrap();

    let store = RegionStore::open(dir.path(), "idx", small_regions()).unwrap();
    assert_eq!(store.get(&key(50)).unwrap(), Some(b"updated".to_vec()));
    assert_eq!(store.get(b"k0050a").unwrap(), Some(b"inserted".to_vec()));
    assert_eq!(store.get(&key(51)).unwrap(), None);
    assert_eq!(store.get(&key(0)).unwrap(), Some(value(0)));
    assert_eq!(store.get(&key(199)).unwrap(), Some(value(199)));
    assert_eq!(store.len(), 200); // 200 - deleted + inserted
}

#[test]
fn reader_keeps_its_snapshot_across_a_commit() {
    let dir = TempDir::new().unwrap();
    let mut writer = StoreWriter::open(dir.path(), "idx", StoreConfig::default(), true).unwrap();
    for i in 0..50 {
        writer.insert(&key(i), &value(i)).unwrap();
    }
    writer.commit().unwrap();

    let before = RegionStore::open(dir.path(), "idx", StoreConfig::default()).unwrap();
    assert_eq!(before.generation(), 1);

    let mut writer = StoreWriter::open(dir.path(), "idx", StoreConfig::default(), true).unwrap();
    writer.insert(&key(10), b"changed").unwrap();
    writer.commit().unwrap();

    // The old snapshot still serves the old value; a fresh open sees the new.
    assert_eq!(before.get(&key(10)).unwrap(), Some(value(10)));
    let after = RegionStore::open(dir.path(), "idx", StoreConfig::default()).unwrap();
    assert_eq!(after.generation(), 2);
    assert_eq!(after.get(&key(10)).unwrap(), Some(b"changed".to_vec()));
}

#[test]
fn buffered_cursor_shadows_disk_values() {
    let dir = TempDir::new().unwrap();
    let mut writer = StoreWriter::open(dir.path(), "idx", StoreConfig::default(), true).unwrap();
    for i in 0..10 {
        writer.insert(&key(i), &value(i)).unwrap();
    }
    writer.commit().unwrap();

    let mut writer = StoreWriter::open(dir.path(), "idx", StoreConfig::default(), true).unwrap();
    writer.insert(&key(3), b"shadowed").unwrap();
    writer.delete(&key(4)).unwrap();
    writer.insert(b"k0010", b"appended").unwrap();

    let mut cursor = writer.cursor();
    cursor.first().unwrap();
    let mut pairs = Vec::new();
    while cursor.is_valid() {
        pairs.push((cursor.key().unwrap().unwrap(), cursor.value().unwrap().unwrap()));
        cursor.next().unwrap();
    }
    assert_eq!(pairs.len(), 10); // ten on disk, minus one tombstone, plus one new
    assert!(pairs.contains(&(key(3), b"shadowed".to_vec())));
    assert!(pairs.contains(&(b"k0010".to_vec(), b"appended".to_vec())));
    assert!(!pairs.iter().any(|(k, _)| k == &key(4)));
    writer.cancel().unwrap();
}

#[test]
fn cancel_discards_everything_since_the_last_commit() {
    let dir = TempDir::new().unwrap();
    let mut writer = StoreWriter::open(dir.path(), "idx", StoreConfig::default(), true).unwrap();
    for i in 0..20 {
        writer.insert(&key(i), &value(i)).unwrap();
    }
    writer.commit().unwrap();
    let committed_len = std::fs::metadata(dir.path().join("idx.dat")).unwrap().len();

    let mut writer = StoreWriter::open(dir.path(), "idx", StoreConfig::default(), true).unwrap();
    for i in 20..40 {
        writer.insert(&key(i), &value(i)).unwrap();
    }
    writer.flush().unwrap(); // regions appended, table of contents untouched
    writer.cancel().unwrap();

    assert_eq!(
        std::fs::metadata(dir.path().join("idx.dat")).unwrap().len(),
        committed_len
    );
    let store = RegionStore::open(dir.path(), "idx", StoreConfig::default()).unwrap();
    assert_eq!(store.len(), 20);
    assert_eq!(store.get(&key(25)).unwrap(), None);
}

#[test]
fn empty_key_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut writer = StoreWriter::open(dir.path(), "idx", StoreConfig::default(), true).unwrap();
    let err = writer.insert(b"", b"v").unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidValue);
    writer.cancel().unwrap();
}
