// Recovery Tests for disktable
// These tests verify that a table comes back intact after a restart or crash

use disktable::comparator::BYTEWISE_COMPARATOR;
use disktable::store::{wal::LOG_FILE, IndexDescriptor, Store};
use disktable::{Dimension, Error, Options, Table, TableIterator, TableOptions, TtlType};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

fn mapping() -> BTreeMap<String, u32> {
    BTreeMap::from([("user".to_string(), 0), ("device".to_string(), 1)])
}

fn new_table(root: &Path) -> Table {
    Table::new("events", 4, 2, mapping(), 5, TtlType::LatestTime, TableOptions::new(root))
}

/// Helper function to simulate a crash by dropping the table without cleanup
fn simulate_crash(table: Table) {
    std::mem::forget(table);
}

/// Test that every dimension replays its log on reopen
#[test]
fn test_reopen_replays_all_dimensions() {
    env_logger::try_init().ok();

    let dir = TempDir::new().unwrap();
    {
        let table = new_table(dir.path());
        table.init().unwrap();
        for ts in 0..50u64 {
            let user = format!("user_{}", ts % 5);
            let device = format!("device_{}", ts % 7);
            table
                .put_dimensions(
                    ts,
                    format!("event_{}", ts).as_bytes(),
                    &[Dimension::new("user", user), Dimension::new("device", device)],
                )
                .unwrap();
        }
        assert!(table.delete(b"user_0", 0).unwrap());
        table.set_schema(b"user:string,device:string".to_vec()).unwrap();
    }

    let table = new_table(dir.path());
    table.init().unwrap();
    table.read_table_from_disk().unwrap();

    assert_eq!(table.schema(), b"user:string,device:string".to_vec());
    assert_eq!(table.record_cnt(), 40);
    assert_eq!(&table.get_from(1, b"device_3", 10).unwrap().unwrap()[..], b"event_10");
    assert!(table.get(b"user_0", 10).unwrap().is_none());

    let mut it = table.new_iterator(b"user_1").unwrap();
    it.seek_to_first();
    assert_eq!(it.key(), 46);
}

/// Test recovery after a crash without any shutdown
#[test]
fn test_recovery_after_crash() {
    let dir = TempDir::new().unwrap();
    {
        let table = new_table(dir.path());
        table.init().unwrap();
        for i in 0..100u64 {
            table.put(format!("key_{}", i).as_bytes(), i, b"value").unwrap();
        }
        simulate_crash(table);
    }

    let table = new_table(dir.path());
    table.init().unwrap();
    for i in 0..100u64 {
        assert!(table.get(format!("key_{}", i).as_bytes(), i).unwrap().is_some(), "key_{} lost", i);
    }
}

/// Test that a torn record at the end of a log is dropped, not fatal
#[test]
fn test_torn_log_tail() {
    env_logger::try_init().ok();

    let dir = TempDir::new().unwrap();
    let log_path;
    {
        let table = new_table(dir.path());
        table.init().unwrap();
        table.put(b"alpha", 1, b"one").unwrap();
        table.put(b"beta", 2, b"two").unwrap();
        log_path = table.path().join("idx0").join(LOG_FILE);
    }

    // Half-written record: checksum, then a length promising more than follows
    let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
    file.write_all(&[1, 2, 3, 4, 200, 0, 0, 0, 9, 9]).unwrap();
    drop(file);

    let table = new_table(dir.path());
    table.init().unwrap();
    assert_eq!(&table.get(b"alpha", 1).unwrap().unwrap()[..], b"one");
    assert_eq!(&table.get(b"beta", 2).unwrap().unwrap()[..], b"two");

    // and the log accepts new writes after the truncation
    table.put(b"gamma", 3, b"three").unwrap();
    drop(table);
    let table = new_table(dir.path());
    table.init().unwrap();
    assert!(table.get(b"gamma", 3).unwrap().is_some());
}

/// Test that reloading with different identity or mapping is refused
#[test]
fn test_manifest_identity_mismatch() {
    let dir = TempDir::new().unwrap();
    new_table(dir.path()).init().unwrap();

    let narrower = Table::new(
        "events",
        4,
        2,
        BTreeMap::from([("user".to_string(), 0)]),
        5,
        TtlType::LatestTime,
        TableOptions::new(dir.path()),
    );
    assert!(matches!(narrower.init(), Err(Error::Corruption(_))));
    assert!(matches!(narrower.read_table_from_disk(), Err(Error::InvalidState(_))));
}

/// Test that an index created under another ordering cannot be reopened
#[test]
fn test_comparator_mismatch() {
    let dir = TempDir::new().unwrap();
    let table = new_table(dir.path());

    let store = Store::open(
        table.path(),
        &Options::default(),
        vec![IndexDescriptor::new("idx0", &BYTEWISE_COMPARATOR)],
    )
    .unwrap();
    drop(store);

    assert!(matches!(table.init(), Err(Error::Corruption(_))));
}

/// Test that self-tune keeps data readable across a reopen
#[test]
fn test_self_tune_then_reopen() {
    let dir = TempDir::new().unwrap();
    let options = TableOptions::new(dir.path()).store(Options::default().memtable_size(256));
    {
        let table = Table::new("tuned", 1, 0, BTreeMap::new(), 0, TtlType::AbsoluteTime, options.clone());
        table.init().unwrap();
        for round in 0..10u64 {
            for i in 0..20u64 {
                table.put(format!("k{}", i).as_bytes(), 1, format!("round {}", round).as_bytes()).unwrap();
            }
        }
        table.delete(b"k0", 0).unwrap();
        table.self_tune();
    }

    let table = Table::new("tuned", 1, 0, BTreeMap::new(), 0, TtlType::AbsoluteTime, options);
    table.init().unwrap();
    assert_eq!(table.record_cnt(), 19);
    assert_eq!(&table.get(b"k5", 1).unwrap().unwrap()[..], b"round 9");
    assert!(table.get(b"k0", 1).unwrap().is_none());
}

/// Test that a crash between the sub-writes of one fan-out leaves the record
/// in the dimensions written before it, and the table still opens
#[test]
fn test_partial_fan_out_after_crash() {
    let dir = TempDir::new().unwrap();
    let idx1_log;
    let idx1_len;
    {
        let table = new_table(dir.path());
        table.init().unwrap();
        table
            .put_dimensions(1, b"first", &[Dimension::new("user", "u1"), Dimension::new("device", "d1")])
            .unwrap();

        idx1_log = table.path().join("idx1").join(LOG_FILE);
        idx1_len = std::fs::metadata(&idx1_log).unwrap().len();
        table
            .put_dimensions(2, b"second", &[Dimension::new("user", "u2"), Dimension::new("device", "d2")])
            .unwrap();
    }

    // the idx1 write of the second record never reached the disk
    OpenOptions::new().write(true).open(&idx1_log).unwrap().set_len(idx1_len).unwrap();

    let table = new_table(dir.path());
    table.init().unwrap();
    assert_eq!(&table.get_from(0, b"u2", 2).unwrap().unwrap()[..], b"second");
    assert!(table.get_from(1, b"d2", 2).unwrap().is_none());
    assert_eq!(&table.get_from(1, b"d1", 1).unwrap().unwrap()[..], b"first");
}

/// Test that damage in the middle of a log fails init instead of being cut away
#[test]
fn test_damaged_log_middle_is_corruption() {
    let dir = TempDir::new().unwrap();
    let log_path;
    let header_len;
    {
        let table = new_table(dir.path());
        table.init().unwrap();
        log_path = table.path().join("idx0").join(LOG_FILE);
        header_len = std::fs::metadata(&log_path).unwrap().len() as usize;
        for ts in 0..5u64 {
            table.put(b"pk", ts, b"value").unwrap();
        }
    }

    let mut bytes = std::fs::read(&log_path).unwrap();
    let len = bytes.len();
    // checksum of the first put
    bytes[header_len] ^= 0xFF;
    std::fs::write(&log_path, &bytes).unwrap();

    let table = new_table(dir.path());
    assert!(matches!(table.init(), Err(Error::Corruption(_))));
    assert_eq!(std::fs::metadata(&log_path).unwrap().len(), len as u64);
}

/// Test that writes accepted after a failed log reset survive a restart
#[test]
fn test_writes_after_failed_log_reset_survive() {
    let dir = TempDir::new().unwrap();
    let options = TableOptions::new(dir.path()).store(Options::default().memtable_size(256));
    let blocker = dir.path().join("1_0_tuned").join("idx0").join(format!("{}.tmp", LOG_FILE));
    {
        let table = Table::new("tuned", 1, 0, BTreeMap::new(), 0, TtlType::AbsoluteTime, options.clone());
        table.init().unwrap();

        // a directory in the way makes every log reset fail
        std::fs::create_dir(&blocker).unwrap();
        for i in 0..50u64 {
            table.put(format!("k{}", i).as_bytes(), i, b"some value").unwrap();
        }
        table.self_tune();
    }
    std::fs::remove_dir(&blocker).unwrap();

    let table = Table::new("tuned", 1, 0, BTreeMap::new(), 0, TtlType::AbsoluteTime, options);
    table.init().unwrap();
    for i in 0..50u64 {
        assert!(table.get(format!("k{}", i).as_bytes(), i).unwrap().is_some(), "k{} lost", i);
    }
}
