//! Black-box tests against the public API only, run against an in-memory filesystem so they
//! don't touch the real disk.

use std::sync::Arc;
use std::time::Duration;

use lsmdb::{BytewiseComparator, Db, MemoryFileSystem, Options, ReadOptions, WriteBatch, WriteOptions};

fn options() -> Options {
    Options { comparator: Arc::new(BytewiseComparator), ..Options::default() }
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("condition never became true");
}

#[test]
fn basic_put_get_delete_round_trip() {
    let fs = Arc::new(MemoryFileSystem::new());
    let db = Db::open(fs, "/db", options()).unwrap();

    assert_eq!(db.get(b"missing", ReadOptions::default()).unwrap(), None);

    db.put(b"alpha", b"1", WriteOptions::default()).unwrap();
    db.put(b"beta", b"2", WriteOptions::default()).unwrap();
    assert_eq!(db.get(b"alpha", ReadOptions::default()).unwrap(), Some(b"1".to_vec()));
    assert_eq!(db.get(b"beta", ReadOptions::default()).unwrap(), Some(b"2".to_vec()));

    db.delete(b"alpha", WriteOptions::default()).unwrap();
    assert!(!db.has(b"alpha", ReadOptions::default()).unwrap());
    assert!(db.has(b"beta", ReadOptions::default()).unwrap());
}

#[test]
fn a_write_batch_commits_as_one_unit() {
    let fs = Arc::new(MemoryFileSystem::new());
    let db = Db::open(fs, "/db", options()).unwrap();

    db.put(b"x", b"old", WriteOptions::default()).unwrap();

    let mut batch = WriteBatch::new();
    batch.put(b"x", b"new");
    batch.put(b"y", b"fresh");
    batch.delete(b"z");
    db.write(batch, WriteOptions::default()).unwrap();

    assert_eq!(db.get(b"x", ReadOptions::default()).unwrap(), Some(b"new".to_vec()));
    assert_eq!(db.get(b"y", ReadOptions::default()).unwrap(), Some(b"fresh".to_vec()));
    assert_eq!(db.get(b"z", ReadOptions::default()).unwrap(), None);
}

#[test]
fn snapshots_are_isolated_from_later_writes() {
    let fs = Arc::new(MemoryFileSystem::new());
    let db = Db::open(fs, "/db", options()).unwrap();

    db.put(b"k", b"v1", WriteOptions::default()).unwrap();
    let snapshot = db.snapshot();

    db.put(b"k", b"v2", WriteOptions::default()).unwrap();
    db.delete(b"other", WriteOptions::default()).unwrap();

    assert_eq!(db.get_at_snapshot(b"k", &snapshot, ReadOptions::default()).unwrap(), Some(b"v1".to_vec()));
    assert_eq!(db.get(b"k", ReadOptions::default()).unwrap(), Some(b"v2".to_vec()));

    let snapshot_view: Vec<_> = db.iterator_at_snapshot(&snapshot, ReadOptions::default()).unwrap().collect();
    assert_eq!(snapshot_view, vec![(b"k".to_vec(), b"v1".to_vec())]);
}

#[test]
fn iterator_returns_the_newest_value_per_key_in_order() {
    let fs = Arc::new(MemoryFileSystem::new());
    let db = Db::open(fs, "/db", options()).unwrap();

    for (key, value) in [("c", "3"), ("a", "1"), ("b", "2"), ("a", "1-updated")] {
        db.put(key.as_bytes(), value.as_bytes(), WriteOptions::default()).unwrap();
    }
    db.delete(b"c", WriteOptions::default()).unwrap();

    let all: Vec<_> = db.iterator(ReadOptions::default()).unwrap().collect();
    assert_eq!(
        all,
        vec![(b"a".to_vec(), b"1-updated".to_vec()), (b"b".to_vec(), b"2".to_vec())]
    );
}

#[test]
fn reopening_recovers_every_synced_write() {
    let fs = Arc::new(MemoryFileSystem::new());
    {
        let db = Db::open(fs.clone(), "/db", options()).unwrap();
        for i in 0..20 {
            db.put(format!("k{i:03}").as_bytes(), format!("v{i}").as_bytes(), WriteOptions { sync: true }).unwrap();
        }
    }

    let db = Db::open(fs, "/db", options()).unwrap();
    for i in 0..20 {
        assert_eq!(
            db.get(format!("k{i:03}").as_bytes(), ReadOptions::default()).unwrap(),
            Some(format!("v{i}").into_bytes())
        );
    }
}

#[test]
fn writes_past_the_buffer_size_flush_and_stay_readable() {
    let fs = Arc::new(MemoryFileSystem::new());
    let small_buffer = Options { write_buffer_size: 512, ..options() };
    let db = Db::open(fs, "/db", small_buffer).unwrap();

    for i in 0..300 {
        db.put(format!("row-{i:05}").as_bytes(), vec![b'x'; 64].as_slice(), WriteOptions::default()).unwrap();
    }

    wait_until(|| db.property("lsmdb.num-files-at-level0").as_deref() != Some("0"));

    for i in (0..300).step_by(37) {
        assert_eq!(
            db.get(format!("row-{i:05}").as_bytes(), ReadOptions::default()).unwrap(),
            Some(vec![b'x'; 64])
        );
    }
}

#[test]
fn compacting_the_full_range_keeps_reads_correct() {
    let fs = Arc::new(MemoryFileSystem::new());
    let small_buffer = Options { write_buffer_size: 512, ..options() };
    let db = Db::open(fs, "/db", small_buffer).unwrap();

    for i in 0..200 {
        db.put(format!("row-{i:05}").as_bytes(), b"value", WriteOptions::default()).unwrap();
    }
    for i in (0..200).step_by(3) {
        db.delete(format!("row-{i:05}").as_bytes(), WriteOptions::default()).unwrap();
    }

    wait_until(|| db.property("lsmdb.num-files-at-level0").as_deref() != Some("0"));
    db.compact_range(None, None).unwrap();

    for i in 0..200 {
        let key = format!("row-{i:05}");
        let expected = if i % 3 == 0 { None } else { Some(b"value".to_vec()) };
        assert_eq!(db.get(key.as_bytes(), ReadOptions::default()).unwrap(), expected, "key {key}");
    }
}

#[test]
fn destroy_leaves_nothing_behind() {
    let fs = Arc::new(MemoryFileSystem::new());
    {
        let db = Db::open(fs.clone(), "/db", options()).unwrap();
        db.put(b"k", b"v", WriteOptions::default()).unwrap();
    }

    lsmdb::db::destroy(&*fs, std::path::Path::new("/db")).unwrap();

    let reopened = Db::open(fs, "/db", options()).unwrap();
    assert_eq!(reopened.get(b"k", ReadOptions::default()).unwrap(), None);
}
