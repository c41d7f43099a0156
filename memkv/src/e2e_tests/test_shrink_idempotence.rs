//! Shrinking rewrites the log without losing or duplicating records.

use std::fs::File;
use std::sync::Arc;
use std::thread;

use crate::config::Config;
use crate::e2e_tests::helpers::snapshot;
use crate::storage::{Database, Record};
use crate::testing::{init_tracing, new_test_database};

fn manual_shrink_config() -> Config {
    Config {
        auto_shrink_disabled: true,
        ..Config::default()
    }
}

fn load_file(path: &std::path::Path) -> Arc<Database> {
    let copy = Database::open_in_memory(Config::default());
    copy.load(File::open(path).expect("open log")).expect("load log");
    copy
}

#[test]
fn test_shrink_preserves_items() {
    init_tracing();
    let (db, _dir) = new_test_database(manual_shrink_config()).expect("open");
    for round in 0..5u8 {
        for i in 0..300u32 {
            db.put(Record::with_key(format!("key{i:04}").as_bytes(), vec![round]))
                .expect("put");
        }
    }
    for i in (0..300u32).step_by(3) {
        db.delete(format!("key{i:04}").as_bytes()).expect("delete");
    }
    let path = db.path().expect("disk backed").to_path_buf();
    let before = snapshot(&db);
    let grown = std::fs::metadata(&path).expect("metadata").len();

    db.shrink().expect("shrink");
    assert!(std::fs::metadata(&path).expect("metadata").len() < grown);
    assert_eq!(snapshot(&load_file(&path)), before);

    // A second shrink has nothing left to drop.
    let size = std::fs::metadata(&path).expect("metadata").len();
    db.shrink().expect("shrink again");
    assert_eq!(std::fs::metadata(&path).expect("metadata").len(), size);
    db.close().expect("close");
}

#[test]
fn test_shrink_with_concurrent_writes() {
    let (db, _dir) = new_test_database(manual_shrink_config()).expect("open");
    for i in 0..5000u32 {
        db.put(Record::with_key(format!("base{i:05}").as_bytes(), vec![0; 64]))
            .expect("put");
    }
    let path = db.path().expect("disk backed").to_path_buf();

    let writer = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            for i in 0..500u32 {
                db.put(Record::with_key(format!("live{i:05}").as_bytes(), vec![1]))
                    .expect("put");
                if i % 5 == 0 {
                    db.delete(format!("base{i:05}").as_bytes()).expect("delete");
                }
            }
        })
    };
    db.shrink().expect("shrink");
    writer.join().expect("writer thread");

    let live = snapshot(&db);
    assert_eq!(live.len(), 5000 + 500 - 100);
    assert_eq!(snapshot(&load_file(&path)), live);

    db.close().expect("close");
    let reopened = Database::open(&path, Config::default()).expect("reopen");
    assert_eq!(snapshot(&reopened), live);
    reopened.close().expect("close");
}
