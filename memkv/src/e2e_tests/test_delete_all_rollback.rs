//! A failed update that wiped the database leaves it untouched.

use crate::config::Config;
use crate::e2e_tests::helpers::{index_keys, snapshot};
use crate::storage::{Database, DbError, Record, index_raw_key, less};
use crate::testing::new_test_database;

fn populate(db: &Database) {
    db.create_index("raw", "user:*", vec![less(index_raw_key)])
        .expect("create index");
    for i in 0..50u64 {
        let raw = if i % 2 == 0 { format!("user:{i}") } else { format!("item:{i}") };
        db.put(Record::new(raw.as_bytes(), i.to_be_bytes().to_vec(), i))
            .expect("put");
    }
}

#[test]
fn test_failed_update_restores_data_and_indexes() {
    let db = Database::open_in_memory(Config::default());
    populate(&db);
    let before = (snapshot(&db), index_keys(&db, "raw"));

    let result: Result<(), DbError> = db.update(|tx| {
        tx.delete(&Record::new(b"user:0", Vec::new(), 0).key)?;
        tx.delete_all()?;
        tx.set(Record::new(b"user:999", Vec::new(), 1))?;
        tx.delete_all()?;
        Err(DbError::Invalid)
    });
    assert!(matches!(result, Err(DbError::Invalid)));
    assert_eq!((snapshot(&db), index_keys(&db, "raw")), before);
}

#[test]
fn test_committed_delete_all_survives_reopen() {
    let (db, dir) = new_test_database(Config::default()).expect("open");
    populate(&db);
    db.update(|tx| {
        tx.delete_all()?;
        tx.set(Record::new(b"user:fresh", b"v".to_vec(), 1))
    })
    .expect("update");
    let path = db.path().expect("disk backed").to_path_buf();
    db.close().expect("close");

    let db = Database::open(&path, Config::default()).expect("reopen");
    let records = db.range(b"", b"").expect("range");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].raw_key, b"user:fresh");
    db.close().expect("close");
    drop(dir);
}
