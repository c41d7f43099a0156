//! Committed writes reach the log before the next transaction starts.

use crate::config::{Config, SyncPolicy};
use crate::e2e_tests::helpers::snapshot;
use crate::storage::{Database, Record};
use crate::testing::new_test_database;

#[test]
fn test_always_policy_survives_drop_without_close() {
    let config = Config {
        sync_policy: SyncPolicy::Always,
        ..Config::default()
    };
    let (db, _dir) = new_test_database(config).expect("open");
    let path = db.path().expect("disk backed").to_path_buf();
    db.put(Record::with_key(b"a", b"1".to_vec())).expect("put");
    db.update(|tx| {
        tx.set(Record::with_key(b"b", b"2".to_vec()))?;
        tx.delete(b"a")
    })
    .expect("update");
    let expected = snapshot(&db);
    drop(db);

    let reopened = Database::open(&path, Config::default()).expect("reopen");
    assert_eq!(snapshot(&reopened), expected);
    reopened.close().expect("close");
}

#[test]
fn test_every_policy_replays_the_same_state() {
    for policy in [SyncPolicy::Never, SyncPolicy::EverySecond, SyncPolicy::Always] {
        let config = Config {
            sync_policy: policy,
            ..Config::default()
        };
        let (db, _dir) = new_test_database(config).expect("open");
        let path = db.path().expect("disk backed").to_path_buf();
        for i in 0..50u32 {
            db.put(Record::with_key(&i.to_be_bytes(), vec![1])).expect("put");
        }
        let expected = snapshot(&db);
        db.close().expect("close");

        let reopened = Database::open(&path, config).expect("reopen");
        assert_eq!(snapshot(&reopened), expected, "{policy:?}");
        reopened.close().expect("close");
    }
}
