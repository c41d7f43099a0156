//! A saved snapshot restores into an in-memory database.

use crate::config::Config;
use crate::e2e_tests::helpers::snapshot;
use crate::proxy::LocalProxy;
use crate::storage::{Database, DbError};
use crate::testing::new_test_database;

#[test]
fn test_disk_snapshot_restores_in_memory() {
    let (db, _dir) = new_test_database(Config::default()).expect("open");
    let proxy = LocalProxy::new(db).expect("proxy");
    for ts in 1..=3u64 {
        proxy.put(b"user:1", format!("v{ts}").into_bytes(), ts).expect("put");
        proxy.put(b"user:2", format!("w{ts}").into_bytes(), ts).expect("put");
    }

    let mut saved = Vec::new();
    proxy.database().save(&mut saved).expect("save");

    let restored = Database::open_in_memory(Config::default());
    restored.load(saved.as_slice()).expect("load");
    assert_eq!(snapshot(&restored), snapshot(proxy.database()));

    // The restored copy serves versioned reads once wrapped again.
    let restored = LocalProxy::new(restored).expect("proxy");
    let record = restored.get_by_raw_key(b"user:2", 2).expect("get").expect("present");
    assert_eq!(record.value, b"w2");

    assert!(matches!(
        proxy.database().load(saved.as_slice()),
        Err(DbError::PersistenceActive)
    ));
    proxy.close().expect("close");
}
