//! Reads see the newest version committed at or before their timestamp.

use crate::proxy::{DbProxy, KvClient};

#[test]
fn test_versions_by_timestamp() {
    let proxy = DbProxy::new().expect("open proxy");
    proxy.put(b"k", b"A".to_vec(), 10).expect("put A");
    proxy.put(b"k", b"B".to_vec(), 20).expect("put B");

    let read = |ts| proxy.get(b"k", ts).expect("get").map(|r| r.value.clone());
    assert_eq!(read(15), Some(b"A".to_vec()));
    assert_eq!(read(25), Some(b"B".to_vec()));
    assert_eq!(read(5), None);
}

#[test]
fn test_later_write_does_not_change_earlier_reads() {
    let proxy = DbProxy::new().expect("open proxy");
    proxy.put(b"k", b"v1".to_vec(), 1).expect("put");
    let before = proxy.get(b"k", 50).expect("get").expect("present");

    proxy.put(b"k", b"v100".to_vec(), 100).expect("put");
    let after = proxy.get(b"k", 50).expect("get").expect("present");
    assert_eq!(before.value, after.value);
    assert_eq!(proxy.get(b"k", 100).expect("get").expect("present").value, b"v100");
}

#[test]
fn test_deleting_a_version_exposes_the_previous_one() {
    let proxy = DbProxy::new().expect("open proxy");
    proxy.put(b"k", b"old".to_vec(), 1).expect("put");
    proxy.put(b"k", b"new".to_vec(), 2).expect("put");
    proxy.delete(b"k", 2).expect("delete");
    assert_eq!(proxy.get(b"k", 10).expect("get").expect("present").value, b"old");
}
