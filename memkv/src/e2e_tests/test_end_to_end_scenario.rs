//! A full round trip through the public surface.

use crate::proxy::{DbProxy, KvClient};

#[test]
fn test_user_versions() {
    crate::testing::init_tracing();
    let proxy = DbProxy::new().expect("open proxy");
    proxy.put(b"user:1", b"alice".to_vec(), 1).expect("put");
    proxy.put(b"user:1", b"alice2".to_vec(), 5).expect("put");

    let at_3 = proxy.get(b"user:1", 3).expect("get").expect("present");
    assert_eq!(at_3.value, b"alice");
    let at_10 = proxy.get(b"user:1", 10).expect("get").expect("present");
    assert_eq!(at_10.value, b"alice2");

    let scanned = proxy
        .scan(b"user:0", b"user:9", 10, 10, false, None)
        .expect("scan");
    assert_eq!(scanned.len(), 1);
    assert_eq!(scanned[0].raw_key, b"user:1");
    assert_eq!(scanned[0].value, b"alice2");

    proxy.close().expect("close");
}
