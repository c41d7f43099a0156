//! Versioned keys sort by raw key, then newest version first.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::codec::{decode_bytes, encode_bytes, mvcc_decode, mvcc_encode};

fn random_key(rng: &mut StdRng) -> Vec<u8> {
    let len = rng.random_range(0..20);
    // A tiny alphabet with zero bytes produces many shared prefixes.
    (0..len).map(|_| [0u8, 1, b'a', 0xff][rng.random_range(0..4)]).collect()
}

#[test]
fn test_mvcc_order_matches_logical_order() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..5000 {
        let k1 = random_key(&mut rng);
        let k2 = if rng.random_bool(0.3) { k1.clone() } else { random_key(&mut rng) };
        let v1 = rng.random_range(0..8u64);
        let v2 = if rng.random_bool(0.1) { u64::MAX } else { rng.random_range(0..8u64) };

        let encoded_less = mvcc_encode(&k1, v1) < mvcc_encode(&k2, v2);
        let logical_less = k1 < k2 || (k1 == k2 && v1 > v2);
        assert_eq!(encoded_less, logical_less, "k1={k1:?} v1={v1} k2={k2:?} v2={v2}");
    }
}

#[test]
fn test_random_keys_round_trip() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..1000 {
        let key = random_key(&mut rng);
        let version = rng.random::<u64>();

        let encoded = encode_bytes(&key);
        let (rest, decoded) = decode_bytes(&encoded).expect("decode bytes");
        assert!(rest.is_empty());
        assert_eq!(decoded, key);

        let (raw, ts) = mvcc_decode(&mvcc_encode(&key, version)).expect("decode mvcc");
        assert_eq!((raw, ts), (key, version));
    }
}
