//! Scans return the newest visible version per key, within bounds.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::proxy::{KvClient, LocalProxy};

fn key(i: u32) -> Vec<u8> {
    format!("k{i:02}").into_bytes()
}

#[test]
fn test_random_scans_match_model() {
    let proxy = LocalProxy::open_in_memory().expect("open proxy");
    let mut rng = StdRng::seed_from_u64(99);
    // raw key -> commit_ts -> value
    let mut model: BTreeMap<Vec<u8>, BTreeMap<u64, Vec<u8>>> = BTreeMap::new();
    for _ in 0..400 {
        let raw = key(rng.random_range(0..50));
        let ts = rng.random_range(1..100);
        let value = rng.random::<u64>().to_be_bytes().to_vec();
        proxy.put(&raw, value.clone(), ts).expect("put");
        model.entry(raw).or_default().insert(ts, value);
    }

    for _ in 0..300 {
        let a = rng.random_range(0..55);
        let b = rng.random_range(0..55);
        let (start, end) = (key(a.min(b)), key(a.max(b)));
        let ts = rng.random_range(0..110);
        let limit = rng.random_range(0..20);
        let desc = rng.random_bool(0.5);

        let got = KvClient::scan(&proxy, &start, &end, ts, limit, desc, None).expect("scan");
        assert!(got.len() <= limit);
        for record in &got {
            assert!(start <= record.raw_key && record.raw_key <= end);
            assert!(record.commit_ts < ts);
        }

        let mut expected: Vec<(Vec<u8>, u64)> = model
            .range(start.clone()..=end.clone())
            .filter_map(|(raw, versions)| {
                versions
                    .range(..ts)
                    .next_back()
                    .map(|(commit_ts, _)| (raw.clone(), *commit_ts))
            })
            .collect();
        if desc {
            expected.reverse();
        }
        expected.truncate(limit);
        let got: Vec<(Vec<u8>, u64)> = got.iter().map(|r| (r.raw_key.clone(), r.commit_ts)).collect();
        assert_eq!(got, expected, "start={start:?} end={end:?} ts={ts} limit={limit} desc={desc}");
    }
}
