//! Secondary indexes always mirror the primary tree.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::Config;
use crate::e2e_tests::helpers::{expected_index_keys, index_keys};
use crate::storage::{
    Database, DbError, LessFn, Record, compose, desc, index_commit_ts, index_raw_key,
    index_raw_key_len, less,
};

struct Definition {
    name: &'static str,
    pattern: &'static str,
    less: LessFn,
}

fn definitions() -> Vec<Definition> {
    vec![
        Definition {
            name: "users_by_ts",
            pattern: "user:*",
            less: less(index_commit_ts),
        },
        Definition {
            name: "all_by_raw_desc",
            pattern: "*",
            less: desc(less(index_raw_key)),
        },
        Definition {
            name: "items_by_len_then_raw",
            pattern: "item:?",
            less: compose(vec![less(index_raw_key_len), less(index_raw_key)])
                .expect("non-empty"),
        },
    ]
}

fn check(db: &Database, defs: &[Definition], step: usize) {
    for def in defs {
        assert_eq!(
            index_keys(db, def.name),
            expected_index_keys(db, def.pattern, &def.less),
            "index {} diverged at step {step}",
            def.name
        );
    }
}

#[test]
fn test_random_mutations_keep_indexes_consistent() {
    let db = Database::open_in_memory(Config::default());
    let defs = definitions();
    for def in &defs {
        db.create_index(def.name, def.pattern, vec![def.less.clone()])
            .expect("create index");
    }

    let mut rng = StdRng::seed_from_u64(0xdb);
    let mut live: Vec<Vec<u8>> = Vec::new();
    for step in 0..600 {
        let commit = rng.random_bool(0.8);
        let result: Result<(), DbError> = db.update(|tx| {
            for _ in 0..rng.random_range(1..5) {
                if live.is_empty() || rng.random_bool(0.6) {
                    let prefix = ["user:", "item:", "misc:"][rng.random_range(0..3)];
                    let raw = format!("{prefix}{}", rng.random_range(0..30));
                    let record = Record::new(raw.as_bytes(), Vec::new(), rng.random_range(0..10));
                    tx.set(record)?;
                } else {
                    let key = live.swap_remove(rng.random_range(0..live.len()));
                    match tx.delete(&key) {
                        Ok(_) | Err(DbError::NotFound) => {}
                        Err(e) => return Err(e),
                    }
                }
            }
            if commit { Ok(()) } else { Err(DbError::Invalid) }
        });
        assert!(result.is_ok() || !commit);
        live = db.range(b"", b"").expect("range").iter().map(|r| r.key.clone()).collect();
        check(&db, &defs, step);
    }
}

#[test]
fn test_index_created_after_data_and_after_delete_all() {
    let db = Database::open_in_memory(Config::default());
    for i in 0..20u64 {
        db.put(Record::new(format!("user:{i}").as_bytes(), Vec::new(), 20 - i))
            .expect("put");
    }
    let defs = definitions();
    for def in &defs {
        db.create_index(def.name, def.pattern, vec![def.less.clone()])
            .expect("create index");
    }
    check(&db, &defs, 0);

    db.update(|tx| {
        tx.delete_all()?;
        tx.set(Record::new(b"item:1", Vec::new(), 1))?;
        tx.set(Record::new(b"user:1", Vec::new(), 1))?;
        Ok(())
    })
    .expect("update");
    check(&db, &defs, 1);
}
