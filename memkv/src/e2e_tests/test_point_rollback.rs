//! Rolling back undoes individual sets and deletes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::Config;
use crate::e2e_tests::helpers::snapshot;
use crate::storage::{Database, DbError, Record};

#[test]
fn test_random_mutations_roll_back() {
    let db = Database::open_in_memory(Config::default());
    let mut rng = StdRng::seed_from_u64(42);
    for i in 0..100u64 {
        db.put(Record::with_key(format!("k{i:03}").as_bytes(), vec![1]))
            .expect("put");
    }

    for round in 0..20u8 {
        let before = snapshot(&db);
        let result: Result<(), DbError> = db.update(|tx| {
            for _ in 0..50 {
                let key = format!("k{:03}", rng.random_range(0..150));
                if rng.random_bool(0.5) {
                    tx.set(Record::with_key(key.as_bytes(), vec![round]))?;
                } else {
                    match tx.delete(key.as_bytes()) {
                        Ok(_) | Err(DbError::NotFound) => {}
                        Err(e) => return Err(e),
                    }
                }
            }
            Err(DbError::Invalid)
        });
        assert!(matches!(result, Err(DbError::Invalid)));
        assert_eq!(snapshot(&db), before, "round {round}");
    }
}
