//! Shared test helpers.

use std::sync::Arc;

use tempfile::TempDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::storage::{Database, DbError};

/// A disk-backed database in a fresh temporary directory.
///
/// The directory is removed when the returned guard is dropped, so keep it
/// alive for as long as the database is used.
pub fn new_test_database(config: Config) -> Result<(Arc<Database>, TempDir), DbError> {
    let dir = tempfile::tempdir()?;
    let db = Database::open(dir.path().join("test.db"), config)?;
    Ok((db, dir))
}

/// Route `tracing` output to the test harness. `RUST_LOG` overrides the
/// default `memkv=debug` filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memkv=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
