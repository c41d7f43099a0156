//! Background maintenance for disk-backed databases.
//!
//! Once a second the thread fsyncs the log under
//! [`SyncPolicy::EverySecond`](crate::config::SyncPolicy::EverySecond) and
//! shrinks it once it has grown past the configured threshold.
//!
//! # Design
//!
//! The thread holds a `Weak<Database>`:
//! - The `Database` owns the stop channel
//! - Dropping the database disconnects the channel and the thread exits
//! - Closing the database sends a stop signal and joins the thread

use std::sync::Weak;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::storage::database::Database;
use crate::storage::error::DbError;

/// Time between two maintenance passes.
const TICK: Duration = Duration::from_secs(1);

/// Handle to a running background thread.
#[derive(Debug)]
pub(crate) struct Background {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Background {
    /// Signal the thread and wait for it to exit.
    ///
    /// Does not wait when called from the background thread itself, which
    /// happens if it held the last reference to the database.
    pub(crate) fn stop(self) {
        let _ = self.stop.send(());
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            tracing::error!("background thread panicked");
        }
    }
}

/// Start the maintenance thread for `database`.
pub(crate) fn spawn(database: Weak<Database>) -> Result<Background, DbError> {
    let (stop, signal) = mpsc::channel();
    let handle = thread::Builder::new()
        .name("memkv-background".to_string())
        .spawn(move || run(&database, &signal))?;
    Ok(Background { stop, handle })
}

fn run(database: &Weak<Database>, signal: &mpsc::Receiver<()>) {
    let mut synced_flushes = 0;
    loop {
        match signal.recv_timeout(TICK) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        let Some(db) = database.upgrade() else {
            break;
        };
        match db.background_tick(&mut synced_flushes) {
            Ok(false) => {}
            Ok(true) => match db.shrink() {
                Ok(()) | Err(DbError::ShrinkInProcess) => {}
                Err(DbError::DatabaseClosed) => break,
                Err(e) => tracing::warn!("automatic shrink failed: {e}"),
            },
            Err(DbError::DatabaseClosed) => break,
            Err(e) => tracing::error!("background maintenance failed: {e}"),
        }
    }
    tracing::debug!("background thread exiting");
}
