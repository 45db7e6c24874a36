//! Embedded single-file persistence (§4.4 "Local Store").
//!
//! Backed by a single SQLite database in WAL mode, written through one
//! `Mutex`-serialized connection. Callers (the buffer writer, the aligner,
//! the root facade) never see `rusqlite` directly — everything crosses this
//! boundary as [`ringcore_model`] types.

mod migrations;
mod ring_summary;
mod samples;

use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use rusqlite::Connection;

use ringcore_config::StoreConfig;
use ringcore_model::{RingSummary, Sample, Table};

pub use ring_summary::RingSummaryFilter;

/// Delays between retries of a write that hit `SQLITE_BUSY` (§7
/// "Storage-transient: bounded retry, typically 3 attempts with short
/// backoff, before surfacing the error upward").
const BUSY_RETRY_DELAYS_MS: [u64; 3] = [50, 100, 200];

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to serialize row for storage: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("row in database is corrupt: {reason}")]
    CorruptRow { reason: String },

    #[error("write retries exhausted after repeated SQLITE_BUSY: {0}")]
    RetriesExhausted(rusqlite::Error),
}

impl Error {
    /// True for errors the store itself already retried and gave up on, or
    /// that are inherently transient (lock contention). Used by the buffer
    /// writer to decide between re-queuing a batch and poisoning it (§4.3).
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::RetriesExhausted(_))
            || matches!(self, Error::Sqlite(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::DatabaseBusy || e.code == rusqlite::ErrorCode::DatabaseLocked)
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::DatabaseBusy || e.code == rusqlite::ErrorCode::DatabaseLocked)
}

/// The embedded database. One per process; cheap to clone the handle out to
/// collaborators since the connection itself is behind a [`Mutex`].
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Opens (creating if absent) the database at `config.path`, enables WAL
    /// journaling, and brings the schema up to date.
    pub fn open(config: &StoreConfig) -> Result<Self, Error> {
        if let Some(parent) = std::path::Path::new(&config.path).parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }

        let mut conn = Connection::open(&config.path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::apply(&mut conn)?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Opens an in-memory database, used by tests and by embedders that
    /// don't need durability across restarts.
    pub fn open_in_memory() -> Result<Self, Error> {
        let mut conn = Connection::open_in_memory()?;
        migrations::apply(&mut conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Inserts a batch of samples into `table` inside one transaction,
    /// retrying on `SQLITE_BUSY` per the store's bounded-retry policy.
    pub fn insert_samples(&self, table: Table, samples: &[Sample]) -> Result<(), Error> {
        self.with_retry(|conn| samples::insert_samples(conn, table, samples))
    }

    /// Inserts into more than one table inside a single transaction,
    /// retrying the whole transaction on `SQLITE_BUSY` (§6
    /// `submit_manual_logs`: "atomic insert into the corresponding
    /// tables"). Tables paired with an empty slice are skipped.
    pub fn insert_samples_multi_table(&self, batches: &[(Table, &[Sample])]) -> Result<(), Error> {
        self.with_retry(|conn| samples::insert_samples_multi_table(conn, batches))
    }

    /// Returns every sample in `table` with `start_ts <= timestamp_ms < end_ts`.
    pub fn samples_in_range(&self, table: Table, start_ts: i64, end_ts: i64) -> Result<Vec<Sample>, Error> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        samples::samples_in_range(&conn, table, start_ts, end_ts)
    }

    /// Returns the highest `ring_number` stamped on any row of `table`.
    pub fn max_ring_number(&self, table: Table) -> Result<Option<i64>, Error> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        samples::max_ring_number(&conn, table)
    }

    /// Returns the earliest timestamp at which `ring_number` was observed in
    /// `table`.
    pub fn min_timestamp_for_ring(&self, table: Table, ring_number: i64) -> Result<Option<i64>, Error> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        samples::min_timestamp_for_ring(&conn, table, ring_number)
    }

    /// Returns the number of rows in `table` within `[start_ts, end_ts)`.
    pub fn count_in_range(&self, table: Table, start_ts: i64, end_ts: i64) -> Result<u64, Error> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        samples::count_in_range(&conn, table, start_ts, end_ts)
    }

    /// Inserts or, if `summary.ring_number` already exists, updates a ring
    /// summary row in place (§4.5 "re-running aggregation over an unchanged
    /// window produces the same summary"; grace-window re-updates rely on
    /// this being an upsert, not an append).
    pub fn upsert_ring_summary(&self, summary: &RingSummary) -> Result<(), Error> {
        self.with_retry(|conn| ring_summary::upsert(conn, summary))
    }

    /// Fetches a single ring summary by number.
    pub fn get_ring_summary(&self, ring_number: i64) -> Result<Option<RingSummary>, Error> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        ring_summary::get(&conn, ring_number)
    }

    /// Returns the highest `ring_number` that already has a summary row,
    /// the aligner's starting point for candidate selection (§4.5 step 1).
    pub fn max_summarized_ring(&self) -> Result<Option<i64>, Error> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        ring_summary::max_summarized_ring(&conn)
    }

    /// Lists ring summaries matching `filter`, ordered by `ring_number`
    /// ascending (§6 `list_rings`).
    pub fn list_ring_summaries(&self, filter: &RingSummaryFilter) -> Result<Vec<RingSummary>, Error> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        ring_summary::list(&conn, filter)
    }

    fn with_retry<T>(&self, mut op: impl FnMut(&mut Connection) -> Result<T, Error>) -> Result<T, Error> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let mut last_busy = None;
        for delay_ms in BUSY_RETRY_DELAYS_MS {
            match op(&mut conn) {
                Ok(value) => return Ok(value),
                Err(Error::Sqlite(e)) if is_busy(&e) => {
                    tracing::warn!(delay_ms, "store write hit SQLITE_BUSY, retrying");
                    last_busy = Some(e);
                    thread::sleep(Duration::from_millis(delay_ms));
                }
                Err(other) => return Err(other),
            }
        }
        match op(&mut conn) {
            Ok(value) => Ok(value),
            Err(Error::Sqlite(e)) if is_busy(&e) => Err(Error::RetriesExhausted(last_busy.unwrap_or(e))),
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn open_in_memory_applies_migrations() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.max_ring_number(Table::Plc).unwrap(), None);
        assert_eq!(store.max_summarized_ring().unwrap(), None);
    }

    #[test]
    fn open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("edge.db");
        let store = Store::open(&StoreConfig { path: path.to_string_lossy().to_string(), retention_days: Default::default() }).unwrap();
        assert!(path.exists());
        drop(store);
    }
}
