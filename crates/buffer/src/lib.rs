#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! Buffered persistence: a bounded per-table FIFO between the quality
//! pipeline and the local store, with configurable overflow handling and a
//! poison-sidecar fallback when the store itself cannot be written to
//! (§4.3).

mod poison;
mod ring_tracker;
mod table_buffer;

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use ringcore_config::BufferConfig;
use ringcore_model::{Sample, Table};
use ringcore_signal::{Signal, SignalReceiver};

pub use ring_tracker::RingTracker;

use table_buffer::{PushOutcome, TableBuffer};

const TABLES: [Table; 3] = [Table::Plc, Table::Attitude, Table::Monitoring];

/// Delay before the one flush retry §4.3 mandates ("on failure, retry once
/// after 100 ms, then on second failure move the batch to a poison sidecar
/// file"). This is a buffer-layer retry on top of the store's own internal
/// `SQLITE_BUSY` backoff, covering any flush failure, not just contention.
const FLUSH_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(100);

/// All errors the buffer writer can surface. Most store failures are
/// absorbed into a poisoned sidecar file rather than propagated, so this
/// enum is mostly populated by poison-write failures, which have no further
/// fallback.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Writing the poison sidecar file itself failed; the batch is lost.
    #[error("failed to write poison sidecar for table {table:?}: {source}")]
    PoisonWrite {
        /// The destination table whose batch could not be poisoned.
        table: Table,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of one flush attempt against a single table, returned for
/// observability by callers that drive the flush loop directly (mainly
/// tests).
#[derive(Debug, PartialEq)]
pub enum FlushOutcome {
    /// Nothing was resident to flush.
    Empty,
    /// The batch was written to the store.
    Flushed {
        /// Number of rows written.
        count: usize,
    },
    /// The store write failed (even after its own internal retry); the
    /// batch was written to a poison sidecar file instead.
    Poisoned {
        /// Number of rows poisoned.
        count: usize,
        /// Where the poison sidecar was written.
        path: PathBuf,
    },
}

/// The buffered writer sitting between the quality pipeline and the local
/// store. Owns one bounded FIFO per destination table and a [`RingTracker`]
/// that stamps `ring_number` on every sample before it is queued.
pub struct BufferWriter {
    config: BufferConfig,
    poison_dir: PathBuf,
    store: std::sync::Arc<ringcore_store::Store>,
    ring_tracker: Mutex<RingTracker>,
    tables: Mutex<HashMap<Table, TableBuffer>>,
    space_available: Notify,
    last_flush_ms: AtomicI64,
    overflow_dropped_oldest: AtomicU64,
    overflow_dropped_newest: AtomicU64,
}

const NO_FLUSH_YET: i64 = i64::MIN;

impl BufferWriter {
    /// Creates a writer with one empty FIFO per table.
    pub fn new(
        config: BufferConfig,
        ring_number_tag: impl Into<String>,
        store: std::sync::Arc<ringcore_store::Store>,
        poison_dir: impl Into<PathBuf>,
    ) -> Self {
        let tables = TABLES.into_iter().map(|t| (t, TableBuffer::new(config.max_size))).collect();
        Self {
            config,
            poison_dir: poison_dir.into(),
            store,
            ring_tracker: Mutex::new(RingTracker::new(ring_number_tag)),
            tables: Mutex::new(tables),
            space_available: Notify::new(),
            last_flush_ms: AtomicI64::new(NO_FLUSH_YET),
            overflow_dropped_oldest: AtomicU64::new(0),
            overflow_dropped_newest: AtomicU64::new(0),
        }
    }

    /// Resident record count per destination table, for `health()` (§6
    /// "buffer depth").
    pub fn depths(&self) -> HashMap<Table, usize> {
        let tables = self.tables.lock().expect("table buffer mutex poisoned");
        TABLES.into_iter().map(|t| (t, tables.get(&t).map(TableBuffer::len).unwrap_or(0))).collect()
    }

    /// Timestamp of the most recent flush attempt (successful or poisoned),
    /// for `health()` (§6 "last flush time"). `None` before the first flush.
    pub fn last_flush_ms(&self) -> Option<i64> {
        match self.last_flush_ms.load(Ordering::Relaxed) {
            NO_FLUSH_YET => None,
            ts => Some(ts),
        }
    }

    /// Total records discarded to make room under `OverflowPolicy::DropOldest`
    /// across every table (§4.3, seed scenario §8.4).
    pub fn overflow_dropped_oldest(&self) -> u64 {
        self.overflow_dropped_oldest.load(Ordering::Relaxed)
    }

    /// Total incoming records discarded under `OverflowPolicy::DropNewest`
    /// across every table (§4.3).
    pub fn overflow_dropped_newest(&self) -> u64 {
        self.overflow_dropped_newest.load(Ordering::Relaxed)
    }

    /// Stamps ring numbers and enqueues `samples`, grouped by destination
    /// table. Under `OverflowPolicy::Block`, waits for room to free rather
    /// than returning; every other policy returns immediately.
    pub async fn push(&self, mut samples: Vec<Sample>) {
        if samples.is_empty() {
            return;
        }
        {
            let mut tracker = self.ring_tracker.lock().expect("ring tracker mutex poisoned");
            tracker.stamp(&mut samples);
        }

        let mut by_table: HashMap<Table, VecDeque<Sample>> = HashMap::new();
        for sample in samples {
            by_table.entry(sample.table).or_default().push_back(sample);
        }

        for (table, group) in by_table {
            self.push_to_table(table, group).await;
        }
    }

    async fn push_to_table(&self, table: Table, mut group: VecDeque<Sample>) {
        loop {
            let mut dropped_oldest = 0usize;
            let mut dropped_newest = 0usize;
            {
                let mut tables = self.tables.lock().expect("table buffer mutex poisoned");
                let buf = tables.get_mut(&table).expect("every table is preallocated");
                while let Some(sample) = group.pop_front() {
                    match buf.push(sample, self.config.overflow_policy) {
                        PushOutcome::Appended => {}
                        PushOutcome::DroppedOldest => dropped_oldest += 1,
                        PushOutcome::DroppedNewest => dropped_newest += 1,
                        PushOutcome::Full(sample) => {
                            group.push_front(sample);
                            break;
                        }
                    }
                }
            }
            if dropped_oldest > 0 {
                let _ = self.overflow_dropped_oldest.fetch_add(dropped_oldest as u64, Ordering::Relaxed);
                tracing::warn!(table = table.as_str(), count = dropped_oldest, "dropped oldest resident records on overflow");
            }
            if dropped_newest > 0 {
                let _ = self.overflow_dropped_newest.fetch_add(dropped_newest as u64, Ordering::Relaxed);
                tracing::warn!(table = table.as_str(), count = dropped_newest, "dropped incoming records on overflow");
            }
            if group.is_empty() {
                return;
            }
            self.space_available.notified().await;
        }
    }

    /// Count of `ring_number` regressions observed across every source
    /// feeding this writer, for `health()` (§9 decision: a decreasing ring
    /// number is a hard, surfaced condition).
    pub fn ring_number_regressions(&self) -> u64 {
        self.ring_tracker.lock().expect("ring tracker mutex poisoned").regressions()
    }

    /// Returns the tables whose resident count has reached
    /// `config.flush_threshold` and should be flushed early.
    fn tables_over_threshold(&self) -> Vec<Table> {
        let tables = self.tables.lock().expect("table buffer mutex poisoned");
        TABLES.into_iter().filter(|t| tables.get(t).map(|b| b.len()).unwrap_or(0) >= self.config.flush_threshold).collect()
    }

    /// Drains and writes `table`'s resident batch to the store, falling
    /// back to a poison sidecar on write failure.
    pub async fn flush_table(&self, table: Table, now_ms: i64) -> Result<FlushOutcome, Error> {
        let batch = {
            let mut tables = self.tables.lock().expect("table buffer mutex poisoned");
            tables.get_mut(&table).expect("every table is preallocated").drain()
        };
        self.space_available.notify_waiters();

        if batch.is_empty() {
            return Ok(FlushOutcome::Empty);
        }

        let count = batch.len();
        self.last_flush_ms.store(now_ms, Ordering::Relaxed);

        let outcome = match self.store.insert_samples(table, &batch) {
            ok @ Ok(()) => ok,
            Err(first_err) => {
                tracing::warn!(table = table.as_str(), count, error = %first_err, "flush failed, retrying once after 100ms");
                tokio::time::sleep(FLUSH_RETRY_DELAY).await;
                self.store.insert_samples(table, &batch)
            }
        };

        match outcome {
            Ok(()) => {
                tracing::info!(table = table.as_str(), count, "flushed samples to store");
                Ok(FlushOutcome::Flushed { count })
            }
            Err(err) => {
                tracing::error!(table = table.as_str(), count, error = %err, "store write failed twice, poisoning batch");
                let path = poison::write(&self.poison_dir, table, now_ms, &batch).map_err(|source| Error::PoisonWrite { table, source })?;
                Ok(FlushOutcome::Poisoned { count, path })
            }
        }
    }

    /// Flushes every table that currently holds any resident records.
    pub async fn flush_all(&self, now_ms: i64) -> Result<Vec<(Table, FlushOutcome)>, Error> {
        let mut outcomes = Vec::new();
        for table in TABLES {
            let outcome = self.flush_table(table, now_ms).await?;
            if outcome != FlushOutcome::Empty {
                outcomes.push((table, outcome));
            }
        }
        Ok(outcomes)
    }

    /// Drives the writer until a [`Signal::Stop`] is received: enqueues
    /// incoming batches, flushes tables that cross `flush_threshold` as
    /// batches arrive, and flushes everything on each `flush_interval` tick
    /// and once more on shutdown.
    pub async fn run(&self, mut signal_receiver: SignalReceiver<Sample>, now_ms: impl Fn() -> i64) {
        loop {
            match signal_receiver.recv().await {
                Signal::Messages { messages } => {
                    self.push(messages).await;
                    for table in self.tables_over_threshold() {
                        if let Err(err) = self.flush_table(table, now_ms()).await {
                            tracing::error!(table = table.as_str(), error = %err, "threshold flush failed");
                        }
                    }
                }
                Signal::TimerTick { .. } => {
                    if let Err(err) = self.flush_all(now_ms()).await {
                        tracing::error!(error = %err, "interval flush failed");
                    }
                }
                Signal::Stop => {
                    if let Err(err) = self.flush_all(now_ms()).await {
                        tracing::error!(error = %err, "shutdown flush failed");
                    }
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use ringcore_config::OverflowPolicy;
    use ringcore_store::Store;

    use super::*;

    fn writer(policy: OverflowPolicy, max_size: usize) -> (tempfile::TempDir, BufferWriter) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let config = BufferConfig { max_size, flush_threshold: max_size, overflow_policy: policy, ..BufferConfig::default() };
        let writer = BufferWriter::new(config, "ring_number", store, dir.path().join("poison"));
        (dir, writer)
    }

    fn sample(table: Table, tag: &str, ts: i64, v: f64) -> Sample {
        Sample::new("src-1", tag, table, ts, v)
    }

    #[tokio::test]
    async fn push_then_flush_writes_to_store() {
        let (_dir, writer) = writer(OverflowPolicy::DropOldest, 10);
        writer.push(vec![sample(Table::Plc, "ring_number", 0, 1.0), sample(Table::Plc, "thrust_total", 0, 500.0)]).await;

        let outcome = writer.flush_table(Table::Plc, 1_000).await.unwrap();
        assert_eq!(outcome, FlushOutcome::Flushed { count: 2 });

        let rows = writer.store.samples_in_range(Table::Plc, 0, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].ring_number, Some(1), "ring_number tag sample stamps the batch including itself");
    }

    #[tokio::test]
    async fn flush_on_empty_table_is_noop() {
        let (_dir, writer) = writer(OverflowPolicy::DropOldest, 10);
        assert_eq!(writer.flush_table(Table::Plc, 0).await.unwrap(), FlushOutcome::Empty);
    }

    #[tokio::test]
    async fn drop_oldest_keeps_buffer_bounded() {
        let (_dir, writer) = writer(OverflowPolicy::DropOldest, 2);
        writer.push(vec![sample(Table::Plc, "a", 0, 1.0), sample(Table::Plc, "a", 1, 2.0), sample(Table::Plc, "a", 2, 3.0)]).await;

        let outcome = writer.flush_table(Table::Plc, 0).await.unwrap();
        assert_eq!(outcome, FlushOutcome::Flushed { count: 2 });
        let rows = writer.store.samples_in_range(Table::Plc, 0, 10).unwrap();
        assert_eq!(rows.iter().map(|s| s.value).collect::<Vec<_>>(), vec![2.0, 3.0]);
    }

    #[tokio::test]
    async fn overflow_counters_are_observable_after_drop_oldest() {
        // Seed scenario §8.4: max_size=3, push A,B,C,D with no flush; B,C,D
        // persist and overflow_dropped_oldest=1.
        let (_dir, writer) = writer(OverflowPolicy::DropOldest, 3);
        writer
            .push(vec![
                sample(Table::Plc, "a", 0, 1.0),
                sample(Table::Plc, "a", 1, 2.0),
                sample(Table::Plc, "a", 2, 3.0),
                sample(Table::Plc, "a", 3, 4.0),
            ])
            .await;

        assert_eq!(writer.overflow_dropped_oldest(), 1);
        assert_eq!(writer.overflow_dropped_newest(), 0);

        let outcome = writer.flush_table(Table::Plc, 0).await.unwrap();
        assert_eq!(outcome, FlushOutcome::Flushed { count: 3 });
        let rows = writer.store.samples_in_range(Table::Plc, 0, 10).unwrap();
        assert_eq!(rows.iter().map(|s| s.value).collect::<Vec<_>>(), vec![2.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn overflow_counters_track_drop_newest() {
        let (_dir, writer) = writer(OverflowPolicy::DropNewest, 1);
        writer.push(vec![sample(Table::Plc, "a", 0, 1.0), sample(Table::Plc, "a", 1, 2.0)]).await;

        assert_eq!(writer.overflow_dropped_newest(), 1);
        assert_eq!(writer.overflow_dropped_oldest(), 0);
    }

    #[tokio::test]
    async fn block_policy_unblocks_after_flush() {
        let (_dir, writer) = writer(OverflowPolicy::Block, 1);
        let writer = Arc::new(writer);

        writer.push(vec![sample(Table::Plc, "a", 0, 1.0)]).await;

        let blocked_push = {
            let writer = writer.clone();
            tokio::spawn(async move {
                writer.push(vec![sample(Table::Plc, "a", 1, 2.0)]).await;
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!blocked_push.is_finished(), "push should still be blocked on a full buffer");

        let _ = writer.flush_table(Table::Plc, 0).await.unwrap();
        blocked_push.await.unwrap();

        let rows = writer.store.samples_in_range(Table::Plc, 0, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 2.0);
    }

    #[tokio::test]
    async fn tables_over_threshold_reports_only_full_tables() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let config = BufferConfig { max_size: 10, flush_threshold: 1, ..BufferConfig::default() };
        let writer = BufferWriter::new(config, "ring_number", store, dir.path().join("poison"));

        writer.push(vec![sample(Table::Plc, "a", 0, 1.0)]).await;
        assert!(writer.tables_over_threshold().contains(&Table::Plc));
        assert!(!writer.tables_over_threshold().contains(&Table::Attitude));
    }
}
