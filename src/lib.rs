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

//! The root facade (§6 "Exposed to external collaborators"): the only
//! surface an operator console, a cloud-sync process, or any other
//! out-of-scope collaborator talks to. Everything else in this workspace —
//! collectors, the quality pipeline, the buffer writer, the local store, the
//! ring aligner, the wiring that runs them — is an implementation detail
//! behind [`Ringcore`].

use std::collections::HashMap;
use std::path::PathBuf;

pub use ringcore_collector::{AsyncCollector, CollectorHealth};
pub use ringcore_config::{ConfigHandle, PipelineConfig};
pub use ringcore_engine::{CollectorHandle, EngineHealth};
pub use ringcore_model::{DataCompletenessFlag, QualityFlag, RingSummary, Sample, Table};
pub use ringcore_store::RingSummaryFilter;
pub use ringcore_task::labels::ProcessLabels;

/// Errors surfaced at the root facade.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Starting or running the engine failed.
    #[error("engine error: {0}")]
    Engine(#[from] ringcore_engine::Error),
    /// A store read or write failed.
    #[error("store error: {0}")]
    Store(#[from] ringcore_store::Error),
}

/// One submitted row paired with whether the quality pipeline's in-band
/// checks accepted it (§6 `submit_manual_logs`: "returns per-row
/// acceptance/rejection").
pub type ManualLogOutcome = (Sample, bool);

/// Outcome of one [`Ringcore::submit_manual_logs`] call, grouped by
/// destination table in submission order.
#[derive(Debug, Default)]
pub struct ManualSubmissionResult {
    /// Per-row outcomes for `plc_logs`.
    pub plc: Vec<ManualLogOutcome>,
    /// Per-row outcomes for `attitude_logs`.
    pub attitude: Vec<ManualLogOutcome>,
    /// Per-row outcomes for `monitoring_logs`.
    pub monitoring: Vec<ManualLogOutcome>,
}

impl ManualSubmissionResult {
    /// Total rows accepted and persisted across all three tables.
    pub fn accepted_count(&self) -> usize {
        [&self.plc, &self.attitude, &self.monitoring].iter().flat_map(|rows| rows.iter()).filter(|(_, accepted)| *accepted).count()
    }

    /// Total rows rejected by threshold, reasonableness, or cross-tag checks.
    pub fn rejected_count(&self) -> usize {
        [&self.plc, &self.attitude, &self.monitoring].iter().flat_map(|rows| rows.iter()).filter(|(_, accepted)| !*accepted).count()
    }
}

/// A ring summary, optionally annotated with raw sample counts per table
/// (§6 `get_ring`: "optionally annotated with counts of underlying raw
/// samples per table").
#[derive(Debug, Clone)]
pub struct RingDetail {
    /// The ring summary row itself.
    pub summary: RingSummary,
    /// Raw sample counts per table over `[summary.start_ts, summary.end_ts)`,
    /// present only when the caller asked for them.
    pub raw_counts: Option<HashMap<Table, u64>>,
}

const RAW_COUNT_TABLES: [Table; 3] = [Table::Plc, Table::Attitude, Table::Monitoring];

fn accepted_rows(outcomes: &[ManualLogOutcome]) -> Vec<Sample> {
    outcomes.iter().filter(|(_, accepted)| *accepted).map(|(sample, _)| sample.clone()).collect()
}

/// The running edge-node instance. Wraps [`ringcore_engine::Engine`] and
/// exposes exactly the external surface named in §6; callers never reach
/// past this into the pipeline internals.
pub struct Ringcore {
    engine: ringcore_engine::Engine,
}

impl Ringcore {
    /// Opens the store, starts every collector, the buffer writer, and the
    /// ring aligner, and returns the running facade.
    pub async fn start(config: ConfigHandle, process_labels: ProcessLabels, collectors: Vec<CollectorHandle>, poison_dir: impl Into<PathBuf>) -> Result<Self, Error> {
        Ok(Self { engine: ringcore_engine::Engine::start(config, process_labels, collectors, poison_dir).await? })
    }

    /// Lists ring summaries matching `filter`, ordered by `ring_number`
    /// ascending.
    pub fn list_rings(&self, filter: &RingSummaryFilter) -> Result<Vec<RingSummary>, Error> {
        Ok(self.engine.store().list_ring_summaries(filter)?)
    }

    /// Fetches one ring summary, optionally annotated with raw per-table
    /// sample counts over its window. Returns `Ok(None)` if no summary
    /// exists yet for `ring_number`.
    pub fn get_ring(&self, ring_number: i64, include_raw_counts: bool) -> Result<Option<RingDetail>, Error> {
        let Some(summary) = self.engine.store().get_ring_summary(ring_number)? else {
            return Ok(None);
        };

        let raw_counts = if include_raw_counts {
            let mut counts = HashMap::with_capacity(RAW_COUNT_TABLES.len());
            for table in RAW_COUNT_TABLES {
                let count = self.engine.store().count_in_range(table, summary.start_ts, summary.end_ts)?;
                let _ = counts.insert(table, count);
            }
            Some(counts)
        } else {
            None
        };

        Ok(Some(RingDetail { summary, raw_counts }))
    }

    /// Validates and persists manually submitted rows for all three tables
    /// in one call (§6 `submit_manual_logs`): runs threshold validation,
    /// physical reasonableness, and calibration, but not interpolation
    /// (§4.2's per-tag rolling state belongs to a streaming collector, not a
    /// historical replay), then atomically inserts every accepted row
    /// across all three tables in one transaction and logs the submission
    /// under `operator_id`.
    pub fn submit_manual_logs(
        &self,
        plc_logs: Vec<Sample>,
        attitude_logs: Vec<Sample>,
        monitoring_logs: Vec<Sample>,
        operator_id: &str,
    ) -> Result<ManualSubmissionResult, Error> {
        let config = self.engine.config().load();
        let plc = self.validate_table(&config, Table::Plc, plc_logs);
        let attitude = self.validate_table(&config, Table::Attitude, attitude_logs);
        let monitoring = self.validate_table(&config, Table::Monitoring, monitoring_logs);

        let accepted_plc = accepted_rows(&plc);
        let accepted_attitude = accepted_rows(&attitude);
        let accepted_monitoring = accepted_rows(&monitoring);
        self.engine.store().insert_samples_multi_table(&[
            (Table::Plc, accepted_plc.as_slice()),
            (Table::Attitude, accepted_attitude.as_slice()),
            (Table::Monitoring, accepted_monitoring.as_slice()),
        ])?;

        tracing::info!(
            operator_id,
            submitted = plc.len() + attitude.len() + monitoring.len(),
            accepted = accepted_plc.len() + accepted_attitude.len() + accepted_monitoring.len(),
            "manual log submission processed"
        );

        Ok(ManualSubmissionResult { plc, attitude, monitoring })
    }

    fn validate_table(&self, config: &PipelineConfig, table: Table, mut samples: Vec<Sample>) -> Vec<ManualLogOutcome> {
        for sample in &mut samples {
            sample.table = table;
        }
        ringcore_pipeline::validate_manual_batch(config, samples)
    }

    /// Structured status of every running component (§6 `health()`).
    pub fn health(&self) -> EngineHealth {
        self.engine.health()
    }

    /// Stops every collector and background task, draining and flushing
    /// whatever remains within the configured grace period.
    pub async fn shutdown(&self) {
        self.engine.shutdown().await
    }
}
