//! Advisory per-record quality metrics (§4.2 stage 5). Never affects
//! persistence; emitted as a `tracing` event with structured fields rather
//! than a bespoke metrics crate, matching the ambient-stack conventions of
//! the rest of the workspace.

use ringcore_model::QualityFlag;

/// Which stage produced the final verdict on a record, for the advisory
/// metric record (§4.2 stage 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlaggingStage {
    /// Threshold validation (stage 1) flagged the record.
    Threshold,
    /// Interpolation (stage 2) flagged or dropped the record.
    Interpolation,
    /// Physical reasonableness (stage 3) flagged the record.
    Reasonableness,
    /// Calibration (stage 4) touched the record without otherwise flagging
    /// it (i.e. the record would have been `Good` but is `calibrated`).
    Calibration,
    /// No stage flagged the record; it passed through unmodified.
    None,
}

/// One advisory metric record per sample processed (§4.2 stage 5).
#[derive(Debug, Clone)]
pub struct QualityMetric {
    /// The tag this record belongs to.
    pub tag: String,
    /// The record's final quality verdict.
    pub flag: QualityFlag,
    /// Which stage produced that verdict.
    pub stage: FlaggingStage,
    /// Wall-clock time spent in the pipeline for this record.
    pub latency_ms: f64,
}

impl QualityMetric {
    /// Emits this metric as a structured `tracing` event at `trace` level.
    pub fn emit(&self) {
        tracing::trace!(
            tag = %self.tag,
            flag = ?self.flag,
            stage = ?self.stage,
            latency_ms = self.latency_ms,
            "quality pipeline metric"
        );
    }
}
