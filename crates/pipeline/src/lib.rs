#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! The quality pipeline (§4.2): a fixed, ordered, per-record transform —
//! threshold validation, interpolation, physical reasonableness,
//! calibration, quality metrics — with no I/O.
//!
//! [`QualityPipeline`] is a pure function of `(Sample, config snapshot,
//! small per-tag rolling state)`. It genuinely cannot fail — there is no
//! I/O, and every stage degrades to a flag rather than an error — so unlike
//! the other crate boundaries in this workspace this crate exposes no
//! `Error` type.
//!
//! Interpolation's one-sample look-back/forward buffer (§4.2 stage 2) is
//! the one stage with a deferred-emission shape: a gap may be held past the
//! call that detected it, resolved either by [`QualityPipeline::process`]
//! on the next good sample for that tag, or by [`QualityPipeline::tick`]
//! once `gap_max` has elapsed with no forward sample. `tick` is driven by
//! the engine's per-collector timer, mirroring the teacher's
//! `Signal::TimerTick` interleaving rather than blocking the hot path on a
//! sleep (§9 design notes).

mod metrics;
mod state;

use std::collections::HashMap;
use std::time::Instant;

use ringcore_config::{CrossTagRule, PipelineConfig};
use ringcore_model::{QualityFlag, Sample, Table};

pub use metrics::{FlaggingStage, QualityMetric};
use state::{PendingGap, TagState};

/// The result of one [`QualityPipeline::process`] or [`QualityPipeline::tick`]
/// call: zero, one, or two samples ready to hand to the buffer writer (two
/// when a resolved gap emits its held value alongside the sample that
/// resolved it), plus the advisory metrics for each.
#[derive(Debug, Default)]
pub struct PipelineOutput {
    /// Samples ready for the buffer writer, in chronological order.
    pub emitted: Vec<Sample>,
    /// Advisory per-record metrics (§4.2 stage 5), already emitted as
    /// `tracing` events by the time this is returned.
    pub metrics: Vec<QualityMetric>,
}

impl PipelineOutput {
    /// A gap the pipeline could not interpolate. Per (I1)/§9 decision 1 this
    /// drops the record by default; when `persist_missing` is configured,
    /// `sample` is instead emitted unchanged with `quality = Missing` so the
    /// alternative source behavior is a config flip away, not a code change.
    fn dropped(tag: &str, start: Instant, persist_missing: bool, sample: Option<Sample>) -> Self {
        let metric = QualityMetric { tag: tag.to_string(), flag: QualityFlag::Missing, stage: FlaggingStage::Interpolation, latency_ms: elapsed_ms(start) };
        metric.emit();
        let emitted = match (persist_missing, sample) {
            (true, Some(mut sample)) => {
                sample.quality = QualityFlag::Missing;
                vec![sample]
            }
            _ => vec![],
        };
        Self { emitted, metrics: vec![metric] }
    }

    fn held(tag: &str, start: Instant) -> Self {
        let metric = QualityMetric { tag: tag.to_string(), flag: QualityFlag::Missing, stage: FlaggingStage::Interpolation, latency_ms: elapsed_ms(start) };
        metric.emit();
        Self { emitted: vec![], metrics: vec![metric] }
    }
}

/// The quality pipeline instance owned by one collector. Holds per-tag
/// rolling state exclusively — no global map guarded by a mutex (§9) — so a
/// pipeline instance must not be shared across collector tasks; each
/// collector constructs and owns its own.
pub struct QualityPipeline {
    source_id: String,
    tags: HashMap<String, TagState>,
}

impl QualityPipeline {
    /// Creates a new pipeline instance for the collector identified by
    /// `source_id`, used to stamp synthetic samples emitted by the
    /// interpolation stage.
    pub fn new(source_id: impl Into<String>) -> Self {
        Self { source_id: source_id.into(), tags: HashMap::new() }
    }

    fn tag_state(&mut self, tag: &str, history_cap: usize, table: Table) -> &mut TagState {
        self.tags.entry(tag.to_string()).or_insert_with(|| TagState::new(history_cap, table))
    }

    /// Runs `sample` through the fixed five-stage pipeline against
    /// `config`, the snapshot the caller loaded once for this record (§9
    /// "config hot-reload" design note).
    ///
    /// A `sample` arriving with `quality == QualityFlag::Missing` is treated
    /// as an explicit gap marker, used by a liveness-timeout watcher that
    /// detects total silence on a tag — a collector that fails a read
    /// outright does not enqueue anything at all for that case (§4.1), so an
    /// explicit marker is the only way silence becomes visible to a pure
    /// per-record transform.
    pub fn process(&mut self, config: &PipelineConfig, mut sample: Sample) -> PipelineOutput {
        let start = Instant::now();
        let history_cap = config.quality.interpolation.history_len.max(1);
        let gap_max_ms = config.quality.interpolation.gap_max.as_millis() as i64;
        let tag = sample.tag.clone();
        let table = sample.table;

        let persist_missing = config.quality.persist_missing;

        if sample.quality == QualityFlag::Missing {
            let carried = sample.clone();
            return self.handle_gap(&tag, sample.timestamp_ms, gap_max_ms, history_cap, table, start, persist_missing, carried);
        }

        // Stage 1: threshold validation.
        if let Some(threshold) = config.quality.thresholds.get(&tag) {
            if sample.value < threshold.min || sample.value > threshold.max {
                let carried = sample.clone();
                return self.handle_gap(&tag, sample.timestamp_ms, gap_max_ms, history_cap, table, start, persist_missing, carried);
            }
            if threshold.warn_low.is_some_and(|warn_low| sample.value < warn_low)
                || threshold.warn_high.is_some_and(|warn_high| sample.value > warn_high)
            {
                tracing::warn!(tag = %tag, value = sample.value, "quality: warn threshold crossed");
            }
        }

        // A real, in-range value: first resolve any gap pending on this tag.
        let state = self.tag_state(&tag, history_cap, table);
        if let Some(pending) = state.pending_gap.take() {
            let (t0, v0) = pending.previous;
            let (t1, v1) = (sample.timestamp_ms, sample.value);
            let value = if t1 != t0 { v0 + (v1 - v0) * (pending.gap_ts - t0) as f64 / (t1 - t0) as f64 } else { v0 };
            let mut filled = Sample::new(self.source_id.clone(), tag.clone(), table, pending.gap_ts, value);
            filled.quality = QualityFlag::Interpolated;
            self.tag_state(&tag, history_cap, table).push_good(pending.gap_ts, value);
            let fill_metric = QualityMetric { tag: tag.clone(), flag: QualityFlag::Interpolated, stage: FlaggingStage::Interpolation, latency_ms: elapsed_ms(start) };
            fill_metric.emit();
            return self.finish_good_sample(config, sample, FlaggingStage::None, start, Some(filled), Some(fill_metric));
        }

        self.finish_good_sample(config, sample, FlaggingStage::None, start, None, None)
    }

    /// Stages 3-5 for a sample that entered with a usable numeric value
    /// (stage 1 passed and stage 2 found no pending gap to resolve, or just
    /// resolved one). `carry_emit`/`carry_metric` are the interpolated
    /// gap-fill produced while resolving a pending gap, if any, prepended to
    /// this call's own output.
    fn finish_good_sample(
        &mut self,
        config: &PipelineConfig,
        mut sample: Sample,
        mut stage: FlaggingStage,
        start: Instant,
        carry_emit: Option<Sample>,
        carry_metric: Option<QualityMetric>,
    ) -> PipelineOutput {
        let tag = sample.tag.clone();
        let history_cap = config.quality.interpolation.history_len.max(1);

        // Stage 3: physical reasonableness.
        let previous = self.tags.get(&tag).and_then(|s| s.last_good);
        if let Some(rule) = config.quality.reasonableness.get(&tag) {
            if let Some((prev_ts, prev_val)) = previous {
                let dt_seconds = (sample.timestamp_ms - prev_ts) as f64 / 1000.0;
                if dt_seconds > 0.0 && (sample.value - prev_val).abs() / dt_seconds > rule.max_rate {
                    sample.quality = QualityFlag::PhysicallyImplausible;
                    stage = FlaggingStage::Reasonableness;
                }
            }
        }
        for rule in &config.quality.cross_tag_rules {
            let CrossTagRule::PositiveImpliesPositive { driver_tag, dependent_tag } = rule;
            if dependent_tag == &tag {
                let driver_positive = self.tags.get(driver_tag).and_then(|s| s.last_good).is_some_and(|(_, v)| v > 0.0);
                if driver_positive && sample.value <= 0.0 {
                    sample.quality = QualityFlag::PhysicallyImplausible;
                    stage = FlaggingStage::Reasonableness;
                }
            }
        }

        let raw_for_state = sample.value;

        // Stage 4: calibration.
        if let Some(calibration) = config.quality.calibration.get(&tag) {
            sample.original_value = Some(sample.value);
            sample.value = calibration.offset + calibration.scale * sample.value;
            sample.calibrated = true;
            if stage == FlaggingStage::None {
                stage = FlaggingStage::Calibration;
            }
        }

        // A record that survives reasonableness anchors future rate checks
        // and interpolation; one flagged implausible does not, so a single
        // bad reading cannot poison the baseline for its neighbors.
        if sample.quality != QualityFlag::PhysicallyImplausible {
            self.tag_state(&tag, history_cap, sample.table).push_good(sample.timestamp_ms, raw_for_state);
        }

        // Stage 5: quality metrics (advisory).
        let metric = QualityMetric { tag, flag: sample.quality, stage, latency_ms: elapsed_ms(start) };
        metric.emit();

        let mut emitted = Vec::with_capacity(2);
        let mut metrics = Vec::with_capacity(2);
        if let Some(carry) = carry_emit {
            emitted.push(carry);
        }
        if let Some(carry_metric) = carry_metric {
            metrics.push(carry_metric);
        }
        emitted.push(sample);
        metrics.push(metric);
        PipelineOutput { emitted, metrics }
    }

    /// Handles an explicit gap (an out-of-range or `Missing`-marked sample)
    /// at `gap_ts`: holds it pending if the previous good sample is recent
    /// enough to interpolate from, otherwise drops it outright (§4.2 stage
    /// 2; boundary: previous age exactly `gap_max` is held, one millisecond
    /// over is dropped).
    #[allow(clippy::too_many_arguments)]
    fn handle_gap(
        &mut self,
        tag: &str,
        gap_ts: i64,
        gap_max_ms: i64,
        history_cap: usize,
        table: Table,
        start: Instant,
        persist_missing: bool,
        sample: Sample,
    ) -> PipelineOutput {
        let state = self.tag_state(tag, history_cap, table);
        let Some(previous) = state.last_good else {
            tracing::debug!(tag = %tag, "dropping gap: no prior good sample to interpolate from");
            return PipelineOutput::dropped(tag, start, persist_missing, Some(sample));
        };

        if gap_ts - previous.0 > gap_max_ms {
            tracing::debug!(tag = %tag, "dropping gap: previous good sample older than gap_max");
            return PipelineOutput::dropped(tag, start, persist_missing, Some(sample));
        }

        if state.pending_gap.is_some() {
            tracing::debug!(tag = %tag, "dropping gap: another gap already pending for this tag (one-sample buffer)");
            return PipelineOutput::dropped(tag, start, persist_missing, Some(sample));
        }

        state.pending_gap = Some(PendingGap { gap_ts, previous, deadline_ts: gap_ts + gap_max_ms });
        PipelineOutput::held(tag, start)
    }

    /// Resolves every pending gap across every tag whose deadline has
    /// passed by `now_ms` with no forward sample, emitting the held
    /// previous value flagged `interpolated` (§4.2 stage 2, "if no forward
    /// sample within gap_max_seconds"). Driven by the engine's per-collector
    /// timer, not a blocking sleep in the hot path.
    pub fn tick(&mut self, now_ms: i64) -> PipelineOutput {
        let mut emitted = Vec::new();
        let mut metrics = Vec::new();
        for (tag, state) in self.tags.iter_mut() {
            let Some(pending) = state.pending_gap else { continue };
            if now_ms < pending.deadline_ts {
                continue;
            }
            let (_, value) = pending.previous;
            let mut filled = Sample::new(self.source_id.clone(), tag.clone(), state.table, pending.gap_ts, value);
            filled.quality = QualityFlag::Interpolated;
            state.push_good(pending.gap_ts, value);
            state.pending_gap = None;
            metrics.push(QualityMetric { tag: tag.clone(), flag: QualityFlag::Interpolated, stage: FlaggingStage::Interpolation, latency_ms: 0.0 });
            emitted.push(filled);
        }
        for metric in &metrics {
            metric.emit();
        }
        PipelineOutput { emitted, metrics }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Runs thresholds, physical-reasonableness, and calibration (§4.2 stages 1,
/// 3, 4) against a batch of manually submitted rows, in submission order,
/// returning each row paired with whether it was accepted (§6
/// `submit_manual_logs`).
///
/// Stage 2 (interpolation) does not apply: a manual submission replays
/// history rather than streaming it, so there is no persistent per-tag
/// rolling state to carry a gap across calls. Reasonableness is instead
/// scoped to the running history built up within this one batch.
pub fn validate_manual_batch(config: &PipelineConfig, samples: Vec<Sample>) -> Vec<(Sample, bool)> {
    let mut last_good: HashMap<String, (i64, f64)> = HashMap::new();
    samples
        .into_iter()
        .map(|mut sample| {
            let tag = sample.tag.clone();

            if let Some(threshold) = config.quality.thresholds.get(&tag) {
                if sample.value < threshold.min || sample.value > threshold.max {
                    sample.quality = QualityFlag::OutOfRange;
                    return (sample, false);
                }
            }

            let mut accepted = true;
            if let Some(rule) = config.quality.reasonableness.get(&tag) {
                if let Some((prev_ts, prev_val)) = last_good.get(&tag) {
                    let dt_seconds = (sample.timestamp_ms - prev_ts) as f64 / 1000.0;
                    if dt_seconds > 0.0 && (sample.value - prev_val).abs() / dt_seconds > rule.max_rate {
                        sample.quality = QualityFlag::PhysicallyImplausible;
                        accepted = false;
                    }
                }
            }
            for rule in &config.quality.cross_tag_rules {
                let CrossTagRule::PositiveImpliesPositive { driver_tag, dependent_tag } = rule;
                if dependent_tag == &tag {
                    let driver_positive = last_good.get(driver_tag).is_some_and(|(_, v)| *v > 0.0);
                    if driver_positive && sample.value <= 0.0 {
                        sample.quality = QualityFlag::PhysicallyImplausible;
                        accepted = false;
                    }
                }
            }

            if let Some(calibration) = config.quality.calibration.get(&tag) {
                sample.original_value = Some(sample.value);
                sample.value = calibration.offset + calibration.scale * sample.value;
                sample.calibrated = true;
            }

            if accepted {
                let _ = last_good.insert(tag, (sample.timestamp_ms, sample.value));
            }
            (sample, accepted)
        })
        .collect()
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::time::Duration;

    use ringcore_config::{
        AlignerConfig, BufferConfig, CalibrationConfig, CrossTagRule, InterpolationConfig, QualityConfig,
        ReasonablenessConfig, SpecificEnergyConfig, StoreConfig, ThresholdConfig,
    };

    use super::*;

    fn config_with(quality: QualityConfig) -> PipelineConfig {
        PipelineConfig {
            sources: vec![],
            quality,
            buffer: BufferConfig::default(),
            aligner: AlignerConfig {
                tick_interval: Duration::from_secs(300),
                settlement_lag_window: Duration::from_secs(120),
                grace_window: Duration::from_secs(3600),
                max_ring_age: Duration::from_secs(24 * 3600),
                ring_number_tag: "ring_number".to_string(),
                settlement_tag: "settlement_value".to_string(),
                displacement_tag: "displacement_value".to_string(),
                aggregate_indicators: HashMap::new(),
                attitude_indicators: HashMap::new(),
                specific_energy: SpecificEnergyConfig {
                    revolutions_tag: "cutterhead_revolutions".to_string(),
                    advance_distance_tag: "advance_distance".to_string(),
                    cross_section_area: 50.0,
                },
                ground_loss: None,
                geology_zones: vec![],
            },
            store: StoreConfig::default(),
        }
    }

    #[test]
    fn out_of_range_sample_is_dropped_when_no_prior_good_sample_exists() {
        let mut quality = QualityConfig::default();
        let _ = quality.thresholds.insert("thrust_total".to_string(), ThresholdConfig { min: 0.0, max: 30_000.0, warn_low: None, warn_high: None });
        let config = config_with(quality);

        let mut pipeline = QualityPipeline::new("plc-1");
        let sample = Sample::new("plc-1", "thrust_total", Table::Plc, 0, -1.0);
        let output = pipeline.process(&config, sample);

        assert!(output.emitted.is_empty());
        assert_eq!(output.metrics[0].flag, QualityFlag::Missing);
    }

    #[test]
    fn persist_missing_config_emits_the_record_instead_of_dropping_it() {
        let mut quality = QualityConfig::default();
        let _ = quality.thresholds.insert("thrust_total".to_string(), ThresholdConfig { min: 0.0, max: 30_000.0, warn_low: None, warn_high: None });
        quality.persist_missing = true;
        let config = config_with(quality);

        let mut pipeline = QualityPipeline::new("plc-1");
        let sample = Sample::new("plc-1", "thrust_total", Table::Plc, 0, -1.0);
        let output = pipeline.process(&config, sample);

        assert_eq!(output.emitted.len(), 1);
        assert_eq!(output.emitted[0].quality, QualityFlag::Missing);
        assert_eq!(output.emitted[0].value, -1.0, "the out-of-range value is preserved, not discarded");
    }

    #[test]
    fn interpolation_fills_gap_between_two_good_samples() {
        let quality = QualityConfig { interpolation: InterpolationConfig { history_len: 8, gap_max: Duration::from_secs(10) }, ..Default::default() };
        let config = config_with(quality);
        let mut pipeline = QualityPipeline::new("src-1");

        let out0 = pipeline.process(&config, Sample::new("src-1", "x", Table::Plc, 0, 1.0));
        assert_eq!(out0.emitted[0].quality, QualityFlag::Good);

        let mut gap = Sample::new("src-1", "x", Table::Plc, 3_000, 0.0);
        gap.quality = QualityFlag::Missing;
        let gap_out = pipeline.process(&config, gap);
        assert!(gap_out.emitted.is_empty(), "a held gap emits nothing until resolved");

        let resolve_out = pipeline.process(&config, Sample::new("src-1", "x", Table::Plc, 6_000, 2.0));
        assert_eq!(resolve_out.emitted.len(), 2);
        assert_eq!(resolve_out.emitted[0].timestamp_ms, 3_000);
        assert_eq!(resolve_out.emitted[0].quality, QualityFlag::Interpolated);
        assert!((resolve_out.emitted[0].value - 1.5).abs() < 1e-9);
        assert_eq!(resolve_out.emitted[1].timestamp_ms, 6_000);
        assert_eq!(resolve_out.emitted[1].quality, QualityFlag::Good);
    }

    #[test]
    fn gap_past_gap_max_is_dropped_not_interpolated() {
        let quality = QualityConfig { interpolation: InterpolationConfig { history_len: 8, gap_max: Duration::from_secs(10) }, ..Default::default() };
        let config = config_with(quality);
        let mut pipeline = QualityPipeline::new("src-1");

        let _ = pipeline.process(&config, Sample::new("src-1", "x", Table::Plc, 0, 1.0));

        let mut gap = Sample::new("src-1", "x", Table::Plc, 11_000, 0.0);
        gap.quality = QualityFlag::Missing;
        let gap_out = pipeline.process(&config, gap);
        assert!(gap_out.emitted.is_empty());
        assert_eq!(gap_out.metrics[0].flag, QualityFlag::Missing);

        // nothing pending to resolve: the next good sample passes through untouched.
        let resolve_out = pipeline.process(&config, Sample::new("src-1", "x", Table::Plc, 12_000, 2.0));
        assert_eq!(resolve_out.emitted.len(), 1);
        assert_eq!(resolve_out.emitted[0].quality, QualityFlag::Good);
    }

    #[test]
    fn gap_exactly_at_limit_is_held_one_millisecond_over_is_dropped() {
        let quality = QualityConfig { interpolation: InterpolationConfig { history_len: 8, gap_max: Duration::from_secs(10) }, ..Default::default() };
        let config = config_with(quality);

        let mut at_limit = QualityPipeline::new("src-1");
        let _ = at_limit.process(&config, Sample::new("src-1", "x", Table::Plc, 0, 1.0));
        let mut gap = Sample::new("src-1", "x", Table::Plc, 10_000, 0.0);
        gap.quality = QualityFlag::Missing;
        let _ = at_limit.process(&config, gap);
        let resolved = at_limit.tick(20_000);
        assert_eq!(resolved.emitted.len(), 1, "exactly-at-limit gap is held and resolvable");

        let mut over_limit = QualityPipeline::new("src-1");
        let _ = over_limit.process(&config, Sample::new("src-1", "x", Table::Plc, 0, 1.0));
        let mut gap = Sample::new("src-1", "x", Table::Plc, 10_001, 0.0);
        gap.quality = QualityFlag::Missing;
        let dropped = over_limit.process(&config, gap);
        assert!(dropped.emitted.is_empty(), "one millisecond over the limit is dropped outright");
    }

    #[test]
    fn tick_emits_held_value_when_no_forward_sample_arrives() {
        let quality = QualityConfig { interpolation: InterpolationConfig { history_len: 8, gap_max: Duration::from_secs(10) }, ..Default::default() };
        let config = config_with(quality);
        let mut pipeline = QualityPipeline::new("src-1");

        let _ = pipeline.process(&config, Sample::new("src-1", "x", Table::Plc, 0, 1.0));
        let mut gap = Sample::new("src-1", "x", Table::Plc, 3_000, 0.0);
        gap.quality = QualityFlag::Missing;
        let _ = pipeline.process(&config, gap);

        let before_deadline = pipeline.tick(12_000);
        assert!(before_deadline.emitted.is_empty());

        let at_deadline = pipeline.tick(13_000);
        assert_eq!(at_deadline.emitted.len(), 1);
        assert_eq!(at_deadline.emitted[0].value, 1.0);
        assert_eq!(at_deadline.emitted[0].quality, QualityFlag::Interpolated);
    }

    #[test]
    fn calibration_applies_linear_transform_and_preserves_original_value() {
        let mut quality = QualityConfig::default();
        let _ = quality.calibration.insert("thrust_total".to_string(), CalibrationConfig { offset: 10.0, scale: 2.0 });
        let config = config_with(quality);
        let mut pipeline = QualityPipeline::new("plc-1");

        let out = pipeline.process(&config, Sample::new("plc-1", "thrust_total", Table::Plc, 0, 100.0));
        let sample = &out.emitted[0];
        assert_eq!(sample.value, 210.0);
        assert_eq!(sample.original_value, Some(100.0));
        assert!(sample.calibrated);
    }

    #[test]
    fn reasonableness_flags_excessive_rate_of_change() {
        let mut quality = QualityConfig::default();
        let _ = quality.reasonableness.insert("thrust_total".to_string(), ReasonablenessConfig { max_rate: 10.0 });
        let config = config_with(quality);
        let mut pipeline = QualityPipeline::new("plc-1");

        let _ = pipeline.process(&config, Sample::new("plc-1", "thrust_total", Table::Plc, 0, 0.0));
        let out = pipeline.process(&config, Sample::new("plc-1", "thrust_total", Table::Plc, 1_000, 1_000.0));
        assert_eq!(out.emitted[0].quality, QualityFlag::PhysicallyImplausible);
        assert_eq!(out.emitted[0].value, 1_000.0, "value is preserved, not dropped");
    }

    #[test]
    fn cross_tag_rule_flags_dependent_tag_when_driver_is_positive_and_dependent_is_not() {
        let mut quality = QualityConfig::default();
        quality.cross_tag_rules.push(CrossTagRule::PositiveImpliesPositive {
            driver_tag: "advance_rate".to_string(),
            dependent_tag: "thrust_total".to_string(),
        });
        let config = config_with(quality);
        let mut pipeline = QualityPipeline::new("plc-1");

        let _ = pipeline.process(&config, Sample::new("plc-1", "advance_rate", Table::Plc, 0, 5.0));
        let out = pipeline.process(&config, Sample::new("plc-1", "thrust_total", Table::Plc, 0, 0.0));
        assert_eq!(out.emitted[0].quality, QualityFlag::PhysicallyImplausible);
    }

    #[test]
    fn validate_manual_batch_rejects_out_of_range_and_calibrates_the_rest() {
        let mut quality = QualityConfig::default();
        let _ = quality
            .thresholds
            .insert("thrust_total".to_string(), ThresholdConfig { min: 0.0, max: 30_000.0, warn_low: None, warn_high: None });
        let _ = quality.calibration.insert("thrust_total".to_string(), CalibrationConfig { offset: 10.0, scale: 1.0 });
        let config = config_with(quality);

        let samples = vec![
            Sample::new("manual", "thrust_total", Table::Plc, 0, -1.0),
            Sample::new("manual", "thrust_total", Table::Plc, 1_000, 10_000.0),
        ];
        let results = validate_manual_batch(&config, samples);

        assert!(!results[0].1, "out-of-range row is rejected");
        assert_eq!(results[0].0.quality, QualityFlag::OutOfRange);

        assert!(results[1].1);
        assert_eq!(results[1].0.value, 10_010.0, "calibration still applies to accepted rows");
        assert_eq!(results[1].0.original_value, Some(10_000.0));
    }

    #[test]
    fn validate_manual_batch_applies_cross_tag_rule_within_the_batch() {
        let mut quality = QualityConfig::default();
        quality.cross_tag_rules.push(CrossTagRule::PositiveImpliesPositive {
            driver_tag: "advance_rate".to_string(),
            dependent_tag: "thrust_total".to_string(),
        });
        let config = config_with(quality);

        let samples = vec![
            Sample::new("manual", "advance_rate", Table::Plc, 0, 5.0),
            Sample::new("manual", "thrust_total", Table::Plc, 0, 0.0),
        ];
        let results = validate_manual_batch(&config, samples);
        assert_eq!(results[1].0.quality, QualityFlag::PhysicallyImplausible);
        assert!(!results[1].1);
    }
}
