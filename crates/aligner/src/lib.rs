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

//! The ring aligner: the periodic job that turns completed ring windows of
//! raw samples into one [`RingSummary`] row each (§4.5).
//!
//! Ring boundaries are not re-derived here; every sample already carries the
//! `ring_number` the buffer writer's `RingTracker` stamped onto it, so the
//! aligner's queries are plain range scans keyed on that column.

mod derived;

use std::collections::BTreeMap;

use ringcore_config::AlignerConfig;
use ringcore_model::{DataCompletenessFlag, IndicatorStats, RingSummary, Table};
use ringcore_store::{RingSummaryFilter, Store};

/// Errors the aligner can surface. All are store failures; aggregation
/// itself cannot fail (missing data becomes a null field or a completeness
/// flag, never an error).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The store rejected a read or write.
    #[error("store error: {0}")]
    Store(#[from] ringcore_store::Error),
}

/// Determines which rings are due for (re-)aggregation on this tick (§4.5
/// step 1), combining three sources:
/// - rings strictly between the last summarized ring and the current open
///   ring (closed by the next ring's first sample),
/// - the current open ring itself, if it has sat unclosed longer than
///   `max_ring_age` (force-finalization of a stalled machine),
/// - previously summarized but still-incomplete rings within
///   `grace_window` of their last write, given another chance to complete.
fn candidate_rings(store: &Store, config: &AlignerConfig, now_ms: i64) -> Result<Vec<i64>, Error> {
    let max_summarized = store.max_summarized_ring()?.unwrap_or(0);
    let mut candidates = Vec::new();

    if let Some(max_observed) = store.max_ring_number(Table::Plc)? {
        candidates.extend((max_summarized + 1)..max_observed);

        if max_observed > max_summarized {
            if let Some(start) = store.min_timestamp_for_ring(Table::Plc, max_observed)? {
                let age_ms = now_ms.saturating_sub(start);
                if age_ms as u64 > config.max_ring_age.as_millis() as u64 {
                    candidates.push(max_observed);
                }
            }
        }
    }

    let grace_ms = config.grace_window.as_millis() as i64;
    let recent_incomplete = store.list_ring_summaries(&RingSummaryFilter { limit: 10_000, ..Default::default() })?;
    for summary in recent_incomplete {
        if summary.data_completeness_flag != DataCompletenessFlag::Complete
            && now_ms.saturating_sub(summary.created_at) < grace_ms
            && !candidates.contains(&summary.ring_number)
        {
            candidates.push(summary.ring_number);
        }
    }

    candidates.sort_unstable();
    candidates.dedup();
    Ok(candidates)
}

/// Aggregates one ring's window into a [`RingSummary`] and upserts it.
/// `end_ts` is exclusive, matching the half-open convention every raw-table
/// range query uses.
fn aggregate_ring(store: &Store, config: &AlignerConfig, ring_number: i64, end_ts: i64, now_ms: i64) -> Result<RingSummary, Error> {
    let start_ts = store.min_timestamp_for_ring(Table::Plc, ring_number)?.unwrap_or(end_ts);

    let plc_samples = store.samples_in_range(Table::Plc, start_ts, end_ts)?;
    let attitude_samples = store.samples_in_range(Table::Attitude, start_ts, end_ts)?;

    let lag_ms = config.settlement_lag_window.as_millis() as i64;
    let monitoring_window_end = end_ts.max(start_ts).saturating_add(lag_ms);
    let monitoring_samples = store.samples_in_range(Table::Monitoring, start_ts, monitoring_window_end)?;

    let aggregate_indicators: BTreeMap<String, IndicatorStats> = config
        .aggregate_indicators
        .iter()
        .map(|(indicator, tag)| (indicator.clone(), stats_for_tag(&plc_samples, tag)))
        .collect();

    let attitude_indicators: BTreeMap<String, IndicatorStats> = config
        .attitude_indicators
        .iter()
        .map(|(indicator, tag)| (indicator.clone(), stats_for_tag(&attitude_samples, tag)))
        .collect();

    let settlement_value = first_value_for_tag(&monitoring_samples, &config.settlement_tag);
    let displacement_value = first_value_for_tag(&monitoring_samples, &config.displacement_tag);

    let revolutions = sum_for_tag(&plc_samples, &config.specific_energy.revolutions_tag);
    let advance_distance = sum_for_tag(&plc_samples, &config.specific_energy.advance_distance_tag);
    let mean_torque = aggregate_indicators.get("torque").and_then(|s| s.mean);

    let derived_indicators = derived::compute(config, &aggregate_indicators, mean_torque, revolutions, advance_distance, settlement_value);

    let data_completeness_flag = completeness_flag(&plc_samples, &aggregate_indicators, &attitude_samples, settlement_value);
    let geology_zone = config.zone_for_ring(ring_number).map(str::to_string);

    Ok(RingSummary {
        ring_number,
        start_ts,
        end_ts,
        aggregate_indicators,
        attitude_indicators,
        settlement_value,
        displacement_value,
        derived_indicators,
        geology_zone,
        data_completeness_flag,
        created_at: now_ms,
        synced_to_cloud: false,
    })
}

fn stats_for_tag(samples: &[ringcore_model::Sample], tag: &str) -> IndicatorStats {
    IndicatorStats::from_values(samples.iter().filter(|s| s.tag == tag && !s.quality.excluded_from_aggregates()).map(|s| s.value))
}

fn sum_for_tag(samples: &[ringcore_model::Sample], tag: &str) -> Option<f64> {
    let mut found = false;
    let sum = samples
        .iter()
        .filter(|s| s.tag == tag && !s.quality.excluded_from_aggregates())
        .map(|s| {
            found = true;
            s.value
        })
        .sum();
    found.then_some(sum)
}

fn first_value_for_tag(samples: &[ringcore_model::Sample], tag: &str) -> Option<f64> {
    samples.iter().filter(|s| s.tag == tag && !s.quality.excluded_from_aggregates()).min_by_key(|s| s.timestamp_ms).map(|s| s.value)
}

/// Priority-ordered completeness check (I3): the first applicable condition
/// wins.
fn completeness_flag(
    plc_samples: &[ringcore_model::Sample],
    aggregate_indicators: &BTreeMap<String, IndicatorStats>,
    attitude_samples: &[ringcore_model::Sample],
    settlement_value: Option<f64>,
) -> DataCompletenessFlag {
    if plc_samples.is_empty() {
        return DataCompletenessFlag::MissingPlc;
    }
    if aggregate_indicators.values().any(|stats| stats.mean.is_none()) {
        return DataCompletenessFlag::PartialPlc;
    }
    if attitude_samples.is_empty() {
        return DataCompletenessFlag::PartialAttitude;
    }
    if settlement_value.is_none() {
        return DataCompletenessFlag::MissingMonitoring;
    }
    DataCompletenessFlag::Complete
}

/// Runs one aligner tick: selects candidate rings, aggregates each, and
/// upserts its summary. Returns the ring numbers processed, in ascending
/// order.
pub fn tick(store: &Store, config: &AlignerConfig, now_ms: i64) -> Result<Vec<i64>, Error> {
    let candidates = candidate_rings(store, config, now_ms)?;
    let max_observed = store.max_ring_number(Table::Plc)?;

    for &ring_number in &candidates {
        let end_ts = match max_observed {
            Some(max) if ring_number < max => store.min_timestamp_for_ring(Table::Plc, ring_number + 1)?.unwrap_or(now_ms),
            _ => now_ms,
        };
        let summary = aggregate_ring(store, config, ring_number, end_ts, now_ms)?;
        store.upsert_ring_summary(&summary)?;
        tracing::info!(ring_number, completeness = ?summary.data_completeness_flag, "ring summarized");
    }

    Ok(candidates)
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use ringcore_config::{GroundLossConfig, SpecificEnergyConfig};
    use ringcore_model::{QualityFlag, Sample};

    use super::*;

    fn config() -> AlignerConfig {
        AlignerConfig {
            tick_interval: std::time::Duration::from_secs(300),
            settlement_lag_window: std::time::Duration::from_secs(120),
            grace_window: std::time::Duration::from_secs(3600),
            max_ring_age: std::time::Duration::from_secs(24 * 3600),
            ring_number_tag: "ring_number".to_string(),
            settlement_tag: "settlement_value".to_string(),
            displacement_tag: "displacement_value".to_string(),
            aggregate_indicators: HashMap::from([("thrust".to_string(), "thrust_total".to_string()), ("torque".to_string(), "torque_total".to_string())]),
            attitude_indicators: HashMap::from([("pitch".to_string(), "pitch".to_string())]),
            specific_energy: SpecificEnergyConfig {
                revolutions_tag: "cutterhead_revolutions".to_string(),
                advance_distance_tag: "advance_distance".to_string(),
                cross_section_area: 50.0,
            },
            ground_loss: Some(GroundLossConfig { theoretical_volume_per_ring: 100.0, grout_volume_indicator: "grout_volume".to_string(), settlement_area_factor: 0.01 }),
            geology_zones: vec![],
        }
    }

    fn plc(tag: &str, ring: i64, ts: i64, v: f64) -> Sample {
        let mut s = Sample::new("src-1", tag, Table::Plc, ts, v);
        s.ring_number = Some(ring);
        s
    }

    fn push_ring_boundary(store: &Store, ring: i64, ts: i64) {
        store.insert_samples(Table::Plc, &[plc("ring_number", ring, ts, ring as f64)]).unwrap();
    }

    #[test]
    fn candidate_rings_excludes_current_open_ring() {
        let store = Store::open_in_memory().unwrap();
        push_ring_boundary(&store, 1, 0);
        push_ring_boundary(&store, 2, 1_000);
        push_ring_boundary(&store, 3, 2_000);

        let candidates = candidate_rings(&store, &config(), 2_500).unwrap();
        assert_eq!(candidates, vec![1, 2], "ring 3 is still open, not a candidate yet");
    }

    #[test]
    fn force_finalizes_stuck_current_ring_past_max_age() {
        let store = Store::open_in_memory().unwrap();
        push_ring_boundary(&store, 1, 0);

        let mut cfg = config();
        cfg.max_ring_age = std::time::Duration::from_secs(10);
        let candidates = candidate_rings(&store, &cfg, 20_000).unwrap();
        assert_eq!(candidates, vec![1]);
    }

    #[test]
    fn aggregate_ring_computes_stats_and_excludes_bad_quality() {
        let store = Store::open_in_memory().unwrap();
        push_ring_boundary(&store, 1, 0);
        store
            .insert_samples(
                Table::Plc,
                &[
                    plc("thrust_total", 1, 100, 1000.0),
                    plc("thrust_total", 1, 200, 2000.0),
                    {
                        let mut bad = plc("thrust_total", 1, 300, 9_999_999.0);
                        bad.quality = QualityFlag::OutOfRange;
                        bad
                    },
                    plc("torque_total", 1, 150, 300.0),
                ],
            )
            .unwrap();
        push_ring_boundary(&store, 2, 1_000);

        let summary = aggregate_ring(&store, &config(), 1, 1_000, 5_000).unwrap();
        let thrust = summary.aggregate_indicators.get("thrust").unwrap();
        assert_eq!(thrust.mean, Some(1500.0), "out-of-range sample must be excluded");
        assert_eq!(summary.data_completeness_flag, DataCompletenessFlag::PartialAttitude, "no attitude samples were inserted");
    }

    #[test]
    fn missing_plc_flag_when_no_samples_in_window() {
        let store = Store::open_in_memory().unwrap();
        let summary = aggregate_ring(&store, &config(), 1, 1_000, 5_000).unwrap();
        assert_eq!(summary.data_completeness_flag, DataCompletenessFlag::MissingPlc);
    }

    #[test]
    fn settlement_association_within_lag_window() {
        let store = Store::open_in_memory().unwrap();
        push_ring_boundary(&store, 1, 0);
        store.insert_samples(Table::Plc, &[plc("thrust_total", 1, 100, 1.0), plc("torque_total", 1, 100, 1.0)]).unwrap();
        store
            .insert_samples(Table::Attitude, &[{ let mut s = Sample::new("src-1", "pitch", Table::Attitude, 100, 0.5); s.ring_number = Some(1); s }])
            .unwrap();
        store
            .insert_samples(Table::Monitoring, &[{ let mut s = Sample::new("src-1", "settlement_value", Table::Monitoring, 900, 3.2); s.ring_number = Some(1); s }])
            .unwrap();

        let summary = aggregate_ring(&store, &config(), 1, 1_000, 5_000).unwrap();
        assert_eq!(summary.settlement_value, Some(3.2));
        assert_eq!(summary.data_completeness_flag, DataCompletenessFlag::Complete);
    }

    #[test]
    fn tick_is_idempotent_over_unchanged_data() {
        let store = Store::open_in_memory().unwrap();
        push_ring_boundary(&store, 1, 0);
        store.insert_samples(Table::Plc, &[plc("thrust_total", 1, 100, 1.0)]).unwrap();
        store
            .insert_samples(Table::Attitude, &[{ let mut s = Sample::new("src-1", "pitch", Table::Attitude, 100, 0.5); s.ring_number = Some(1); s }])
            .unwrap();
        store
            .insert_samples(Table::Monitoring, &[{ let mut s = Sample::new("src-1", "settlement_value", Table::Monitoring, 900, 3.2); s.ring_number = Some(1); s }])
            .unwrap();
        push_ring_boundary(&store, 2, 1_000);

        let first = tick(&store, &config(), 5_000).unwrap();
        let first_summary = store.get_ring_summary(1).unwrap().unwrap();
        assert_eq!(first_summary.data_completeness_flag, DataCompletenessFlag::Complete);

        let second = tick(&store, &config(), 6_000).unwrap();
        assert!(second.is_empty(), "ring 1 is already complete, so it must not re-surface as a candidate");
        let unchanged = store.get_ring_summary(1).unwrap().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first_summary.aggregate_indicators, unchanged.aggregate_indicators);
    }
}
