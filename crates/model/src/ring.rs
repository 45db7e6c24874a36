//! The aggregate row produced once per completed ring.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Descriptive statistics for one tag (or derived indicator) over the span
/// of a ring, excluding records whose `QualityFlag` is
/// [`excluded_from_aggregates`](super::sample::QualityFlag::excluded_from_aggregates).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorStats {
    /// Arithmetic mean over the included records. `None` if none remained.
    pub mean: Option<f64>,
    /// Maximum value among the included records.
    pub max: Option<f64>,
    /// Minimum value among the included records.
    pub min: Option<f64>,
    /// Population standard deviation among the included records.
    pub std_dev: Option<f64>,
}

impl IndicatorStats {
    /// Computes stats over an iterator of values, or `Self::default()`
    /// (all `None`) for an empty input.
    pub fn from_values(values: impl Iterator<Item = f64> + Clone) -> Self {
        let count = values.clone().count();
        if count == 0 {
            return Self::default();
        }
        let sum: f64 = values.clone().sum();
        let mean = sum / count as f64;
        let max = values.clone().fold(f64::NEG_INFINITY, f64::max);
        let min = values.clone().fold(f64::INFINITY, f64::min);
        let variance = values.map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        Self {
            mean: Some(mean),
            max: Some(max),
            min: Some(min),
            std_dev: Some(variance.sqrt()),
        }
    }
}

/// Marks how much of a ring's expected data was actually available when it
/// was summarized. Per (I3), `Complete` holds iff all four of {PLC samples
/// present, attitude samples present, monitoring association found within
/// the lag window, no required aggregate returned null}; the other variants
/// name which of those is missing, in the priority order §4.5 checks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCompletenessFlag {
    /// All four completeness conditions of (I3) hold.
    Complete,
    /// No PLC samples (beyond the ring-boundary markers themselves) fell in
    /// the ring window.
    MissingPlc,
    /// PLC samples were present but one or more configured aggregate
    /// indicators had no included records, or a required aggregate was
    /// null.
    PartialPlc,
    /// No attitude samples fell in the ring window.
    PartialAttitude,
    /// No settlement/monitoring sample was associated within the lag
    /// window.
    MissingMonitoring,
}

/// The row persisted to the ring summary table once per completed ring.
///
/// `aggregate_indicators` and `derived_indicators` are maps keyed by
/// config-defined tag/indicator name rather than fixed struct fields, since
/// the set of tags to aggregate and indicators to derive is configuration,
/// not code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RingSummary {
    /// The ring number this summary covers. Primary key.
    pub ring_number: i64,
    /// Timestamp of the first PLC record observed for this ring.
    pub start_ts: i64,
    /// Timestamp of the last PLC record observed for this ring, or the tick
    /// time the ring was finalized by `max_ring_age`.
    pub end_ts: i64,
    /// Per-tag statistics for every tag named in the aggregate-indicators
    /// config, keyed by tag name.
    pub aggregate_indicators: BTreeMap<String, IndicatorStats>,
    /// Attitude statistics (pitch/roll/yaw/deviation) for the ring span,
    /// keyed by attitude tag name.
    pub attitude_indicators: BTreeMap<String, IndicatorStats>,
    /// The settlement/monitoring record associated with this ring, if one
    /// fell inside the ring span plus the configured lag window.
    pub settlement_value: Option<f64>,
    /// The displacement reading from the same associated monitoring record,
    /// if one was found.
    pub displacement_value: Option<f64>,
    /// Indicators computed from other fields rather than aggregated
    /// directly (e.g. `specific_energy`, `ground_loss_rate`,
    /// `volume_loss_ratio`), keyed by indicator name. `None` when the
    /// divisor for that indicator was zero.
    pub derived_indicators: BTreeMap<String, Option<f64>>,
    /// The geological zone label active at `start_ts`, if the aligner
    /// config defines zone boundaries.
    pub geology_zone: Option<String>,
    /// How much of the expected data for this ring was actually available.
    pub data_completeness_flag: DataCompletenessFlag,
    /// When this row was written, milliseconds since epoch.
    pub created_at: i64,
    /// Whether this row has been picked up by the out-of-scope cloud sync
    /// process. The core only ever sets this to `false`; an external
    /// process flips it.
    pub synced_to_cloud: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stats_from_empty_is_all_none() {
        let stats = IndicatorStats::from_values(std::iter::empty());
        assert_eq!(stats, IndicatorStats::default());
    }

    #[test]
    fn stats_from_values_matches_hand_computation() {
        let stats = IndicatorStats::from_values([1.0, 2.0, 3.0].into_iter());
        assert_eq!(stats.mean, Some(2.0));
        assert_eq!(stats.max, Some(3.0));
        assert_eq!(stats.min, Some(1.0));
        let expected_std = ((1.0_f64 - 2.0).powi(2) + (2.0_f64 - 2.0).powi(2) + (3.0_f64 - 2.0).powi(2)) / 3.0;
        assert!((stats.std_dev.unwrap() - expected_std.sqrt()).abs() < 1e-9);
    }
}
