//! The `Sample` produced by collectors and the destination tables it can be
//! persisted into.

use serde::{Deserialize, Serialize};

/// The pipeline's verdict on a `Sample`. Determines whether the ring aligner
/// counts it in an aggregate.
///
/// `calibrated` is tracked separately on `Sample` rather than as a variant
/// here: calibration is applied on top of whatever primary verdict a record
/// already carries (a record can be both `Interpolated` and calibrated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    /// The value passed every stage unmodified.
    Good,
    /// The value was imputed by linear interpolation across a gap.
    Interpolated,
    /// The value fell outside the configured `[min, max]` threshold.
    OutOfRange,
    /// The value passed thresholds but failed a physical-reasonableness rule.
    PhysicallyImplausible,
    /// No value could be produced or imputed for this tag at this instant.
    ///
    /// A `Sample` with this flag is never persisted (I1); it exists only as
    /// an in-flight marker inside the quality pipeline's bookkeeping.
    Missing,
}

impl QualityFlag {
    /// Whether a ring aggregate must exclude a record carrying this flag,
    /// per §4.5 step 4: `out_of_range`, `physically_implausible`, and
    /// `missing` are excluded; `interpolated` (and `calibrated`, tracked
    /// separately) are included.
    pub fn excluded_from_aggregates(self) -> bool {
        matches!(
            self,
            QualityFlag::OutOfRange | QualityFlag::PhysicallyImplausible | QualityFlag::Missing
        )
    }
}

/// The logical destination table a persisted sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// High-frequency PLC samples (~1 Hz), including the `ring_number` tag.
    Plc,
    /// Attitude samples (~1 Hz): pitch/roll/yaw/deviation.
    Attitude,
    /// Monitoring/settlement samples (1/min to 1/hr).
    Monitoring,
}

impl Table {
    /// Returns a stable lowercase name, used for table names and poison file
    /// prefixes.
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Plc => "plc",
            Table::Attitude => "attitude",
            Table::Monitoring => "monitoring",
        }
    }
}

/// Source-specific metadata carried alongside a `Sample`. Kept small and
/// non-exhaustive since a collector variant's detail is advisory only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleMetadata {
    /// The register address the value was decoded from, for polling
    /// collectors over a binary register protocol.
    pub register_address: Option<u16>,
    /// The server-supplied timestamp, if the source attached one distinct
    /// from the collector's local poll/receive timestamp.
    pub server_timestamp_ms: Option<i64>,
}

/// One timestamped value for one tag, produced by a collector and carried
/// through the quality pipeline.
///
/// Immutable after the pipeline finishes (§3 "Ownership and lifecycle").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Identifies which configured source produced this sample.
    pub source_id: String,
    /// The tag/channel name (e.g. `thrust_total`).
    pub tag: String,
    /// Destination table this sample will be persisted into.
    pub table: Table,
    /// Milliseconds since epoch. Monotonic non-decreasing within one
    /// source's tag (§5 "Ordering guarantees").
    pub timestamp_ms: i64,
    /// The current value, after any calibration.
    pub value: f64,
    /// The value before calibration, preserved when calibration is applied.
    pub original_value: Option<f64>,
    /// The pipeline's primary verdict on this record.
    pub quality: QualityFlag,
    /// Set when the calibration stage applied a linear transform (§4.2
    /// stage 4); additive to `quality`, not a replacement for it.
    pub calibrated: bool,
    /// The ring number observed on the PLC stream at capture time, if known.
    pub ring_number: Option<i64>,
    /// Source-specific metadata.
    pub metadata: SampleMetadata,
}

impl Sample {
    /// Creates a new, unflagged `Sample` as a collector would emit it, before
    /// the quality pipeline has touched it.
    pub fn new(source_id: impl Into<String>, tag: impl Into<String>, table: Table, timestamp_ms: i64, value: f64) -> Self {
        Self {
            source_id: source_id.into(),
            tag: tag.into(),
            table,
            timestamp_ms,
            value,
            original_value: None,
            quality: QualityFlag::Good,
            calibrated: false,
            ring_number: None,
            metadata: SampleMetadata::default(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn excluded_from_aggregates_matches_spec() {
        assert!(QualityFlag::OutOfRange.excluded_from_aggregates());
        assert!(QualityFlag::PhysicallyImplausible.excluded_from_aggregates());
        assert!(QualityFlag::Missing.excluded_from_aggregates());
        assert!(!QualityFlag::Good.excluded_from_aggregates());
        assert!(!QualityFlag::Interpolated.excluded_from_aggregates());
    }

    #[test]
    fn round_trips_through_json() {
        let sample = Sample::new("plc-1", "thrust_total", Table::Plc, 1_000, 10_149.5);
        let json = serde_json::to_string(&sample).unwrap();
        let back: Sample = serde_json::from_str(&json).unwrap();
        assert_eq!(sample, back);
    }
}
