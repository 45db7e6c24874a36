//! Per-tag quality-pipeline configuration (§4.2, §6).

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Threshold-validation bounds for one tag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Hard lower bound; values below this are `out_of_range`.
    pub min: f64,
    /// Hard upper bound; values above this are `out_of_range`.
    pub max: f64,
    /// Advisory low threshold; does not alter the value or flag.
    pub warn_low: Option<f64>,
    /// Advisory high threshold; does not alter the value or flag.
    pub warn_high: Option<f64>,
}

/// Interpolation parameters, shared across all tags.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InterpolationConfig {
    /// Rolling history length kept per tag. Default 8.
    #[serde(default = "default_history_len")]
    pub history_len: usize,
    /// A gap longer than this is dropped instead of interpolated. Default 10s.
    #[serde(default = "default_gap_max")]
    pub gap_max: Duration,
}

fn default_history_len() -> usize {
    8
}

fn default_gap_max() -> Duration {
    Duration::from_secs(10)
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            history_len: default_history_len(),
            gap_max: default_gap_max(),
        }
    }
}

/// A linear calibration transform for one tag: `corrected = offset + scale * raw`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// The additive offset.
    pub offset: f64,
    /// The multiplicative scale.
    pub scale: f64,
}

/// A first-derivative bound for one tag: `|Δvalue/Δt| ≤ max_rate`,
/// `max_rate` expressed as value-units per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReasonablenessConfig {
    /// The maximum allowed rate of change.
    pub max_rate: f64,
}

/// One of the closed set of named cross-tag inequalities recognized by the
/// physical-reasonableness stage. No generic expression evaluator is
/// implemented (§9 decision): only the inequalities named here exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum CrossTagRule {
    /// If `driver_tag` is strictly positive, `dependent_tag` must also be
    /// strictly positive (e.g. `advance_rate > 0 implies thrust > 0`).
    PositiveImpliesPositive {
        /// The tag whose positivity triggers the check.
        driver_tag: String,
        /// The tag that must also be positive.
        dependent_tag: String,
    },
}

/// Configuration for the quality pipeline, keyed by tag name for the
/// per-tag sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Threshold bounds, keyed by tag name.
    pub thresholds: HashMap<String, ThresholdConfig>,
    /// Interpolation parameters, shared across all tags.
    #[serde(default)]
    pub interpolation: InterpolationConfig,
    /// Calibration transforms, keyed by tag name. A tag absent here passes
    /// through calibration unchanged.
    #[serde(default)]
    pub calibration: HashMap<String, CalibrationConfig>,
    /// Per-tag rate bounds, keyed by tag name.
    #[serde(default)]
    pub reasonableness: HashMap<String, ReasonablenessConfig>,
    /// Cross-tag inequalities, evaluated independently of the per-tag rules.
    #[serde(default)]
    pub cross_tag_rules: Vec<CrossTagRule>,
    /// Whether records flagged `missing` are persisted rather than dropped.
    /// Reserved for the alternative source behavior (§9 decision); default
    /// `false` implements the mandated drop behavior.
    #[serde(default)]
    pub persist_missing: bool,
}
