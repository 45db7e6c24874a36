//! Ring aligner configuration (§3a, §4.5, §6).

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which configured PLC tags feed the `specific_energy` derived indicator,
/// and the constants its formula needs. §4.5's aligner implementation notes
/// name this as the one gap the distilled formula leaves for config to
/// close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecificEnergyConfig {
    /// The tag summed (not averaged) per ring for cumulative revolutions.
    pub revolutions_tag: String,
    /// The tag summed per ring for cumulative advance distance.
    pub advance_distance_tag: String,
    /// The tunnel cross-section area, a machine constant.
    pub cross_section_area: f64,
}

/// A static ring-number range mapped to a geological-zone label, from a
/// survey table rather than a derived computation (§3a).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeologyZone {
    /// The inclusive range of ring numbers this zone covers.
    pub ring_range: RangeInclusive<i64>,
    /// The zone label.
    pub label: String,
}

/// Parameters for the `ground_loss_rate` and `volume_loss_ratio` derived
/// indicators (§4.5 step 5: "deterministic formulas documented in the
/// config").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundLossConfig {
    /// Theoretical excavated volume for one ring (cross-section area times
    /// ring width), a machine/geometry constant in cubic meters.
    pub theoretical_volume_per_ring: f64,
    /// The aggregate-indicators key (see [`AlignerConfig::aggregate_indicators`])
    /// whose mean gives the actual grout volume injected for the ring.
    pub grout_volume_indicator: String,
    /// Converts a settlement reading (mm) into an equivalent ground-loss
    /// volume (m³) for the `ground_loss_rate` formula.
    pub settlement_area_factor: f64,
}

/// Configuration for the periodic ring-alignment job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignerConfig {
    /// How often the aligner tick runs. Default 300 s.
    #[serde(default = "default_tick_interval")]
    pub tick_interval: Duration,
    /// Window after a ring's start during which a settlement sample is
    /// still associated with it. Default 120 s.
    #[serde(default = "default_settlement_lag_window")]
    pub settlement_lag_window: Duration,
    /// Window after first write during which a RingSummary row may still
    /// be updated in place.
    #[serde(default = "default_grace_window")]
    pub grace_window: Duration,
    /// Age past which an incomplete ring is finalized as-is. Default 24 h.
    #[serde(default = "default_max_ring_age")]
    pub max_ring_age: Duration,
    /// The PLC tag whose value transitions mark ring boundaries. Default
    /// `ring_number`.
    #[serde(default = "default_ring_number_tag")]
    pub ring_number_tag: String,
    /// The monitoring tag carrying the settlement reading associated with a
    /// ring. Default `settlement_value`.
    #[serde(default = "default_settlement_tag")]
    pub settlement_tag: String,
    /// The monitoring tag carrying the displacement reading associated with
    /// a ring. Default `displacement_value`.
    #[serde(default = "default_displacement_tag")]
    pub displacement_tag: String,
    /// Tags (and their destination table) to compute mean/max/min/std over
    /// per ring, keyed by indicator name.
    pub aggregate_indicators: HashMap<String, String>,
    /// Attitude tags to aggregate per ring, keyed by indicator name.
    pub attitude_indicators: HashMap<String, String>,
    /// Parameters for the `specific_energy` derived indicator.
    pub specific_energy: SpecificEnergyConfig,
    /// Parameters for the `ground_loss_rate`/`volume_loss_ratio` derived
    /// indicators. `None` disables both, leaving them null on every ring.
    #[serde(default)]
    pub ground_loss: Option<GroundLossConfig>,
    /// Static ring-number → zone lookup.
    #[serde(default)]
    pub geology_zones: Vec<GeologyZone>,
}

fn default_ring_number_tag() -> String {
    "ring_number".to_string()
}

fn default_settlement_tag() -> String {
    "settlement_value".to_string()
}

fn default_displacement_tag() -> String {
    "displacement_value".to_string()
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_settlement_lag_window() -> Duration {
    Duration::from_secs(120)
}

fn default_grace_window() -> Duration {
    Duration::from_secs(3600)
}

fn default_max_ring_age() -> Duration {
    Duration::from_secs(24 * 3600)
}

impl AlignerConfig {
    /// Looks up the geology zone label covering `ring_number`, or `None` if
    /// no configured range covers it (§3a).
    pub fn zone_for_ring(&self, ring_number: i64) -> Option<&str> {
        self.geology_zones
            .iter()
            .find(|zone| zone.ring_range.contains(&ring_number))
            .map(|zone| zone.label.as_str())
    }
}
