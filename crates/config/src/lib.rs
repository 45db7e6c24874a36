#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! Configuration value structs for the edge pipeline core.
//!
//! This crate never parses text. A `PipelineConfig` is assembled by an
//! out-of-scope config layer from whatever text format it chooses, and
//! handed to [`ConfigHandle::new`] as an already-validated value. Every
//! reader shares one snapshot via [`ArcSwap`](arc_swap::ArcSwap); a reload
//! publishes a new immutable snapshot without blocking in-flight readers.

pub mod aligner;
pub mod buffer;
pub mod quality;
pub mod source;
pub mod store;

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use aligner::{AlignerConfig, GeologyZone, SpecificEnergyConfig};
pub use buffer::{BufferConfig, OverflowPolicy};
pub use quality::{
    CalibrationConfig, CrossTagRule, InterpolationConfig, QualityConfig, ReasonablenessConfig, ThresholdConfig,
};
pub use source::{BackoffConfig, JsonPathMapping, PullApiAuth, RegisterDescriptor, RegisterEncoding, SourceConfig, SourceKind, TagDescriptor};
pub use store::StoreConfig;

/// Errors raised while validating a configuration value before it is
/// published as a snapshot.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Two sources share the same name.
    #[error("duplicate source name '{source}'")]
    DuplicateSource {
        /// The duplicated name.
        source: String,
    },

    /// A cross-tag rule or aligner indicator references a tag not declared
    /// by any configured source.
    #[error("tag '{tag}' referenced by '{reference}' is not declared by any source")]
    UnknownTagReference {
        /// The undeclared tag name.
        tag: String,
        /// What referenced it (e.g. a cross-tag rule, an aggregate indicator).
        reference: String,
    },

    /// A threshold's `min` is not less than its `max`.
    #[error("threshold for tag '{tag}' has min ({min}) >= max ({max})")]
    InvalidThreshold {
        /// The tag whose threshold is invalid.
        tag: String,
        /// The configured lower bound.
        min: f64,
        /// The configured upper bound.
        max: f64,
    },
}

/// The full, resolved configuration for one running edge-node instance.
///
/// This is the value every other crate in the workspace treats as opaque
/// input: it is constructed once per reload by the out-of-scope config
/// layer and published via [`ConfigHandle`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Configured data sources, keyed by name.
    pub sources: Vec<SourceConfig>,
    /// Quality-pipeline parameters.
    pub quality: QualityConfig,
    /// Buffer writer parameters.
    pub buffer: BufferConfig,
    /// Ring aligner parameters.
    pub aligner: AlignerConfig,
    /// Local store parameters.
    pub store: StoreConfig,
}

impl PipelineConfig {
    /// Validates cross-section consistency that a single value struct
    /// cannot express in its types alone (duplicate names, dangling tag
    /// references, inverted thresholds).
    pub fn validate(&self) -> Result<(), Error> {
        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.name.as_str()) {
                return Err(Error::DuplicateSource {
                    source: source.name.clone(),
                });
            }
        }

        for (tag, threshold) in &self.quality.thresholds {
            if threshold.min >= threshold.max {
                return Err(Error::InvalidThreshold {
                    tag: tag.clone(),
                    min: threshold.min,
                    max: threshold.max,
                });
            }
        }

        let known_tags: std::collections::HashSet<&str> = self
            .sources
            .iter()
            .flat_map(|source| source.tags.iter())
            .map(|tag| tag.name.as_str())
            .collect();

        for rule in &self.quality.cross_tag_rules {
            let CrossTagRule::PositiveImpliesPositive { driver_tag, dependent_tag } = rule;
            for tag in [driver_tag, dependent_tag] {
                if !known_tags.contains(tag.as_str()) {
                    return Err(Error::UnknownTagReference {
                        tag: tag.clone(),
                        reference: "cross_tag_rule".to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// A hot-reloadable handle to the current [`PipelineConfig`].
///
/// Readers call [`ConfigHandle::load`] once per record or batch and run to
/// completion against that snapshot (§9 "Config hot-reload" design note);
/// a reload publishes a new snapshot without disturbing in-flight readers.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<ArcSwap<PipelineConfig>>,
}

impl ConfigHandle {
    /// Validates `config` and wraps it in a fresh handle.
    pub fn new(config: PipelineConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ArcSwap::new(Arc::new(config))),
        })
    }

    /// Returns the currently published configuration snapshot.
    pub fn load(&self) -> Arc<PipelineConfig> {
        self.inner.load_full()
    }

    /// Validates `config` and publishes it as the new current snapshot.
    /// Readers already holding an older `Arc<PipelineConfig>` keep running
    /// against it; new `load()` calls see the update immediately.
    pub fn reload(&self, config: PipelineConfig) -> Result<(), Error> {
        config.validate()?;
        self.inner.store(Arc::new(config));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;
    use crate::aligner::SpecificEnergyConfig;

    fn minimal_config() -> PipelineConfig {
        PipelineConfig {
            sources: vec![],
            quality: QualityConfig::default(),
            buffer: BufferConfig::default(),
            aligner: AlignerConfig {
                tick_interval: std::time::Duration::from_secs(300),
                settlement_lag_window: std::time::Duration::from_secs(120),
                grace_window: std::time::Duration::from_secs(3600),
                max_ring_age: std::time::Duration::from_secs(24 * 3600),
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
    fn validate_accepts_minimal_config() {
        assert!(minimal_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_inverted_threshold() {
        let mut config = minimal_config();
        config
            .quality
            .thresholds
            .insert("thrust_total".to_string(), ThresholdConfig { min: 100.0, max: 0.0, warn_low: None, warn_high: None });
        assert!(matches!(config.validate(), Err(Error::InvalidThreshold { .. })));
    }

    #[test]
    fn reload_is_visible_to_new_loads() {
        let handle = ConfigHandle::new(minimal_config()).unwrap();
        let first = handle.load();
        assert_eq!(first.buffer.max_size, 10_000);

        let mut updated = minimal_config();
        updated.buffer.max_size = 42;
        handle.reload(updated).unwrap();

        assert_eq!(handle.load().buffer.max_size, 42);
        // the snapshot the first reader holds is untouched
        assert_eq!(first.buffer.max_size, 10_000);
    }
}
