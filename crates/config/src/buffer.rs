//! Buffer writer configuration (§4.3, §6).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to do with an incoming or resident record when `max_size` would be
/// exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the oldest resident record, incrementing
    /// `overflow_dropped_oldest`.
    DropOldest,
    /// Discard the incoming record, incrementing `overflow_dropped_newest`.
    DropNewest,
    /// Block the appending task until space frees. Debugging only; the
    /// default config never selects this.
    Block,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::DropOldest
    }
}

/// Configuration for the bounded per-table FIFO and its flush triggers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Maximum resident records per destination table. Default 10 000.
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// Resident record count that triggers an early flush. Default 1 000.
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
    /// Wall-clock interval between time-triggered flushes. Default 5 s.
    #[serde(default = "default_flush_interval")]
    pub flush_interval: Duration,
    /// Policy applied when `max_size` would be exceeded on append.
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    /// Grace period for the shutdown drain before remaining records are
    /// poisoned. Default 30 s.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: Duration,
}

fn default_max_size() -> usize {
    10_000
}

fn default_flush_threshold() -> usize {
    1_000
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(30)
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            flush_threshold: default_flush_threshold(),
            flush_interval: default_flush_interval(),
            overflow_policy: OverflowPolicy::default(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}
