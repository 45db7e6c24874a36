//! Local store configuration (§4.4, §6).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Configuration for the embedded database file and its retention policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the single database file. Default `data/edge.db`.
    #[serde(default = "default_path")]
    pub path: String,
    /// Retention in days per table name (`plc`, `attitude`, `monitoring`,
    /// `ring_summary`). A table absent here is retained indefinitely.
    #[serde(default)]
    pub retention_days: HashMap<String, u32>,
}

fn default_path() -> String {
    "data/edge.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            retention_days: HashMap::new(),
        }
    }
}
