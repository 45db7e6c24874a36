//! Per-source collector configuration (§4.1, §6).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The wire/protocol shape of a source, and the parameters specific to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    /// The source library invokes a callback per value change.
    Subscription {
        /// The endpoint the subscription client connects to.
        endpoint: String,
    },
    /// A configured block of registers is read at a fixed interval.
    Polling {
        /// The endpoint the polling client connects to.
        endpoint: String,
        /// Interval between reads. Default 1000 ms per §4.1.
        #[serde(default = "default_poll_interval")]
        poll_interval: Duration,
        /// The registers to decode on each poll.
        registers: Vec<RegisterDescriptor>,
    },
    /// A periodic HTTP fetch against an endpoint-specific JSON schema.
    PullApi {
        /// The base URL fetched on each tick.
        endpoint: String,
        /// Interval between fetches, seconds to minutes per §4.1.
        poll_interval: Duration,
        /// How the endpoint authenticates requests.
        auth: PullApiAuth,
        /// JSON-path → tag-name mappings for the response body.
        response_schema: Vec<JsonPathMapping>,
    },
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(1000)
}

/// Authentication mode for a pull-API source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PullApiAuth {
    /// No authentication.
    None,
    /// Bearer token, resolved from a named environment variable at startup.
    Bearer {
        /// The environment variable holding the token value.
        token_env_var: String,
    },
    /// HTTP basic authentication, credentials resolved from environment
    /// variables at startup.
    Basic {
        /// The environment variable holding the username.
        username_env_var: String,
        /// The environment variable holding the password.
        password_env_var: String,
    },
}

/// One register to decode on each polling read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDescriptor {
    /// The tag name this register maps to.
    pub tag: String,
    /// The register address.
    pub address: u16,
    /// How to decode the raw register bytes.
    pub encoding: RegisterEncoding,
}

/// The on-wire type of a polled register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterEncoding {
    /// 32-bit IEEE-754 float, big-endian register order.
    Float32BigEndian,
    /// 32-bit IEEE-754 float, little-endian register order.
    Float32LittleEndian,
    /// Unsigned 16-bit integer.
    Uint16,
    /// Signed 16-bit integer.
    Int16,
}

/// A JSON-path → tag-name mapping for a pull-API response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonPathMapping {
    /// The tag name this path maps to.
    pub tag: String,
    /// The JSON path into the response body (e.g. `$.readings.thrust`).
    pub json_path: String,
}

/// Reconnection backoff shared by all source kinds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// The initial backoff delay.
    pub min: Duration,
    /// The backoff ceiling.
    pub max: Duration,
    /// Jitter applied to each delay, as a fraction (e.g. 0.2 for ±20%).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(200),
            max: Duration::from_secs(30),
            jitter: default_jitter(),
        }
    }
}

/// Type/unit metadata for a tag exposed by a source, independent of how that
/// tag is physically encoded on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagDescriptor {
    /// The tag name.
    pub name: String,
    /// A human-readable unit (e.g. `kN`, `deg`, `mm`), advisory only.
    pub unit: String,
    /// The destination table this tag's samples are written to.
    pub table: ringcore_model::Table,
    /// The nominal interval between updates under normal operation, used by
    /// the interpolation stage to recognize a gap. Advisory; defaults to one
    /// second when not supplied by the source integration.
    #[serde(default = "default_cadence_hint")]
    pub cadence_hint: Duration,
}

fn default_cadence_hint() -> Duration {
    Duration::from_secs(1)
}

/// Configuration for one configured data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique name identifying this source within the pipeline.
    pub name: String,
    /// The protocol variant and its variant-specific parameters.
    pub kind: SourceKind,
    /// Credentials, if any, resolved from environment at startup. Not used
    /// by `Subscription`/`Polling`; `PullApi` resolves its own via `auth`.
    pub credentials_env_var: Option<String>,
    /// The tags this source is expected to produce.
    pub tags: Vec<TagDescriptor>,
    /// Reconnection backoff for this source.
    #[serde(default)]
    pub reconnect_backoff: BackoffConfig,
}
