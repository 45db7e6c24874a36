#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! Source collectors: one per configured data source, each producing a
//! lazy, infinite sequence of [`Sample`](ringcore_model::Sample)s.

pub mod backoff;
pub mod effect;
pub mod pull_api;
pub mod polling;
pub mod signal;
pub mod subscription;

use std::collections::HashMap;

use async_trait::async_trait;
use ringcore_task::TaskManager;
use tokio::sync::mpsc::Sender;

use crate::{
    effect::EffectHandler,
    signal::{Signal, SignalReceiver},
};

/// Errors raised by a collector.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The collector's configuration is invalid; collectors fail fast on
    /// this class of error rather than entering the run loop (§4.1, §7).
    #[error("invalid configuration (collector: {collector}, reason: {message})")]
    InvalidConfig {
        /// The collector name.
        collector: String,
        /// The error message.
        message: String,
    },

    /// The collector failed for some reason while running.
    #[error("collector error (collector: {collector}, reason: {error}, context: {context:?})")]
    Collector {
        /// The collector name.
        collector: String,
        /// The error message.
        error: String,
        /// Structured context for the failure.
        context: HashMap<String, String>,
    },

    /// A required environment variable (credential or token) was not set.
    #[error("environment variable '{var}' not set (collector: {collector})")]
    MissingEnvVar {
        /// The collector name.
        collector: String,
        /// The environment variable name.
        var: String,
    },
}

/// A handler that can be used by a collector to interact with the engine it
/// is running under.
pub struct EngineHandler {
    task_manager: TaskManager,
}

impl EngineHandler {
    /// Creates a new `EngineHandler`.
    pub fn new(task_manager: TaskManager) -> Self {
        Self { task_manager }
    }

    /// Returns the task manager.
    pub fn task_manager(&self) -> TaskManager {
        self.task_manager.clone()
    }
}

/// Point-in-time health of a collector (§4.1 `health()` contract).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CollectorHealth {
    /// Whether the collector currently has a live connection to its source.
    pub connected: bool,
    /// Timestamp of the most recent sample produced, if any.
    pub last_sample_ts: Option<i64>,
    /// Fraction of attempts that failed in the last 60 seconds.
    pub error_rate_last_60s: f64,
}

/// A cheap, cloneable closure over a collector's shared health state.
///
/// `AsyncCollector::run` takes the collector by `&mut self` for the whole
/// duration of its intake loop, so nothing outside that loop can call
/// `health()` directly once the engine has spawned it. `health_handle` is
/// taken once, before the collector is moved into its task, so the engine's
/// `health()` surface (§6) can still read the latest snapshot at any time.
pub type HealthHandle = std::sync::Arc<dyn Fn() -> CollectorHealth + Send + Sync>;

/// The shared behavior of every source collector variant.
///
/// Mirrors the shape of a receiver in a generic pipeline engine
/// (`init`/`stop`/mandatory run loop), specialized here to a single message
/// type since this domain has exactly one: [`Sample`](ringcore_model::Sample).
#[async_trait]
pub trait AsyncCollector: Send {
    /// Called once before `run`. Fails fast on configuration/auth errors
    /// (§4.1 "Failure semantics").
    async fn init(&mut self, _engine_handler: EngineHandler) -> Result<(), Error> {
        Ok(())
    }

    /// Called when the collector is stopped, to release any held resources.
    async fn stop(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Returns the collector's current health.
    fn health(&self) -> CollectorHealth;

    /// Returns a handle that can be read after this collector has been
    /// moved into its own task (§6 `health()`).
    fn health_handle(&self) -> HealthHandle;

    /// Runs the collector's intake loop until a `Signal::Stop` is received.
    async fn run(&mut self, signal_receiver: SignalReceiver, effect_handler: EffectHandler) -> Result<(), Error>;
}

/// Collector manager: tracks the control channel for every running
/// collector so the engine can signal a graceful stop.
#[derive(Default)]
pub struct CollectorsController {
    collectors: HashMap<String, Sender<Signal>>,
}

impl CollectorsController {
    /// Registers a running collector's control channel.
    pub fn add_collector(&mut self, collector_name: String, sender: Sender<Signal>) {
        let _ = self.collectors.insert(collector_name, sender);
    }

    /// Signals every registered collector to stop.
    pub fn stop_all(&self) {
        for (collector_name, sender) in self.collectors.iter() {
            tracing::info!(%collector_name, "stopping collector");
            if let Err(error) = sender.try_send(Signal::Stop) {
                tracing::error!(%error, %collector_name, "sending stop signal to collector failed");
            }
        }
    }

    /// Signals one collector, by name, to stop.
    pub fn stop_collector(&self, collector_name: &str) {
        if let Some(sender) = self.collectors.get(collector_name) {
            if let Err(error) = sender.try_send(Signal::Stop) {
                tracing::error!(%error, %collector_name, "sending stop signal to collector failed");
            }
        }
    }
}
