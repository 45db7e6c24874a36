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

//! Wiring: the "sixth, ambient" component that assembles collectors, one
//! quality-pipeline instance per collector, the buffer writer, the local
//! store, and the ring aligner into one running edge-node process (§2, §5).
//!
//! Every collector's `AsyncCollector::run` is driven on its own task,
//! interleaved with a liveness/poll timer exactly as the teacher engine
//! interleaves a processor's timer with its inbound channel. A second task
//! per collector owns that collector's [`QualityPipeline`] instance and
//! forwards its output to the buffer writer over a channel — mirroring the
//! teacher's processor-to-exporter wiring rather than the buffer writer
//! calling back into collector internals directly.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ringcore_buffer::BufferWriter;
use ringcore_collector::effect::EffectHandler;
use ringcore_collector::signal::SignalReceiver as CollectorSignalReceiver;
use ringcore_collector::{AsyncCollector, CollectorHealth, CollectorsController, EngineHandler, HealthHandle};
use ringcore_config::ConfigHandle;
use ringcore_model::{Sample, Table};
use ringcore_pipeline::QualityPipeline;
use ringcore_signal::SignalReceiver as BufferSignalReceiver;
use ringcore_store::Store;
use ringcore_task::labels::{ProcessLabels, TaskLabels};
use ringcore_task::TaskManager;

/// How often a collector's pipeline worker drives [`QualityPipeline::tick`]
/// to resolve gaps whose forward sample never arrived. An implementation
/// scheduling detail, not a configured parameter: §4.2 only bounds the
/// deferred-emission window by `gap_max_seconds`, not the granularity this
/// checks it at.
const PIPELINE_TICK_INTERVAL: Duration = Duration::from_millis(1_000);

/// Capacity of the channel each collector's pipeline worker feeds the
/// buffer writer through, and of the channel feeding each collector's
/// pipeline worker from its `EffectHandler`.
const WORKER_CHANNEL_CAPACITY: usize = 4_096;

/// Errors raised while starting or running the engine.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A collector failed `init()` — a configuration or auth error, which
    /// fails fast rather than entering the run loop (§4.1, §7).
    #[error("collector '{name}' failed to start: {source}")]
    CollectorInit {
        /// The collector's configured name.
        name: String,
        /// The underlying collector error.
        #[source]
        source: ringcore_collector::Error,
    },

    /// The local store could not be opened.
    #[error("local store error: {0}")]
    Store(#[from] ringcore_store::Error),
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before unix epoch").as_millis() as i64
}

/// One configured collector paired with the `AsyncCollector` implementation
/// that drives it.
///
/// Constructing the concrete protocol client (`SubscriptionClient` /
/// `PollingClient` / the pull-API's `reqwest::Client`) is the caller's job —
/// those adapter bindings are external collaborators out of this core's
/// scope (§6) — so the engine only ever receives an already-built collector
/// plus the timer cadence its variant runs on.
pub struct CollectorHandle {
    /// The configured source name; used for health reporting and to key the
    /// collector's control channel in [`CollectorsController`].
    pub name: String,
    /// The collector implementation to run.
    pub collector: Box<dyn AsyncCollector>,
    /// The interval at which this collector's `SignalReceiver` delivers a
    /// `TimerTick` — the poll interval for polling/pull-API variants, a
    /// connection-liveness check interval for subscription (§4.1).
    pub timer_interval: Duration,
}

/// Aggregate point-in-time status of every running component, the payload
/// behind §6 `health()`.
#[derive(Debug, Clone, Default)]
pub struct EngineHealth {
    /// Per-collector health, keyed by source name.
    pub collectors: HashMap<String, CollectorHealth>,
    /// Resident record count per destination table, awaiting flush.
    pub buffer_depths: HashMap<Table, usize>,
    /// Timestamp of the buffer writer's most recent flush attempt, if any.
    pub last_flush_ms: Option<i64>,
    /// Count of ring-number regressions observed by the buffer writer's
    /// `RingTracker` (§9 decision: a hard, surfaced condition).
    pub ring_number_regressions: u64,
    /// Total records discarded to make room under `OverflowPolicy::DropOldest`
    /// across every destination table (§4.3, §8 seed scenario 4).
    pub overflow_dropped_oldest: u64,
    /// Total incoming records discarded under `OverflowPolicy::DropNewest`
    /// across every destination table (§4.3).
    pub overflow_dropped_newest: u64,
    /// Timestamp of the most recent aligner tick, if one has run yet.
    pub last_aligner_tick_ms: Option<i64>,
    /// Whether the local store answered a trivial read without error.
    pub db_writable: bool,
}

/// The running engine. Owns every long-lived task and the shared handles
/// the root facade (§6) needs to expose `list_rings`/`get_ring`/
/// `submit_manual_logs`/`health`.
pub struct Engine {
    task_manager: TaskManager,
    collectors_controller: CollectorsController,
    health_handles: Mutex<HashMap<String, HealthHandle>>,
    buffer: Arc<BufferWriter>,
    store: Arc<Store>,
    config: ConfigHandle,
    aligner_shutdown: tokio::sync::watch::Sender<bool>,
    last_aligner_tick_ms: Arc<AtomicI64>,
    /// The engine's own clone of the buffer-feeding channel sender, held
    /// only so shutdown can drop it: once every pipeline worker has also
    /// dropped its clone, the channel disconnects and the buffer writer's
    /// `SignalReceiver` resolves to `Signal::Stop` (§4.3 shutdown flush).
    buffer_tx_keepalive: Mutex<Option<flume::Sender<Vec<Sample>>>>,
}

impl Engine {
    /// The current configuration snapshot handle.
    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /// The local store handle, shared with the aligner and the facade's
    /// read paths.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The buffer writer handle, shared with `submit_manual_logs`.
    pub fn buffer(&self) -> &Arc<BufferWriter> {
        &self.buffer
    }

    /// Opens the store, starts the buffer writer and ring aligner, and
    /// spawns one collector task plus one pipeline-worker task per entry in
    /// `collectors` (§5 "parallel, message-passing workers").
    pub async fn start(
        config: ConfigHandle,
        process_labels: ProcessLabels,
        collectors: Vec<CollectorHandle>,
        poison_dir: impl Into<PathBuf>,
    ) -> Result<Self, Error> {
        let snapshot = config.load();
        let store = Arc::new(Store::open(&snapshot.store)?);

        let buffer = Arc::new(BufferWriter::new(snapshot.buffer, snapshot.aligner.ring_number_tag.clone(), store.clone(), poison_dir));

        let (buffer_tx, buffer_rx) = flume::bounded::<Vec<Sample>>(WORKER_CHANNEL_CAPACITY);
        let buffer_signal_receiver = BufferSignalReceiver::with_receiver_timer(buffer_rx, snapshot.buffer.flush_interval, 0);

        let mut task_manager = TaskManager::with_process_labels(process_labels.clone());

        {
            let buffer = buffer.clone();
            let task_labels = TaskLabels::new("buffer", "writer", "store");
            let cleanup_labels = task_labels.clone();
            let cleanup_process_labels = process_labels.clone();
            let handle = tokio::spawn(async move {
                buffer.run(buffer_signal_receiver, now_ms).await;
                TaskManager::no_task_cleaner(cleanup_process_labels, cleanup_labels)
            });
            task_manager.register(handle, &task_labels);
        }

        let (aligner_shutdown_tx, aligner_shutdown_rx) = tokio::sync::watch::channel(false);
        let last_aligner_tick_ms = Arc::new(AtomicI64::new(i64::MIN));
        {
            let store = store.clone();
            let config = config.clone();
            let last_tick = last_aligner_tick_ms.clone();
            let task_labels = TaskLabels::new("aligner", "tick", "store");
            let cleanup_labels = task_labels.clone();
            let cleanup_process_labels = process_labels.clone();
            let handle = tokio::spawn(async move {
                run_aligner(store, config, aligner_shutdown_rx, last_tick).await;
                TaskManager::no_task_cleaner(cleanup_process_labels, cleanup_labels)
            });
            task_manager.register(handle, &task_labels);
        }

        let mut collectors_controller = CollectorsController::default();
        let mut health_handles = HashMap::new();

        for handle in collectors {
            spawn_collector(&mut task_manager, &mut collectors_controller, &mut health_handles, process_labels.clone(), handle, buffer_tx.clone(), config.clone())
                .await?;
        }

        Ok(Self {
            task_manager,
            collectors_controller,
            health_handles: Mutex::new(health_handles),
            buffer,
            store,
            config,
            aligner_shutdown: aligner_shutdown_tx,
            last_aligner_tick_ms,
            buffer_tx_keepalive: Mutex::new(Some(buffer_tx)),
        })
    }

    /// Aggregate status snapshot for §6 `health()`.
    pub fn health(&self) -> EngineHealth {
        let collectors = self.health_handles.lock().expect("health handles mutex poisoned").iter().map(|(name, handle)| (name.clone(), handle())).collect();
        let last_aligner_tick_ms = match self.last_aligner_tick_ms.load(Ordering::Relaxed) {
            i64::MIN => None,
            ts => Some(ts),
        };
        EngineHealth {
            collectors,
            buffer_depths: self.buffer.depths(),
            last_flush_ms: self.buffer.last_flush_ms(),
            ring_number_regressions: self.buffer.ring_number_regressions(),
            overflow_dropped_oldest: self.buffer.overflow_dropped_oldest(),
            overflow_dropped_newest: self.buffer.overflow_dropped_newest(),
            last_aligner_tick_ms,
            db_writable: self.store.max_ring_number(Table::Plc).is_ok(),
        }
    }

    /// Cooperative shutdown (§5 "Cancellation"): stops every collector,
    /// stops the aligner, lets the buffer writer's channel disconnect once
    /// every pipeline worker has drained and exited, and flushes whatever
    /// remains. Waits up to `config.buffer.shutdown_grace` for every
    /// registered task to finish; a timeout is logged, not panicked on.
    pub async fn shutdown(&self) {
        self.collectors_controller.stop_all();
        let _ = self.aligner_shutdown.send(true);
        if let Some(keepalive) = self.buffer_tx_keepalive.lock().expect("buffer keepalive mutex poisoned").take() {
            drop(keepalive);
        }

        let grace = self.config.load().buffer.shutdown_grace;
        match tokio::time::timeout(grace, self.task_manager.join()).await {
            Ok(()) => tracing::info!("engine shut down cleanly"),
            Err(_) => tracing::warn!(grace_secs = grace.as_secs(), "shutdown grace period elapsed with tasks still running"),
        }
    }
}

async fn spawn_collector(
    task_manager: &mut TaskManager,
    collectors_controller: &mut CollectorsController,
    health_handles: &mut HashMap<String, HealthHandle>,
    process_labels: ProcessLabels,
    handle: CollectorHandle,
    buffer_tx: flume::Sender<Vec<Sample>>,
    config: ConfigHandle,
) -> Result<(), Error> {
    let CollectorHandle { name, mut collector, timer_interval } = handle;

    collector
        .init(EngineHandler::new(task_manager.clone()))
        .await
        .map_err(|source| Error::CollectorInit { name: name.clone(), source })?;

    let _ = health_handles.insert(name.clone(), collector.health_handle());

    let (control_tx, control_rx) = tokio::sync::mpsc::channel(8);
    collectors_controller.add_collector(name.clone(), control_tx);

    let (effect_tx, effect_rx) = flume::bounded::<Vec<Sample>>(WORKER_CHANNEL_CAPACITY);
    let effect_handler = EffectHandler::with_channel(name.clone(), effect_tx);

    let collector_task_labels = TaskLabels::new("collector", &name, &name);
    let cleanup_process_labels = process_labels.clone();
    let cleanup_task_labels = collector_task_labels.clone();
    let collector_name = name.clone();
    let collector_handle = tokio::spawn(async move {
        let signal_receiver = CollectorSignalReceiver::with_receiver_timer(control_rx, timer_interval, 0);
        if let Err(error) = collector.run(signal_receiver, effect_handler).await {
            tracing::error!(collector = %collector_name, %error, "collector run loop exited with an error");
        }
        if let Err(error) = collector.stop().await {
            tracing::warn!(collector = %collector_name, %error, "collector stop failed");
        }
        TaskManager::no_task_cleaner(cleanup_process_labels, cleanup_task_labels)
    });
    task_manager.register(collector_handle, &collector_task_labels);

    let pipeline_task_labels = TaskLabels::new("pipeline", &name, &name);
    let cleanup_process_labels = process_labels.clone();
    let cleanup_task_labels = pipeline_task_labels.clone();
    let pipeline_source_id = name.clone();
    let pipeline_handle = tokio::spawn(async move {
        run_pipeline_worker(QualityPipeline::new(pipeline_source_id), effect_rx, buffer_tx, config).await;
        TaskManager::no_task_cleaner(cleanup_process_labels, cleanup_task_labels)
    });
    task_manager.register(pipeline_handle, &pipeline_task_labels);

    Ok(())
}

/// Owns one collector's [`QualityPipeline`] instance exclusively (§9
/// "rolling per-tag state... no global map guarded by a mutex") and forwards
/// its output to the buffer writer. Exits once its `effect_rx` disconnects,
/// i.e. once the paired collector task has stopped.
async fn run_pipeline_worker(mut pipeline: QualityPipeline, effect_rx: flume::Receiver<Vec<Sample>>, buffer_tx: flume::Sender<Vec<Sample>>, config: ConfigHandle) {
    let mut ticker = tokio::time::interval(PIPELINE_TICK_INTERVAL);
    loop {
        tokio::select! {
            incoming = effect_rx.recv_async() => {
                let Ok(batch) = incoming else { return };
                let snapshot = config.load();
                let mut emitted = Vec::with_capacity(batch.len());
                for sample in batch {
                    emitted.extend(pipeline.process(&snapshot, sample).emitted);
                }
                if !emitted.is_empty() && buffer_tx.send_async(emitted).await.is_err() {
                    return;
                }
            }
            _ = ticker.tick() => {
                let output = pipeline.tick(now_ms());
                if !output.emitted.is_empty() && buffer_tx.send_async(output.emitted).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Drives [`ringcore_aligner::tick`] on `config.aligner.tick_interval` until
/// `shutdown` fires, recording the timestamp of each tick for `health()`.
async fn run_aligner(store: Arc<Store>, config: ConfigHandle, mut shutdown: tokio::sync::watch::Receiver<bool>, last_tick_ms: Arc<AtomicI64>) {
    let mut interval = tokio::time::interval(config.load().aligner.tick_interval);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let snapshot = config.load();
                let now = now_ms();
                match ringcore_aligner::tick(&store, &snapshot.aligner, now) {
                    Ok(processed) if !processed.is_empty() => tracing::debug!(count = processed.len(), "aligner tick processed rings"),
                    Ok(_) => {}
                    Err(error) => tracing::error!(%error, "aligner tick failed"),
                }
                last_tick_ms.store(now, Ordering::Relaxed);
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}
