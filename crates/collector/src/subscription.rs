//! Subscription collector: the source library invokes a callback per value
//! change (§4.1 "Subscription").

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ringcore_config::SourceConfig;
use ringcore_model::{Sample, SampleMetadata, Table};

use crate::{
    backoff::Backoff,
    effect::EffectHandler,
    signal::{Signal, SignalReceiver},
    AsyncCollector, CollectorHealth, EngineHandler, Error,
};

/// One value-change event delivered by a subscription client.
#[derive(Debug, Clone)]
pub struct TagUpdate {
    /// The tag name that changed.
    pub tag: String,
    /// The new value.
    pub value: f64,
    /// The timestamp the source attached to the update, if any.
    pub server_timestamp_ms: Option<i64>,
}

/// The callback a subscription client invokes per value change. Must be
/// non-blocking (§9 "callback-driven subscription" design note): its sole
/// job is to enqueue, never to hold a lock across the boundary.
pub type SubscriptionCallback = Arc<dyn Fn(TagUpdate) + Send + Sync>;

/// The minimal capability this collector requires of a subscription-style
/// protocol client (§6 "Consumed from external collaborators"). Protocol
/// adapter bindings themselves are out of scope; this trait is the seam an
/// external crate implements against.
#[async_trait]
pub trait SubscriptionClient: Send {
    /// Opens the connection to the source.
    async fn connect(&mut self) -> Result<(), String>;
    /// Subscribes to the named tags, installing `callback` to be invoked on
    /// every value change until `close` is called.
    async fn subscribe(&mut self, tags: Vec<String>, callback: SubscriptionCallback) -> Result<(), String>;
    /// Whether the connection is currently considered live.
    fn is_connected(&self) -> bool;
    /// Closes the connection.
    async fn close(&mut self) -> Result<(), String>;
}

#[derive(Default)]
struct SharedHealth {
    connected: AtomicBool,
    last_sample_ts: AtomicI64,
    recent_failures: Mutex<Vec<Instant>>,
    recent_attempts: Mutex<Vec<Instant>>,
}

const NO_SAMPLE_TS: i64 = i64::MIN;

impl SharedHealth {
    fn snapshot(&self) -> CollectorHealth {
        let last_sample_ts = match self.last_sample_ts.load(Ordering::Relaxed) {
            NO_SAMPLE_TS => None,
            ts => Some(ts),
        };
        let window = Duration::from_secs(60);
        let now = Instant::now();
        let failures = self
            .recent_failures
            .lock()
            .expect("recent_failures lock poisoned")
            .iter()
            .filter(|t| now.duration_since(**t) < window)
            .count();
        let attempts = self
            .recent_attempts
            .lock()
            .expect("recent_attempts lock poisoned")
            .iter()
            .filter(|t| now.duration_since(**t) < window)
            .count();
        CollectorHealth {
            connected: self.connected.load(Ordering::Relaxed),
            last_sample_ts,
            error_rate_last_60s: if attempts == 0 { 0.0 } else { failures as f64 / attempts as f64 },
        }
    }

    fn record_attempt(&self) {
        self.recent_attempts.lock().expect("recent_attempts lock poisoned").push(Instant::now());
    }

    fn record_failure(&self) {
        self.recent_failures.lock().expect("recent_failures lock poisoned").push(Instant::now());
    }
}

/// A collector driven by a push-style subscription client.
pub struct SubscriptionCollector<C: SubscriptionClient> {
    name: String,
    config: SourceConfig,
    client: C,
    health: Arc<SharedHealth>,
}

impl<C: SubscriptionClient> SubscriptionCollector<C> {
    /// Creates a new subscription collector over `client`.
    pub fn new(name: String, config: SourceConfig, client: C) -> Self {
        Self {
            name,
            config,
            client,
            health: Arc::new(SharedHealth { last_sample_ts: AtomicI64::new(NO_SAMPLE_TS), ..Default::default() }),
        }
    }

    async fn connect_and_subscribe(&mut self, effect_handler: &EffectHandler) -> Result<(), Error> {
        let health = self.health.clone();
        let source_id = self.name.clone();
        let tags = self.config.tags.clone();
        let effect_handler = effect_handler.clone();

        health.record_attempt();
        self.client.connect().await.map_err(|error| {
            health.record_failure();
            Error::Collector { collector: source_id.clone(), error, context: Default::default() }
        })?;
        self.health.connected.store(true, Ordering::Relaxed);

        let tag_names: Vec<String> = tags.iter().map(|t| t.name.clone()).collect();
        let tables: std::collections::HashMap<String, Table> = tags.into_iter().map(|t| (t.name, t.table)).collect();

        let callback: SubscriptionCallback = Arc::new(move |update: TagUpdate| {
            let table = tables.get(&update.tag).copied().unwrap_or(Table::Plc);
            let mut sample = Sample::new(source_id.clone(), update.tag.clone(), table, update.server_timestamp_ms.unwrap_or(now_ms()), update.value);
            sample.metadata = SampleMetadata { server_timestamp_ms: update.server_timestamp_ms, ..Default::default() };
            health.last_sample_ts.store(sample.timestamp_ms, Ordering::Relaxed);
            // Non-blocking per the design note: drop-oldest rather than await.
            if let Err(error) = effect_handler.try_send_samples_drop_oldest(vec![sample]) {
                tracing::warn!(%error, "dropping subscription sample, pipeline channel unavailable");
            }
        });

        self.client.subscribe(tag_names, callback).await.map_err(|error| {
            self.health.connected.store(false, Ordering::Relaxed);
            Error::Collector { collector: self.name.clone(), error, context: Default::default() }
        })
    }
}

#[async_trait]
impl<C: SubscriptionClient> AsyncCollector for SubscriptionCollector<C> {
    async fn init(&mut self, _engine_handler: EngineHandler) -> Result<(), Error> {
        if self.config.tags.is_empty() {
            return Err(Error::InvalidConfig {
                collector: self.name.clone(),
                message: "source declares no tags".to_string(),
            });
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), Error> {
        self.health.connected.store(false, Ordering::Relaxed);
        self.client.close().await.map_err(|error| Error::Collector {
            collector: self.name.clone(),
            error,
            context: Default::default(),
        })
    }

    fn health(&self) -> CollectorHealth {
        self.health.snapshot()
    }

    fn health_handle(&self) -> crate::HealthHandle {
        let health = self.health.clone();
        Arc::new(move || health.snapshot())
    }

    async fn run(&mut self, mut signal_receiver: SignalReceiver, effect_handler: EffectHandler) -> Result<(), Error> {
        let mut backoff = Backoff::new(self.config.reconnect_backoff);

        if let Err(error) = self.connect_and_subscribe(&effect_handler).await {
            tracing::warn!(collector = %self.name, %error, "initial subscription connect failed, will retry with backoff");
        } else {
            backoff.reset();
        }

        // The engine starts a subscription collector's SignalReceiver with a
        // periodic timer (its sole purpose here is a connection-liveness
        // check, since there is no upstream message channel to interleave).
        loop {
            match signal_receiver.recv().await {
                Signal::Stop => break,
                Signal::TimerTick { .. } => {
                    if !self.client.is_connected() {
                        self.health.connected.store(false, Ordering::Relaxed);
                        let delay = backoff.next_delay();
                        tracing::warn!(collector = %self.name, delay_ms = delay.as_millis() as u64, "subscription disconnected, reconnecting");
                        tokio::time::sleep(delay).await;
                        if self.connect_and_subscribe(&effect_handler).await.is_ok() {
                            backoff.reset();
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

#[cfg(test)]
mod test {
    use ringcore_config::{BackoffConfig, TagDescriptor};

    use super::*;

    struct StubClient {
        connected: Arc<AtomicBool>,
        connect_calls: Arc<AtomicI64>,
    }

    #[async_trait]
    impl SubscriptionClient for StubClient {
        async fn connect(&mut self) -> Result<(), String> {
            self.connect_calls.fetch_add(1, Ordering::Relaxed);
            self.connected.store(true, Ordering::Relaxed);
            Ok(())
        }

        async fn subscribe(&mut self, _tags: Vec<String>, callback: SubscriptionCallback) -> Result<(), String> {
            callback(TagUpdate { tag: "thrust_total".to_string(), value: 10_000.0, server_timestamp_ms: Some(1000) });
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::Relaxed)
        }

        async fn close(&mut self) -> Result<(), String> {
            self.connected.store(false, Ordering::Relaxed);
            Ok(())
        }
    }

    fn test_config() -> SourceConfig {
        SourceConfig {
            name: "plc-subscription".to_string(),
            kind: ringcore_config::SourceKind::Subscription { endpoint: "opc.tcp://localhost".to_string() },
            credentials_env_var: None,
            tags: vec![TagDescriptor { name: "thrust_total".to_string(), unit: "kN".to_string(), table: Table::Plc, cadence_hint: Duration::from_secs(1) }],
            reconnect_backoff: BackoffConfig::default(),
        }
    }

    #[tokio::test]
    async fn subscribe_delivers_callback_sample_to_effect_handler() {
        let (sender, receiver) = flume::bounded(8);
        let effect_handler = EffectHandler::with_channel("plc-subscription".to_string(), sender);
        let client = StubClient { connected: Arc::new(AtomicBool::new(false)), connect_calls: Arc::new(AtomicI64::new(0)) };
        let mut collector = SubscriptionCollector::new("plc-subscription".to_string(), test_config(), client);

        collector.connect_and_subscribe(&effect_handler).await.unwrap();

        let batch = receiver.recv_async().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].tag, "thrust_total");
        assert_eq!(batch[0].value, 10_000.0);
        assert!(collector.health().connected);
    }
}
