//! Polling collector: reads a configured block of registers at a fixed
//! interval (§4.1 "Polling (binary register protocol)").

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ringcore_config::{RegisterEncoding, SourceConfig, SourceKind};
use ringcore_model::{Sample, SampleMetadata, Table};

use crate::{
    backoff::Backoff,
    effect::EffectHandler,
    signal::{Signal, SignalReceiver},
    AsyncCollector, CollectorHealth, EngineHandler, Error,
};

/// The raw bytes read back for one register address.
pub type RawRegisterValue = [u8; 4];

/// The minimal capability this collector requires of a binary register
/// protocol client (§6 "Consumed from external collaborators").
#[async_trait]
pub trait PollingClient: Send {
    /// Opens the connection to the source.
    async fn connect(&mut self) -> Result<(), String>;
    /// Reads the given register addresses, returning raw bytes per address.
    async fn read_registers(&mut self, addresses: &[u16]) -> Result<HashMap<u16, RawRegisterValue>, String>;
    /// Closes the connection.
    async fn close(&mut self) -> Result<(), String>;
}

fn decode(bytes: RawRegisterValue, encoding: RegisterEncoding) -> f64 {
    match encoding {
        RegisterEncoding::Float32BigEndian => f32::from_be_bytes(bytes) as f64,
        RegisterEncoding::Float32LittleEndian => f32::from_le_bytes(bytes) as f64,
        RegisterEncoding::Uint16 => u16::from_be_bytes([bytes[0], bytes[1]]) as f64,
        RegisterEncoding::Int16 => i16::from_be_bytes([bytes[0], bytes[1]]) as f64,
    }
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
        let failures = self.recent_failures.lock().expect("lock poisoned").iter().filter(|t| now.duration_since(**t) < window).count();
        let attempts = self.recent_attempts.lock().expect("lock poisoned").iter().filter(|t| now.duration_since(**t) < window).count();
        CollectorHealth {
            connected: self.connected.load(Ordering::Relaxed),
            last_sample_ts,
            error_rate_last_60s: if attempts == 0 { 0.0 } else { failures as f64 / attempts as f64 },
        }
    }
}

/// A collector driven by periodic register reads.
pub struct PollingCollector<C: PollingClient> {
    name: String,
    config: SourceConfig,
    client: C,
    health: Arc<SharedHealth>,
}

impl<C: PollingClient> PollingCollector<C> {
    /// Creates a new polling collector over `client`.
    pub fn new(name: String, config: SourceConfig, client: C) -> Self {
        Self {
            name,
            config,
            client,
            health: Arc::new(SharedHealth { last_sample_ts: AtomicI64::new(NO_SAMPLE_TS), ..Default::default() }),
        }
    }

    fn registers(&self) -> Result<&[ringcore_config::RegisterDescriptor], Error> {
        match &self.config.kind {
            SourceKind::Polling { registers, .. } => Ok(registers),
            _ => Err(Error::InvalidConfig { collector: self.name.clone(), message: "polling collector requires SourceKind::Polling".to_string() }),
        }
    }

    async fn poll_once(&mut self, effect_handler: &EffectHandler) -> Result<(), Error> {
        let registers = self.registers()?.to_vec();
        let addresses: Vec<u16> = registers.iter().map(|r| r.address).collect();

        self.health.recent_attempts.lock().expect("lock poisoned").push(Instant::now());

        let raw = self.client.read_registers(&addresses).await;
        let raw = match raw {
            Ok(raw) => {
                self.health.connected.store(true, Ordering::Relaxed);
                raw
            }
            Err(error) => {
                self.health.connected.store(false, Ordering::Relaxed);
                self.health.recent_failures.lock().expect("lock poisoned").push(Instant::now());
                tracing::warn!(collector = %self.name, %error, "register read failed, tags held as missing for this tick");
                return Err(Error::Collector { collector: self.name.clone(), error, context: Default::default() });
            }
        };

        let poll_ts = now_ms();
        let tables: HashMap<String, Table> = self.config.tags.iter().map(|t| (t.name.clone(), t.table)).collect();
        let mut batch = Vec::with_capacity(registers.len());

        for register in &registers {
            match raw.get(&register.address) {
                Some(bytes) => {
                    let value = decode(*bytes, register.encoding);
                    let table = tables.get(&register.tag).copied().unwrap_or(Table::Plc);
                    let mut sample = Sample::new(self.name.clone(), register.tag.clone(), table, poll_ts, value);
                    sample.metadata = SampleMetadata { register_address: Some(register.address), ..Default::default() };
                    batch.push(sample);
                }
                None => {
                    // Per §4.1: a missing register on an otherwise successful
                    // read is tracked for accounting only, never enqueued.
                    tracing::debug!(collector = %self.name, tag = %register.tag, "register absent from read, treated as missing");
                }
            }
        }

        self.health.last_sample_ts.store(poll_ts, Ordering::Relaxed);
        effect_handler.send_samples(batch).await
    }
}

#[async_trait]
impl<C: PollingClient> AsyncCollector for PollingCollector<C> {
    async fn init(&mut self, _engine_handler: EngineHandler) -> Result<(), Error> {
        self.registers()?;
        self.client.connect().await.map_err(|error| Error::Collector { collector: self.name.clone(), error, context: Default::default() })
    }

    async fn stop(&mut self) -> Result<(), Error> {
        self.client.close().await.map_err(|error| Error::Collector { collector: self.name.clone(), error, context: Default::default() })
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

        loop {
            match signal_receiver.recv().await {
                Signal::Stop => break,
                Signal::TimerTick { .. } => match self.poll_once(&effect_handler).await {
                    Ok(()) => backoff.reset(),
                    Err(_) => {
                        let delay = backoff.next_delay();
                        tokio::time::sleep(delay).await;
                    }
                },
            }
        }
        Ok(())
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).expect("system clock before unix epoch").as_millis() as i64
}
