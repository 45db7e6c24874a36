//! Pull-API collector: a periodic HTTP fetch against an endpoint-specific
//! JSON schema (§4.1 "Pull API (HTTP)").

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ringcore_config::{PullApiAuth, SourceConfig, SourceKind};
use ringcore_model::{Sample, Table};

use crate::{
    backoff::Backoff,
    effect::EffectHandler,
    signal::{Signal, SignalReceiver},
    AsyncCollector, CollectorHealth, EngineHandler, Error,
};

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

/// Extracts a scalar at `json_path` (a restricted dot-path of the form
/// `$.a.b.c`) from an already-parsed JSON response body.
fn extract(body: &serde_json::Value, json_path: &str) -> Option<f64> {
    let path = json_path.strip_prefix("$.").unwrap_or(json_path);
    let mut current = body;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    current.as_f64()
}

/// A collector driven by periodic HTTP fetches.
pub struct PullApiCollector {
    name: String,
    config: SourceConfig,
    client: reqwest::Client,
    health: Arc<SharedHealth>,
}

impl PullApiCollector {
    /// Creates a new pull-API collector.
    pub fn new(name: String, config: SourceConfig) -> Self {
        Self {
            name,
            config,
            client: reqwest::Client::new(),
            health: Arc::new(SharedHealth { last_sample_ts: AtomicI64::new(NO_SAMPLE_TS), ..Default::default() }),
        }
    }

    fn kind(&self) -> Result<(&str, &PullApiAuth, &[ringcore_config::JsonPathMapping]), Error> {
        match &self.config.kind {
            SourceKind::PullApi { endpoint, auth, response_schema, .. } => Ok((endpoint.as_str(), auth, response_schema)),
            _ => Err(Error::InvalidConfig {
                collector: self.name.clone(),
                message: "pull-API collector requires SourceKind::PullApi".to_string(),
            }),
        }
    }

    async fn fetch_once(&mut self, effect_handler: &EffectHandler) -> Result<(), Error> {
        let (endpoint, auth, schema) = self.kind()?;
        let mut request = self.client.get(endpoint);
        request = match auth {
            PullApiAuth::None => request,
            PullApiAuth::Bearer { token_env_var } => {
                let token = std::env::var(token_env_var).map_err(|_| Error::MissingEnvVar {
                    collector: self.name.clone(),
                    var: token_env_var.clone(),
                })?;
                request.bearer_auth(token)
            }
            PullApiAuth::Basic { username_env_var, password_env_var } => {
                let username = std::env::var(username_env_var).map_err(|_| Error::MissingEnvVar {
                    collector: self.name.clone(),
                    var: username_env_var.clone(),
                })?;
                let password = std::env::var(password_env_var).map_err(|_| Error::MissingEnvVar {
                    collector: self.name.clone(),
                    var: password_env_var.clone(),
                })?;
                request.basic_auth(username, Some(password))
            }
        };

        self.health.recent_attempts.lock().expect("lock poisoned").push(Instant::now());

        let response = request.send().await.and_then(|r| r.error_for_status());
        let body: serde_json::Value = match response {
            Ok(response) => match response.json().await {
                Ok(body) => body,
                Err(error) => return self.record_failure(error.to_string()),
            },
            Err(error) => return self.record_failure(error.to_string()),
        };

        self.health.connected.store(true, Ordering::Relaxed);

        let poll_ts = now_ms();
        let tables: std::collections::HashMap<String, Table> = self.config.tags.iter().map(|t| (t.name.clone(), t.table)).collect();
        let mut batch = Vec::with_capacity(schema.len());
        for mapping in schema {
            match extract(&body, &mapping.json_path) {
                Some(value) => {
                    let table = tables.get(&mapping.tag).copied().unwrap_or(Table::Monitoring);
                    batch.push(Sample::new(self.name.clone(), mapping.tag.clone(), table, poll_ts, value));
                }
                None => tracing::debug!(collector = %self.name, tag = %mapping.tag, json_path = %mapping.json_path, "json path absent from response"),
            }
        }

        self.health.last_sample_ts.store(poll_ts, Ordering::Relaxed);
        effect_handler.send_samples(batch).await
    }

    fn record_failure(&mut self, error: String) -> Result<(), Error> {
        self.health.connected.store(false, Ordering::Relaxed);
        self.health.recent_failures.lock().expect("lock poisoned").push(Instant::now());
        Err(Error::Collector { collector: self.name.clone(), error, context: Default::default() })
    }
}

#[async_trait]
impl AsyncCollector for PullApiCollector {
    async fn init(&mut self, _engine_handler: EngineHandler) -> Result<(), Error> {
        self.kind()?;
        Ok(())
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
                Signal::TimerTick { .. } => match self.fetch_once(&effect_handler).await {
                    Ok(()) => backoff.reset(),
                    Err(error) => {
                        tracing::warn!(collector = %self.name, %error, "pull-api fetch failed, backing off");
                        tokio::time::sleep(backoff.next_delay()).await;
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

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extract_reads_nested_dot_path() {
        let body = serde_json::json!({ "readings": { "thrust": 10149.5 } });
        assert_eq!(extract(&body, "$.readings.thrust"), Some(10149.5));
        assert_eq!(extract(&body, "$.readings.missing"), None);
    }
}
