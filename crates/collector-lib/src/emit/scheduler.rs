//! Collection scheduler
//!
//! Drives one collection cycle per interval: snapshot the cache, derive
//! samples, and hand the batch to the transport. Cycles never overlap; a
//! slow transport pushes the next tick back instead of queueing a burst.

use super::transport::{Transport, TransportError};
use crate::cache::ObjectCache;
use crate::engine::MetricEngine;
use crate::health::{components, HealthRegistry};
use crate::models::{MetricSample, ResourceKind};
use crate::observability::{CollectorMetrics, StructuredLogger};
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the collection scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Collection interval (default: 10 seconds)
    pub interval: Duration,
    /// Maximum random delay before the first cycle (default: 1 second)
    pub jitter: Duration,
    /// Extra send attempts after the first failure
    pub max_retries: u32,
    /// Delay between send attempts
    pub retry_delay: Duration,
    /// Upper bound on a single send attempt
    pub send_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            jitter: Duration::from_secs(1),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            send_timeout: Duration::from_secs(30),
        }
    }
}

/// Phase of the current collection cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleState {
    Idle,
    Collecting,
    Emitting,
}

/// Outcome of one collection cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub samples: usize,
    pub emitted: bool,
    pub attempts: u32,
    pub elapsed: Duration,
}

pub struct Scheduler {
    cache: ObjectCache,
    engine: Arc<MetricEngine>,
    transport: Arc<dyn Transport>,
    config: SchedulerConfig,
    kinds: Option<Vec<ResourceKind>>,
    state: watch::Sender<CycleState>,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
    metrics: CollectorMetrics,
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    pub fn state(&self) -> CycleState {
        *self.state.borrow()
    }

    /// Follow state transitions from another task
    pub fn subscribe_state(&self) -> watch::Receiver<CycleState> {
        self.state.subscribe()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run cycles until shutdown; an in-flight cycle is abandoned
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs_f64(),
            transport = self.transport.name(),
            "Starting collection scheduler"
        );

        let jitter = Duration::from_millis(rand_jitter(self.config.jitter.as_millis() as u64));
        let mut ticker = interval_at(Instant::now() + jitter, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => break,
            }

            tokio::select! {
                report = self.run_cycle() => {
                    if report.elapsed > self.config.interval {
                        warn!(
                            elapsed_ms = report.elapsed.as_millis() as u64,
                            interval_ms = self.config.interval.as_millis() as u64,
                            "Cycle overran its interval, next tick delayed"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    info!("Abandoning in-flight collection cycle");
                    self.state.send_replace(CycleState::Idle);
                    break;
                }
            }
        }

        info!("Collection scheduler stopped");
    }

    /// Collect and emit once
    pub async fn run_cycle(&self) -> CycleReport {
        let start = Instant::now();

        self.state.send_replace(CycleState::Collecting);
        let snapshot = match &self.kinds {
            Some(kinds) => self.cache.snapshot(kinds),
            None => self.cache.snapshot_all(),
        };
        let samples = self.engine.collect(&snapshot);
        self.report_engine_health().await;

        self.state.send_replace(CycleState::Emitting);
        let (emitted, attempts) = self.emit(&samples).await;
        self.state.send_replace(CycleState::Idle);

        let elapsed = start.elapsed();
        self.metrics.observe_cycle_latency(elapsed.as_secs_f64());
        if let Some(logger) = &self.logger {
            logger.log_cycle(samples.len(), emitted, attempts, elapsed.as_millis());
        }

        CycleReport {
            samples: samples.len(),
            emitted,
            attempts,
            elapsed,
        }
    }

    async fn report_engine_health(&self) {
        let Some(health) = &self.health else {
            return;
        };
        if self.cache.all_synced() {
            health.set_healthy(components::ENGINE).await;
        } else {
            health
                .set_degraded(components::ENGINE, "Collecting from a partially synced cache")
                .await;
        }
    }

    /// Send the batch, retrying the whole batch on failure.
    ///
    /// Returns whether it was accepted and how many attempts were made.
    async fn emit(&self, samples: &[MetricSample]) -> (bool, u32) {
        if samples.is_empty() {
            debug!("Empty batch, nothing to send");
            return (true, 0);
        }

        let max_attempts = self.config.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let result =
                tokio::time::timeout(self.config.send_timeout, self.transport.send(samples))
                    .await
                    .unwrap_or(Err(TransportError::Timeout(self.config.send_timeout)));

            match result {
                Ok(()) => {
                    self.metrics.add_samples_emitted(samples.len());
                    if let Some(health) = &self.health {
                        health.set_healthy(components::TRANSPORT).await;
                    }
                    return (true, attempt);
                }
                Err(e) => {
                    self.metrics.inc_transport_failures();
                    warn!(
                        transport = self.transport.name(),
                        attempt = attempt,
                        max_attempts = max_attempts,
                        error = %e,
                        "Failed to send batch"
                    );
                    last_error = e.to_string();

                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        self.metrics.add_samples_dropped(samples.len());
        if let Some(logger) = &self.logger {
            logger.log_transport_failure(samples.len(), max_attempts, &last_error);
        }
        if let Some(health) = &self.health {
            health
                .set_degraded(components::TRANSPORT, format!("Batch dropped: {}", last_error))
                .await;
        }
        (false, max_attempts)
    }
}

/// Random value between 0 and max_ms, derived from the clock
fn rand_jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    now % max_ms
}

/// Builder for the collection scheduler
pub struct SchedulerBuilder {
    cache: Option<ObjectCache>,
    engine: Option<Arc<MetricEngine>>,
    transport: Option<Arc<dyn Transport>>,
    config: SchedulerConfig,
    kinds: Option<Vec<ResourceKind>>,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            cache: None,
            engine: None,
            transport: None,
            config: SchedulerConfig::default(),
            kinds: None,
            health: None,
            logger: None,
        }
    }

    pub fn cache(mut self, cache: ObjectCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn engine(mut self, engine: Arc<MetricEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.config.jitter = jitter;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_timeout = timeout;
        self
    }

    /// Restrict snapshots to these kinds (default: every cached kind)
    pub fn kinds(mut self, kinds: Vec<ResourceKind>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> Result<Scheduler> {
        let cache = self
            .cache
            .ok_or_else(|| anyhow::anyhow!("Object cache is required"))?;
        let engine = self
            .engine
            .ok_or_else(|| anyhow::anyhow!("Metric engine is required"))?;
        let transport = self
            .transport
            .ok_or_else(|| anyhow::anyhow!("Transport is required"))?;
        if self.config.interval.is_zero() {
            anyhow::bail!("Collection interval must be greater than zero");
        }

        let (state, _) = watch::channel(CycleState::Idle);

        Ok(Scheduler {
            cache,
            engine,
            transport,
            config: self.config,
            kinds: self.kinds,
            state,
            health: self.health,
            logger: self.logger,
            metrics: CollectorMetrics::new(),
        })
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
