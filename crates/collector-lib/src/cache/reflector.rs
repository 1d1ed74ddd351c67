//! List/watch reflector
//!
//! One reflector per kind keeps its store in step with the API server:
//! list to get a baseline, watch from the baseline's resource version, and
//! fall back to a fresh list whenever the watch terminates for any reason or
//! the resync interval elapses. The reconciliation on re-list closes any gap
//! left by events that were missed while the watch was down.

use super::store::{CacheEvent, KindStore};
use crate::health::{components, HealthRegistry};
use crate::models::ResourceKind;
use crate::observability::{CollectorMetrics, StructuredLogger};
use crate::source::{ApiSource, ObjectList, SourceError, WatchEvent};
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Exponential backoff between failed list attempts
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; doubles the following one up to the cap
    pub(crate) fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current * 2, self.max);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.initial;
    }
}

enum WatchOutcome {
    Shutdown,
    ResyncDue,
    Closed,
    Failed(SourceError),
}

/// Shared view of which kinds are currently unhealthy, used to derive the
/// cache component's health from all reflectors
pub(crate) type Problems = Arc<DashMap<ResourceKind, String>>;

pub(crate) struct Reflector {
    pub(crate) kind: ResourceKind,
    pub(crate) namespace: Option<String>,
    pub(crate) source: Arc<dyn ApiSource>,
    pub(crate) store: Arc<KindStore>,
    pub(crate) events: broadcast::Sender<CacheEvent>,
    pub(crate) resync_interval: Duration,
    pub(crate) backoff: Backoff,
    pub(crate) health: Option<HealthRegistry>,
    pub(crate) problems: Problems,
    pub(crate) metrics: CollectorMetrics,
    pub(crate) logger: Option<StructuredLogger>,
    /// Latest resource version seen from a list, event or bookmark
    pub(crate) resource_version: String,
}

impl Reflector {
    pub(crate) async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            kind = %self.kind,
            namespace = self.namespace.as_deref().unwrap_or("*"),
            resync_secs = self.resync_interval.as_secs(),
            "Starting reflector"
        );

        loop {
            let listed = tokio::select! {
                result = self.source.list(self.kind, self.namespace.as_deref()) => result,
                _ = shutdown.recv() => break,
            };

            let list = match listed {
                Ok(list) => list,
                Err(e) => {
                    let delay = self.backoff.next();
                    warn!(
                        kind = %self.kind,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "List failed, retrying"
                    );
                    self.report_problem(format!("{} list failed: {}", self.kind, e))
                        .await;

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => continue,
                        _ = shutdown.recv() => break,
                    }
                }
            };

            self.backoff.reset();
            self.apply_list(list).await;

            let resync_at = Instant::now() + self.resync_interval;
            match self.watch_until(resync_at, &mut shutdown).await {
                WatchOutcome::Shutdown => break,
                WatchOutcome::ResyncDue => {
                    debug!(kind = %self.kind, "Resync interval elapsed, re-listing");
                }
                WatchOutcome::Closed => {
                    debug!(kind = %self.kind, "Watch closed by server, re-listing");
                    self.metrics.inc_watch_restarts(self.kind, "closed");
                }
                WatchOutcome::Failed(SourceError::Gone(rv)) => {
                    info!(
                        kind = %self.kind,
                        resource_version = %rv,
                        "Resource version expired, re-listing"
                    );
                    self.metrics.inc_watch_restarts(self.kind, "gone");
                }
                WatchOutcome::Failed(e) => {
                    let delay = self.backoff.next();
                    warn!(
                        kind = %self.kind,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Watch failed, re-listing"
                    );
                    self.metrics.inc_watch_restarts(self.kind, "error");
                    self.report_problem(format!("{} watch failed: {}", self.kind, e))
                        .await;

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.recv() => break,
                    }
                }
            }
        }

        info!(kind = %self.kind, "Reflector stopped");
    }

    async fn apply_list(&mut self, list: ObjectList) {
        let objects = list.items.len();
        let events = self.store.reconcile(list.items);
        let changes = events.len();
        for event in events {
            let _ = self.events.send(event);
        }

        self.resource_version = list.resource_version;
        self.metrics.inc_relists(self.kind);
        self.metrics.set_cached_objects(self.kind, self.store.len());

        if let Some(logger) = &self.logger {
            logger.log_relist(self.kind, &self.resource_version, objects, changes);
        }

        if !self.store.is_synced() {
            self.store.mark_synced();
            if let Some(health) = &self.health {
                health.mark_synced(self.kind).await;
            }
            info!(kind = %self.kind, objects = objects, "Initial list complete");
        }

        self.clear_problem().await;
    }

    async fn watch_until(
        &mut self,
        deadline: Instant,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> WatchOutcome {
        let opened = tokio::select! {
            result = self.source.watch(self.kind, self.namespace.as_deref(), &self.resource_version) => result,
            _ = shutdown.recv() => return WatchOutcome::Shutdown,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return WatchOutcome::Failed(e),
        };

        let resync = tokio::time::sleep_until(deadline);
        tokio::pin!(resync);

        loop {
            tokio::select! {
                item = stream.next() => match item {
                    Some(Ok(event)) => self.apply_event(event),
                    Some(Err(e)) => return WatchOutcome::Failed(e),
                    None => return WatchOutcome::Closed,
                },
                _ = &mut resync => return WatchOutcome::ResyncDue,
                _ = shutdown.recv() => return WatchOutcome::Shutdown,
            }
        }
    }

    fn apply_event(&mut self, event: WatchEvent) {
        let change = match event {
            WatchEvent::Added(object) | WatchEvent::Modified(object) => {
                self.resource_version = object.meta.resource_version.clone();
                self.store.upsert(object)
            }
            WatchEvent::Deleted(object) => {
                self.resource_version = object.meta.resource_version.clone();
                self.store.remove(&object.meta.uid)
            }
            WatchEvent::Bookmark(rv) => {
                self.resource_version = rv;
                None
            }
        };

        if let Some(change) = change {
            let _ = self.events.send(change);
            self.metrics.set_cached_objects(self.kind, self.store.len());
        }
    }

    async fn report_problem(&self, message: String) {
        self.problems.insert(self.kind, message);
        self.publish_health().await;
    }

    async fn clear_problem(&self) {
        if self.problems.remove(&self.kind).is_some() {
            self.publish_health().await;
        }
    }

    async fn publish_health(&self) {
        let Some(health) = &self.health else {
            return;
        };

        let mut messages: Vec<String> = self.problems.iter().map(|p| p.value().clone()).collect();
        if messages.is_empty() {
            health.set_healthy(components::CACHE).await;
        } else {
            messages.sort();
            health
                .set_degraded(components::CACHE, messages.join("; "))
                .await;
        }
    }
}
