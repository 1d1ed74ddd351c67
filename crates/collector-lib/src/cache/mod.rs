//! Object cache
//!
//! Mirrors API-server objects per kind. Each kind is owned by one reflector
//! task, the only writer of its store. Readers get point-in-time copies
//! (`Arc` clones) so collection never blocks ingestion for long and never
//! sees a torn object.

mod reflector;
mod store;


pub use store::{CacheEntry, CacheEvent, EventType};

use crate::health::HealthRegistry;
use crate::models::{ResourceKind, WatchedObject};
use crate::observability::{CollectorMetrics, StructuredLogger};
use crate::source::ApiSource;
use anyhow::Result;
use dashmap::DashMap;
use reflector::{Backoff, Problems, Reflector};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use store::KindStore;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Configuration for the object cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Only list/watch namespaced kinds inside this namespace
    pub namespace: Option<String>,
    /// Full re-list period even when the watch stays healthy (default: 5 minutes)
    pub resync_interval: Duration,
    /// First retry delay after a failed list (default: 1 second)
    pub initial_backoff: Duration,
    /// Retry delay cap (default: 30 seconds)
    pub max_backoff: Duration,
    /// Capacity of the change-event broadcast channel
    pub event_buffer: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            resync_interval: Duration::from_secs(300),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            event_buffer: 1024,
        }
    }
}

/// Point-in-time copy of cached objects, grouped by kind
#[derive(Debug, Clone)]
pub struct Snapshot {
    objects: HashMap<ResourceKind, Vec<Arc<WatchedObject>>>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            objects: HashMap::new(),
        }
    }

    /// Build a snapshot from loose objects
    pub fn from_objects(objects: impl IntoIterator<Item = WatchedObject>) -> Self {
        let mut snapshot = Self::empty();
        for object in objects {
            snapshot
                .objects
                .entry(object.kind())
                .or_default()
                .push(Arc::new(object));
        }
        snapshot
    }

    pub fn objects(&self, kind: ResourceKind) -> &[Arc<WatchedObject>] {
        self.objects.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<WatchedObject>> {
        self.objects.values().flatten()
    }

    /// Keep only the objects matching `keep`
    pub fn retain(&mut self, mut keep: impl FnMut(&WatchedObject) -> bool) {
        for objects in self.objects.values_mut() {
            objects.retain(|o| keep(o.as_ref()));
        }
    }

    pub fn len(&self) -> usize {
        self.objects.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Inner {
    source: Arc<dyn ApiSource>,
    config: CacheConfig,
    stores: DashMap<ResourceKind, Arc<KindStore>>,
    events: broadcast::Sender<CacheEvent>,
    shutdown: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    problems: Problems,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
    metrics: CollectorMetrics,
}

/// Cache of API-server objects kept current by watch streams
#[derive(Clone)]
pub struct ObjectCache {
    inner: Arc<Inner>,
}

impl ObjectCache {
    pub fn new(source: Arc<dyn ApiSource>, config: CacheConfig) -> Self {
        ObjectCacheBuilder::new().config(config).build_with(source)
    }

    pub fn builder() -> ObjectCacheBuilder {
        ObjectCacheBuilder::new()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Spawn a reflector for every kind that does not have one yet
    pub async fn start(&self, kinds: &[ResourceKind]) {
        let mut started = Vec::new();

        for &kind in kinds {
            if self.inner.stores.contains_key(&kind) {
                debug!(kind = %kind, "Reflector already running");
                continue;
            }

            let store = Arc::new(KindStore::new(kind));
            self.inner.stores.insert(kind, store.clone());
            started.push((kind, store));
        }

        if started.is_empty() {
            return;
        }

        if let Some(health) = &self.inner.health {
            let kinds: Vec<ResourceKind> = started.iter().map(|(k, _)| *k).collect();
            health.expect_synced(&kinds).await;
        }

        let mut tasks = self.tasks();
        for (kind, store) in started {
            let reflector = Reflector {
                kind,
                namespace: if kind.is_namespaced() {
                    self.inner.config.namespace.clone()
                } else {
                    None
                },
                source: self.inner.source.clone(),
                store,
                events: self.inner.events.clone(),
                resync_interval: self.inner.config.resync_interval,
                backoff: Backoff::new(
                    self.inner.config.initial_backoff,
                    self.inner.config.max_backoff,
                ),
                health: self.inner.health.clone(),
                problems: self.inner.problems.clone(),
                metrics: self.inner.metrics.clone(),
                logger: self.inner.logger.clone(),
                resource_version: String::new(),
            };
            tasks.push(tokio::spawn(reflector.run(self.inner.shutdown.subscribe())));
        }
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, kind: ResourceKind, uid: &str) -> Option<Arc<WatchedObject>> {
        self.inner.stores.get(&kind)?.get(uid)
    }

    /// Cached entry with its bookkeeping
    pub fn entry(&self, kind: ResourceKind, uid: &str) -> Option<CacheEntry> {
        self.inner.stores.get(&kind)?.entry(uid)
    }

    /// Point-in-time copy of every object of `kind`
    pub fn list(&self, kind: ResourceKind) -> Vec<Arc<WatchedObject>> {
        self.inner
            .stores
            .get(&kind)
            .map(|store| store.list())
            .unwrap_or_default()
    }

    /// Receive every change applied to the cache from now on
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Copy the given kinds; consistency holds per kind, not across kinds
    pub fn snapshot(&self, kinds: &[ResourceKind]) -> Snapshot {
        let mut snapshot = Snapshot::empty();
        for &kind in kinds {
            if let Some(store) = self.inner.stores.get(&kind) {
                snapshot.objects.insert(kind, store.list());
            }
        }
        snapshot
    }

    /// Copy every kind the cache is mirroring
    pub fn snapshot_all(&self) -> Snapshot {
        self.snapshot(&self.kinds())
    }

    pub fn kinds(&self) -> Vec<ResourceKind> {
        let mut kinds: Vec<ResourceKind> = self.inner.stores.iter().map(|e| *e.key()).collect();
        kinds.sort();
        kinds
    }

    pub fn is_synced(&self, kind: ResourceKind) -> bool {
        self.inner
            .stores
            .get(&kind)
            .map(|store| store.is_synced())
            .unwrap_or(false)
    }

    pub fn all_synced(&self) -> bool {
        self.inner.stores.iter().all(|store| store.is_synced())
    }

    /// Wait until every started kind completed its initial list.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait_until_synced(&self, timeout: Duration) -> bool {
        let receivers: Vec<_> = self
            .inner
            .stores
            .iter()
            .map(|store| store.subscribe_synced())
            .collect();

        let all = async move {
            for mut rx in receivers {
                if rx.wait_for(|synced| *synced).await.is_err() {
                    return false;
                }
            }
            true
        };

        tokio::time::timeout(timeout, all).await.unwrap_or(false)
    }

    /// Stop every reflector and wait for them to exit
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown.send(());
        let tasks: Vec<JoinHandle<()>> = self.tasks().drain(..).collect();
        let count = tasks.len();
        for task in tasks {
            let _ = task.await;
        }
        info!(reflectors = count, "Object cache stopped");
    }
}

/// Builder for the object cache
pub struct ObjectCacheBuilder {
    source: Option<Arc<dyn ApiSource>>,
    config: CacheConfig,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl ObjectCacheBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            config: CacheConfig::default(),
            health: None,
            logger: None,
        }
    }

    pub fn source(mut self, source: Arc<dyn ApiSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn namespace(mut self, namespace: Option<String>) -> Self {
        self.config.namespace = namespace;
        self
    }

    pub fn resync_interval(mut self, interval: Duration) -> Self {
        self.config.resync_interval = interval;
        self
    }

    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.config.initial_backoff = initial;
        self.config.max_backoff = max;
        self
    }

    pub fn event_buffer(mut self, size: usize) -> Self {
        self.config.event_buffer = size;
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

    pub fn build(mut self) -> Result<ObjectCache> {
        let source = self
            .source
            .take()
            .ok_or_else(|| anyhow::anyhow!("API source is required"))?;
        if self.config.event_buffer == 0 {
            anyhow::bail!("Event buffer must hold at least one event");
        }
        Ok(self.build_with(source))
    }

    fn build_with(self, source: Arc<dyn ApiSource>) -> ObjectCache {
        let (events, _) = broadcast::channel(self.config.event_buffer.max(1));
        let (shutdown, _) = broadcast::channel(1);

        ObjectCache {
            inner: Arc::new(Inner {
                source,
                config: self.config,
                stores: DashMap::new(),
                events,
                shutdown,
                tasks: Mutex::new(Vec::new()),
                problems: Arc::new(DashMap::new()),
                health: self.health,
                logger: self.logger,
                metrics: CollectorMetrics::new(),
            }),
        }
    }
}

impl Default for ObjectCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}
