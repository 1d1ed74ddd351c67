//! In-memory API server for tests
//!
//! Behaves like a minimal API server: every write gets a monotonically
//! increasing resource version, watches replay history after the requested
//! version, and failures (disconnects, expired versions, partitions,
//! silently dropped events) can be injected to exercise reflector recovery.

use super::{ApiSource, ObjectList, SourceError, WatchEvent, WatchStream};
use crate::models::{ResourceKind, WatchedObject};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

type EventSender = mpsc::UnboundedSender<Result<WatchEvent, SourceError>>;

struct Watcher {
    kind: ResourceKind,
    namespace: Option<String>,
    tx: EventSender,
}

struct HistoryEntry {
    kind: ResourceKind,
    resource_version: u64,
    event: WatchEvent,
}

#[derive(Default)]
struct FakeState {
    objects: HashMap<ResourceKind, BTreeMap<String, WatchedObject>>,
    history: Vec<HistoryEntry>,
    /// Watches from versions below this fail with `Gone`
    compacted_below: u64,
    next_version: u64,
    watchers: Vec<Watcher>,
    partitioned: bool,
    dropping_events: bool,
    failing_lists: u32,
    list_calls: HashMap<ResourceKind, usize>,
    watch_calls: HashMap<ResourceKind, usize>,
}

impl FakeState {
    fn bump_version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn record(&mut self, kind: ResourceKind, version: u64, event: WatchEvent) {
        self.history.push(HistoryEntry {
            kind,
            resource_version: version,
            event: event.clone(),
        });

        if self.dropping_events {
            return;
        }

        let namespace = event_namespace(&event);
        self.watchers.retain(|w| {
            if w.kind != kind || !namespace_matches(w.namespace.as_deref(), namespace.as_deref()) {
                return !w.tx.is_closed();
            }
            w.tx.send(Ok(event.clone())).is_ok()
        });
    }
}

fn event_namespace(event: &WatchEvent) -> Option<String> {
    match event {
        WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => {
            o.meta.namespace.clone()
        }
        WatchEvent::Bookmark(_) => None,
    }
}

fn namespace_matches(filter: Option<&str>, namespace: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(f) => namespace == Some(f),
    }
}

/// In-memory `ApiSource`
#[derive(Default)]
pub struct FakeApiSource {
    state: Mutex<FakeState>,
}

impl FakeApiSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create or update an object; returns it with its new resource version
    pub fn apply(&self, mut object: WatchedObject) -> WatchedObject {
        let mut state = self.state();
        let version = state.bump_version();
        object.meta.resource_version = version.to_string();

        let kind = object.kind();
        let existed = state
            .objects
            .entry(kind)
            .or_default()
            .insert(object.meta.uid.clone(), object.clone())
            .is_some();

        let event = if existed {
            WatchEvent::Modified(object.clone())
        } else {
            WatchEvent::Added(object.clone())
        };
        state.record(kind, version, event);
        object
    }

    /// Delete an object by UID
    pub fn delete(&self, kind: ResourceKind, uid: &str) -> Option<WatchedObject> {
        let mut state = self.state();
        let mut object = state.objects.get_mut(&kind)?.remove(uid)?;
        let version = state.bump_version();
        object.meta.resource_version = version.to_string();
        state.record(kind, version, WatchEvent::Deleted(object.clone()));
        Some(object)
    }

    /// Send a bookmark carrying the current version to open watches of `kind`
    pub fn bookmark(&self, kind: ResourceKind) {
        let mut state = self.state();
        let version = state.next_version.to_string();
        state.watchers.retain(|w| {
            w.kind != kind || w.tx.send(Ok(WatchEvent::Bookmark(version.clone()))).is_ok()
        });
    }

    /// Terminate every open watch with a connection error
    pub fn disconnect_watches(&self) {
        let mut state = self.state();
        for w in state.watchers.drain(..) {
            let _ = w
                .tx
                .send(Err(SourceError::Connection("connection reset by peer".into())));
        }
    }

    /// Discard history and terminate open watches with `410 Gone`
    pub fn expire_watches(&self) {
        let mut state = self.state();
        state.compacted_below = state.next_version + 1;
        state.history.clear();
        for w in state.watchers.drain(..) {
            let _ = w
                .tx
                .send(Err(SourceError::Gone("too old resource version".into())));
        }
    }

    /// While partitioned, every call fails and open watches are closed
    pub fn set_partitioned(&self, partitioned: bool) {
        let mut state = self.state();
        state.partitioned = partitioned;
        if partitioned {
            for w in state.watchers.drain(..) {
                let _ = w
                    .tx
                    .send(Err(SourceError::Connection("network unreachable".into())));
            }
        }
    }

    /// While dropping, writes succeed but open watches never hear about them
    pub fn set_dropping_events(&self, dropping: bool) {
        self.state().dropping_events = dropping;
    }

    /// Fail the next `count` list calls
    pub fn fail_next_lists(&self, count: u32) {
        self.state().failing_lists = count;
    }

    pub fn list_calls(&self, kind: ResourceKind) -> usize {
        self.state().list_calls.get(&kind).copied().unwrap_or(0)
    }

    pub fn watch_calls(&self, kind: ResourceKind) -> usize {
        self.state().watch_calls.get(&kind).copied().unwrap_or(0)
    }

    pub fn active_watches(&self, kind: ResourceKind) -> usize {
        self.state()
            .watchers
            .iter()
            .filter(|w| w.kind == kind && !w.tx.is_closed())
            .count()
    }

    pub fn get(&self, kind: ResourceKind, uid: &str) -> Option<WatchedObject> {
        self.state().objects.get(&kind)?.get(uid).cloned()
    }
}

#[async_trait]
impl ApiSource for FakeApiSource {
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
    ) -> Result<ObjectList, SourceError> {
        let mut state = self.state();
        *state.list_calls.entry(kind).or_default() += 1;

        if state.partitioned {
            return Err(SourceError::Connection("network unreachable".into()));
        }
        if state.failing_lists > 0 {
            state.failing_lists -= 1;
            return Err(SourceError::Api {
                code: 500,
                message: "internal error".into(),
            });
        }

        let namespace = if kind.is_namespaced() { namespace } else { None };
        let items = state
            .objects
            .get(&kind)
            .map(|objects| {
                objects
                    .values()
                    .filter(|o| namespace_matches(namespace, o.namespace()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(ObjectList {
            resource_version: state.next_version.to_string(),
            items,
        })
    }

    async fn watch(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        resource_version: &str,
    ) -> Result<WatchStream, SourceError> {
        let mut state = self.state();
        *state.watch_calls.entry(kind).or_default() += 1;

        if state.partitioned {
            return Err(SourceError::Connection("network unreachable".into()));
        }

        let from: u64 = resource_version
            .parse()
            .map_err(|_| SourceError::Gone(resource_version.to_string()))?;
        if from + 1 < state.compacted_below {
            return Err(SourceError::Gone(resource_version.to_string()));
        }

        let namespace = if kind.is_namespaced() {
            namespace.map(str::to_string)
        } else {
            None
        };
        let (tx, rx) = mpsc::unbounded_channel();

        for entry in state.history.iter() {
            if entry.kind == kind
                && entry.resource_version > from
                && namespace_matches(namespace.as_deref(), event_namespace(&entry.event).as_deref())
            {
                let _ = tx.send(Ok(entry.event.clone()));
            }
        }

        state.watchers.push(Watcher {
            kind,
            namespace,
            tx,
        });

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NamespaceBody, ObjectBody, ObjectMeta};

    fn namespace(uid: &str, name: &str) -> WatchedObject {
        WatchedObject::new(
            ObjectMeta::new(uid, name),
            ObjectBody::Namespace(NamespaceBody {
                phase: Some("Active".into()),
            }),
        )
    }

    #[tokio::test]
    async fn test_list_reflects_applied_objects() {
        let source = FakeApiSource::new();
        source.apply(namespace("ns-1", "good"));
        source.apply(namespace("ns-2", "bad"));

        let list = source.list(ResourceKind::Namespace, None).await.unwrap();
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.resource_version, "2");
    }

    #[tokio::test]
    async fn test_watch_replays_history_after_version() {
        let source = FakeApiSource::new();
        source.apply(namespace("ns-1", "good"));
        source.apply(namespace("ns-2", "bad"));

        let mut stream = source.watch(ResourceKind::Namespace, None, "1").await.unwrap();
        match stream.next().await {
            Some(Ok(WatchEvent::Added(o))) => assert_eq!(o.uid(), "ns-2"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expired_version_is_gone() {
        let source = FakeApiSource::new();
        source.apply(namespace("ns-1", "good"));
        source.expire_watches();

        let result = source.watch(ResourceKind::Namespace, None, "0").await;
        assert!(matches!(result, Err(SourceError::Gone(_))));

        let list = source.list(ResourceKind::Namespace, None).await.unwrap();
        assert!(source
            .watch(ResourceKind::Namespace, None, &list.resource_version)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_bookmark_reaches_open_watch() {
        let source = FakeApiSource::new();
        source.apply(namespace("ns-1", "good"));

        let mut stream = source.watch(ResourceKind::Namespace, None, "1").await.unwrap();
        source.bookmark(ResourceKind::Namespace);
        match stream.next().await {
            Some(Ok(WatchEvent::Bookmark(rv))) => assert_eq!(rv, "1"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_partition_fails_calls() {
        let source = FakeApiSource::new();
        source.set_partitioned(true);
        assert!(source.list(ResourceKind::Pod, None).await.is_err());
        source.set_partitioned(false);
        assert!(source.list(ResourceKind::Pod, None).await.is_ok());
    }
}
