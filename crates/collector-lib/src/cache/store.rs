//! Per-kind object store
//!
//! One store per resource kind. Its reflector is the only writer; readers
//! copy out `Arc`s under a short read lock, so a snapshot of one kind is
//! consistent at a point in time and no object is ever observed half-updated.

use crate::models::{ResourceKind, WatchedObject};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tracing::debug;

/// Kind of change applied to the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

/// A change applied to the cache, as seen by subscribers
#[derive(Debug, Clone)]
pub struct CacheEvent {
    pub event_type: EventType,
    pub object: Arc<WatchedObject>,
}

/// Cached object plus bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub object: Arc<WatchedObject>,
    pub resource_version: String,
    pub last_seen: DateTime<Utc>,
}

/// Whether `incoming` supersedes `current`.
///
/// Resource versions are opaque, but the API server issues integers; when
/// both parse, lower versions are stale. Otherwise any different version wins.
pub(crate) fn is_newer(incoming: &str, current: &str) -> bool {
    match (incoming.parse::<u64>(), current.parse::<u64>()) {
        (Ok(i), Ok(c)) => i > c,
        _ => incoming != current,
    }
}

pub(crate) struct KindStore {
    kind: ResourceKind,
    entries: RwLock<HashMap<String, CacheEntry>>,
    synced: watch::Sender<bool>,
}

impl KindStore {
    pub(crate) fn new(kind: ResourceKind) -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            kind,
            entries: RwLock::new(HashMap::new()),
            synced,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace an object.
    ///
    /// An ADD for a cached UID is applied as a modification and a MODIFY for
    /// an unknown UID as an addition. Returns `None` when the cache already
    /// holds the same or a newer version.
    pub(crate) fn upsert(&self, object: WatchedObject) -> Option<CacheEvent> {
        let mut entries = self.write();
        let uid = object.meta.uid.clone();

        let event_type = match entries.get(&uid) {
            Some(existing) if !is_newer(&object.meta.resource_version, &existing.resource_version) => {
                debug!(
                    kind = %self.kind,
                    uid = %uid,
                    incoming = %object.meta.resource_version,
                    cached = %existing.resource_version,
                    "Ignoring stale update"
                );
                return None;
            }
            Some(_) => EventType::Modified,
            None => EventType::Added,
        };

        let entry = CacheEntry {
            resource_version: object.meta.resource_version.clone(),
            object: Arc::new(object),
            last_seen: Utc::now(),
        };
        let object = entry.object.clone();
        entries.insert(uid, entry);

        Some(CacheEvent { event_type, object })
    }

    /// Remove an object; deleting an unknown UID is a no-op
    pub(crate) fn remove(&self, uid: &str) -> Option<CacheEvent> {
        self.write().remove(uid).map(|entry| CacheEvent {
            event_type: EventType::Deleted,
            object: entry.object,
        })
    }

    /// Make the store match a full list: upsert everything listed and prune
    /// every cached UID the list does not contain.
    pub(crate) fn reconcile(&self, items: Vec<WatchedObject>) -> Vec<CacheEvent> {
        let listed: HashSet<String> = items.iter().map(|o| o.meta.uid.clone()).collect();
        let mut events: Vec<CacheEvent> = items
            .into_iter()
            .filter_map(|object| self.upsert(object))
            .collect();

        let mut entries = self.write();
        let stale: Vec<String> = entries
            .keys()
            .filter(|uid| !listed.contains(*uid))
            .cloned()
            .collect();
        for uid in stale {
            if let Some(entry) = entries.remove(&uid) {
                events.push(CacheEvent {
                    event_type: EventType::Deleted,
                    object: entry.object,
                });
            }
        }

        // Refresh last_seen for entries confirmed by the list
        let now = Utc::now();
        for uid in &listed {
            if let Some(entry) = entries.get_mut(uid) {
                entry.last_seen = now;
            }
        }

        events
    }

    pub(crate) fn get(&self, uid: &str) -> Option<Arc<WatchedObject>> {
        self.read().get(uid).map(|e| e.object.clone())
    }

    pub(crate) fn entry(&self, uid: &str) -> Option<CacheEntry> {
        self.read().get(uid).cloned()
    }

    pub(crate) fn list(&self) -> Vec<Arc<WatchedObject>> {
        self.read().values().map(|e| e.object.clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.read().len()
    }

    pub(crate) fn mark_synced(&self) {
        self.synced.send_replace(true);
    }

    pub(crate) fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    pub(crate) fn subscribe_synced(&self) -> watch::Receiver<bool> {
        self.synced.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NodeBody, ObjectBody, ObjectMeta};

    fn node(uid: &str, rv: &str) -> WatchedObject {
        let mut meta = ObjectMeta::new(uid, format!("node-{}", uid));
        meta.resource_version = rv.to_string();
        WatchedObject::new(meta, ObjectBody::Node(NodeBody::default()))
    }

    #[test]
    fn test_is_newer() {
        assert!(is_newer("10", "9"));
        assert!(!is_newer("9", "10"));
        assert!(!is_newer("10", "10"));
        assert!(is_newer("abc", "abd"));
        assert!(!is_newer("abc", "abc"));
    }

    #[test]
    fn test_duplicate_add_is_modify() {
        let store = KindStore::new(ResourceKind::Node);
        let first = store.upsert(node("a", "1")).unwrap();
        assert_eq!(first.event_type, EventType::Added);

        let second = store.upsert(node("a", "2")).unwrap();
        assert_eq!(second.event_type, EventType::Modified);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_stale_update_ignored() {
        let store = KindStore::new(ResourceKind::Node);
        store.upsert(node("a", "5"));
        assert!(store.upsert(node("a", "3")).is_none());
        assert_eq!(store.entry("a").unwrap().resource_version, "5");
    }

    #[test]
    fn test_delete_unknown_is_noop() {
        let store = KindStore::new(ResourceKind::Node);
        assert!(store.remove("missing").is_none());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_reconcile_prunes_and_upserts() {
        let store = KindStore::new(ResourceKind::Node);
        store.upsert(node("a", "1"));
        store.upsert(node("b", "2"));

        let events = store.reconcile(vec![node("b", "2"), node("c", "3")]);

        let added: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == EventType::Added)
            .map(|e| e.object.uid().to_string())
            .collect();
        let deleted: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == EventType::Deleted)
            .map(|e| e.object.uid().to_string())
            .collect();

        assert_eq!(added, vec!["c"]);
        assert_eq!(deleted, vec!["a"]);
        assert!(store.get("a").is_none());
        assert!(store.get("b").is_some());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_synced_flag() {
        let store = KindStore::new(ResourceKind::Node);
        let rx = store.subscribe_synced();
        assert!(!store.is_synced());
        store.mark_synced();
        assert!(store.is_synced());
        assert!(*rx.borrow());
    }
}
