//! Relationship index
//!
//! Ownership edges between cached objects, rebuilt from each snapshot.
//! Only owner references marked `controller=true` become edges, so every
//! object has at most one parent.

use crate::cache::Snapshot;
use crate::models::{ResourceKind, WatchedObject};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Maximum number of owner hops followed from a pod
pub const MAX_OWNER_DEPTH: usize = 3;

/// Kinds that can own pods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
    Job,
    CronJob,
    ReplicaSet,
}

impl WorkloadKind {
    /// Map an owner reference kind; `None` for kinds that are not workloads
    pub fn from_owner_kind(kind: &str) -> Option<Self> {
        match kind {
            "Deployment" => Some(WorkloadKind::Deployment),
            "StatefulSet" => Some(WorkloadKind::StatefulSet),
            "DaemonSet" => Some(WorkloadKind::DaemonSet),
            "Job" => Some(WorkloadKind::Job),
            "CronJob" => Some(WorkloadKind::CronJob),
            "ReplicaSet" => Some(WorkloadKind::ReplicaSet),
            _ => None,
        }
    }

    pub fn from_resource_kind(kind: ResourceKind) -> Option<Self> {
        Self::from_owner_kind(kind.as_str())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::Job => "Job",
            WorkloadKind::CronJob => "CronJob",
            WorkloadKind::ReplicaSet => "ReplicaSet",
        }
    }

    /// Dimension key carrying the workload's name, e.g. `deployment`
    pub fn dimension_key(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "deployment",
            WorkloadKind::StatefulSet => "statefulset",
            WorkloadKind::DaemonSet => "daemonset",
            WorkloadKind::Job => "job",
            WorkloadKind::CronJob => "cronjob",
            WorkloadKind::ReplicaSet => "replicaset",
        }
    }

    /// Intermediate owners whose own controller is the workload of record
    fn is_intermediate(&self) -> bool {
        matches!(self, WorkloadKind::ReplicaSet | WorkloadKind::Job)
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controller edge from a child to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub child_uid: String,
    pub parent_uid: String,
    pub parent_kind: String,
    pub parent_name: String,
}

/// The workload an object is attributed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub kind: WorkloadKind,
    pub name: String,
    pub uid: String,
}

#[derive(Debug, Default)]
pub struct RelationshipIndex {
    /// child UID -> controller edge
    edges: HashMap<String, Edge>,
    /// UIDs of cached objects of intermediate kinds
    known: HashSet<String>,
}

impl RelationshipIndex {
    pub fn build(snapshot: &Snapshot) -> Self {
        let mut index = Self::default();
        for object in snapshot.iter() {
            index.insert(object);
        }
        index
    }

    fn insert(&mut self, object: &WatchedObject) {
        if matches!(object.kind(), ResourceKind::ReplicaSet | ResourceKind::Job) {
            self.known.insert(object.meta.uid.clone());
        }

        if let Some(owner) = object.meta.controller() {
            self.edges.insert(
                object.meta.uid.clone(),
                Edge {
                    child_uid: object.meta.uid.clone(),
                    parent_uid: owner.uid.clone(),
                    parent_kind: owner.kind.clone(),
                    parent_name: owner.name.clone(),
                },
            );
        }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn parent_of(&self, child_uid: &str) -> Option<&Edge> {
        self.edges.get(child_uid)
    }

    /// Resolve the workload that owns `uid`.
    ///
    /// Starts from the object's controller. A ReplicaSet or Job owner is
    /// followed to its own controller when it is cached; anything else is the
    /// workload. Returns `None` for ownerless objects and ownership cycles.
    pub fn workload_of(&self, uid: &str) -> Option<Workload> {
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(uid);

        let edge = self.parent_of(uid)?;
        if !visited.insert(edge.parent_uid.as_str()) {
            return None;
        }
        let mut kind = WorkloadKind::from_owner_kind(&edge.parent_kind)?;
        let mut current = edge;

        for _ in 1..MAX_OWNER_DEPTH {
            if !kind.is_intermediate() || !self.known.contains(&current.parent_uid) {
                break;
            }
            let Some(next) = self.parent_of(&current.parent_uid) else {
                break;
            };
            if !visited.insert(next.parent_uid.as_str()) {
                return None;
            }
            let Some(next_kind) = WorkloadKind::from_owner_kind(&next.parent_kind) else {
                break;
            };
            kind = next_kind;
            current = next;
        }

        Some(Workload {
            kind,
            name: current.parent_name.clone(),
            uid: current.parent_uid.clone(),
        })
    }

    pub fn workload_kind_of(&self, uid: &str) -> Option<WorkloadKind> {
        self.workload_of(uid).map(|w| w.kind)
    }
}
