//! Core data models for the cluster collector

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Resource kinds mirrored from the API server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Pod,
    Deployment,
    ReplicaSet,
    StatefulSet,
    DaemonSet,
    Job,
    CronJob,
    ResourceQuota,
    Namespace,
    Node,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 10] = [
        ResourceKind::Pod,
        ResourceKind::Deployment,
        ResourceKind::ReplicaSet,
        ResourceKind::StatefulSet,
        ResourceKind::DaemonSet,
        ResourceKind::Job,
        ResourceKind::CronJob,
        ResourceKind::ResourceQuota,
        ResourceKind::Namespace,
        ResourceKind::Node,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "Pod",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::ReplicaSet => "ReplicaSet",
            ResourceKind::StatefulSet => "StatefulSet",
            ResourceKind::DaemonSet => "DaemonSet",
            ResourceKind::Job => "Job",
            ResourceKind::CronJob => "CronJob",
            ResourceKind::ResourceQuota => "ResourceQuota",
            ResourceKind::Namespace => "Namespace",
            ResourceKind::Node => "Node",
        }
    }

    /// Whether objects of this kind live inside a namespace
    pub fn is_namespaced(&self) -> bool {
        !matches!(self, ResourceKind::Namespace | ResourceKind::Node)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner reference as carried in object metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: String,
    pub name: String,
    pub uid: String,
    pub controller: bool,
}

impl OwnerRef {
    /// Owner reference marked `controller=true`
    pub fn controller(kind: impl Into<String>, name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            uid: uid.into(),
            controller: true,
        }
    }
}

/// Identity and bookkeeping metadata shared by every watched object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub uid: String,
    pub name: String,
    pub namespace: Option<String>,
    pub resource_version: String,
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub labels: BTreeMap<String, String>,
    pub owner_references: Vec<OwnerRef>,
}

impl ObjectMeta {
    pub fn new(uid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
            namespace: None,
            resource_version: String::new(),
            creation_timestamp: None,
            labels: BTreeMap::new(),
            owner_references: Vec::new(),
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn created_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.creation_timestamp = Some(timestamp);
        self
    }

    pub fn owned_by(mut self, owner: OwnerRef) -> Self {
        self.owner_references.push(owner);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// The single owner reference marked as controller, if any.
    ///
    /// References without `controller=true` are never used for attribution,
    /// even when they are the only reference present.
    pub fn controller(&self) -> Option<&OwnerRef> {
        self.owner_references.iter().find(|r| r.controller)
    }
}

/// Container spec fields needed for resource metrics.
///
/// Quantities are kept in their raw API form and parsed at derivation time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: Option<String>,
    pub requests: BTreeMap<String, String>,
    pub limits: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    /// Runtime-qualified ID, e.g. `containerd://abc...`
    pub container_id: Option<String>,
    pub image: String,
    pub ready: bool,
    pub restart_count: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodBody {
    pub phase: Option<String>,
    pub node_name: Option<String>,
    pub containers: Vec<ContainerSpec>,
    pub container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentBody {
    /// `spec.replicas`; unset means the server default applies
    pub desired: Option<i32>,
    pub available: i32,
    pub updated: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSetBody {
    pub desired: Option<i32>,
    pub available: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatefulSetBody {
    pub desired: Option<i32>,
    pub ready: i32,
    pub current: i32,
    pub updated: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonSetBody {
    pub current_scheduled: i32,
    pub desired_scheduled: i32,
    pub misscheduled: i32,
    pub ready: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobBody {
    pub completions: Option<i32>,
    pub active: i32,
    pub failed: i32,
    pub succeeded: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CronJobBody {
    pub active_jobs: i64,
}

/// Hard limits and used amounts, each independently keyed by resource name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaBody {
    pub hard: BTreeMap<String, String>,
    pub used: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamespaceBody {
    pub phase: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeBody {
    /// Status of the `Ready` condition (`True`, `False`, `Unknown`)
    pub ready: Option<String>,
}

/// Kind-specific fields of a watched object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObjectBody {
    Pod(PodBody),
    Deployment(DeploymentBody),
    ReplicaSet(ReplicaSetBody),
    StatefulSet(StatefulSetBody),
    DaemonSet(DaemonSetBody),
    Job(JobBody),
    CronJob(CronJobBody),
    ResourceQuota(QuotaBody),
    Namespace(NamespaceBody),
    Node(NodeBody),
}

impl ObjectBody {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ObjectBody::Pod(_) => ResourceKind::Pod,
            ObjectBody::Deployment(_) => ResourceKind::Deployment,
            ObjectBody::ReplicaSet(_) => ResourceKind::ReplicaSet,
            ObjectBody::StatefulSet(_) => ResourceKind::StatefulSet,
            ObjectBody::DaemonSet(_) => ResourceKind::DaemonSet,
            ObjectBody::Job(_) => ResourceKind::Job,
            ObjectBody::CronJob(_) => ResourceKind::CronJob,
            ObjectBody::ResourceQuota(_) => ResourceKind::ResourceQuota,
            ObjectBody::Namespace(_) => ResourceKind::Namespace,
            ObjectBody::Node(_) => ResourceKind::Node,
        }
    }
}

/// An API-server object as mirrored by the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchedObject {
    pub meta: ObjectMeta,
    pub body: ObjectBody,
}

impl WatchedObject {
    pub fn new(meta: ObjectMeta, body: ObjectBody) -> Self {
        Self { meta, body }
    }

    pub fn kind(&self) -> ResourceKind {
        self.body.kind()
    }

    pub fn uid(&self) -> &str {
        &self.meta.uid
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.meta.namespace.as_deref()
    }

    pub fn resource_version(&self) -> &str {
        &self.meta.resource_version
    }
}

/// Dimension set of a sample; keys are unique by construction
pub type Dimensions = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
}

impl MetricValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Int(v) => *v as f64,
            MetricValue::Float(v) => *v,
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<i32> for MetricValue {
    fn from(v: i32) -> Self {
        MetricValue::Int(v as i64)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Gauge,
    Counter,
    Cumulative,
}

/// A single datapoint produced by a collection cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub metric: String,
    pub value: MetricValue,
    pub metric_type: MetricType,
    pub dimensions: Dimensions,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn dimension(&self, key: &str) -> Option<&str> {
        self.dimensions.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_ignores_non_controller_refs() {
        let meta = ObjectMeta::new("uid-1", "pod-1").owned_by(OwnerRef {
            kind: "ReplicaSet".to_string(),
            name: "rs".to_string(),
            uid: "rs-uid".to_string(),
            controller: false,
        });
        assert!(meta.controller().is_none());

        let meta = meta.owned_by(OwnerRef::controller("Job", "job", "job-uid"));
        assert_eq!(meta.controller().unwrap().uid, "job-uid");
    }

    #[test]
    fn test_body_kind() {
        let object = WatchedObject::new(
            ObjectMeta::new("uid", "web").in_namespace("default"),
            ObjectBody::StatefulSet(StatefulSetBody::default()),
        );
        assert_eq!(object.kind(), ResourceKind::StatefulSet);
        assert_eq!(object.namespace(), Some("default"));
    }

    #[test]
    fn test_cluster_scoped_kinds() {
        assert!(ResourceKind::Pod.is_namespaced());
        assert!(!ResourceKind::Node.is_namespaced());
        assert!(!ResourceKind::Namespace.is_namespaced());
    }
}
