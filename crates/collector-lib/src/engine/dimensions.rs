//! Identity and enrichment dimensions shared by every sample of an object

use crate::index::{RelationshipIndex, WorkloadKind};
use crate::models::{ContainerStatus, Dimensions, ObjectBody, WatchedObject};
use chrono::{DateTime, Utc};

/// Creation timestamps are reported in UTC, truncated to whole seconds
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

fn put(dims: &mut Dimensions, key: &str, value: impl Into<String>) {
    let value = value.into();
    if !value.is_empty() {
        dims.insert(key.to_string(), value);
    }
}

/// Strip the runtime scheme, e.g. `containerd://abc` -> `abc`
pub fn container_id(raw: &str) -> &str {
    match raw.split_once("://") {
        Some((_, id)) => id,
        None => raw,
    }
}

/// Dimensions of a single container, joined with its status by name
pub fn container_dimensions(
    name: &str,
    image: Option<&str>,
    status: Option<&ContainerStatus>,
) -> Dimensions {
    let mut dims = Dimensions::new();
    put(&mut dims, "container_spec_name", name);

    let image = image.or_else(|| status.map(|s| s.image.as_str()));
    if let Some(image) = image {
        put(&mut dims, "container_image", image);
    }
    if let Some(id) = status.and_then(|s| s.container_id.as_deref()) {
        put(&mut dims, "container_id", container_id(id));
    }
    dims
}

/// Dimensions attached to every sample derived from `object`
pub fn base_dimensions(object: &WatchedObject, index: &RelationshipIndex) -> Dimensions {
    let mut dims = Dimensions::new();
    let meta = &object.meta;

    put(&mut dims, "kubernetes_uid", meta.uid.as_str());
    if let Some(namespace) = &meta.namespace {
        put(&mut dims, "kubernetes_namespace", namespace.as_str());
    }

    match &object.body {
        ObjectBody::Pod(pod) => {
            put(&mut dims, "kubernetes_pod_uid", meta.uid.as_str());
            put(&mut dims, "kubernetes_pod_name", meta.name.as_str());
            if let Some(node) = &pod.node_name {
                put(&mut dims, "kubernetes_node", node.as_str());
            }
            if let Some(created) = &meta.creation_timestamp {
                put(&mut dims, "pod_creation_timestamp", format_timestamp(created));
            }
            if let Some(workload) = index.workload_of(&meta.uid) {
                put(&mut dims, "kubernetes_workload", workload.kind.as_str());
                put(&mut dims, "kubernetes_workload_name", workload.name.as_str());
                put(&mut dims, workload.kind.dimension_key(), workload.name);
            }
        }
        ObjectBody::ResourceQuota(_) => {
            put(&mut dims, "quota_name", meta.name.as_str());
        }
        ObjectBody::Namespace(_) => {
            put(&mut dims, "kubernetes_namespace", meta.name.as_str());
        }
        ObjectBody::Node(_) => {
            put(&mut dims, "kubernetes_node", meta.name.as_str());
        }
        _ => {
            let Some(kind) = WorkloadKind::from_resource_kind(object.kind()) else {
                return dims;
            };
            put(&mut dims, "kubernetes_name", meta.name.as_str());
            put(&mut dims, "kubernetes_workload", kind.as_str());
            put(&mut dims, kind.dimension_key(), meta.name.as_str());
            if let Some(created) = &meta.creation_timestamp {
                put(
                    &mut dims,
                    &format!("{}_creation_timestamp", kind.dimension_key()),
                    format_timestamp(created),
                );
            }

            // A ReplicaSet or Job also names the workload that manages it
            if let Some(owner) = index.workload_of(&meta.uid) {
                if owner.kind != kind {
                    put(&mut dims, owner.kind.dimension_key(), owner.name);
                }
            }
        }
    }

    dims
}
