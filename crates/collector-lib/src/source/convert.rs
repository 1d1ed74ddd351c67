//! Conversion from `k8s-openapi` types into watched objects

use crate::models::{
    ContainerSpec, ContainerStatus, CronJobBody, DaemonSetBody, DeploymentBody, JobBody,
    NamespaceBody, NodeBody, ObjectBody, ObjectMeta, OwnerRef, PodBody, QuotaBody,
    ReplicaSetBody, StatefulSetBody, WatchedObject,
};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, ResourceQuota};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta as K8sObjectMeta;
use std::collections::BTreeMap;

fn meta(m: K8sObjectMeta) -> ObjectMeta {
    ObjectMeta {
        uid: m.uid.unwrap_or_default(),
        name: m.name.unwrap_or_default(),
        namespace: m.namespace,
        resource_version: m.resource_version.unwrap_or_default(),
        creation_timestamp: m.creation_timestamp.map(|t| t.0),
        labels: m.labels.unwrap_or_default(),
        owner_references: m
            .owner_references
            .unwrap_or_default()
            .into_iter()
            .map(|r| OwnerRef {
                kind: r.kind,
                name: r.name,
                uid: r.uid,
                controller: r.controller.unwrap_or(false),
            })
            .collect(),
    }
}

fn quantities(map: Option<BTreeMap<String, Quantity>>) -> BTreeMap<String, String> {
    map.unwrap_or_default()
        .into_iter()
        .map(|(k, q)| (k, q.0))
        .collect()
}

pub(crate) fn pod(pod: Pod) -> WatchedObject {
    let spec = pod.spec.unwrap_or_default();
    let status = pod.status.unwrap_or_default();

    let containers = spec
        .containers
        .into_iter()
        .map(|c| {
            let resources = c.resources.unwrap_or_default();
            ContainerSpec {
                name: c.name,
                image: c.image,
                requests: quantities(resources.requests),
                limits: quantities(resources.limits),
            }
        })
        .collect();

    let container_statuses = status
        .container_statuses
        .unwrap_or_default()
        .into_iter()
        .map(|s| ContainerStatus {
            name: s.name,
            container_id: s.container_id,
            image: s.image,
            ready: s.ready,
            restart_count: s.restart_count,
        })
        .collect();

    WatchedObject::new(
        meta(pod.metadata),
        ObjectBody::Pod(PodBody {
            phase: status.phase,
            node_name: spec.node_name,
            containers,
            container_statuses,
        }),
    )
}

pub(crate) fn deployment(d: Deployment) -> WatchedObject {
    let status = d.status.unwrap_or_default();
    WatchedObject::new(
        meta(d.metadata),
        ObjectBody::Deployment(DeploymentBody {
            desired: d.spec.and_then(|s| s.replicas),
            available: status.available_replicas.unwrap_or(0),
            updated: status.updated_replicas.unwrap_or(0),
        }),
    )
}

pub(crate) fn replica_set(rs: ReplicaSet) -> WatchedObject {
    WatchedObject::new(
        meta(rs.metadata),
        ObjectBody::ReplicaSet(ReplicaSetBody {
            desired: rs.spec.and_then(|s| s.replicas),
            available: rs.status.and_then(|s| s.available_replicas).unwrap_or(0),
        }),
    )
}

pub(crate) fn stateful_set(ss: StatefulSet) -> WatchedObject {
    let status = ss.status.unwrap_or_default();
    WatchedObject::new(
        meta(ss.metadata),
        ObjectBody::StatefulSet(StatefulSetBody {
            desired: ss.spec.and_then(|s| s.replicas),
            ready: status.ready_replicas.unwrap_or(0),
            current: status.current_replicas.unwrap_or(0),
            updated: status.updated_replicas.unwrap_or(0),
        }),
    )
}

pub(crate) fn daemon_set(ds: DaemonSet) -> WatchedObject {
    let status = ds.status.unwrap_or_default();
    WatchedObject::new(
        meta(ds.metadata),
        ObjectBody::DaemonSet(DaemonSetBody {
            current_scheduled: status.current_number_scheduled,
            desired_scheduled: status.desired_number_scheduled,
            misscheduled: status.number_misscheduled,
            ready: status.number_ready,
        }),
    )
}

pub(crate) fn job(job: Job) -> WatchedObject {
    let status = job.status.unwrap_or_default();
    WatchedObject::new(
        meta(job.metadata),
        ObjectBody::Job(JobBody {
            completions: job.spec.and_then(|s| s.completions),
            active: status.active.unwrap_or(0),
            failed: status.failed.unwrap_or(0),
            succeeded: status.succeeded.unwrap_or(0),
        }),
    )
}

pub(crate) fn cron_job(cj: CronJob) -> WatchedObject {
    let active_jobs = cj
        .status
        .and_then(|s| s.active)
        .map(|refs| refs.len() as i64)
        .unwrap_or(0);
    WatchedObject::new(
        meta(cj.metadata),
        ObjectBody::CronJob(CronJobBody { active_jobs }),
    )
}

pub(crate) fn resource_quota(rq: ResourceQuota) -> WatchedObject {
    let status = rq.status.unwrap_or_default();
    WatchedObject::new(
        meta(rq.metadata),
        ObjectBody::ResourceQuota(QuotaBody {
            hard: quantities(status.hard),
            used: quantities(status.used),
        }),
    )
}

pub(crate) fn namespace(ns: Namespace) -> WatchedObject {
    WatchedObject::new(
        meta(ns.metadata),
        ObjectBody::Namespace(NamespaceBody {
            phase: ns.status.and_then(|s| s.phase),
        }),
    )
}

pub(crate) fn node(node: Node) -> WatchedObject {
    let ready = node
        .status
        .and_then(|s| s.conditions)
        .unwrap_or_default()
        .into_iter()
        .find(|c| c.type_ == "Ready")
        .map(|c| c.status);
    WatchedObject::new(meta(node.metadata), ObjectBody::Node(NodeBody { ready }))
}
