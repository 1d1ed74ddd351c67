//! Per-metric derivation functions
//!
//! Each function reads one field family from an object body and emits zero
//! or more samples. A field that is unset emits nothing; a field that cannot
//! be parsed is skipped with a debug log.

use super::dimensions::container_dimensions;
use super::SampleSink;
use crate::models::{
    ContainerSpec, ContainerStatus, Dimensions, ObjectBody, PodBody, WatchedObject,
};
use crate::quantity::Quantity;
use tracing::debug;

fn parse_quantity(object: &WatchedObject, field: &str, raw: &str) -> Option<Quantity> {
    match Quantity::parse(raw) {
        Ok(q) => Some(q),
        Err(e) => {
            debug!(
                kind = %object.kind(),
                uid = %object.uid(),
                field = %field,
                error = %e,
                "Skipping malformed quantity"
            );
            None
        }
    }
}

// Pods

pub(super) fn pod_phase(object: &WatchedObject, sink: &mut SampleSink) {
    let ObjectBody::Pod(pod) = &object.body else {
        return;
    };
    let value: i64 = match pod.phase.as_deref() {
        Some("Pending") => 1,
        Some("Running") => 2,
        Some("Succeeded") => 3,
        Some("Failed") => 4,
        Some(_) => 5,
        None => return,
    };
    sink.emit(value);
}

fn for_each_status(
    pod: &PodBody,
    sink: &mut SampleSink,
    value: impl Fn(&ContainerStatus) -> i64,
) {
    for status in &pod.container_statuses {
        let image = pod
            .containers
            .iter()
            .find(|c| c.name == status.name)
            .and_then(|c| c.image.as_deref());
        let dims = container_dimensions(&status.name, image, Some(status));
        sink.emit_with(value(status), dims);
    }
}

pub(super) fn container_restart_count(object: &WatchedObject, sink: &mut SampleSink) {
    if let ObjectBody::Pod(pod) = &object.body {
        for_each_status(pod, sink, |s| s.restart_count as i64);
    }
}

pub(super) fn container_ready(object: &WatchedObject, sink: &mut SampleSink) {
    if let ObjectBody::Pod(pod) = &object.body {
        for_each_status(pod, sink, |s| if s.ready { 1 } else { 0 });
    }
}

#[derive(Clone, Copy)]
enum Resource {
    Cpu,
    Memory,
}

#[derive(Clone, Copy)]
enum Field {
    Request,
    Limit,
}

fn container_resource(
    object: &WatchedObject,
    sink: &mut SampleSink,
    resource: Resource,
    field: Field,
) {
    let ObjectBody::Pod(pod) = &object.body else {
        return;
    };

    for container in &pod.containers {
        let values = match field {
            Field::Request => &container.requests,
            Field::Limit => &container.limits,
        };
        let key = match resource {
            Resource::Cpu => "cpu",
            Resource::Memory => "memory",
        };
        let Some(raw) = values.get(key) else {
            continue;
        };
        let Some(quantity) = parse_quantity(object, key, raw) else {
            continue;
        };

        let dims = spec_dimensions(pod, container);
        match resource {
            Resource::Cpu => sink.emit_with(quantity.milli_value() as f64 / 1000.0, dims),
            Resource::Memory => sink.emit_with(quantity.value(), dims),
        }
    }
}

fn spec_dimensions(pod: &PodBody, container: &ContainerSpec) -> Dimensions {
    let status = pod
        .container_statuses
        .iter()
        .find(|s| s.name == container.name);
    container_dimensions(&container.name, container.image.as_deref(), status)
}

pub(super) fn container_cpu_request(object: &WatchedObject, sink: &mut SampleSink) {
    container_resource(object, sink, Resource::Cpu, Field::Request);
}

pub(super) fn container_cpu_limit(object: &WatchedObject, sink: &mut SampleSink) {
    container_resource(object, sink, Resource::Cpu, Field::Limit);
}

pub(super) fn container_memory_request(object: &WatchedObject, sink: &mut SampleSink) {
    container_resource(object, sink, Resource::Memory, Field::Request);
}

pub(super) fn container_memory_limit(object: &WatchedObject, sink: &mut SampleSink) {
    container_resource(object, sink, Resource::Memory, Field::Limit);
}

// Workloads

macro_rules! optional_count {
    ($fn_name:ident, $variant:ident, $field:ident) => {
        pub(super) fn $fn_name(object: &WatchedObject, sink: &mut SampleSink) {
            if let ObjectBody::$variant(body) = &object.body {
                if let Some(value) = body.$field {
                    sink.emit(value);
                }
            }
        }
    };
}

macro_rules! count {
    ($fn_name:ident, $variant:ident, $field:ident) => {
        pub(super) fn $fn_name(object: &WatchedObject, sink: &mut SampleSink) {
            if let ObjectBody::$variant(body) = &object.body {
                sink.emit(body.$field);
            }
        }
    };
}

// Spec fields may be unset; status counters are always reported
optional_count!(deployment_desired, Deployment, desired);
count!(deployment_available, Deployment, available);
count!(deployment_updated, Deployment, updated);

optional_count!(replica_set_desired, ReplicaSet, desired);
count!(replica_set_available, ReplicaSet, available);

optional_count!(stateful_set_desired, StatefulSet, desired);
count!(stateful_set_ready, StatefulSet, ready);
count!(stateful_set_current, StatefulSet, current);
count!(stateful_set_updated, StatefulSet, updated);

count!(daemon_set_current_scheduled, DaemonSet, current_scheduled);
count!(daemon_set_desired_scheduled, DaemonSet, desired_scheduled);
count!(daemon_set_misscheduled, DaemonSet, misscheduled);
count!(daemon_set_ready, DaemonSet, ready);

optional_count!(job_completions, Job, completions);
count!(job_active, Job, active);
count!(job_failed, Job, failed);
count!(job_succeeded, Job, succeeded);

count!(cronjob_active, CronJob, active_jobs);

// Quotas

fn quota_values(object: &WatchedObject, sink: &mut SampleSink, used: bool) {
    let ObjectBody::ResourceQuota(quota) = &object.body else {
        return;
    };
    let values = if used { &quota.used } else { &quota.hard };

    for (resource, raw) in values {
        let Some(quantity) = parse_quantity(object, resource, raw) else {
            continue;
        };
        let value = if resource.ends_with("cpu") {
            quantity.milli_value()
        } else {
            quantity.value()
        };
        sink.emit_with(value, [("resource".to_string(), resource.clone())]);
    }
}

pub(super) fn resource_quota_hard(object: &WatchedObject, sink: &mut SampleSink) {
    quota_values(object, sink, false);
}

pub(super) fn resource_quota_used(object: &WatchedObject, sink: &mut SampleSink) {
    quota_values(object, sink, true);
}

// Cluster-scoped

pub(super) fn namespace_phase(object: &WatchedObject, sink: &mut SampleSink) {
    if let ObjectBody::Namespace(ns) = &object.body {
        let value: i64 = match ns.phase.as_deref() {
            Some("Active") => 1,
            Some("Terminating") => 0,
            _ => -1,
        };
        sink.emit(value);
    }
}

pub(super) fn node_ready(object: &WatchedObject, sink: &mut SampleSink) {
    if let ObjectBody::Node(node) = &object.body {
        let value: i64 = match node.ready.as_deref() {
            Some("True") => 1,
            Some("False") => 0,
            _ => -1,
        };
        sink.emit(value);
    }
}
