//! Static metric table

use super::derive;
use super::SampleSink;
use crate::models::{MetricType, ResourceKind, WatchedObject};

pub type DeriveFn = fn(&WatchedObject, &mut SampleSink);

/// One metric the engine knows how to derive
pub struct MetricDescriptor {
    pub name: &'static str,
    pub kind: ResourceKind,
    /// Emitted without being listed in `extraMetrics`
    pub default_on: bool,
    pub metric_type: MetricType,
    pub derive: DeriveFn,
}

impl std::fmt::Debug for MetricDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("default_on", &self.default_on)
            .field("metric_type", &self.metric_type)
            .finish()
    }
}

const fn gauge(name: &'static str, kind: ResourceKind, default_on: bool, derive: DeriveFn) -> MetricDescriptor {
    MetricDescriptor {
        name,
        kind,
        default_on,
        metric_type: MetricType::Gauge,
        derive,
    }
}

const fn cumulative(name: &'static str, kind: ResourceKind, default_on: bool, derive: DeriveFn) -> MetricDescriptor {
    MetricDescriptor {
        name,
        kind,
        default_on,
        metric_type: MetricType::Cumulative,
        derive,
    }
}

use ResourceKind::*;

pub static METRICS: &[MetricDescriptor] = &[
    gauge("kubernetes.pod_phase", Pod, true, derive::pod_phase),
    cumulative("kubernetes.container_restart_count", Pod, true, derive::container_restart_count),
    gauge("kubernetes.container_ready", Pod, true, derive::container_ready),
    gauge("kubernetes.container_cpu_request", Pod, false, derive::container_cpu_request),
    gauge("kubernetes.container_cpu_limit", Pod, false, derive::container_cpu_limit),
    gauge("kubernetes.container_memory_request", Pod, false, derive::container_memory_request),
    gauge("kubernetes.container_memory_limit", Pod, false, derive::container_memory_limit),
    gauge("kubernetes.deployment.desired", Deployment, true, derive::deployment_desired),
    gauge("kubernetes.deployment.available", Deployment, true, derive::deployment_available),
    gauge("kubernetes.deployment.updated", Deployment, false, derive::deployment_updated),
    gauge("kubernetes.replica_set.desired", ReplicaSet, true, derive::replica_set_desired),
    gauge("kubernetes.replica_set.available", ReplicaSet, true, derive::replica_set_available),
    gauge("kubernetes.stateful_set.desired", StatefulSet, false, derive::stateful_set_desired),
    gauge("kubernetes.stateful_set.ready", StatefulSet, false, derive::stateful_set_ready),
    gauge("kubernetes.stateful_set.current", StatefulSet, false, derive::stateful_set_current),
    gauge("kubernetes.stateful_set.updated", StatefulSet, false, derive::stateful_set_updated),
    gauge("kubernetes.daemon_set.current_scheduled", DaemonSet, true, derive::daemon_set_current_scheduled),
    gauge("kubernetes.daemon_set.desired_scheduled", DaemonSet, true, derive::daemon_set_desired_scheduled),
    gauge("kubernetes.daemon_set.misscheduled", DaemonSet, true, derive::daemon_set_misscheduled),
    gauge("kubernetes.daemon_set.ready", DaemonSet, true, derive::daemon_set_ready),
    gauge("kubernetes.job.completions", Job, false, derive::job_completions),
    gauge("kubernetes.job.active", Job, false, derive::job_active),
    gauge("kubernetes.job.failed", Job, false, derive::job_failed),
    gauge("kubernetes.job.succeeded", Job, false, derive::job_succeeded),
    gauge("kubernetes.cronjob.active", CronJob, false, derive::cronjob_active),
    gauge("kubernetes.resource_quota_hard", ResourceQuota, true, derive::resource_quota_hard),
    gauge("kubernetes.resource_quota_used", ResourceQuota, true, derive::resource_quota_used),
    gauge("kubernetes.namespace_phase", Namespace, true, derive::namespace_phase),
    gauge("kubernetes.node_ready", Node, true, derive::node_ready),
];

pub fn lookup(name: &str) -> Option<&'static MetricDescriptor> {
    METRICS.iter().find(|d| d.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_names_are_unique() {
        let names: HashSet<&str> = METRICS.iter().map(|d| d.name).collect();
        assert_eq!(names.len(), METRICS.len());
    }

    #[test]
    fn test_opt_in_metrics_are_off_by_default() {
        for name in [
            "kubernetes.stateful_set.desired",
            "kubernetes.job.completions",
            "kubernetes.cronjob.active",
            "kubernetes.container_cpu_request",
            "kubernetes.container_memory_limit",
        ] {
            assert!(!lookup(name).unwrap().default_on, "{} should be opt-in", name);
        }
        assert!(lookup("kubernetes.resource_quota_hard").unwrap().default_on);
        assert!(lookup("kubernetes.nope").is_none());
    }
}
