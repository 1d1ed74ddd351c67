//! End-to-end tests: fake API server -> cache -> engine -> scheduler -> transport

use chrono::{TimeZone, Utc};
use collector_lib::{
    cache::{CacheConfig, ObjectCache},
    config::MonitorConfig,
    emit::{ChannelTransport, Scheduler},
    engine::MetricEngine,
    models::{
        ContainerSpec, CronJobBody, DeploymentBody, JobBody, MetricSample, MetricValue,
        NamespaceBody, ObjectBody, ObjectMeta, OwnerRef, PodBody, QuotaBody, ReplicaSetBody,
        ResourceKind, StatefulSetBody, WatchedObject,
    },
    source::FakeApiSource,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Harness {
    source: Arc<FakeApiSource>,
    cache: ObjectCache,
    scheduler: Scheduler,
    batches: mpsc::Receiver<Vec<MetricSample>>,
}

impl Harness {
    async fn start(source: Arc<FakeApiSource>, monitor: MonitorConfig) -> Self {
        Self::start_with(source, monitor, Duration::from_secs(3600)).await
    }

    async fn start_with(
        source: Arc<FakeApiSource>,
        monitor: MonitorConfig,
        resync: Duration,
    ) -> Self {
        let cache = ObjectCache::new(
            source.clone(),
            CacheConfig {
                namespace: monitor.namespace.clone(),
                resync_interval: resync,
                initial_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_millis(50),
                ..Default::default()
            },
        );
        cache.start(&monitor.watched_kinds()).await;
        assert!(cache.wait_until_synced(Duration::from_secs(5)).await);

        let (transport, batches) = ChannelTransport::new(16);
        let scheduler = Scheduler::builder()
            .cache(cache.clone())
            .engine(Arc::new(MetricEngine::new(&monitor)))
            .transport(Arc::new(transport))
            .retry_delay(Duration::from_millis(5))
            .build()
            .unwrap();

        Self {
            source,
            cache,
            scheduler,
            batches,
        }
    }

    /// Run one cycle and return the batch it delivered
    async fn collect(&mut self) -> Vec<MetricSample> {
        let report = self.scheduler.run_cycle().await;
        assert!(report.emitted);
        if report.attempts == 0 {
            return Vec::new();
        }
        self.batches.recv().await.unwrap()
    }

    /// Wait until the cache holds exactly `count` objects of `kind`
    async fn settle(&self, kind: ResourceKind, count: usize) {
        for _ in 0..500 {
            if self.cache.list(kind).len() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "cache never settled at {} {} objects, has {}",
            count,
            kind,
            self.cache.list(kind).len()
        );
    }
}

fn pairs(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn namespace(name: &str) -> WatchedObject {
    WatchedObject::new(
        ObjectMeta::new(format!("ns-{}", name), name),
        ObjectBody::Namespace(NamespaceBody {
            phase: Some("Active".to_string()),
        }),
    )
}

fn quota(namespace: &str) -> WatchedObject {
    WatchedObject::new(
        ObjectMeta::new(format!("quota-{}", namespace), "object-quota-demo")
            .in_namespace(namespace),
        ObjectBody::ResourceQuota(QuotaBody {
            hard: pairs(&[("requests.cpu", "100"), ("pods", "10")]),
            used: pairs(&[("requests.cpu", "1500m"), ("pods", "3")]),
        }),
    )
}

fn pod(uid: &str, namespace: &str) -> WatchedObject {
    WatchedObject::new(
        ObjectMeta::new(uid, format!("pod-{}", uid)).in_namespace(namespace),
        ObjectBody::Pod(PodBody {
            phase: Some("Running".to_string()),
            node_name: Some("node-1".to_string()),
            ..Default::default()
        }),
    )
}

fn by_metric<'a>(samples: &'a [MetricSample], metric: &str) -> Vec<&'a MetricSample> {
    samples.iter().filter(|s| s.metric == metric).collect()
}

fn pod_uids(samples: &[MetricSample]) -> Vec<String> {
    let mut uids: Vec<String> = by_metric(samples, "kubernetes.pod_phase")
        .iter()
        .filter_map(|s| s.dimension("kubernetes_pod_uid").map(str::to_string))
        .collect();
    uids.sort();
    uids
}

#[tokio::test]
async fn test_quota_hard_and_used_reported() {
    let source = Arc::new(FakeApiSource::new());
    source.apply(namespace("default"));
    source.apply(quota("default"));

    let mut harness = Harness::start(source, MonitorConfig::default()).await;
    let samples = harness.collect().await;

    let hard = by_metric(&samples, "kubernetes.resource_quota_hard");
    let used = by_metric(&samples, "kubernetes.resource_quota_used");
    assert_eq!(hard.len(), 2);
    assert_eq!(used.len(), 2);

    let value = |samples: &[&MetricSample], resource: &str| {
        samples
            .iter()
            .find(|s| s.dimension("resource") == Some(resource))
            .map(|s| s.value)
    };
    assert_eq!(value(&hard, "requests.cpu"), Some(MetricValue::Int(100_000)));
    assert_eq!(value(&used, "requests.cpu"), Some(MetricValue::Int(1_500)));
    assert_eq!(value(&hard, "pods"), Some(MetricValue::Int(10)));
    assert_eq!(hard[0].dimension("quota_name"), Some("object-quota-demo"));

    harness.cache.shutdown().await;
}

#[tokio::test]
async fn test_namespace_scope_excludes_other_namespaces() {
    let source = Arc::new(FakeApiSource::new());
    for ns in ["good", "bad"] {
        source.apply(namespace(ns));
        source.apply(quota(ns));
        source.apply(pod(&format!("{}-pod", ns), ns));
    }

    let mut harness =
        Harness::start(source.clone(), MonitorConfig::default().with_namespace("good")).await;

    // Objects created after startup are scoped too
    source.apply(pod("bad-late", "bad"));
    source.apply(pod("good-late", "good"));
    harness.settle(ResourceKind::Pod, 2).await;

    let samples = harness.collect().await;
    assert!(!samples.is_empty());
    for sample in &samples {
        let namespace = sample
            .dimension("kubernetes_namespace")
            .expect("every scoped sample names its namespace");
        assert_eq!(namespace, "good", "leaked sample: {:?}", sample);
    }
    assert_eq!(pod_uids(&samples), vec!["good-late", "good-pod"]);

    harness.cache.shutdown().await;
}

#[tokio::test]
async fn test_workload_attribution_is_stable() {
    let source = Arc::new(FakeApiSource::new());
    source.apply(WatchedObject::new(
        ObjectMeta::new("d1", "web").in_namespace("default"),
        ObjectBody::Deployment(DeploymentBody {
            desired: Some(2),
            available: 2,
            updated: 2,
        }),
    ));
    source.apply(WatchedObject::new(
        ObjectMeta::new("rs1", "web-5d4f")
            .in_namespace("default")
            .owned_by(OwnerRef::controller("Deployment", "web", "d1")),
        ObjectBody::ReplicaSet(ReplicaSetBody {
            desired: Some(2),
            available: 2,
        }),
    ));
    for uid in ["p1", "p2"] {
        let mut p = pod(uid, "default");
        p.meta = p
            .meta
            .owned_by(OwnerRef::controller("ReplicaSet", "web-5d4f", "rs1"));
        source.apply(p);
    }

    let mut harness = Harness::start(source, MonitorConfig::default()).await;

    let workloads = |samples: &[MetricSample]| -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = by_metric(samples, "kubernetes.pod_phase")
            .iter()
            .map(|s| {
                (
                    s.dimension("kubernetes_pod_uid").unwrap_or_default().to_string(),
                    s.dimension("kubernetes_workload_name").unwrap_or_default().to_string(),
                )
            })
            .collect();
        out.sort();
        out
    };

    let first = workloads(&harness.collect().await);
    let second = workloads(&harness.collect().await);
    assert_eq!(first, second);
    assert_eq!(
        first,
        vec![
            ("p1".to_string(), "web".to_string()),
            ("p2".to_string(), "web".to_string())
        ]
    );

    harness.cache.shutdown().await;
}

#[tokio::test]
async fn test_stateful_set_desired_gated_by_extra_metrics() {
    let source = Arc::new(FakeApiSource::new());
    source.apply(WatchedObject::new(
        ObjectMeta::new("ss1", "web").in_namespace("default"),
        ObjectBody::StatefulSet(StatefulSetBody {
            desired: Some(3),
            ready: 3,
            ..Default::default()
        }),
    ));

    let mut default = Harness::start(source.clone(), MonitorConfig::default()).await;
    let samples = default.collect().await;
    assert!(by_metric(&samples, "kubernetes.stateful_set.desired").is_empty());
    default.cache.shutdown().await;

    let monitor = MonitorConfig::default().with_extra_metric("kubernetes.stateful_set.desired");
    let mut opted_in = Harness::start(source, monitor).await;
    let samples = opted_in.collect().await;
    let desired = by_metric(&samples, "kubernetes.stateful_set.desired");
    assert_eq!(desired.len(), 1);
    assert_eq!(desired[0].value, MetricValue::Int(3));
    assert_eq!(desired[0].dimension("kubernetes_name"), Some("web"));
    opted_in.cache.shutdown().await;
}

#[tokio::test]
async fn test_job_and_cronjob_reported_when_enabled() {
    let source = Arc::new(FakeApiSource::new());
    let created = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
    source.apply(WatchedObject::new(
        ObjectMeta::new("cj1", "report")
            .in_namespace("default")
            .created_at(created),
        ObjectBody::CronJob(CronJobBody { active_jobs: 1 }),
    ));
    source.apply(WatchedObject::new(
        ObjectMeta::new("j1", "report-1714979280")
            .in_namespace("default")
            .created_at(created)
            .owned_by(OwnerRef::controller("CronJob", "report", "cj1")),
        ObjectBody::Job(JobBody {
            completions: Some(1),
            active: 1,
            ..Default::default()
        }),
    ));
    let mut p = pod("p1", "default");
    p.meta = p
        .meta
        .owned_by(OwnerRef::controller("Job", "report-1714979280", "j1"));
    source.apply(p);

    let monitor = MonitorConfig::default()
        .with_extra_metric("kubernetes.job.completions")
        .with_extra_metric("kubernetes.cronjob.active");
    let mut harness = Harness::start(source, monitor).await;
    let samples = harness.collect().await;

    let completions = by_metric(&samples, "kubernetes.job.completions");
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].value, MetricValue::Int(1));
    assert_eq!(
        completions[0].dimension("kubernetes_name"),
        Some("report-1714979280")
    );
    assert_eq!(completions[0].dimension("kubernetes_workload"), Some("Job"));
    assert_eq!(
        completions[0].dimension("job_creation_timestamp"),
        Some("2024-05-06T07:08:09Z")
    );
    assert_eq!(completions[0].dimension("cronjob"), Some("report"));

    let active = by_metric(&samples, "kubernetes.cronjob.active");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].value, MetricValue::Int(1));
    assert_eq!(active[0].dimension("kubernetes_name"), Some("report"));
    assert_eq!(active[0].dimension("kubernetes_workload"), Some("CronJob"));
    assert_eq!(
        active[0].dimension("cronjob_creation_timestamp"),
        Some("2024-05-06T07:08:09Z")
    );

    // The pod is attributed through its Job to the CronJob
    let phase = by_metric(&samples, "kubernetes.pod_phase");
    assert_eq!(phase[0].dimension("kubernetes_workload"), Some("CronJob"));
    assert_eq!(phase[0].dimension("cronjob"), Some("report"));

    harness.cache.shutdown().await;
}

#[tokio::test]
async fn test_container_request_absent_vs_zero() {
    let source = Arc::new(FakeApiSource::new());
    let mut p = pod("p1", "default");
    if let ObjectBody::Pod(body) = &mut p.body {
        body.containers = vec![
            ContainerSpec {
                name: "zero".to_string(),
                image: Some("zero:1".to_string()),
                requests: pairs(&[("cpu", "0")]),
                limits: BTreeMap::new(),
            },
            ContainerSpec {
                name: "unset".to_string(),
                image: Some("unset:1".to_string()),
                requests: BTreeMap::new(),
                limits: BTreeMap::new(),
            },
        ];
    }
    source.apply(p);

    let monitor = MonitorConfig::default().with_extra_metric("kubernetes.container_cpu_request");
    let mut harness = Harness::start(source, monitor).await;
    let samples = harness.collect().await;

    let cpu = by_metric(&samples, "kubernetes.container_cpu_request");
    assert_eq!(cpu.len(), 1);
    assert_eq!(cpu[0].dimension("container_spec_name"), Some("zero"));
    assert_eq!(cpu[0].value, MetricValue::Float(0.0));

    harness.cache.shutdown().await;
}

#[tokio::test]
async fn test_creation_timestamp_dimension() {
    let source = Arc::new(FakeApiSource::new());
    let created = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap()
        + chrono::Duration::milliseconds(999);
    let mut p = pod("p1", "default");
    p.meta = p.meta.created_at(created);
    source.apply(p);

    let mut harness = Harness::start(source, MonitorConfig::default()).await;
    let samples = harness.collect().await;

    let phase = by_metric(&samples, "kubernetes.pod_phase");
    assert_eq!(
        phase[0].dimension("pod_creation_timestamp"),
        Some("2024-02-29T23:59:59Z")
    );

    harness.cache.shutdown().await;
}

#[tokio::test]
async fn test_partition_recovery_converges() {
    let source = Arc::new(FakeApiSource::new());
    source.apply(pod("a", "default"));
    source.apply(pod("b", "default"));

    let mut harness = Harness::start(source.clone(), MonitorConfig::default()).await;
    assert_eq!(pod_uids(&harness.collect().await), vec!["a", "b"]);

    source.set_partitioned(true);
    source.delete(ResourceKind::Pod, "a");
    source.apply(pod("c", "default"));

    // Cached state is served while disconnected
    assert_eq!(pod_uids(&harness.collect().await), vec!["a", "b"]);

    source.set_partitioned(false);
    for _ in 0..500 {
        if harness.cache.get(ResourceKind::Pod, "a").is_none()
            && harness.cache.get(ResourceKind::Pod, "c").is_some()
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pod_uids(&harness.collect().await), vec!["b", "c"]);

    harness.cache.shutdown().await;
}

#[tokio::test]
async fn test_resync_repairs_missed_events() {
    let source = Arc::new(FakeApiSource::new());
    source.apply(pod("a", "default"));

    let mut harness = Harness::start_with(
        source.clone(),
        MonitorConfig::default(),
        Duration::from_millis(200),
    )
    .await;

    source.set_dropping_events(true);
    source.delete(ResourceKind::Pod, "a");
    source.apply(pod("b", "default"));

    // Nothing reached the watch; the periodic relist repairs the gap
    for _ in 0..300 {
        if harness.cache.get(ResourceKind::Pod, "a").is_none()
            && harness.cache.get(ResourceKind::Pod, "b").is_some()
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pod_uids(&harness.collect().await), vec!["b"]);

    harness.cache.shutdown().await;
}

#[tokio::test]
async fn test_expired_watch_relists() {
    let source = Arc::new(FakeApiSource::new());
    source.apply(pod("a", "default"));

    let mut harness = Harness::start(source.clone(), MonitorConfig::default()).await;
    let lists_before = source.list_calls(ResourceKind::Pod);

    source.expire_watches();
    source.apply(pod("b", "default"));

    harness.settle(ResourceKind::Pod, 2).await;
    assert!(source.list_calls(ResourceKind::Pod) > lists_before);
    assert_eq!(pod_uids(&harness.collect().await), vec!["a", "b"]);

    harness.cache.shutdown().await;
}
