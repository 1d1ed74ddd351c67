//! Metric derivation engine
//!
//! Turns a cache snapshot plus its relationship index into metric samples:
//! - namespace scoping is applied to the snapshot before any derivation
//! - the enabled set is every default-on metric plus `extraMetrics`
//! - identity and workload dimensions are computed once per object

pub mod dimensions;
mod derive;
pub mod registry;


pub use registry::{MetricDescriptor, METRICS};

use crate::cache::Snapshot;
use crate::config::MonitorConfig;
use crate::index::RelationshipIndex;
use crate::models::{
    Dimensions, MetricSample, MetricType, MetricValue, ResourceKind, WatchedObject,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Collects the samples of one metric for one object
pub struct SampleSink<'a> {
    metric: &'static str,
    metric_type: MetricType,
    base: &'a Dimensions,
    timestamp: DateTime<Utc>,
    samples: &'a mut Vec<MetricSample>,
}

impl<'a> SampleSink<'a> {
    /// Emit a sample carrying only the object's base dimensions
    pub fn emit(&mut self, value: impl Into<MetricValue>) {
        self.emit_with(value, std::iter::empty::<(String, String)>());
    }

    /// Emit a sample with extra dimensions layered over the base set
    pub fn emit_with(
        &mut self,
        value: impl Into<MetricValue>,
        extra: impl IntoIterator<Item = (String, String)>,
    ) {
        let mut dimensions = self.base.clone();
        dimensions.extend(extra.into_iter().filter(|(_, v)| !v.is_empty()));

        self.samples.push(MetricSample {
            metric: self.metric.to_string(),
            value: value.into(),
            metric_type: self.metric_type,
            dimensions,
            timestamp: self.timestamp,
        });
    }
}

pub struct MetricEngine {
    namespace: Option<String>,
    /// Enabled descriptors grouped by the kind they derive from
    enabled: BTreeMap<ResourceKind, Vec<&'static MetricDescriptor>>,
}

impl MetricEngine {
    pub fn new(config: &MonitorConfig) -> Self {
        for name in &config.extra_metrics {
            if registry::lookup(name).is_none() {
                warn!(metric = %name, "Unknown metric in extraMetrics, ignoring");
            }
        }

        let mut enabled: BTreeMap<ResourceKind, Vec<&'static MetricDescriptor>> = BTreeMap::new();
        for descriptor in METRICS {
            let extra = config.extra_metrics.iter().any(|m| m == descriptor.name);
            if descriptor.default_on || extra {
                enabled.entry(descriptor.kind).or_default().push(descriptor);
            }
        }

        Self {
            namespace: config.namespace.clone(),
            enabled,
        }
    }

    pub fn is_enabled(&self, metric: &str) -> bool {
        self.enabled
            .values()
            .flatten()
            .any(|descriptor| descriptor.name == metric)
    }

    pub fn enabled_metrics(&self) -> Vec<&'static str> {
        self.enabled.values().flatten().map(|d| d.name).collect()
    }

    /// Kinds the enabled metrics derive from
    pub fn required_kinds(&self) -> Vec<ResourceKind> {
        self.enabled.keys().copied().collect()
    }

    /// Whether `object` is visible under the configured namespace
    pub fn in_scope(&self, object: &WatchedObject) -> bool {
        let Some(namespace) = self.namespace.as_deref() else {
            return true;
        };
        match object.kind() {
            ResourceKind::Node => false,
            ResourceKind::Namespace => object.name() == namespace,
            _ => object.namespace() == Some(namespace),
        }
    }

    /// Drop everything outside the configured namespace
    pub fn scope(&self, snapshot: &mut Snapshot) {
        if self.namespace.is_some() {
            snapshot.retain(|object| self.in_scope(object));
        }
    }

    /// Scope the snapshot, index the scoped objects, and derive every
    /// enabled metric.
    ///
    /// The index is always built from the scoped snapshot so attribution
    /// can never reach an object outside the namespace.
    pub fn collect(&self, snapshot: &Snapshot) -> Vec<MetricSample> {
        let mut scoped = snapshot.clone();
        self.scope(&mut scoped);
        let index = RelationshipIndex::build(&scoped);
        self.derive(&scoped, &index)
    }

    fn derive(&self, snapshot: &Snapshot, index: &RelationshipIndex) -> Vec<MetricSample> {
        let timestamp = Utc::now();
        let mut samples = Vec::new();

        for (kind, descriptors) in &self.enabled {
            for object in snapshot.objects(*kind).iter().map(|o| &**o) {
                let base = dimensions::base_dimensions(object, index);
                for descriptor in descriptors {
                    let mut sink = SampleSink {
                        metric: descriptor.name,
                        metric_type: descriptor.metric_type,
                        base: &base,
                        timestamp,
                        samples: &mut samples,
                    };
                    (descriptor.derive)(object, &mut sink);
                }
            }
        }

        debug!(
            objects = snapshot.len(),
            samples = samples.len(),
            "Derived metrics from snapshot"
        );
        samples
    }
}
