//! Monitor configuration consumed by the cache and the derivation engine

use crate::models::ResourceKind;
use serde::{Deserialize, Serialize};

/// How the API-access collaborator authenticates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthType {
    #[default]
    #[serde(alias = "serviceaccount")]
    ServiceAccount,
    #[serde(alias = "kubeconfig")]
    KubeConfig,
    #[serde(alias = "none")]
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesApiConfig {
    #[serde(default, alias = "authtype")]
    pub auth_type: AuthType,
}

/// Settings of the cluster monitor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    /// Restrict everything to this namespace
    #[serde(default)]
    pub namespace: Option<String>,

    /// Opt-in metrics beyond the default set
    #[serde(default, alias = "extrametrics")]
    pub extra_metrics: Vec<String>,

    #[serde(default, rename = "kubernetesAPI", alias = "kubernetesapi")]
    pub kubernetes_api: KubernetesApiConfig,
}

impl MonitorConfig {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_extra_metric(mut self, metric: impl Into<String>) -> Self {
        self.extra_metrics.push(metric.into());
        self
    }

    /// Kinds the cache has to mirror for this configuration.
    ///
    /// Nodes are cluster-wide and are not watched when a namespace is set.
    pub fn watched_kinds(&self) -> Vec<ResourceKind> {
        ResourceKind::ALL
            .into_iter()
            .filter(|kind| self.namespace.is_none() || *kind != ResourceKind::Node)
            .collect()
    }
}
