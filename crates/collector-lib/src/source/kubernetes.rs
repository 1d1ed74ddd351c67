//! `ApiSource` backed by a real API server through `kube`

use super::{convert, ApiSource, ObjectList, SourceError, WatchEvent, WatchStream};
use crate::config::AuthType;
use crate::models::{ResourceKind, WatchedObject};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, ResourceQuota};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams, WatchParams};
use kube::config::KubeConfigOptions;
use kube::core::WatchEvent as KubeWatchEvent;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::{debug, info};

/// Server-side timeout for a single watch request (seconds)
const DEFAULT_WATCH_TIMEOUT_SECS: u32 = 290;

/// Build an API client for the configured authentication mode
pub async fn client_for(auth_type: AuthType) -> Result<Client> {
    let config = match auth_type {
        AuthType::ServiceAccount => {
            kube::Config::incluster().context("Failed to load in-cluster service account config")?
        }
        AuthType::KubeConfig => kube::Config::from_kubeconfig(&KubeConfigOptions::default())
            .await
            .context("Failed to load kubeconfig")?,
        AuthType::None => {
            let endpoint = std::env::var("KUBERNETES_SERVICE_HOST")
                .map(|host| {
                    let port =
                        std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".into());
                    format!("https://{}:{}", host, port)
                })
                .unwrap_or_else(|_| "https://kubernetes.default.svc".into());
            kube::Config::new(
                endpoint
                    .parse()
                    .with_context(|| format!("Invalid API server URL: {}", endpoint))?,
            )
        }
    };

    info!(
        auth_type = ?auth_type,
        cluster_url = %config.cluster_url,
        "Kubernetes API client configured"
    );

    Client::try_from(config).context("Failed to create Kubernetes API client")
}

/// List/watch access to the API server
#[derive(Clone)]
pub struct KubeSource {
    client: Client,
    watch_timeout_secs: u32,
}

impl KubeSource {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            watch_timeout_secs: DEFAULT_WATCH_TIMEOUT_SECS,
        }
    }

    fn scoped<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn cluster<K>(&self) -> Api<K>
    where
        K: Resource,
        <K as Resource>::DynamicType: Default,
    {
        Api::all(self.client.clone())
    }

    fn watch_params(&self) -> WatchParams {
        WatchParams::default().timeout(self.watch_timeout_secs)
    }
}

#[async_trait]
impl ApiSource for KubeSource {
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
    ) -> Result<ObjectList, SourceError> {
        match kind {
            ResourceKind::Pod => list_objects(self.scoped::<Pod>(namespace), kind, convert::pod).await,
            ResourceKind::Deployment => {
                list_objects(self.scoped::<Deployment>(namespace), kind, convert::deployment).await
            }
            ResourceKind::ReplicaSet => {
                list_objects(self.scoped::<ReplicaSet>(namespace), kind, convert::replica_set).await
            }
            ResourceKind::StatefulSet => {
                list_objects(self.scoped::<StatefulSet>(namespace), kind, convert::stateful_set)
                    .await
            }
            ResourceKind::DaemonSet => {
                list_objects(self.scoped::<DaemonSet>(namespace), kind, convert::daemon_set).await
            }
            ResourceKind::Job => list_objects(self.scoped::<Job>(namespace), kind, convert::job).await,
            ResourceKind::CronJob => {
                list_objects(self.scoped::<CronJob>(namespace), kind, convert::cron_job).await
            }
            ResourceKind::ResourceQuota => {
                list_objects(
                    self.scoped::<ResourceQuota>(namespace),
                    kind,
                    convert::resource_quota,
                )
                .await
            }
            ResourceKind::Namespace => {
                list_objects(self.cluster::<Namespace>(), kind, convert::namespace).await
            }
            ResourceKind::Node => list_objects(self.cluster::<Node>(), kind, convert::node).await,
        }
    }

    async fn watch(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        resource_version: &str,
    ) -> Result<WatchStream, SourceError> {
        let wp = self.watch_params();
        let rv = resource_version;
        match kind {
            ResourceKind::Pod => {
                watch_objects(self.scoped::<Pod>(namespace), kind, &wp, rv, convert::pod).await
            }
            ResourceKind::Deployment => {
                watch_objects(self.scoped::<Deployment>(namespace), kind, &wp, rv, convert::deployment)
                    .await
            }
            ResourceKind::ReplicaSet => {
                watch_objects(self.scoped::<ReplicaSet>(namespace), kind, &wp, rv, convert::replica_set)
                    .await
            }
            ResourceKind::StatefulSet => {
                watch_objects(
                    self.scoped::<StatefulSet>(namespace),
                    kind,
                    &wp,
                    rv,
                    convert::stateful_set,
                )
                .await
            }
            ResourceKind::DaemonSet => {
                watch_objects(self.scoped::<DaemonSet>(namespace), kind, &wp, rv, convert::daemon_set)
                    .await
            }
            ResourceKind::Job => {
                watch_objects(self.scoped::<Job>(namespace), kind, &wp, rv, convert::job).await
            }
            ResourceKind::CronJob => {
                watch_objects(self.scoped::<CronJob>(namespace), kind, &wp, rv, convert::cron_job)
                    .await
            }
            ResourceKind::ResourceQuota => {
                watch_objects(
                    self.scoped::<ResourceQuota>(namespace),
                    kind,
                    &wp,
                    rv,
                    convert::resource_quota,
                )
                .await
            }
            ResourceKind::Namespace => {
                watch_objects(self.cluster::<Namespace>(), kind, &wp, rv, convert::namespace).await
            }
            ResourceKind::Node => {
                watch_objects(self.cluster::<Node>(), kind, &wp, rv, convert::node).await
            }
        }
    }
}

async fn list_objects<K>(
    api: Api<K>,
    kind: ResourceKind,
    convert: fn(K) -> WatchedObject,
) -> Result<ObjectList, SourceError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let list = api
        .list(&ListParams::default())
        .await
        .map_err(|e| map_kube_error(kind, e))?;

    let resource_version = list.metadata.resource_version.unwrap_or_default();
    debug!(
        kind = %kind,
        items = list.items.len(),
        resource_version = %resource_version,
        "Listed objects"
    );

    Ok(ObjectList {
        resource_version,
        items: list.items.into_iter().map(convert).collect(),
    })
}

async fn watch_objects<K>(
    api: Api<K>,
    kind: ResourceKind,
    wp: &WatchParams,
    resource_version: &str,
    convert: fn(K) -> WatchedObject,
) -> Result<WatchStream, SourceError>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    let stream = api
        .watch(wp, resource_version)
        .await
        .map_err(|e| map_kube_error(kind, e))?;

    Ok(stream
        .map(move |item| match item {
            Ok(KubeWatchEvent::Added(o)) => Ok(WatchEvent::Added(convert(o))),
            Ok(KubeWatchEvent::Modified(o)) => Ok(WatchEvent::Modified(convert(o))),
            Ok(KubeWatchEvent::Deleted(o)) => Ok(WatchEvent::Deleted(convert(o))),
            Ok(KubeWatchEvent::Bookmark(b)) => Ok(WatchEvent::Bookmark(b.metadata.resource_version)),
            Ok(KubeWatchEvent::Error(e)) => Err(map_status(kind, e.code, e.message)),
            Err(e) => Err(map_kube_error(kind, e)),
        })
        .boxed())
}

fn map_status(kind: ResourceKind, code: u16, message: String) -> SourceError {
    match code {
        403 => SourceError::Forbidden { kind, message },
        410 => SourceError::Gone(message),
        _ => SourceError::Api { code, message },
    }
}

fn map_kube_error(kind: ResourceKind, err: kube::Error) -> SourceError {
    match err {
        kube::Error::Api(resp) => map_status(kind, resp.code, resp.message),
        kube::Error::SerdeError(e) => SourceError::Decode {
            kind,
            message: e.to_string(),
        },
        other => SourceError::Connection(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_status(ResourceKind::Pod, 410, "too old".into()),
            SourceError::Gone(_)
        ));
        assert!(matches!(
            map_status(ResourceKind::Node, 403, "nope".into()),
            SourceError::Forbidden {
                kind: ResourceKind::Node,
                ..
            }
        ));
        assert!(matches!(
            map_status(ResourceKind::Pod, 500, "boom".into()),
            SourceError::Api { code: 500, .. }
        ));
    }
}
