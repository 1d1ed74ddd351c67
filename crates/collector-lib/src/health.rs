//! Health check infrastructure for the collector
//!
//! Tracks component health for the liveness probe and the initial-sync
//! state of every watched kind for the readiness probe.

use crate::models::ResourceKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Serving, possibly from partially stale state
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix seconds of the last status change
    pub updated_at: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across all components
    pub fn compute_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Kinds whose initial list has not completed yet
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_kinds: Vec<String>,
}

/// Component names for health tracking
pub mod components {
    pub const CACHE: &str = "cache";
    pub const ENGINE: &str = "engine";
    pub const TRANSPORT: &str = "transport";
}

#[derive(Debug, Default)]
struct SyncState {
    started: bool,
    pending: BTreeSet<ResourceKind>,
}

/// Health registry for tracking component health
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    sync: Arc<RwLock<SyncState>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(BTreeMap::new())),
            sync: Arc::new(RwLock::new(SyncState::default())),
        }
    }

    /// Register a component with initial healthy status
    pub async fn register(&self, name: &str) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), ComponentHealth::healthy());
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Declare the kinds that must complete an initial list before the
    /// collector reports ready
    pub async fn expect_synced(&self, kinds: &[ResourceKind]) {
        let mut sync = self.sync.write().await;
        sync.started = true;
        sync.pending.extend(kinds.iter().copied());
    }

    /// Record that `kind` completed its initial list
    pub async fn mark_synced(&self, kind: ResourceKind) {
        self.sync.write().await.pending.remove(&kind);
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let (started, pending) = {
            let sync = self.sync.read().await;
            (
                sync.started,
                sync.pending
                    .iter()
                    .map(|k| k.as_str().to_string())
                    .collect::<Vec<_>>(),
            )
        };
        let health = self.health().await;

        if !started {
            ReadinessResponse {
                ready: false,
                reason: Some("Collector not yet initialized".to_string()),
                pending_kinds: Vec::new(),
            }
        } else if !pending.is_empty() {
            ReadinessResponse {
                ready: false,
                reason: Some("Waiting for initial list".to_string()),
                pending_kinds: pending,
            }
        } else if health.status == ComponentStatus::Unhealthy {
            ReadinessResponse {
                ready: false,
                reason: Some("Critical component unhealthy".to_string()),
                pending_kinds: Vec::new(),
            }
        } else {
            ReadinessResponse {
                ready: true,
                reason: None,
                pending_kinds: Vec::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_registry_initial_state() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_degraded_cache_degrades_overall() {
        let registry = HealthRegistry::new();
        registry.register(components::CACHE).await;
        registry.register(components::TRANSPORT).await;

        registry.set_degraded(components::CACHE, "Pod watch restarting").await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert!(health.status.is_operational());
    }

    #[tokio::test]
    async fn test_unhealthy_wins() {
        let registry = HealthRegistry::new();
        registry.register(components::CACHE).await;
        registry.set_degraded(components::ENGINE, "slow").await;
        registry.set_unhealthy(components::TRANSPORT, "endpoint rejected").await;

        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_readiness_not_ready_initially() {
        let registry = HealthRegistry::new();
        let readiness = registry.readiness().await;

        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());
    }

    #[tokio::test]
    async fn test_readiness_waits_for_every_kind() {
        let registry = HealthRegistry::new();
        registry
            .expect_synced(&[ResourceKind::Pod, ResourceKind::Node])
            .await;

        registry.mark_synced(ResourceKind::Pod).await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.pending_kinds, vec!["Node".to_string()]);

        registry.mark_synced(ResourceKind::Node).await;
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_readiness_not_ready_when_unhealthy() {
        let registry = HealthRegistry::new();
        registry.expect_synced(&[]).await;
        registry.set_unhealthy(components::CACHE, "Failed").await;

        assert!(!registry.readiness().await.ready);
    }
}
