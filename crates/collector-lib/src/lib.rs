//! Library for the Kubernetes cluster metrics collector
//!
//! This crate provides the core functionality for:
//! - Mirroring cluster objects through list/watch reflectors
//! - Resolving pods to their owning workloads
//! - Deriving metric samples from cached state
//! - Scheduling collection cycles and emitting batches
//! - Health checks and observability

pub mod api;
pub mod cache;
pub mod config;
pub mod emit;
pub mod engine;
pub mod health;
pub mod index;
pub mod models;
pub mod observability;
pub mod quantity;
pub mod source;

pub use cache::{CacheConfig, ObjectCache, Snapshot};
pub use config::{AuthType, MonitorConfig};
pub use emit::{Scheduler, Transport};
pub use engine::MetricEngine;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{CollectorMetrics, StructuredLogger};
