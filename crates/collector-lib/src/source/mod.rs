//! API-access collaborator
//!
//! The cache only ever talks to the API server through [`ApiSource`]:
//! a full list per kind and a watch stream resuming from a resource version.
//! [`KubeSource`] is the production implementation; [`FakeApiSource`] is an
//! in-memory server used by tests.

mod convert;
pub mod fake;
mod kubernetes;

pub use kubernetes::{client_for, KubeSource};
pub use fake::FakeApiSource;

use crate::models::{ResourceKind, WatchedObject};
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Incremental change delivered on a watch stream
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Added(WatchedObject),
    Modified(WatchedObject),
    Deleted(WatchedObject),
    /// Progress marker carrying only a resource version
    Bookmark(String),
}

/// Result of a full list call
#[derive(Debug, Clone, Default)]
pub struct ObjectList {
    pub resource_version: String,
    pub items: Vec<WatchedObject>,
}

/// Terminal errors from list/watch calls.
///
/// Callers treat every variant the same way: re-list.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("connection to API server failed: {0}")]
    Connection(String),
    #[error("access to {kind} forbidden: {message}")]
    Forbidden { kind: ResourceKind, message: String },
    #[error("resource version {0} is too old")]
    Gone(String),
    #[error("failed to decode {kind} object: {message}")]
    Decode { kind: ResourceKind, message: String },
    #[error("API server error ({code}): {message}")]
    Api { code: u16, message: String },
}

pub type WatchStream = BoxStream<'static, Result<WatchEvent, SourceError>>;

#[async_trait]
pub trait ApiSource: Send + Sync {
    /// List every object of `kind`, restricted to `namespace` for namespaced kinds
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
    ) -> Result<ObjectList, SourceError>;

    /// Open a watch stream delivering changes after `resource_version`
    async fn watch(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        resource_version: &str,
    ) -> Result<WatchStream, SourceError>;
}
