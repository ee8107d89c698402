//! Typed resource API trait

use crate::error::Result;
use crate::resource::Resource;
use async_trait::async_trait;
use cachefleet_types::LabelSelector;

/// Custom-resource store for one resource type
///
/// Writes are guarded by `metadata.resource_version`: `update` and
/// `update_status` fail with `StoreError::Conflict` when the caller's version
/// is stale. Cluster-scoped objects use an empty namespace.
#[async_trait]
pub trait ResourceApi<R: Resource>: Send + Sync {
    /// Get an object, failing with `NotFound` if it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<R>;

    /// List objects matching `selector`, optionally restricted to a namespace
    async fn list(&self, namespace: Option<&str>, selector: &LabelSelector) -> Result<Vec<R>>;

    /// Create an object
    async fn create(&self, object: R) -> Result<R>;

    /// Replace an object (spec and metadata)
    async fn update(&self, object: R) -> Result<R>;

    /// Replace only the status portion of an object
    async fn update_status(&self, object: R) -> Result<R>;

    /// Delete an object.
    ///
    /// Objects with pending finalizers are only marked for deletion.
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}
