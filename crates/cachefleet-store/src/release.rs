//! Deploy collaborator
//!
//! Rendering backend templates and installing them is out of the engine's
//! hands: it sees an opaque release that can be checked, installed from a
//! values document and deleted.

use crate::error::{Result, StoreError};
use async_trait::async_trait;
use cachefleet_types::NamespacedName;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[async_trait]
pub trait ReleaseManager: Send + Sync {
    /// Whether a release with this name is installed
    async fn check_release(&self, name: &str, namespace: &str) -> Result<bool>;

    /// Install `chart` with the rendered `values` document
    async fn install_release(
        &self,
        name: &str,
        namespace: &str,
        values: &str,
        chart: &str,
    ) -> Result<()>;

    /// Delete a release; fails with `NotFound` if it is not installed
    async fn delete_release(&self, name: &str, namespace: &str) -> Result<()>;
}

/// An installed release as recorded by [`InMemoryReleaseManager`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRecord {
    pub chart: String,
    pub values: String,
}

/// In-memory release manager that only records installs and deletes
pub struct InMemoryReleaseManager {
    releases: DashMap<NamespacedName, ReleaseRecord>,
    installs: AtomicU32,
    deletes: AtomicU32,
    fail_installs: AtomicBool,
    failing_deletes: AtomicU32,
}

impl InMemoryReleaseManager {
    pub fn new() -> Self {
        Self {
            releases: DashMap::new(),
            installs: AtomicU32::new(0),
            deletes: AtomicU32::new(0),
            fail_installs: AtomicBool::new(false),
            failing_deletes: AtomicU32::new(0),
        }
    }

    pub fn release(&self, name: &str, namespace: &str) -> Option<ReleaseRecord> {
        self.releases
            .get(&NamespacedName::new(namespace, name))
            .map(|r| r.value().clone())
    }

    pub fn install_count(&self) -> u32 {
        self.installs.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> u32 {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn set_fail_installs(&self, fail: bool) {
        self.fail_installs.store(fail, Ordering::SeqCst);
    }

    /// Reject the next `n` deletes
    pub fn fail_deletes(&self, n: u32) {
        self.failing_deletes.store(n, Ordering::SeqCst);
    }
}

impl Default for InMemoryReleaseManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReleaseManager for InMemoryReleaseManager {
    async fn check_release(&self, name: &str, namespace: &str) -> Result<bool> {
        Ok(self
            .releases
            .contains_key(&NamespacedName::new(namespace, name)))
    }

    async fn install_release(
        &self,
        name: &str,
        namespace: &str,
        values: &str,
        chart: &str,
    ) -> Result<()> {
        if self.fail_installs.load(Ordering::SeqCst) {
            return Err(StoreError::Release {
                release: name.to_string(),
                message: "install rejected".to_string(),
            });
        }
        self.releases.insert(
            NamespacedName::new(namespace, name),
            ReleaseRecord {
                chart: chart.to_string(),
                values: values.to_string(),
            },
        );
        self.installs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_release(&self, name: &str, namespace: &str) -> Result<()> {
        let key = NamespacedName::new(namespace, name);
        let failing = self
            .failing_deletes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(StoreError::Release {
                release: name.to_string(),
                message: "delete rejected".to_string(),
            });
        }
        match self.releases.remove(&key) {
            Some(_) => {
                self.deletes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(StoreError::not_found("Release", &key)),
        }
    }
}
