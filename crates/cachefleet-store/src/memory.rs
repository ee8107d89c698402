//! In-memory implementation of the resource API
//!
//! Suitable for development, simulation and testing. Mirrors the
//! optimistic-concurrency and finalizer semantics of a real API server so
//! engine code exercised against it behaves the same in production.

use crate::api::ResourceApi;
use crate::error::{Result, StoreError};
use crate::resource::Resource;
use async_trait::async_trait;
use cachefleet_types::{LabelSelector, NamespacedName};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// In-memory store for one resource type
pub struct InMemoryResourceApi<R: Resource> {
    objects: DashMap<NamespacedName, R>,
    next_version: AtomicU64,
    writes: AtomicU64,
    pending_conflicts: AtomicU32,
}

impl<R: Resource> InMemoryResourceApi<R> {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            next_version: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            pending_conflicts: AtomicU32::new(0),
        }
    }

    /// Number of successful writes (create, update, update_status, delete)
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make the next `n` updates fail with a conflict
    pub fn inject_conflicts(&self, n: u32) {
        self.pending_conflicts.store(n, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn bump_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn take_injected_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn replace(&self, incoming: R, status_only: bool) -> Result<R> {
        let key = incoming.metadata().key();
        let mut entry = self
            .objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::not_found(R::KIND, &key))?;

        let current = entry.metadata().resource_version;
        let expected = incoming.metadata().resource_version;
        if self.take_injected_conflict() || current != expected {
            return Err(StoreError::Conflict {
                kind: R::KIND,
                key: key.to_string(),
                current,
                expected,
            });
        }

        let mut next = if status_only {
            let mut merged = entry.clone();
            merged.take_status(incoming);
            merged
        } else {
            let mut replaced = incoming;
            let meta = replaced.metadata_mut();
            meta.creation_timestamp = entry.metadata().creation_timestamp;
            meta.deletion_timestamp = entry.metadata().deletion_timestamp;
            replaced
        };
        next.metadata_mut().resource_version = self.bump_version();
        self.writes.fetch_add(1, Ordering::SeqCst);

        // Last finalizer removed from an object pending deletion
        if next.metadata().is_being_deleted() && next.metadata().finalizers.is_empty() {
            drop(entry);
            self.objects.remove(&key);
            return Ok(next);
        }

        *entry = next.clone();
        Ok(next)
    }
}

impl<R: Resource> Default for InMemoryResourceApi<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: Resource> ResourceApi<R> for InMemoryResourceApi<R> {
    async fn get(&self, namespace: &str, name: &str) -> Result<R> {
        let key = NamespacedName::new(namespace, name);
        self.objects
            .get(&key)
            .map(|o| o.value().clone())
            .ok_or_else(|| StoreError::not_found(R::KIND, &key))
    }

    async fn list(&self, namespace: Option<&str>, selector: &LabelSelector) -> Result<Vec<R>> {
        let mut matched: Vec<R> = self
            .objects
            .iter()
            .filter(|o| namespace.map_or(true, |ns| o.key().namespace == ns))
            .filter(|o| selector.matches(&o.value().metadata().labels))
            .map(|o| o.value().clone())
            .collect();
        matched.sort_by(|a, b| a.metadata().key().cmp(&b.metadata().key()));
        Ok(matched)
    }

    async fn create(&self, mut object: R) -> Result<R> {
        let key = object.metadata().key();
        if key.name.is_empty() {
            return Err(StoreError::Invalid {
                kind: R::KIND,
                message: "name must not be empty".to_string(),
            });
        }

        let version = self.bump_version();
        let meta = object.metadata_mut();
        meta.resource_version = version;
        meta.deletion_timestamp = None;
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = Some(chrono::Utc::now());
        }

        match self.objects.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::AlreadyExists {
                kind: R::KIND,
                key: key.to_string(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(object.clone());
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(object)
            }
        }
    }

    async fn update(&self, object: R) -> Result<R> {
        self.replace(object, false)
    }

    async fn update_status(&self, object: R) -> Result<R> {
        self.replace(object, true)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let key = NamespacedName::new(namespace, name);
        let mut entry = self
            .objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::not_found(R::KIND, &key))?;

        if !entry.metadata().finalizers.is_empty() {
            if entry.metadata().deletion_timestamp.is_none() {
                let version = self.bump_version();
                let meta = entry.metadata_mut();
                meta.deletion_timestamp = Some(chrono::Utc::now());
                meta.resource_version = version;
                self.writes.fetch_add(1, Ordering::SeqCst);
            }
            return Ok(());
        }

        drop(entry);
        self.objects.remove(&key);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
