//! The engine interface consumed by the driver
//!
//! One [`CacheEngine`] serves one runtime. The driver calls the phase
//! methods in a fixed order every tick and treats any error as "retry
//! later". Backend differences are a closed set of [`Backend`] variants
//! picked from the runtime-type tag at construction.

use crate::backend::Backend;
use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use crate::info::{RuntimeInfo, Tier};
use crate::scheduler::NodeScheduler;
use async_trait::async_trait;
use cachefleet_store::retry_on;
use cachefleet_types::{
    Dataset, EventType, NamespacedName, Pod, Runtime, RuntimeEvent, RuntimePhase, RuntimeStatus,
    RuntimeType, Workload,
};
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use tracing::debug;

/// Phase-by-phase reconciliation of one runtime
#[async_trait]
pub trait Engine: Send + Sync {
    /// Runtime this engine serves
    fn id(&self) -> &NamespacedName;

    fn runtime_type(&self) -> RuntimeType;

    async fn should_setup_master(&self) -> Result<bool>;
    async fn setup_master(&self) -> Result<()>;
    async fn check_master_ready(&self) -> Result<bool>;

    async fn should_setup_workers(&self) -> Result<bool>;
    async fn setup_workers(&self) -> Result<()>;
    async fn check_workers_ready(&self) -> Result<bool>;

    async fn should_setup_fuse(&self) -> Result<bool>;
    async fn setup_fuse(&self) -> Result<()>;
    async fn check_fuse_ready(&self) -> Result<bool>;

    /// Converge the worker tier to `spec.replicas`
    async fn sync_replicas(&self) -> Result<()>;

    /// Detect health regressions and reflect them on runtime and dataset
    async fn check_runtime_healthy(&self) -> Result<()>;

    /// Merge live child status into the runtime; returns overall readiness
    async fn check_and_update_runtime_status(&self) -> Result<bool>;

    /// How many nodes could host the cache, up to `desired`. Read-only.
    async fn assign_nodes_to_cache(&self, desired: u32) -> Result<u32>;

    /// Make the cache-labelled nodes equal the nodes running ready workers
    async fn sync_schedule_info_to_cache_nodes(&self) -> Result<()>;

    /// Tear the runtime down; safe to call repeatedly until it succeeds
    async fn shutdown(&self) -> Result<()>;
}

/// Build the engine for a runtime, selecting the backend from its type tag
pub fn create_engine(runtime: &Runtime, ctx: EngineContext) -> Arc<dyn Engine> {
    Arc::new(CacheEngine::new(RuntimeInfo::from_runtime(runtime), ctx))
}

/// Engine shared by all backends
pub struct CacheEngine {
    pub(crate) info: RuntimeInfo,
    pub(crate) backend: Backend,
    pub(crate) ctx: EngineContext,
    pub(crate) scheduler: NodeScheduler,
    /// Failed cache cleanups seen by `shutdown`
    pub(crate) shutdown_retries: AtomicU32,
}

impl CacheEngine {
    pub fn new(info: RuntimeInfo, ctx: EngineContext) -> Self {
        let scheduler = NodeScheduler::new(
            ctx.client.clone(),
            ctx.schedule_lock.clone(),
            ctx.config.backoff.clone(),
        );
        Self {
            backend: Backend::for_runtime_type(info.runtime_type()),
            info,
            ctx,
            scheduler,
            shutdown_retries: AtomicU32::new(0),
        }
    }

    pub fn info(&self) -> &RuntimeInfo {
        &self.info
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub(crate) async fn get_runtime(&self) -> Result<Runtime> {
        Ok(self
            .ctx
            .client
            .runtimes
            .get(self.info.namespace(), self.info.name())
            .await?)
    }

    /// The dataset bound to this runtime shares its name
    pub(crate) async fn get_dataset(&self) -> Result<Option<Dataset>> {
        match self
            .ctx
            .client
            .datasets
            .get(self.info.namespace(), self.info.name())
            .await
        {
            Ok(dataset) => Ok(Some(dataset)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) async fn get_workload(&self, tier: Tier) -> Result<Option<Workload>> {
        match self
            .ctx
            .client
            .workloads
            .get(self.info.namespace(), &self.info.workload_name(tier))
            .await
        {
            Ok(workload) => Ok(Some(workload)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Pods of `tier` that are running
    pub(crate) async fn running_pods(&self, tier: Tier) -> Result<Vec<Pod>> {
        let pods = self
            .ctx
            .client
            .pods
            .list(Some(self.info.namespace()), &self.info.pod_labels(tier))
            .await?;
        Ok(pods.into_iter().filter(Pod::is_running).collect())
    }

    /// Read-modify-compare-write of the runtime status.
    ///
    /// `mutate` sees the freshly read runtime and a copy of its status; the
    /// copy is written only if it differs. Conflicts re-run the whole cycle.
    pub(crate) async fn update_runtime_status<T, F>(&self, mutate: F) -> Result<T>
    where
        F: Fn(&Runtime, &mut RuntimeStatus) -> T + Sync,
        T: Send,
    {
        let mutate = &mutate;
        let runtimes = &self.ctx.client.runtimes;
        let info = &self.info;

        retry_on(&self.ctx.config.backoff, EngineError::is_conflict, move || async move {
            let runtime = runtimes.get(info.namespace(), info.name()).await?;
            let mut status = runtime.status.clone();
            let out = mutate(&runtime, &mut status);

            if status != runtime.status {
                let mut updated = runtime;
                updated.status = status;
                runtimes.update_status(updated).await?;
            } else {
                debug!(runtime = %info, "Runtime status unchanged, skipping write");
            }
            Ok::<T, EngineError>(out)
        })
        .await
    }

    pub(crate) fn emit(&self, event_type: EventType, reason: &str, message: impl Into<String>) {
        let event = RuntimeEvent::new(
            self.info.key().clone(),
            self.info.runtime_type(),
            event_type,
            reason,
            message,
        );
        // No subscribers is fine
        let _ = self.ctx.events.send(event);
    }
}

/// Phase of a tier from its ready and desired counts
pub(crate) fn tier_phase(ready: u32, desired: u32) -> RuntimePhase {
    if ready == desired {
        RuntimePhase::Ready
    } else if ready > 0 {
        RuntimePhase::PartialReady
    } else {
        RuntimePhase::NotReady
    }
}

#[async_trait]
impl Engine for CacheEngine {
    fn id(&self) -> &NamespacedName {
        self.info.key()
    }

    fn runtime_type(&self) -> RuntimeType {
        self.info.runtime_type()
    }

    async fn should_setup_master(&self) -> Result<bool> {
        CacheEngine::should_setup_master(self).await
    }

    async fn setup_master(&self) -> Result<()> {
        CacheEngine::setup_master(self).await
    }

    async fn check_master_ready(&self) -> Result<bool> {
        CacheEngine::check_master_ready(self).await
    }

    async fn should_setup_workers(&self) -> Result<bool> {
        CacheEngine::should_setup_workers(self).await
    }

    async fn setup_workers(&self) -> Result<()> {
        CacheEngine::setup_workers(self).await
    }

    async fn check_workers_ready(&self) -> Result<bool> {
        CacheEngine::check_workers_ready(self).await
    }

    async fn should_setup_fuse(&self) -> Result<bool> {
        CacheEngine::should_setup_fuse(self).await
    }

    async fn setup_fuse(&self) -> Result<()> {
        CacheEngine::setup_fuse(self).await
    }

    async fn check_fuse_ready(&self) -> Result<bool> {
        CacheEngine::check_fuse_ready(self).await
    }

    async fn sync_replicas(&self) -> Result<()> {
        CacheEngine::sync_replicas(self).await
    }

    async fn check_runtime_healthy(&self) -> Result<()> {
        CacheEngine::check_runtime_healthy(self).await
    }

    async fn check_and_update_runtime_status(&self) -> Result<bool> {
        CacheEngine::check_and_update_runtime_status(self).await
    }

    async fn assign_nodes_to_cache(&self, desired: u32) -> Result<u32> {
        CacheEngine::assign_nodes_to_cache(self, desired).await
    }

    async fn sync_schedule_info_to_cache_nodes(&self) -> Result<()> {
        CacheEngine::sync_schedule_info_to_cache_nodes(self).await
    }

    async fn shutdown(&self) -> Result<()> {
        CacheEngine::shutdown(self).await
    }
}
