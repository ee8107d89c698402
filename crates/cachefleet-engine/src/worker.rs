//! Worker tier lifecycle

use crate::engine::{tier_phase, CacheEngine};
use crate::error::{EngineError, Result};
use crate::info::Tier;
use cachefleet_store::{retry_on, StoreError};
use cachefleet_types::{
    reasons, update_condition, Condition, ConditionStatus, ConditionType, RuntimePhase, Workload,
};
use tracing::{debug, info, instrument, warn};

impl CacheEngine {
    pub async fn should_setup_workers(&self) -> Result<bool> {
        let runtime = self.get_runtime().await?;
        Ok(runtime.status.worker_phase.is_none())
    }

    /// Size the worker workload to `spec.replicas` and record bookkeeping
    #[instrument(skip(self), fields(runtime = %self.info))]
    pub async fn setup_workers(&self) -> Result<()> {
        let runtime = self.get_runtime().await?;
        self.ensure_release(&runtime).await?;

        let desired = runtime.replicas();
        if desired > 0 {
            let dataset = self.get_dataset().await?;
            let schedulable = self
                .scheduler
                .assign_nodes_to_cache(&self.info, &runtime, dataset.as_ref(), desired)
                .await?;
            if schedulable == 0 {
                return Err(EngineError::NoSchedulableNodes {
                    runtime: self.info.to_string(),
                });
            }
            if schedulable < desired {
                warn!(
                    runtime = %self.info,
                    schedulable,
                    desired,
                    "Fewer schedulable nodes than desired workers"
                );
            }
        }

        self.existing_workload(Tier::Worker).await?;
        self.scale_workload(Tier::Worker, desired).await?;

        let selector = self.info.pod_labels(Tier::Worker).to_string();
        self.update_runtime_status(|_, status| {
            status.desired_worker_number_scheduled = desired;
            status.selector = selector.clone();
            if status.worker_phase.is_none() {
                status.worker_phase = RuntimePhase::NotReady;
            }
            update_condition(
                &mut status.conditions,
                Condition::new(
                    ConditionType::WorkersInitialized,
                    ConditionStatus::True,
                    reasons::WORKERS_INITIALIZED,
                    "The workers are initialized.",
                ),
            );
        })
        .await?;

        info!(runtime = %self.info, desired, "Workers set up");
        Ok(())
    }

    /// Record worker counts; ready only when every desired worker is ready
    pub async fn check_workers_ready(&self) -> Result<bool> {
        let runtime = self.get_runtime().await?;
        let desired = runtime.replicas();
        let workload = self.get_workload(Tier::Worker).await?;
        let (ready, available, current) = workload
            .as_ref()
            .map(|w| {
                (
                    w.status.ready_replicas,
                    w.status.available_replicas,
                    w.status.replicas,
                )
            })
            .unwrap_or_default();
        let phase = tier_phase(ready, desired);

        self.update_runtime_status(|_, status| {
            status.worker_number_ready = ready;
            status.worker_number_available = available;
            status.worker_number_unavailable = desired.saturating_sub(available);
            status.current_worker_number_scheduled = current;
            status.worker_phase = phase;
            update_condition(&mut status.conditions, workers_ready_condition(phase, ready, desired));
        })
        .await?;

        debug!(runtime = %self.info, ready, desired, phase = ?phase, "Checked workers");
        Ok(phase == RuntimePhase::Ready)
    }

    pub(crate) async fn existing_workload(&self, tier: Tier) -> Result<Workload> {
        self.get_workload(tier).await?.ok_or_else(|| {
            let key = format!("{}/{}", self.info.namespace(), self.info.workload_name(tier));
            StoreError::not_found("Workload", key).into()
        })
    }

    /// Set the replica count of a tier's workload, retrying on conflict
    pub(crate) async fn scale_workload(&self, tier: Tier, replicas: u32) -> Result<()> {
        let workloads = &self.ctx.client.workloads;
        let namespace = self.info.namespace();
        let name = self.info.workload_name(tier);
        let name = name.as_str();

        retry_on(&self.ctx.config.backoff, EngineError::is_conflict, move || async move {
            let mut workload = workloads.get(namespace, name).await?;
            if workload.spec.replicas == replicas {
                return Ok(());
            }
            workload.spec.replicas = replicas;
            workloads.update(workload).await?;
            Ok::<(), EngineError>(())
        })
        .await
    }
}

fn workers_ready_condition(phase: RuntimePhase, ready: u32, desired: u32) -> Condition {
    let (status, reason) = match phase {
        RuntimePhase::Ready => (ConditionStatus::True, reasons::WORKERS_READY),
        RuntimePhase::PartialReady => (ConditionStatus::False, reasons::WORKERS_PARTIAL_READY),
        _ => (ConditionStatus::False, reasons::WORKERS_NOT_READY),
    };
    Condition::new(
        ConditionType::WorkersReady,
        status,
        reason,
        format!("{}/{} workers ready", ready, desired),
    )
}
