//! Fuse tier lifecycle
//!
//! Fuse clients run as a per-node workload. Non-global fuses are pinned to
//! cache nodes by the common label; global fuses have the balloon selector
//! removed so they may land on any eligible node.

use crate::engine::{tier_phase, CacheEngine};
use crate::error::{EngineError, Result};
use crate::info::Tier;
use cachefleet_store::retry_on;
use cachefleet_types::{
    reasons, update_condition, Condition, ConditionStatus, ConditionType, RuntimePhase,
    FUSE_BALLOON_KEY,
};
use tracing::{debug, info, instrument};

impl CacheEngine {
    pub async fn should_setup_fuse(&self) -> Result<bool> {
        let runtime = self.get_runtime().await?;
        Ok(runtime.status.fuse_phase.is_none())
    }

    #[instrument(skip(self), fields(runtime = %self.info))]
    pub async fn setup_fuse(&self) -> Result<()> {
        let runtime = self.get_runtime().await?;
        self.ensure_release(&runtime).await?;

        if runtime.spec.fuse.global {
            self.remove_fuse_balloon().await?;
        }
        let fuse = self.existing_workload(Tier::Fuse).await?;
        let desired = fuse.desired();

        self.update_runtime_status(|_, status| {
            status.desired_fuse_number_scheduled = desired;
            if status.fuse_phase.is_none() {
                status.fuse_phase = RuntimePhase::NotReady;
            }
            update_condition(
                &mut status.conditions,
                Condition::new(
                    ConditionType::FusesInitialized,
                    ConditionStatus::True,
                    reasons::FUSES_INITIALIZED,
                    "The fuses are initialized.",
                ),
            );
        })
        .await?;

        info!(runtime = %self.info, global = runtime.spec.fuse.global, "Fuse set up");
        Ok(())
    }

    /// Ready when every scheduled fuse is ready; nothing scheduled is ready
    pub async fn check_fuse_ready(&self) -> Result<bool> {
        let fuse = self.get_workload(Tier::Fuse).await?;
        let (desired, current, ready, available) = fuse
            .as_ref()
            .map(|f| {
                (
                    f.desired(),
                    f.status.replicas,
                    f.status.ready_replicas,
                    f.status.available_replicas,
                )
            })
            .unwrap_or_default();
        let phase = tier_phase(ready, desired);

        self.update_runtime_status(|_, status| {
            status.desired_fuse_number_scheduled = desired;
            status.current_fuse_number_scheduled = current;
            status.fuse_number_ready = ready;
            status.fuse_number_available = available;
            status.fuse_number_unavailable = desired.saturating_sub(available);
            status.fuse_phase = phase;
            let (condition_status, reason) = if phase == RuntimePhase::Ready {
                (ConditionStatus::True, reasons::FUSES_READY)
            } else {
                (ConditionStatus::False, reasons::FUSES_NOT_READY)
            };
            update_condition(
                &mut status.conditions,
                Condition::new(
                    ConditionType::FusesReady,
                    condition_status,
                    reason,
                    format!("{}/{} fuses ready", ready, desired),
                ),
            );
        })
        .await?;

        debug!(runtime = %self.info, ready, desired, "Checked fuses");
        Ok(phase == RuntimePhase::Ready)
    }

    async fn remove_fuse_balloon(&self) -> Result<()> {
        let workloads = &self.ctx.client.workloads;
        let namespace = self.info.namespace();
        let name = self.info.workload_name(Tier::Fuse);
        let name = name.as_str();

        retry_on(&self.ctx.config.backoff, EngineError::is_conflict, move || async move {
            let mut fuse = workloads.get(namespace, name).await?;
            if fuse.spec.node_selector.remove(FUSE_BALLOON_KEY).is_none() {
                return Ok(());
            }
            workloads.update(fuse).await?;
            Ok::<(), EngineError>(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::info::Tier;
    use crate::testing::Fixture;
    use cachefleet_types::{RuntimePhase, RuntimeType, FUSE_BALLOON_KEY};

    #[tokio::test]
    async fn test_global_fuse_drops_balloon_selector() {
        let fixture = Fixture::new();
        let mut runtime = fixture.add_runtime(RuntimeType::Alluxio, 1).await;
        runtime.spec.fuse.global = true;
        let runtime = fixture.replace_runtime(runtime).await;
        let engine = fixture.engine(&runtime);

        let mut fuse = fixture.add_workload(engine.info(), Tier::Fuse, 0, 0).await;
        fuse.spec
            .node_selector
            .insert(FUSE_BALLOON_KEY.to_string(), "true".to_string());
        fixture.replace_workload(fuse).await;

        assert!(engine.should_setup_fuse().await.unwrap());
        engine.setup_fuse().await.unwrap();

        let fuse = fixture.workload(engine.info(), Tier::Fuse).await;
        assert!(!fuse.spec.node_selector.contains_key(FUSE_BALLOON_KEY));
        assert_eq!(fixture.runtime().await.status.fuse_phase, RuntimePhase::NotReady);
        assert!(!engine.should_setup_fuse().await.unwrap());
    }

    #[tokio::test]
    async fn test_no_scheduled_fuses_counts_as_ready() {
        let fixture = Fixture::new();
        let runtime = fixture.add_runtime(RuntimeType::JuiceFs, 1).await;
        let engine = fixture.engine(&runtime);
        fixture.add_workload(engine.info(), Tier::Fuse, 0, 0).await;

        assert!(engine.check_fuse_ready().await.unwrap());
        assert_eq!(fixture.runtime().await.status.fuse_phase, RuntimePhase::Ready);
    }

    #[tokio::test]
    async fn test_fuse_readiness_follows_scheduled_count() {
        let fixture = Fixture::new();
        let runtime = fixture.add_runtime(RuntimeType::Alluxio, 1).await;
        let engine = fixture.engine(&runtime);
        fixture.add_workload(engine.info(), Tier::Fuse, 2, 1).await;

        assert!(!engine.check_fuse_ready().await.unwrap());
        let status = fixture.runtime().await.status;
        assert_eq!(status.fuse_phase, RuntimePhase::PartialReady);
        assert_eq!(status.desired_fuse_number_scheduled, 2);

        fixture.set_ready(engine.info(), Tier::Fuse, 2).await;
        assert!(engine.check_fuse_ready().await.unwrap());
    }
}
