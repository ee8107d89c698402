//! Replica sync - Scale the worker tier to `spec.replicas`

use crate::engine::CacheEngine;
use crate::error::{EngineError, Result};
use crate::info::Tier;
use cachefleet_types::{
    event_reasons, reasons, update_condition, Condition, ConditionStatus, ConditionType,
    EventType,
};
use std::cmp::Ordering;
use tracing::{info, instrument, warn};

impl CacheEngine {
    /// Compare desired workers with what was last scheduled and converge.
    ///
    /// Scale-in strips cache labels from surplus nodes before the workload
    /// shrinks; if not enough nodes can be released the workload is left as
    /// is and the attempt is reported as failed.
    #[instrument(skip(self), fields(runtime = %self.info))]
    pub async fn sync_replicas(&self) -> Result<()> {
        let runtime = self.get_runtime().await?;
        let desired = runtime.replicas();
        let scheduled = runtime.status.desired_worker_number_scheduled;

        match desired.cmp(&scheduled) {
            Ordering::Equal => Ok(()),
            Ordering::Greater => {
                self.scale_workload(Tier::Worker, desired).await?;
                self.record_scale(
                    desired,
                    ConditionType::WorkersScaledOut,
                    reasons::WORKERS_SCALED_OUT,
                )
                .await?;
                self.emit(
                    EventType::Normal,
                    event_reasons::SCALE_OUT_SUCCEEDED,
                    format!("Workers scaled out from {} to {}", scheduled, desired),
                );
                info!(runtime = %self.info, from = scheduled, to = desired, "Workers scaled out");
                Ok(())
            }
            Ordering::Less => {
                let remaining = self.destroy_workers(Some(desired)).await?;
                if remaining > desired {
                    warn!(runtime = %self.info, remaining, desired, "Scale-in incomplete");
                    self.emit(
                        EventType::Warning,
                        event_reasons::SCALE_IN_FAILED,
                        format!("{} cache nodes still in use, wanted {}", remaining, desired),
                    );
                    return Err(EngineError::ScaleInIncomplete {
                        runtime: self.info.to_string(),
                        remaining,
                        desired,
                    });
                }

                self.scale_workload(Tier::Worker, desired).await?;
                self.record_scale(
                    desired,
                    ConditionType::WorkersScaledIn,
                    reasons::WORKERS_SCALED_IN,
                )
                .await?;
                self.emit(
                    EventType::Normal,
                    event_reasons::SCALE_IN_SUCCEEDED,
                    format!("Workers scaled in from {} to {}", scheduled, desired),
                );
                info!(runtime = %self.info, from = scheduled, to = desired, "Workers scaled in");
                Ok(())
            }
        }
    }

    async fn record_scale(
        &self,
        desired: u32,
        condition_type: ConditionType,
        reason: &'static str,
    ) -> Result<()> {
        self.update_runtime_status(|_, status| {
            let message = format!(
                "Workers rescheduled from {} to {}",
                status.desired_worker_number_scheduled, desired
            );
            status.desired_worker_number_scheduled = desired;
            update_condition(
                &mut status.conditions,
                Condition::new(condition_type, ConditionStatus::True, reason, message),
            );
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::info::Tier;
    use crate::testing::Fixture;
    use cachefleet_types::{
        get_condition, ConditionType, EventType, RuntimeType, LABEL_TRUE,
    };

    #[tokio::test]
    async fn test_scale_out_updates_workload_and_status() {
        let fixture = Fixture::new();
        let runtime = fixture.add_runtime(RuntimeType::Alluxio, 3).await;
        let engine = fixture.engine(&runtime);
        fixture.add_workload(engine.info(), Tier::Worker, 1, 1).await;
        fixture
            .update_status(|s| s.desired_worker_number_scheduled = 1)
            .await;
        let mut events = fixture.ctx.subscribe();

        engine.sync_replicas().await.unwrap();

        assert_eq!(fixture.workload(engine.info(), Tier::Worker).await.spec.replicas, 3);
        let status = fixture.runtime().await.status;
        assert_eq!(status.desired_worker_number_scheduled, 3);
        assert!(get_condition(&status.conditions, ConditionType::WorkersScaledOut).is_some());
        assert_eq!(events.try_recv().unwrap().event_type, EventType::Normal);

        let writes = fixture.cluster.runtimes.write_count();
        engine.sync_replicas().await.unwrap();
        assert_eq!(fixture.cluster.runtimes.write_count(), writes);
    }

    #[tokio::test]
    async fn test_scale_in_releases_nodes_first() {
        let fixture = Fixture::new();
        fixture.add_nodes(3).await;
        let runtime = fixture.add_runtime(RuntimeType::JuiceFs, 1).await;
        let engine = fixture.engine(&runtime);
        let common = engine.info().labels().common();
        for i in 0..3 {
            fixture.label_node(&format!("node-{}", i), &common).await;
        }
        fixture.add_workload(engine.info(), Tier::Worker, 3, 3).await;
        fixture
            .update_status(|s| s.desired_worker_number_scheduled = 3)
            .await;

        engine.sync_replicas().await.unwrap();

        let labelled = fixture
            .nodes()
            .await
            .into_iter()
            .filter(|n| n.label(&common) == Some(LABEL_TRUE))
            .count();
        assert_eq!(labelled, 1);
        assert_eq!(fixture.workload(engine.info(), Tier::Worker).await.spec.replicas, 1);
        let status = fixture.runtime().await.status;
        assert_eq!(status.desired_worker_number_scheduled, 1);
        assert!(get_condition(&status.conditions, ConditionType::WorkersScaledIn).is_some());
    }

    #[tokio::test]
    async fn test_scale_in_keeps_nodes_serving_the_dataset() {
        let fixture = Fixture::new();
        fixture.add_nodes(2).await;
        let runtime = fixture.add_runtime(RuntimeType::Alluxio, 1).await;
        let engine = fixture.engine(&runtime);
        let common = engine.info().labels().common();
        fixture.label_node("node-0", &common).await;
        fixture.label_node("node-1", &common).await;
        fixture.add_app_pod("app-0", "node-0", "hbase").await;
        fixture.add_app_pod("app-1", "node-1", "hbase").await;
        fixture.add_workload(engine.info(), Tier::Worker, 2, 2).await;
        fixture
            .update_status(|s| s.desired_worker_number_scheduled = 2)
            .await;

        assert!(engine.sync_replicas().await.is_err());
        assert_eq!(fixture.workload(engine.info(), Tier::Worker).await.spec.replicas, 2);
        assert_eq!(fixture.runtime().await.status.desired_worker_number_scheduled, 2);
    }
}
