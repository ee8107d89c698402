//! Runtime health checks
//!
//! A runtime that was serving can regress: a master restarts, workers get
//! evicted, fuse clients crash. Each regression is recorded as a not-ready
//! phase with a false condition, a warning event, and a failed dataset.

use crate::engine::CacheEngine;
use crate::error::{EngineError, Result};
use crate::info::Tier;
use cachefleet_store::retry_on;
use cachefleet_types::{
    event_reasons, reasons, update_condition, Condition, ConditionStatus, ConditionType,
    DatasetPhase, DatasetStatus, EventType, RuntimePhase, RuntimeStatus,
};
use tracing::{instrument, warn};

/// One failing tier
#[derive(Debug, Clone)]
struct Regression {
    tier: Tier,
    reason: String,
}

impl CacheEngine {
    #[instrument(skip(self), fields(runtime = %self.info))]
    pub async fn check_runtime_healthy(&self) -> Result<()> {
        let runtime = self.get_runtime().await?;
        let mut regressions = Vec::new();

        let master_desired = runtime.master_replicas();
        if master_desired > 0 {
            let ready = self
                .get_workload(Tier::Master)
                .await?
                .map(|w| w.status.ready_replicas)
                .unwrap_or(0);
            if ready < master_desired {
                regressions.push(Regression {
                    tier: Tier::Master,
                    reason: format!("{}/{} masters ready", ready, master_desired),
                });
            }
        }

        let worker_desired = runtime.replicas();
        if worker_desired > 0 {
            let ready = self
                .get_workload(Tier::Worker)
                .await?
                .map(|w| w.status.ready_replicas)
                .unwrap_or(0);
            if ready == 0 {
                regressions.push(Regression {
                    tier: Tier::Worker,
                    reason: format!("0/{} workers ready", worker_desired),
                });
            }
        }

        if let Some(fuse) = self.get_workload(Tier::Fuse).await? {
            let unavailable = fuse.unavailable();
            if unavailable > 0 {
                regressions.push(Regression {
                    tier: Tier::Fuse,
                    reason: format!("{} fuses unavailable", unavailable),
                });
            }
        }

        if regressions.is_empty() {
            self.update_dataset_status(|status| status.phase = DatasetPhase::Bound)
                .await?;
            return Ok(());
        }

        self.update_runtime_status(|_, status| {
            for regression in &regressions {
                mark_unhealthy(status, regression);
            }
        })
        .await?;
        for regression in &regressions {
            warn!(
                runtime = %self.info,
                tier = %regression.tier,
                reason = %regression.reason,
                "Runtime unhealthy"
            );
            self.emit(EventType::Warning, event_reason(regression.tier), regression.reason.clone());
        }
        self.update_dataset_status(|status| status.phase = DatasetPhase::Failed)
            .await?;

        let first = &regressions[0];
        Err(EngineError::Unhealthy {
            runtime: self.info.to_string(),
            tier: first.tier.as_str(),
            reason: first.reason.clone(),
        })
    }

    /// Compare-and-write of the bound dataset's status; a missing dataset
    /// is left alone
    pub(crate) async fn update_dataset_status<F>(&self, mutate: F) -> Result<()>
    where
        F: Fn(&mut DatasetStatus) + Sync,
    {
        let mutate = &mutate;
        let datasets = &self.ctx.client.datasets;
        let info = &self.info;

        retry_on(&self.ctx.config.backoff, EngineError::is_conflict, move || async move {
            let mut dataset = match datasets.get(info.namespace(), info.name()).await {
                Ok(dataset) => dataset,
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            let mut status = dataset.status.clone();
            mutate(&mut status);
            if status != dataset.status {
                dataset.status = status;
                datasets.update_status(dataset).await?;
            }
            Ok::<(), EngineError>(())
        })
        .await
    }
}

fn mark_unhealthy(status: &mut RuntimeStatus, regression: &Regression) {
    let (condition_type, reason) = match regression.tier {
        Tier::Master => {
            status.master_phase = RuntimePhase::NotReady;
            status.master_reason = regression.reason.clone();
            (ConditionType::MasterReady, reasons::MASTER_NOT_READY)
        }
        Tier::Worker => {
            status.worker_phase = RuntimePhase::NotReady;
            status.worker_reason = regression.reason.clone();
            (ConditionType::WorkersReady, reasons::WORKERS_NOT_READY)
        }
        Tier::Fuse => {
            status.fuse_phase = RuntimePhase::NotReady;
            status.fuse_reason = regression.reason.clone();
            (ConditionType::FusesReady, reasons::FUSES_NOT_READY)
        }
    };
    update_condition(
        &mut status.conditions,
        Condition::new(
            condition_type,
            ConditionStatus::False,
            reason,
            regression.reason.clone(),
        ),
    );
}

fn event_reason(tier: Tier) -> &'static str {
    match tier {
        Tier::Master => event_reasons::MASTER_UNHEALTHY,
        Tier::Worker => event_reasons::WORKERS_UNHEALTHY,
        Tier::Fuse => event_reasons::FUSES_UNHEALTHY,
    }
}

#[cfg(test)]
mod tests {
    use crate::error::EngineError;
    use crate::info::Tier;
    use crate::testing::Fixture;
    use cachefleet_types::{
        get_condition, ConditionStatus, ConditionType, DatasetPhase, RuntimePhase, RuntimeType,
    };

    #[tokio::test]
    async fn test_healthy_runtime_binds_dataset() {
        let fixture = Fixture::new();
        let runtime = fixture.add_runtime(RuntimeType::Alluxio, 2).await;
        let engine = fixture.engine(&runtime);
        fixture.add_workload(engine.info(), Tier::Master, 1, 1).await;
        fixture.add_workload(engine.info(), Tier::Worker, 2, 1).await;
        fixture.add_workload(engine.info(), Tier::Fuse, 0, 0).await;

        engine.check_runtime_healthy().await.unwrap();
        assert_eq!(fixture.dataset().await.status.phase, DatasetPhase::Bound);
    }

    #[tokio::test]
    async fn test_lost_workers_fail_the_dataset() {
        let fixture = Fixture::new();
        let runtime = fixture.add_runtime(RuntimeType::Alluxio, 2).await;
        let engine = fixture.engine(&runtime);
        let mut events = fixture.ctx.subscribe();
        fixture.add_workload(engine.info(), Tier::Master, 1, 1).await;
        fixture.add_workload(engine.info(), Tier::Worker, 2, 0).await;

        let err = engine.check_runtime_healthy().await.unwrap_err();
        assert!(matches!(err, EngineError::Unhealthy { tier: "worker", .. }));

        let status = fixture.runtime().await.status;
        assert_eq!(status.worker_phase, RuntimePhase::NotReady);
        let condition = get_condition(&status.conditions, ConditionType::WorkersReady).unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(fixture.dataset().await.status.phase, DatasetPhase::Failed);

        let event = events.try_recv().unwrap();
        assert!(event.is_warning());
    }
}
