//! Master tier lifecycle and release rendering

use crate::engine::CacheEngine;
use crate::error::Result;
use crate::info::Tier;
use crate::values::{load_values, RuntimeValues};
use cachefleet_types::{
    reasons, update_condition, Condition, ConditionStatus, ConditionType, Runtime, RuntimePhase,
    LABEL_TRUE,
};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

impl CacheEngine {
    /// Master setup is needed until a master phase has been recorded
    pub async fn should_setup_master(&self) -> Result<bool> {
        let runtime = self.get_runtime().await?;
        Ok(runtime.status.master_phase.is_none())
    }

    /// Install the release if missing and record master bookkeeping.
    /// Repeating this on a set-up runtime changes nothing.
    #[instrument(skip(self), fields(runtime = %self.info))]
    pub async fn setup_master(&self) -> Result<()> {
        let runtime = self.get_runtime().await?;
        let values_configmap = self.ensure_release(&runtime).await?;

        let desired = runtime.master_replicas();
        let current = self
            .get_workload(Tier::Master)
            .await?
            .map(|w| w.status.replicas)
            .unwrap_or(0);

        self.update_runtime_status(|_, status| {
            status.value_file_configmap = values_configmap.clone();
            status.desired_master_number_scheduled = desired;
            status.current_master_number_scheduled = current;
            if status.master_phase.is_none() {
                // A disabled master has nothing to wait for
                status.master_phase = if desired == 0 {
                    RuntimePhase::Ready
                } else {
                    RuntimePhase::NotReady
                };
            }
            update_condition(
                &mut status.conditions,
                Condition::new(
                    ConditionType::MasterInitialized,
                    ConditionStatus::True,
                    reasons::MASTER_INITIALIZED,
                    "The master is initialized.",
                ),
            );
        })
        .await?;

        info!(runtime = %self.info, desired, "Master set up");
        Ok(())
    }

    pub async fn check_master_ready(&self) -> Result<bool> {
        let runtime = self.get_runtime().await?;
        let desired = runtime.master_replicas();
        let (ready, current) = match self.get_workload(Tier::Master).await? {
            Some(master) => (master.status.ready_replicas, master.status.replicas),
            None => (0, 0),
        };
        let is_ready = ready >= desired;

        self.update_runtime_status(|_, status| {
            status.master_number_ready = ready;
            status.current_master_number_scheduled = current;
            status.master_phase = if is_ready {
                RuntimePhase::Ready
            } else {
                RuntimePhase::NotReady
            };
            let (condition_status, reason) = if is_ready {
                (ConditionStatus::True, reasons::MASTER_READY)
            } else {
                (ConditionStatus::False, reasons::MASTER_NOT_READY)
            };
            update_condition(
                &mut status.conditions,
                Condition::new(
                    ConditionType::MasterReady,
                    condition_status,
                    reason,
                    format!("{}/{} masters ready", ready, desired),
                ),
            );
        })
        .await?;

        if !is_ready {
            debug!(runtime = %self.info, ready, desired, "Master not ready yet");
        }
        Ok(is_ready)
    }

    /// Make sure the release exists; returns the values config object name.
    ///
    /// Ports are reserved only when no values were rendered before, so a
    /// release deleted out of band is reinstalled on its original ports.
    pub(crate) async fn ensure_release(&self, runtime: &Runtime) -> Result<String> {
        let configmap = self.info.values_configmap_name();
        if self
            .ctx
            .releases
            .check_release(self.info.release_name(), self.info.namespace())
            .await?
        {
            return Ok(configmap);
        }

        let values = match load_values(&self.ctx.client, &self.info).await? {
            Some(values) => values,
            None => self.render_values(runtime).await?,
        };
        self.ctx
            .releases
            .install_release(
                self.info.release_name(),
                self.info.namespace(),
                &values.render()?,
                self.backend.chart(),
            )
            .await?;

        info!(
            runtime = %self.info,
            chart = self.backend.chart(),
            ports = ?values.ports,
            "Release installed"
        );
        Ok(configmap)
    }

    /// Reserve ports and persist freshly rendered values
    async fn render_values(&self, runtime: &Runtime) -> Result<RuntimeValues> {
        let dataset = self.get_dataset().await?;
        let port_names = self.backend.port_names();
        let reserved = self.ctx.ports.get_available_ports(port_names.len())?;

        let mut worker_node_selector = runtime.spec.worker.node_selector.clone();
        if let Some(dataset) = &dataset {
            worker_node_selector.extend(dataset.spec.node_affinity.clone());
        }
        let fuse_node_selector = if runtime.spec.fuse.global {
            runtime.spec.fuse.node_selector.clone()
        } else {
            // Non-global fuses follow the cache nodes
            BTreeMap::from([(self.info.labels().common(), LABEL_TRUE.to_string())])
        };

        let values = RuntimeValues {
            fullname: self.info.release_name().to_string(),
            namespace: self.info.namespace().to_string(),
            runtime_type: self.info.runtime_type(),
            ports: port_names
                .iter()
                .map(|n| n.to_string())
                .zip(reserved.iter().copied())
                .collect(),
            master_replicas: runtime.master_replicas(),
            worker_replicas: runtime.replicas(),
            tiered_store: runtime.spec.tiered_store.clone(),
            worker_node_selector,
            fuse_global: runtime.spec.fuse.global,
            fuse_node_selector,
        };

        let persisted = match values.to_configmap(&self.info) {
            Ok(configmap) => self
                .ctx
                .client
                .configmaps
                .create(configmap)
                .await
                .map_err(Into::into),
            Err(e) => Err(e),
        };
        if let Err(e) = persisted {
            self.ctx.ports.release_reserved_ports(&reserved);
            return Err(e);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use crate::info::Tier;
    use crate::testing::Fixture;
    use crate::values::load_values;
    use cachefleet_store::ReleaseManager;
    use cachefleet_types::{get_condition, ConditionStatus, ConditionType, RuntimePhase, RuntimeType};

    #[tokio::test]
    async fn test_setup_master_installs_release_and_reserves_ports() {
        let fixture = Fixture::new();
        let runtime = fixture.add_runtime(RuntimeType::Alluxio, 2).await;
        let engine = fixture.engine(&runtime);

        assert!(engine.should_setup_master().await.unwrap());
        engine.setup_master().await.unwrap();

        let status = fixture.runtime().await.status;
        assert_eq!(status.master_phase, RuntimePhase::NotReady);
        assert_eq!(status.value_file_configmap, "hbase-alluxio-values");
        assert_eq!(status.desired_master_number_scheduled, 1);
        assert!(get_condition(&status.conditions, ConditionType::MasterInitialized).is_some());

        assert_eq!(fixture.releases.install_count(), 1);
        let values = load_values(&fixture.ctx.client, engine.info())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(values.reserved_ports().len(), 6);
        assert!(values.reserved_ports().iter().all(|p| fixture.ports.is_reserved(*p)));
        assert!(!engine.should_setup_master().await.unwrap());
    }

    #[tokio::test]
    async fn test_setup_master_twice_is_a_no_op() {
        let fixture = Fixture::new();
        let runtime = fixture.add_runtime(RuntimeType::Alluxio, 1).await;
        let engine = fixture.engine(&runtime);

        engine.setup_master().await.unwrap();
        let writes = fixture.cluster.runtimes.write_count();
        let available = fixture.ports.available();

        engine.setup_master().await.unwrap();
        assert_eq!(fixture.cluster.runtimes.write_count(), writes);
        assert_eq!(fixture.releases.install_count(), 1);
        assert_eq!(fixture.ports.available(), available);
    }

    #[tokio::test]
    async fn test_reinstall_reuses_recorded_ports() {
        let fixture = Fixture::new();
        let runtime = fixture.add_runtime(RuntimeType::JuiceFs, 1).await;
        let engine = fixture.engine(&runtime);
        engine.setup_master().await.unwrap();
        let available = fixture.ports.available();

        fixture
            .releases
            .delete_release("hbase", "default")
            .await
            .unwrap();
        engine.setup_master().await.unwrap();
        assert_eq!(fixture.releases.install_count(), 2);
        assert_eq!(fixture.ports.available(), available);
    }

    #[tokio::test]
    async fn test_failed_install_keeps_master_unset() {
        let fixture = Fixture::new();
        let runtime = fixture.add_runtime(RuntimeType::Alluxio, 1).await;
        let engine = fixture.engine(&runtime);
        fixture.releases.set_fail_installs(true);

        assert!(engine.setup_master().await.is_err());
        assert!(engine.should_setup_master().await.unwrap());
    }

    #[tokio::test]
    async fn test_check_master_ready() {
        let fixture = Fixture::new();
        let runtime = fixture.add_runtime(RuntimeType::Alluxio, 1).await;
        let engine = fixture.engine(&runtime);
        engine.setup_master().await.unwrap();
        fixture.add_workload(engine.info(), Tier::Master, 1, 0).await;

        assert!(!engine.check_master_ready().await.unwrap());
        let status = fixture.runtime().await.status;
        let condition = get_condition(&status.conditions, ConditionType::MasterReady).unwrap();
        assert_eq!(condition.status, ConditionStatus::False);

        fixture.set_ready(engine.info(), Tier::Master, 1).await;
        assert!(engine.check_master_ready().await.unwrap());
        assert_eq!(fixture.runtime().await.status.master_phase, RuntimePhase::Ready);
    }
}
