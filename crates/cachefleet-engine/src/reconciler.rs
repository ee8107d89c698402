//! Status Reconciler - Merge live child state into runtime status
//!
//! Each pass reads the master and worker workloads, asks the backend for
//! cache facts, and folds everything into the runtime status in one
//! compare-and-write. The worker endpoints object is refreshed alongside.

use crate::engine::{tier_phase, CacheEngine};
use crate::error::{EngineError, Result};
use crate::info::Tier;
use crate::values::load_values;
use cachefleet_store::retry_on;
use cachefleet_types::{ConfigMap, ObjectMeta};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Data key of the worker endpoints object
pub const ENDPOINTS_DATA_KEY: &str = "endpoints";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEndpoints {
    #[serde(rename = "containerendpoints")]
    pub container_endpoints: Vec<String>,
}

impl CacheEngine {
    /// Returns true once the master is ready and every desired worker is.
    /// Partially ready workers keep the runtime not ready.
    #[instrument(skip(self), fields(runtime = %self.info))]
    pub async fn check_and_update_runtime_status(&self) -> Result<bool> {
        let runtime = self.get_runtime().await?;
        let dataset = self.get_dataset().await?;

        let master_desired = runtime.master_replicas();
        let master_ready = match self.get_workload(Tier::Master).await? {
            Some(master) => master.status.ready_replicas,
            None => 0,
        };
        let (worker_ready, worker_available, worker_current) = self
            .get_workload(Tier::Worker)
            .await?
            .map(|w| {
                (
                    w.status.ready_replicas,
                    w.status.available_replicas,
                    w.status.replicas,
                )
            })
            .unwrap_or_default();
        let worker_desired = runtime.replicas();

        let ready = master_ready >= master_desired
            && (worker_desired == 0 || worker_ready >= worker_desired);

        let ufs_total = dataset.as_ref().and_then(|d| d.status.ufs_total.as_deref());
        let cache_states = self
            .query_cache_report(&runtime)
            .await?
            .map(|report| report.to_cache_states(ufs_total));

        let created = runtime.metadata.creation_timestamp;
        let worker_phase = tier_phase(worker_ready, worker_desired);
        let ready = self
            .update_runtime_status(|_, status| {
                status.master_number_ready = master_ready;
                status.worker_number_ready = worker_ready;
                status.worker_number_available = worker_available;
                status.worker_number_unavailable = worker_desired.saturating_sub(worker_available);
                status.current_worker_number_scheduled = worker_current;
                if !status.worker_phase.is_none() {
                    status.worker_phase = worker_phase;
                }
                if let Some(states) = &cache_states {
                    status
                        .cache_states
                        .extend(states.iter().map(|(k, v)| (*k, v.clone())));
                }
                if ready && status.setup_duration.is_none() {
                    if let Some(created) = created {
                        status.setup_duration = Some(format_duration(Utc::now() - created));
                    }
                }
                ready
            })
            .await?;

        if let (Some(states), Some(dataset)) = (&cache_states, &dataset) {
            if &dataset.status.cache_states != states {
                self.update_dataset_status(|status| status.cache_states = states.clone())
                    .await?;
            }
        }
        self.sync_worker_endpoints().await?;

        debug!(runtime = %self.info, ready, "Runtime status reconciled");
        Ok(ready)
    }

    /// Publish `ip:port` of every ready worker; written only on change
    pub(crate) async fn sync_worker_endpoints(&self) -> Result<()> {
        let Some(values) = load_values(&self.ctx.client, &self.info).await? else {
            return Ok(());
        };
        let Some(port) = values.port(self.backend.worker_endpoint_port()) else {
            return Ok(());
        };

        let mut endpoints: Vec<String> = self
            .running_pods(Tier::Worker)
            .await?
            .into_iter()
            .filter(|p| p.ready)
            .filter_map(|p| p.pod_ip.map(|ip| format!("{}:{}", ip, port)))
            .collect();
        endpoints.sort();
        let rendered = serde_json::to_string(&WorkerEndpoints {
            container_endpoints: endpoints,
        })
        .map_err(|e| EngineError::Report(e.to_string()))?;

        let configmaps = &self.ctx.client.configmaps;
        let namespace = self.info.namespace();
        let name = self.info.endpoints_configmap_name();
        let name = name.as_str();
        let rendered = rendered.as_str();

        retry_on(&self.ctx.config.backoff, EngineError::is_conflict, move || async move {
            match configmaps.get(namespace, name).await {
                Ok(mut existing) => {
                    if existing.data.get(ENDPOINTS_DATA_KEY).map(String::as_str) == Some(rendered) {
                        return Ok(());
                    }
                    existing.data.insert(ENDPOINTS_DATA_KEY.to_string(), rendered.to_string());
                    configmaps.update(existing).await?;
                }
                Err(e) if e.is_not_found() => {
                    let configmap = ConfigMap::new(ObjectMeta::new(namespace, name))
                        .with_entry(ENDPOINTS_DATA_KEY, rendered);
                    configmaps.create(configmap).await?;
                }
                Err(e) => return Err(e.into()),
            }
            info!(configmap = name, endpoints = rendered, "Worker endpoints updated");
            Ok::<(), EngineError>(())
        })
        .await
    }
}

/// Render like `1h2m3s`, dropping leading zero units
pub(crate) fn format_duration(elapsed: chrono::Duration) -> String {
    let total = elapsed.num_seconds().max(0);
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, ALLUXIO_SUMMARY};
    use cachefleet_types::{CacheStateName, RuntimePhase, RuntimeType};

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(chrono::Duration::seconds(42)), "42s");
        assert_eq!(format_duration(chrono::Duration::seconds(90)), "1m30s");
        assert_eq!(format_duration(chrono::Duration::seconds(3723)), "1h2m3s");
        assert_eq!(format_duration(chrono::Duration::seconds(-5)), "0s");
    }

    #[tokio::test]
    async fn test_partial_workers_are_not_ready() {
        let fixture = Fixture::new();
        let runtime = fixture.add_runtime(RuntimeType::Alluxio, 3).await;
        let engine = fixture.engine(&runtime);
        fixture.add_workload(engine.info(), Tier::Master, 1, 1).await;
        fixture.add_workload(engine.info(), Tier::Worker, 3, 2).await;
        fixture
            .update_status(|s| s.worker_phase = RuntimePhase::NotReady)
            .await;

        assert!(!engine.check_and_update_runtime_status().await.unwrap());
        let status = fixture.runtime().await.status;
        assert_eq!(status.worker_phase, RuntimePhase::PartialReady);
        assert_eq!(status.worker_number_ready, 2);
        assert!(status.setup_duration.is_none());
    }

    #[tokio::test]
    async fn test_ready_runtime_records_setup_once() {
        let fixture = Fixture::new();
        let runtime = fixture.add_runtime(RuntimeType::Alluxio, 2).await;
        let engine = fixture.engine(&runtime);
        fixture.add_workload(engine.info(), Tier::Master, 1, 1).await;
        fixture.add_workload(engine.info(), Tier::Worker, 2, 2).await;
        fixture.add_pod(engine.info(), Tier::Master, 0, "node-0", true).await;
        fixture.executor.respond("report summary", ALLUXIO_SUMMARY);

        assert!(engine.check_and_update_runtime_status().await.unwrap());
        let status = fixture.runtime().await.status;
        let duration = status.setup_duration.clone().unwrap();
        assert_eq!(status.cache_states[&CacheStateName::Cached], "1GiB");
        assert_eq!(
            fixture.dataset().await.status.cache_states[&CacheStateName::Cached],
            "1GiB"
        );

        let writes = fixture.cluster.runtimes.write_count();
        assert!(engine.check_and_update_runtime_status().await.unwrap());
        assert_eq!(fixture.cluster.runtimes.write_count(), writes);
        assert_eq!(fixture.runtime().await.status.setup_duration, Some(duration));
    }

    #[tokio::test]
    async fn test_worker_endpoints_follow_ready_workers() {
        let fixture = Fixture::new();
        let runtime = fixture.add_runtime(RuntimeType::Alluxio, 2).await;
        let engine = fixture.engine(&runtime);
        engine.setup_master().await.unwrap();
        let port = fixture.values(engine.info()).await.port("worker-rpc").unwrap();

        fixture.add_pod(engine.info(), Tier::Worker, 0, "node-0", true).await;
        fixture.add_pod(engine.info(), Tier::Worker, 1, "node-1", false).await;
        engine.sync_worker_endpoints().await.unwrap();

        let configmap = fixture.configmap("hbase-worker-endpoints").await;
        let endpoints: WorkerEndpoints =
            serde_json::from_str(&configmap.data[ENDPOINTS_DATA_KEY]).unwrap();
        assert_eq!(endpoints.container_endpoints, vec![format!("10.1.0.0:{}", port)]);

        let writes = fixture.cluster.configmaps.write_count();
        engine.sync_worker_endpoints().await.unwrap();
        assert_eq!(fixture.cluster.configmaps.write_count(), writes);
    }
}
