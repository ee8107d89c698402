//! Executor answering backend commands from simulated cache state
//!
//! Every worker pod holds a number of cached bytes that grows while it runs.
//! Alluxio reports and frees the sum over a release's workers from the
//! master; JuiceFS reports and evicts per worker.

use super::release::RELEASE_LABEL;
use async_trait::async_trait;
use cachefleet_engine::{load_values, RuntimeInfo, Tier};
use cachefleet_store::{CommandExecutor, ExecError, ExecOutput, InMemoryCluster, ResourceApi};
use cachefleet_types::{bytes_size, NamespacedName, Pod, RuntimeType};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Cached bytes per worker pod
#[derive(Default)]
pub struct CacheLedger {
    cached: DashMap<NamespacedName, u64>,
}

impl CacheLedger {
    pub fn cached(&self, pod: &NamespacedName) -> u64 {
        self.cached.get(pod).map(|c| *c).unwrap_or(0)
    }

    /// Grow a worker's cache by `bytes`, up to `quota`
    pub fn fill(&self, pod: NamespacedName, bytes: u64, quota: u64) {
        let mut entry = self.cached.entry(pod).or_insert(0);
        *entry = entry.saturating_add(bytes).min(quota);
    }

    pub fn evict(&self, pod: &NamespacedName) {
        self.cached.remove(pod);
    }

    /// Drop entries of pods that no longer exist
    pub fn retain(&self, live: impl Fn(&NamespacedName) -> bool) {
        self.cached.retain(|pod, _| live(pod));
    }
}

pub struct SimulatedExecutor {
    cluster: InMemoryCluster,
    ledger: Arc<CacheLedger>,
}

impl SimulatedExecutor {
    pub fn new(cluster: InMemoryCluster, ledger: Arc<CacheLedger>) -> Self {
        Self { cluster, ledger }
    }

    async fn pod(&self, namespace: &str, name: &str) -> Result<Pod, ExecError> {
        match self.cluster.pods.get(namespace, name).await {
            Ok(pod) => Ok(pod),
            Err(e) if e.is_not_found() => Err(ExecError::PodNotFound {
                pod: name.to_string(),
            }),
            Err(e) => Err(ExecError::Transport(e.to_string())),
        }
    }

    /// The runtime a pod belongs to, from its labels
    fn runtime_of(pod: &Pod) -> Result<RuntimeInfo, ExecError> {
        let release = pod.metadata.labels.get(RELEASE_LABEL);
        let runtime_type = pod
            .metadata
            .labels
            .get("app")
            .and_then(|app| app.parse::<RuntimeType>().ok());
        match (release, runtime_type) {
            (Some(release), Some(runtime_type)) => Ok(RuntimeInfo::new(
                NamespacedName::new(pod.metadata.namespace.clone(), release.clone()),
                runtime_type,
            )),
            _ => Err(ExecError::Transport(format!(
                "pod {} does not belong to a runtime",
                pod.metadata.name
            ))),
        }
    }

    async fn workers(&self, info: &RuntimeInfo) -> Result<Vec<Pod>, ExecError> {
        let pods = self
            .cluster
            .pods
            .list(Some(info.namespace()), &info.pod_labels(Tier::Worker))
            .await
            .map_err(|e| ExecError::Transport(e.to_string()))?;
        Ok(pods.into_iter().filter(Pod::is_running_and_ready).collect())
    }

    async fn worker_quota(&self, info: &RuntimeInfo) -> Result<u64, ExecError> {
        let values = load_values(&self.cluster.client(), info)
            .await
            .map_err(|e| ExecError::Transport(e.to_string()))?;
        Ok(values.map(|v| v.tiered_store.total_quota()).unwrap_or(0))
    }

    async fn alluxio_summary(&self, info: &RuntimeInfo) -> Result<String, ExecError> {
        let workers = self.workers(info).await?;
        let capacity = self.worker_quota(info).await? * workers.len() as u64;
        let used: u64 = workers
            .iter()
            .map(|w| self.ledger.cached(&w.metadata.key()))
            .sum();
        Ok(format!(
            "Alluxio cluster summary:\n    Live Workers: {}\n    Total Capacity: {}\n    Used Capacity: {}\n    Free Capacity: {}",
            workers.len(),
            bytes_size(capacity),
            bytes_size(used),
            bytes_size(capacity.saturating_sub(used)),
        ))
    }

    /// Local reads follow the cached volume, remote and UFS reads a fixed share
    async fn alluxio_metrics(&self, info: &RuntimeInfo) -> Result<String, ExecError> {
        let used: u64 = self
            .workers(info)
            .await?
            .iter()
            .map(|w| self.ledger.cached(&w.metadata.key()))
            .sum();
        Ok(format!(
            "Cluster.BytesReadLocal  (Type: COUNTER, Value: {})\n    Cluster.BytesReadRemote  (Type: COUNTER, Value: {})\n    Cluster.BytesReadUfsAll  (Type: COUNTER, Value: {})",
            bytes_size(used),
            bytes_size(used / 4),
            bytes_size(used / 2),
        ))
    }

    async fn alluxio_free(&self, info: &RuntimeInfo) -> Result<(), ExecError> {
        for worker in self.workers(info).await? {
            self.ledger.evict(&worker.metadata.key());
        }
        Ok(())
    }

    fn juicefs_stats(&self, worker: &Pod) -> String {
        let cached = self.ledger.cached(&worker.metadata.key());
        let blocks = cached / (4 << 20);
        format!(
            "juicefs_blockcache_bytes{{vol_name=\"sim\"}} {}\njuicefs_blockcache_hits{{vol_name=\"sim\"}} {}\njuicefs_blockcache_miss{{vol_name=\"sim\"}} {}",
            cached,
            blocks * 3,
            blocks,
        )
    }
}

#[async_trait]
impl CommandExecutor for SimulatedExecutor {
    async fn exec(
        &self,
        pod: &str,
        container: &str,
        namespace: &str,
        command: &[String],
    ) -> Result<ExecOutput, ExecError> {
        let target = self.pod(namespace, pod).await?;
        if target.node_name.is_none() {
            return Err(ExecError::NoHostAssigned {
                pod: pod.to_string(),
            });
        }
        let info = Self::runtime_of(&target)?;
        let command_line = command.join(" ");
        debug!(pod, container, command = %command_line, "Simulated exec");

        let stdout = if command_line.contains("report summary") {
            self.alluxio_summary(&info).await?
        } else if command_line.contains("report metrics") {
            self.alluxio_metrics(&info).await?
        } else if command_line.contains("fs free") {
            self.alluxio_free(&info).await?;
            String::new()
        } else if command_line.ends_with("/.stats") {
            self.juicefs_stats(&target)
        } else if command_line.starts_with("rm -rf") {
            self.ledger.evict(&target.metadata.key());
            String::new()
        } else {
            String::new()
        };
        Ok(ExecOutput::stdout(stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachefleet_engine::backend::{alluxio, juicefs};
    use cachefleet_types::{ObjectMeta, PodPhase};

    async fn add_worker(cluster: &InMemoryCluster, info: &RuntimeInfo, index: u32) -> Pod {
        let mut metadata = ObjectMeta::new(
            info.namespace(),
            format!("{}-{}", info.workload_name(Tier::Worker), index),
        );
        metadata.labels = info.pod_labels(Tier::Worker).match_labels;
        let pod = Pod {
            metadata,
            node_name: Some(format!("node-{}", index)),
            phase: PodPhase::Running,
            ready: true,
            owner: Some(info.workload_name(Tier::Worker)),
            ..Default::default()
        };
        cluster.pods.create(pod).await.unwrap()
    }

    #[tokio::test]
    async fn test_alluxio_summary_sums_workers_and_free_clears_them() {
        let cluster = InMemoryCluster::new();
        let ledger = Arc::new(CacheLedger::default());
        let executor = SimulatedExecutor::new(cluster.clone(), ledger.clone());
        let info = RuntimeInfo::new(NamespacedName::new("default", "hbase"), RuntimeType::Alluxio);
        let first = add_worker(&cluster, &info, 0).await;
        let second = add_worker(&cluster, &info, 1).await;
        ledger.fill(first.metadata.key(), 1 << 30, u64::MAX);
        ledger.fill(second.metadata.key(), 1 << 30, u64::MAX);

        let summary = executor
            .exec("hbase-worker-0", "alluxio-worker", "default", &alluxio::summary_command())
            .await
            .unwrap();
        let report = alluxio::parse_summary(&summary.stdout).unwrap();
        assert_eq!(report.cached, 2 << 30);

        executor
            .exec("hbase-worker-0", "alluxio-worker", "default", &alluxio::free_command())
            .await
            .unwrap();
        assert_eq!(ledger.cached(&first.metadata.key()), 0);
        assert_eq!(ledger.cached(&second.metadata.key()), 0);
    }

    #[tokio::test]
    async fn test_juicefs_stats_are_per_worker() {
        let cluster = InMemoryCluster::new();
        let ledger = Arc::new(CacheLedger::default());
        let executor = SimulatedExecutor::new(cluster.clone(), ledger.clone());
        let info = RuntimeInfo::new(NamespacedName::new("default", "hbase"), RuntimeType::JuiceFs);
        let worker = add_worker(&cluster, &info, 0).await;
        ledger.fill(worker.metadata.key(), 8 << 20, 6 << 20);

        let output = executor
            .exec("hbase-worker-0", "juicefs-worker", "default", &juicefs::stats_command(&info))
            .await
            .unwrap();
        let stats = juicefs::parse_stats(&output.stdout);
        assert_eq!(stats.cached_bytes, (6u64 << 20) as f64);

        let clean = juicefs::clean_cache_command(&["/dev/shm".to_string()]).unwrap();
        executor
            .exec("hbase-worker-0", "juicefs-worker", "default", &clean)
            .await
            .unwrap();
        assert_eq!(ledger.cached(&worker.metadata.key()), 0);
    }

    #[tokio::test]
    async fn test_missing_pod_is_reported_gone() {
        let executor = SimulatedExecutor::new(InMemoryCluster::new(), Arc::default());
        let err = executor
            .exec("nope", "worker", "default", &["true".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_pod_gone());
    }
}
