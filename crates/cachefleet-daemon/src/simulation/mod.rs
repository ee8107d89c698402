//! In-process cluster simulation
//!
//! Lets the daemon run end to end without a real cluster. Releases turn
//! into workloads, [`Simulation::tick`] schedules their pods onto simulated
//! nodes the way a cluster scheduler would, and worker caches slowly fill
//! so reports and evictions have something to act on.

mod executor;
mod release;

pub use executor::{CacheLedger, SimulatedExecutor};
pub use release::{SimulatedReleaseManager, RELEASE_LABEL};

use crate::config::{DemoRuntime, SimulationConfig};
use cachefleet_engine::{load_values, RuntimeInfo, Tier};
use cachefleet_store::{ignore_not_found, InMemoryCluster, ResourceApi, Result, StoreError};
use cachefleet_types::{
    Dataset, LabelSelector, Level, MediumType, NamespacedName, Node, NodeAddress,
    NodeAddressType, ObjectMeta, Pod, PodPhase, Runtime, RuntimeLabels, RuntimeSpec,
    RuntimeType, TieredStore, Workload, WorkloadKind, WorkloadStatus, LABEL_TRUE,
};
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration};

/// Most a worker's cache grows per tick
const MAX_FILL_PER_TICK: u64 = 64 << 20;

pub struct Simulation {
    cluster: InMemoryCluster,
    releases: Arc<SimulatedReleaseManager>,
    executor: Arc<SimulatedExecutor>,
    ledger: Arc<CacheLedger>,
    config: SimulationConfig,
    next_ip: AtomicU32,
}

impl Simulation {
    pub fn new(cluster: InMemoryCluster, config: SimulationConfig) -> Self {
        let ledger = Arc::new(CacheLedger::default());
        Self {
            releases: Arc::new(SimulatedReleaseManager::new(cluster.clone())),
            executor: Arc::new(SimulatedExecutor::new(cluster.clone(), ledger.clone())),
            cluster,
            ledger,
            config,
            next_ip: AtomicU32::new(0),
        }
    }

    pub fn releases(&self) -> Arc<SimulatedReleaseManager> {
        self.releases.clone()
    }

    pub fn executor(&self) -> Arc<SimulatedExecutor> {
        self.executor.clone()
    }

    pub fn ledger(&self) -> &CacheLedger {
        &self.ledger
    }

    /// Create the simulated nodes and the configured demo runtime
    pub async fn seed(&self) -> Result<()> {
        for i in 0..self.config.node_count {
            let name = format!("node-{}", i);
            let node = Node {
                metadata: ObjectMeta::cluster_scoped(name),
                ready: true,
                allocatable_memory: self.config.node_memory_gib << 30,
                addresses: vec![NodeAddress {
                    address_type: NodeAddressType::InternalIp,
                    address: format!("192.168.0.{}", i + 1),
                }],
                ..Default::default()
            };
            create_if_missing(self.cluster.nodes.create(node).await)?;
        }

        if let Some(demo) = &self.config.demo_runtime {
            self.add_runtime(demo).await?;
        }
        tracing::info!(
            nodes = self.config.node_count,
            demo = self.config.demo_runtime.is_some(),
            "Simulated cluster seeded"
        );
        Ok(())
    }

    async fn add_runtime(&self, demo: &DemoRuntime) -> Result<()> {
        let spec = RuntimeSpec {
            replicas: demo.replicas,
            tiered_store: TieredStore {
                levels: vec![Level {
                    medium: MediumType::Mem,
                    path: "/dev/shm".to_string(),
                    quota: demo.memory_quota_mib << 20,
                }],
            },
            ..Default::default()
        };
        let dataset = Dataset::new(demo.namespace.clone(), demo.name.clone());
        create_if_missing(self.cluster.datasets.create(dataset).await)?;
        let runtime = Runtime::new(
            demo.namespace.clone(),
            demo.name.clone(),
            demo.runtime_type,
            spec,
        );
        create_if_missing(self.cluster.runtimes.create(runtime).await)
    }

    /// Converge pods on ticks until shutdown is signalled
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_millis(self.config.tick_interval_ms));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::warn!(error = %e, "Simulation tick failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("Simulation stopped");
    }

    /// One round of pod scheduling and cache growth
    pub async fn tick(&self) -> Result<()> {
        let nodes = self
            .cluster
            .nodes
            .list(None, &LabelSelector::everything())
            .await?;
        for workload in self
            .cluster
            .workloads
            .list(None, &LabelSelector::everything())
            .await?
        {
            self.converge(&workload, &nodes).await?;
        }
        self.fill_caches().await
    }

    async fn converge(&self, workload: &Workload, nodes: &[Node]) -> Result<()> {
        let namespace = workload.metadata.namespace.as_str();
        let mut pods: Vec<Pod> = self
            .cluster
            .pods
            .list(Some(namespace), &workload.spec.selector)
            .await?
            .into_iter()
            .filter(|p| p.is_owned_by(&workload.metadata.name))
            .collect();

        let eligible: Vec<&Node> = nodes
            .iter()
            .filter(|n| n.ready && !n.unschedulable)
            .filter(|n| selects(&workload.spec.node_selector, n))
            .collect();
        let eligible_names: BTreeSet<&str> = eligible.iter().map(|n| n.name()).collect();

        // Evict pods whose node no longer qualifies
        for pod in pods.iter().filter(|p| !on_nodes(p, &eligible_names)) {
            ignore_not_found(self.cluster.pods.delete(namespace, &pod.metadata.name).await)?;
        }
        pods.retain(|p| on_nodes(p, &eligible_names));

        let desired = match workload.kind {
            WorkloadKind::StatefulSet => {
                let replicas = workload.spec.replicas as usize;
                for pod in pods.iter().filter(|p| ordinal(p, workload) >= replicas) {
                    let deleted = self.cluster.pods.delete(namespace, &pod.metadata.name).await;
                    ignore_not_found(deleted)?;
                }
                pods.retain(|p| ordinal(p, workload) < replicas);

                let preferred = preferred_label(workload);
                for index in 0..replicas {
                    if pods.iter().any(|p| ordinal(p, workload) == index) {
                        continue;
                    }
                    let busy: BTreeSet<&str> =
                        pods.iter().filter_map(|p| p.node_name.as_deref()).collect();
                    let free = eligible
                        .iter()
                        .filter(|n| !busy.contains(n.name()))
                        .min_by_key(|n| {
                            let cached = preferred.as_deref().and_then(|l| n.label(l));
                            (cached != Some(LABEL_TRUE), n.name().to_string())
                        });
                    let Some(node) = free else {
                        break;
                    };
                    let name = format!("{}-{}", workload.metadata.name, index);
                    let pod = self.pod_for(workload, name, node);
                    pods.push(self.cluster.pods.create(pod).await?);
                }
                workload.spec.replicas
            }
            WorkloadKind::DaemonSet => {
                for node in &eligible {
                    if pods.iter().any(|p| p.node_name.as_deref() == Some(node.name())) {
                        continue;
                    }
                    let name = format!("{}-{}", workload.metadata.name, node.name());
                    let pod = self.pod_for(workload, name, node);
                    match self.cluster.pods.create(pod).await {
                        Ok(pod) => pods.push(pod),
                        Err(StoreError::AlreadyExists { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
                eligible.len() as u32
            }
        };

        let ready = pods.iter().filter(|p| p.is_running_and_ready()).count() as u32;
        let status = WorkloadStatus {
            replicas: pods.len() as u32,
            ready_replicas: ready,
            available_replicas: ready,
            desired_number_scheduled: desired,
        };
        if status != workload.status {
            let mut updated = workload.clone();
            updated.status = status;
            match self.cluster.workloads.update_status(updated).await {
                Ok(_) => {}
                // Changed under us; the next tick sees the new version
                Err(e) if e.is_conflict() || e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn pod_for(&self, workload: &Workload, name: String, node: &Node) -> Pod {
        let ip = self.next_ip.fetch_add(1, Ordering::Relaxed);
        let mut metadata = ObjectMeta::new(workload.metadata.namespace.clone(), name);
        metadata.labels = workload.spec.selector.match_labels.clone();
        Pod {
            metadata,
            node_name: Some(node.name().to_string()),
            phase: PodPhase::Running,
            ready: true,
            pod_ip: Some(format!("10.244.{}.{}", ip / 250, ip % 250 + 1)),
            owner: Some(workload.metadata.name.clone()),
            ..Default::default()
        }
    }

    /// Grow the cache of every ready worker up to its tiered-store quota
    async fn fill_caches(&self) -> Result<()> {
        let pods = self
            .cluster
            .pods
            .list(None, &LabelSelector::everything())
            .await?;
        let live: BTreeSet<NamespacedName> = pods.iter().map(|p| p.metadata.key()).collect();
        self.ledger.retain(|pod| live.contains(pod));

        let client = self.cluster.client();
        let mut quotas: BTreeMap<NamespacedName, u64> = BTreeMap::new();
        for pod in pods.iter().filter(|p| p.is_running_and_ready()) {
            let Some(info) = worker_runtime(pod) else {
                continue;
            };
            let quota = match quotas.get(info.key()) {
                Some(quota) => *quota,
                None => {
                    let quota = match load_values(&client, &info).await {
                        Ok(values) => values.map(|v| v.tiered_store.total_quota()).unwrap_or(0),
                        Err(e) => {
                            tracing::debug!(runtime = %info, error = %e, "No values to size cache");
                            0
                        }
                    };
                    quotas.insert(info.key().clone(), quota);
                    quota
                }
            };
            let grown = rand::thread_rng().gen_range(0..=MAX_FILL_PER_TICK);
            self.ledger.fill(pod.metadata.key(), grown, quota);
        }
        Ok(())
    }
}

fn create_if_missing<T>(result: Result<T>) -> Result<()> {
    match result {
        Ok(_) | Err(StoreError::AlreadyExists { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

fn selects(selector: &BTreeMap<String, String>, node: &Node) -> bool {
    selector
        .iter()
        .all(|(k, v)| node.label(k) == Some(v.as_str()))
}

fn on_nodes(pod: &Pod, nodes: &BTreeSet<&str>) -> bool {
    pod.node_name
        .as_deref()
        .is_some_and(|n| nodes.contains(n))
}

/// Ordinal suffix of a stateful set pod; unparsable names sort last
fn ordinal(pod: &Pod, workload: &Workload) -> usize {
    pod.metadata
        .name
        .strip_prefix(workload.metadata.name.as_str())
        .and_then(|rest| rest.strip_prefix('-'))
        .and_then(|n| n.parse().ok())
        .unwrap_or(usize::MAX)
}

/// Cache label workers of this workload's runtime prefer to land on
fn preferred_label(workload: &Workload) -> Option<String> {
    let release = workload.metadata.labels.get(RELEASE_LABEL)?;
    let runtime_type: RuntimeType = workload.metadata.labels.get("app")?.parse().ok()?;
    let key = NamespacedName::new(workload.metadata.namespace.clone(), release.clone());
    Some(RuntimeLabels::new(&key, runtime_type).common())
}

/// The runtime of a worker pod, if it is one
fn worker_runtime(pod: &Pod) -> Option<RuntimeInfo> {
    let release = pod.metadata.labels.get(RELEASE_LABEL)?;
    let runtime_type: RuntimeType = pod.metadata.labels.get("app")?.parse().ok()?;
    let info = RuntimeInfo::new(
        NamespacedName::new(pod.metadata.namespace.clone(), release.clone()),
        runtime_type,
    );
    info.pod_labels(Tier::Worker)
        .matches(&pod.metadata.labels)
        .then_some(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachefleet_store::ReleaseManager;
    use cachefleet_types::FUSE_BALLOON_KEY;

    fn config(nodes: usize) -> SimulationConfig {
        SimulationConfig {
            node_count: nodes,
            node_memory_gib: 16,
            tick_interval_ms: 10,
            demo_runtime: None,
        }
    }

    async fn install(simulation: &Simulation, fuse_global: bool, workers: u32) {
        let key = NamespacedName::new("default", "hbase");
        let fuse_node_selector = if fuse_global {
            BTreeMap::new()
        } else {
            let common = RuntimeLabels::new(&key, RuntimeType::Alluxio).common();
            BTreeMap::from([(common, LABEL_TRUE.to_string())])
        };
        let values = cachefleet_engine::RuntimeValues {
            fullname: "hbase".to_string(),
            namespace: "default".to_string(),
            runtime_type: RuntimeType::Alluxio,
            ports: BTreeMap::new(),
            master_replicas: 1,
            worker_replicas: workers,
            tiered_store: TieredStore::default(),
            worker_node_selector: BTreeMap::new(),
            fuse_global,
            fuse_node_selector,
        };
        let rendered = serde_json::to_string(&values).unwrap();
        simulation
            .releases()
            .install_release("hbase", "default", &rendered, "alluxio")
            .await
            .unwrap();
    }

    async fn workload(cluster: &InMemoryCluster, name: &str) -> Workload {
        cluster.workloads.get("default", name).await.unwrap()
    }

    #[tokio::test]
    async fn test_seed_creates_nodes_and_demo_runtime() {
        let cluster = InMemoryCluster::new();
        let mut cfg = config(2);
        cfg.demo_runtime = Some(DemoRuntime::default());
        let simulation = Simulation::new(cluster.clone(), cfg);

        simulation.seed().await.unwrap();
        // Seeding again is harmless
        simulation.seed().await.unwrap();

        assert_eq!(cluster.nodes.len(), 2);
        assert!(cluster.runtimes.get("default", "demo").await.is_ok());
        assert!(cluster.datasets.get("default", "demo").await.is_ok());
    }

    #[tokio::test]
    async fn test_tick_schedules_one_worker_per_node() {
        let cluster = InMemoryCluster::new();
        let simulation = Simulation::new(cluster.clone(), config(2));
        simulation.seed().await.unwrap();
        install(&simulation, false, 3).await;

        simulation.tick().await.unwrap();

        let worker = workload(&cluster, "hbase-worker").await;
        assert_eq!(worker.status.ready_replicas, 2);
        let master = workload(&cluster, "hbase-master").await;
        assert_eq!(master.status.ready_replicas, 1);
        // Non-global fuses wait for cache labels
        let fuse = workload(&cluster, "hbase-fuse").await;
        assert_eq!(fuse.status.desired_number_scheduled, 0);
    }

    #[tokio::test]
    async fn test_scale_down_removes_highest_ordinals() {
        let cluster = InMemoryCluster::new();
        let simulation = Simulation::new(cluster.clone(), config(3));
        simulation.seed().await.unwrap();
        install(&simulation, false, 3).await;
        simulation.tick().await.unwrap();

        let mut worker = workload(&cluster, "hbase-worker").await;
        worker.spec.replicas = 1;
        cluster.workloads.update(worker).await.unwrap();
        simulation.tick().await.unwrap();

        assert!(cluster.pods.get("default", "hbase-worker-0").await.is_ok());
        assert!(cluster.pods.get("default", "hbase-worker-1").await.is_err());
        assert!(cluster.pods.get("default", "hbase-worker-2").await.is_err());
        assert_eq!(workload(&cluster, "hbase-worker").await.status.ready_replicas, 1);
    }

    #[tokio::test]
    async fn test_global_fuse_waits_for_balloon_removal() {
        let cluster = InMemoryCluster::new();
        let simulation = Simulation::new(cluster.clone(), config(2));
        simulation.seed().await.unwrap();
        install(&simulation, true, 0).await;

        simulation.tick().await.unwrap();
        assert_eq!(workload(&cluster, "hbase-fuse").await.status.ready_replicas, 0);

        let mut fuse = workload(&cluster, "hbase-fuse").await;
        fuse.spec.node_selector.remove(FUSE_BALLOON_KEY);
        cluster.workloads.update(fuse).await.unwrap();
        simulation.tick().await.unwrap();

        let fuse = workload(&cluster, "hbase-fuse").await;
        assert_eq!(fuse.status.desired_number_scheduled, 2);
        assert_eq!(fuse.status.ready_replicas, 2);
    }
}
