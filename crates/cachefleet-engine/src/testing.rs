//! In-memory cluster fixture for engine tests
//!
//! Every fixture owns an isolated cluster, release manager, executor and
//! port allocator. Runtimes are created as `default/hbase` with a 1GiB
//! memory tier on `/dev/shm`.

use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::engine::CacheEngine;
use crate::info::{RuntimeInfo, Tier};
use crate::values::{load_values, RuntimeValues};
use cachefleet_ports::{AllocationPolicy, PortRange, RuntimePortAllocator};
use cachefleet_store::{
    Backoff, InMemoryCluster, InMemoryReleaseManager, ResourceApi, ScriptedExecutor,
};
use cachefleet_types::{
    ConfigMap, Dataset, LabelSelector, Level, MediumType, Node, ObjectMeta, Pod, PodPhase,
    Runtime, RuntimeSpec, RuntimeStatus, RuntimeType, TieredStore, Workload, WorkloadKind,
    WorkloadSpec, LABEL_TRUE,
};
use std::sync::Arc;
use std::time::Duration;

pub const NAMESPACE: &str = "default";
pub const NAME: &str = "hbase";

/// `fsadmin report summary` with 1GiB of 4GiB used
pub const ALLUXIO_SUMMARY: &str = "Alluxio cluster summary:
    Live Workers: 2
    Lost Workers: 0
    Total Capacity: 4.00GB
        Tier: MEM  Size: 4.00GB
    Used Capacity: 1.00GB
        Tier: MEM  Size: 1.00GB
    Free Capacity: 3.00GB";

pub const ALLUXIO_METRICS: &str = "Cluster.BytesReadLocal  (Type: COUNTER, Value: 30MB)
    Cluster.BytesReadRemote  (Type: COUNTER, Value: 10MB)
    Cluster.BytesReadUfsAll  (Type: COUNTER, Value: 60MB)";

pub const JUICEFS_STATS: &str = "juicefs_blockcache_bytes{vol_name=\"minio\"} 396462
juicefs_blockcache_hits{vol_name=\"minio\"} 300
juicefs_blockcache_miss{vol_name=\"minio\"} 100";

/// A ready node with 16GiB of allocatable memory
pub fn ready_node(name: &str) -> Node {
    Node {
        metadata: ObjectMeta::cluster_scoped(name),
        ready: true,
        allocatable_memory: 16 << 30,
        ..Default::default()
    }
}

pub struct Fixture {
    pub cluster: InMemoryCluster,
    pub releases: Arc<InMemoryReleaseManager>,
    pub executor: Arc<ScriptedExecutor>,
    pub ports: Arc<RuntimePortAllocator>,
    pub ctx: EngineContext,
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    pub fn new() -> Self {
        let cluster = InMemoryCluster::new();
        let releases = Arc::new(InMemoryReleaseManager::new());
        let executor = Arc::new(ScriptedExecutor::new());
        let range = PortRange::new(20000, 100).unwrap();
        let ports = Arc::new(RuntimePortAllocator::new(range, AllocationPolicy::BitMap));
        let config = EngineConfig {
            cache_cleanup_settle: Duration::ZERO,
            backoff: Backoff::new(4, Duration::ZERO),
            ..Default::default()
        };
        let ctx = EngineContext::new(
            cluster.client(),
            releases.clone(),
            executor.clone(),
            ports.clone(),
            config,
        );
        Self {
            cluster,
            releases,
            executor,
            ports,
            ctx,
        }
    }

    pub fn engine(&self, runtime: &Runtime) -> CacheEngine {
        CacheEngine::new(RuntimeInfo::from_runtime(runtime), self.ctx.clone())
    }

    /// Create `default/hbase` and its dataset
    pub async fn add_runtime(&self, runtime_type: RuntimeType, replicas: u32) -> Runtime {
        let spec = RuntimeSpec {
            replicas,
            tiered_store: TieredStore {
                levels: vec![Level {
                    medium: MediumType::Mem,
                    path: "/dev/shm".to_string(),
                    quota: 1 << 30,
                }],
            },
            ..Default::default()
        };
        let mut runtime = Runtime::new(NAMESPACE, NAME, runtime_type, spec);
        runtime.metadata.creation_timestamp = Some(chrono::Utc::now());
        self.cluster
            .datasets
            .create(Dataset::new(NAMESPACE, NAME))
            .await
            .unwrap();
        self.cluster.runtimes.create(runtime).await.unwrap()
    }

    pub async fn replace_runtime(&self, runtime: Runtime) -> Runtime {
        self.cluster.runtimes.update(runtime).await.unwrap()
    }

    pub async fn runtime(&self) -> Runtime {
        self.cluster.runtimes.get(NAMESPACE, NAME).await.unwrap()
    }

    pub async fn update_status(&self, mutate: impl FnOnce(&mut RuntimeStatus)) {
        let mut runtime = self.runtime().await;
        mutate(&mut runtime.status);
        self.cluster.runtimes.update_status(runtime).await.unwrap();
    }

    pub async fn dataset(&self) -> Dataset {
        self.cluster.datasets.get(NAMESPACE, NAME).await.unwrap()
    }

    /// Add `node-0` .. `node-<n-1>`
    pub async fn add_nodes(&self, n: usize) {
        for i in 0..n {
            self.add_node(ready_node(&format!("node-{}", i))).await;
        }
    }

    pub async fn add_node(&self, node: Node) {
        self.cluster.nodes.create(node).await.unwrap();
    }

    pub async fn node(&self, name: &str) -> Node {
        self.cluster.nodes.get("", name).await.unwrap()
    }

    pub async fn nodes(&self) -> Vec<Node> {
        self.cluster
            .nodes
            .list(None, &LabelSelector::everything())
            .await
            .unwrap()
    }

    pub async fn label_node(&self, name: &str, key: &str) {
        let mut node = self.node(name).await;
        node.metadata
            .labels
            .insert(key.to_string(), LABEL_TRUE.to_string());
        self.cluster.nodes.update(node).await.unwrap();
    }

    /// Create the workload of `tier` with `replicas` desired and `ready` ready
    pub async fn add_workload(
        &self,
        info: &RuntimeInfo,
        tier: Tier,
        replicas: u32,
        ready: u32,
    ) -> Workload {
        let kind = match tier {
            Tier::Fuse => WorkloadKind::DaemonSet,
            _ => WorkloadKind::StatefulSet,
        };
        let spec = WorkloadSpec {
            replicas,
            selector: info.pod_labels(tier),
            ..Default::default()
        };
        let mut workload = Workload::new(
            ObjectMeta::new(info.namespace(), info.workload_name(tier)),
            kind,
            spec,
        );
        workload.status.replicas = replicas;
        workload.status.desired_number_scheduled = replicas;
        workload.status.ready_replicas = ready;
        workload.status.available_replicas = ready;
        self.cluster.workloads.create(workload).await.unwrap()
    }

    pub async fn workload(&self, info: &RuntimeInfo, tier: Tier) -> Workload {
        self.cluster
            .workloads
            .get(info.namespace(), &info.workload_name(tier))
            .await
            .unwrap()
    }

    pub async fn replace_workload(&self, workload: Workload) -> Workload {
        self.cluster.workloads.update(workload).await.unwrap()
    }

    pub async fn set_ready(&self, info: &RuntimeInfo, tier: Tier, ready: u32) {
        let mut workload = self.workload(info, tier).await;
        workload.status.ready_replicas = ready;
        workload.status.available_replicas = ready;
        self.cluster.workloads.update_status(workload).await.unwrap();
    }

    /// Running pod `<workload>-<index>` of `tier` on `node`, IP `10.1.0.<index>`
    pub async fn add_pod(
        &self,
        info: &RuntimeInfo,
        tier: Tier,
        index: u32,
        node: &str,
        ready: bool,
    ) {
        let workload = info.workload_name(tier);
        let mut metadata = ObjectMeta::new(info.namespace(), format!("{}-{}", workload, index));
        metadata.labels = info.pod_labels(tier).match_labels;
        let pod = Pod {
            metadata,
            node_name: Some(node.to_string()),
            phase: PodPhase::Running,
            ready,
            pod_ip: Some(format!("10.1.0.{}", index)),
            owner: Some(workload),
            ..Default::default()
        };
        self.cluster.pods.create(pod).await.unwrap();
    }

    /// Running application pod mounting `claim`
    pub async fn add_app_pod(&self, name: &str, node: &str, claim: &str) {
        let pod = Pod {
            metadata: ObjectMeta::new(NAMESPACE, name),
            node_name: Some(node.to_string()),
            phase: PodPhase::Running,
            ready: true,
            claims: vec![claim.to_string()],
            ..Default::default()
        };
        self.cluster.pods.create(pod).await.unwrap();
    }

    pub async fn values(&self, info: &RuntimeInfo) -> RuntimeValues {
        load_values(&self.ctx.client, info).await.unwrap().unwrap()
    }

    pub async fn configmap(&self, name: &str) -> ConfigMap {
        self.cluster.configmaps.get(NAMESPACE, name).await.unwrap()
    }
}
