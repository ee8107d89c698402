//! Controller runs against the simulated cluster

use cachefleet_daemon::config::{DemoRuntime, SchedulerConfig, SimulationConfig};
use cachefleet_daemon::{Controller, Outcome, Simulation};
use cachefleet_engine::{EngineConfig, EngineContext, RuntimeInfo, Tier};
use cachefleet_ports::{AllocationPolicy, PortRange, RuntimePortAllocator};
use cachefleet_store::{Backoff, InMemoryCluster, ResourceApi};
use cachefleet_types::{
    LabelSelector, NamespacedName, RuntimeLabels, RuntimePhase, RuntimeType, LABEL_TRUE,
};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    cluster: InMemoryCluster,
    simulation: Simulation,
    controller: Controller,
    ports: Arc<RuntimePortAllocator>,
    key: NamespacedName,
}

impl Harness {
    async fn new(runtime_type: RuntimeType, replicas: u32) -> Self {
        let cluster = InMemoryCluster::new();
        let demo = DemoRuntime {
            runtime_type,
            replicas,
            ..Default::default()
        };
        let key = NamespacedName::new(demo.namespace.clone(), demo.name.clone());
        let simulation = Simulation::new(
            cluster.clone(),
            SimulationConfig {
                node_count: 3,
                node_memory_gib: 16,
                tick_interval_ms: 10,
                demo_runtime: Some(demo),
            },
        );
        simulation.seed().await.unwrap();

        let range = PortRange::new(20000, 100).unwrap();
        let ports = Arc::new(RuntimePortAllocator::new(range, AllocationPolicy::BitMap));
        let ctx = EngineContext::new(
            cluster.client(),
            simulation.releases(),
            simulation.executor(),
            ports.clone(),
            EngineConfig {
                cache_cleanup_settle: Duration::ZERO,
                backoff: Backoff::new(4, Duration::ZERO),
                ..Default::default()
            },
        );
        let controller = Controller::new(ctx, SchedulerConfig::default());

        Self {
            cluster,
            simulation,
            controller,
            ports,
            key,
        }
    }

    /// Alternate reconciles and simulation ticks until the runtime is ready
    async fn converge(&self) {
        for _ in 0..10 {
            if self.controller.reconcile(&self.key).await.unwrap() == Outcome::Done {
                return;
            }
            self.simulation.tick().await.unwrap();
        }
        panic!("runtime did not become ready");
    }

    /// A few more rounds so labels and pods settle
    async fn settle(&self) {
        for _ in 0..3 {
            self.simulation.tick().await.unwrap();
            self.controller.reconcile(&self.key).await.unwrap();
        }
    }

    async fn cache_nodes(&self, runtime_type: RuntimeType) -> usize {
        let label = RuntimeLabels::new(&self.key, runtime_type).common();
        let selector = LabelSelector::from_pairs([(label, LABEL_TRUE)]);
        self.cluster.nodes.list(None, &selector).await.unwrap().len()
    }
}

#[tokio::test]
async fn test_alluxio_runtime_comes_up_scales_in_and_tears_down() {
    let harness = Harness::new(RuntimeType::Alluxio, 2).await;
    harness.converge().await;
    harness.settle().await;

    let runtime = harness
        .cluster
        .runtimes
        .get(&harness.key.namespace, &harness.key.name)
        .await
        .unwrap();
    assert_eq!(runtime.status.master_phase, RuntimePhase::Ready);
    assert_eq!(runtime.status.worker_phase, RuntimePhase::Ready);
    assert_eq!(runtime.status.worker_number_ready, 2);
    assert!(runtime.status.setup_duration.is_some());
    assert_eq!(harness.cache_nodes(RuntimeType::Alluxio).await, 2);

    let info = RuntimeInfo::from_runtime(&runtime);
    let endpoints = harness
        .cluster
        .configmaps
        .get(&harness.key.namespace, &info.endpoints_configmap_name())
        .await;
    assert!(endpoints.is_ok());

    // Scale in
    let mut scaled = runtime.clone();
    scaled.spec.replicas = 1;
    harness.cluster.runtimes.update(scaled).await.unwrap();
    harness.settle().await;

    let worker = harness
        .cluster
        .workloads
        .get(&harness.key.namespace, &info.workload_name(Tier::Worker))
        .await
        .unwrap();
    assert_eq!(worker.spec.replicas, 1);
    assert_eq!(worker.status.ready_replicas, 1);
    assert_eq!(harness.cache_nodes(RuntimeType::Alluxio).await, 1);

    // Delete
    let available = harness.ports.available();
    harness
        .cluster
        .runtimes
        .delete(&harness.key.namespace, &harness.key.name)
        .await
        .unwrap();
    let outcome = harness.controller.reconcile(&harness.key).await.unwrap();

    assert_eq!(outcome, Outcome::Done);
    let gone = harness
        .cluster
        .runtimes
        .get(&harness.key.namespace, &harness.key.name)
        .await
        .unwrap_err();
    assert!(gone.is_not_found());
    assert_eq!(harness.cache_nodes(RuntimeType::Alluxio).await, 0);
    assert!(harness.cluster.pods.is_empty());
    assert!(harness.cluster.workloads.is_empty());
    assert!(harness.ports.available() > available);
    assert_eq!(harness.controller.managed(), 0);
}

#[tokio::test]
async fn test_juicefs_runtime_reports_cache_and_cleans_workers() {
    let harness = Harness::new(RuntimeType::JuiceFs, 2).await;
    harness.converge().await;
    harness.settle().await;
    assert_eq!(harness.cache_nodes(RuntimeType::JuiceFs).await, 2);

    harness
        .cluster
        .runtimes
        .delete(&harness.key.namespace, &harness.key.name)
        .await
        .unwrap();
    harness.controller.reconcile(&harness.key).await.unwrap();

    assert!(harness.cluster.pods.is_empty());
    assert_eq!(harness.cache_nodes(RuntimeType::JuiceFs).await, 0);
    let worker_cached: u64 = (0..2)
        .map(|i| {
            let pod = NamespacedName::new("default", format!("demo-worker-{}", i));
            harness.simulation.ledger().cached(&pod)
        })
        .sum();
    assert_eq!(worker_cached, 0);
}
