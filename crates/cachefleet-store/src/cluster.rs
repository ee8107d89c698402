//! Bundle of typed APIs for every resource the engine touches

use crate::api::ResourceApi;
use crate::memory::InMemoryResourceApi;
use cachefleet_types::{ConfigMap, Dataset, Node, Pod, Runtime, Workload};
use std::sync::Arc;

/// Handle to the cluster store, cheap to clone
#[derive(Clone)]
pub struct ClusterClient {
    pub runtimes: Arc<dyn ResourceApi<Runtime>>,
    pub datasets: Arc<dyn ResourceApi<Dataset>>,
    pub workloads: Arc<dyn ResourceApi<Workload>>,
    pub pods: Arc<dyn ResourceApi<Pod>>,
    pub nodes: Arc<dyn ResourceApi<Node>>,
    pub configmaps: Arc<dyn ResourceApi<ConfigMap>>,
}

/// In-memory cluster with typed access to each store
///
/// Tests and the simulation backend keep this around to seed objects and
/// inspect write counts; the engine only sees the [`ClusterClient`].
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    pub runtimes: Arc<InMemoryResourceApi<Runtime>>,
    pub datasets: Arc<InMemoryResourceApi<Dataset>>,
    pub workloads: Arc<InMemoryResourceApi<Workload>>,
    pub pods: Arc<InMemoryResourceApi<Pod>>,
    pub nodes: Arc<InMemoryResourceApi<Node>>,
    pub configmaps: Arc<InMemoryResourceApi<ConfigMap>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self) -> ClusterClient {
        ClusterClient {
            runtimes: self.runtimes.clone(),
            datasets: self.datasets.clone(),
            workloads: self.workloads.clone(),
            pods: self.pods.clone(),
            nodes: self.nodes.clone(),
            configmaps: self.configmaps.clone(),
        }
    }
}
