//! Release manager that materializes workloads in the simulated cluster

use async_trait::async_trait;
use cachefleet_engine::{RuntimeInfo, RuntimeValues, Tier};
use cachefleet_store::{
    ignore_not_found, InMemoryCluster, InMemoryReleaseManager, ReleaseManager, ResourceApi,
    Result, StoreError,
};
use cachefleet_types::{
    LabelSelector, NamespacedName, ObjectMeta, Workload, WorkloadKind, WorkloadSpec,
    FUSE_BALLOON_KEY, LABEL_TRUE,
};
use std::collections::BTreeMap;
use tracing::info;

/// Label carried by every simulated object of a release
pub const RELEASE_LABEL: &str = "release";

/// Installs a release by creating its master, worker and fuse workloads.
/// Pods are left to [`super::Simulation::tick`].
pub struct SimulatedReleaseManager {
    cluster: InMemoryCluster,
    records: InMemoryReleaseManager,
}

impl SimulatedReleaseManager {
    pub fn new(cluster: InMemoryCluster) -> Self {
        Self {
            cluster,
            records: InMemoryReleaseManager::new(),
        }
    }
}

#[async_trait]
impl ReleaseManager for SimulatedReleaseManager {
    async fn check_release(&self, name: &str, namespace: &str) -> Result<bool> {
        self.records.check_release(name, namespace).await
    }

    async fn install_release(
        &self,
        name: &str,
        namespace: &str,
        values: &str,
        chart: &str,
    ) -> Result<()> {
        let parsed: RuntimeValues =
            serde_json::from_str(values).map_err(|e| StoreError::Release {
                release: name.to_string(),
                message: format!("unreadable values: {}", e),
            })?;

        for workload in release_workloads(&parsed) {
            match self.cluster.workloads.create(workload).await {
                Ok(_) => {}
                Err(StoreError::AlreadyExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        self.records
            .install_release(name, namespace, values, chart)
            .await?;
        info!(release = name, namespace, chart, "Simulated release installed");
        Ok(())
    }

    /// Delete the workloads and their master and worker pods. Fuse pods
    /// outlive their daemon set, as they do on a real cluster.
    async fn delete_release(&self, name: &str, namespace: &str) -> Result<()> {
        self.records.delete_release(name, namespace).await?;

        let selector = LabelSelector::from_pairs([(RELEASE_LABEL, name)]);
        let workloads = self.cluster.workloads.list(Some(namespace), &selector).await?;
        for pod in self.cluster.pods.list(Some(namespace), &selector).await? {
            let owned_by_statefulset = workloads.iter().any(|w| {
                w.kind == WorkloadKind::StatefulSet && pod.is_owned_by(&w.metadata.name)
            });
            if owned_by_statefulset {
                ignore_not_found(self.cluster.pods.delete(namespace, &pod.metadata.name).await)?;
            }
        }
        for workload in workloads {
            ignore_not_found(
                self.cluster
                    .workloads
                    .delete(namespace, &workload.metadata.name)
                    .await,
            )?;
        }
        info!(release = name, namespace, "Simulated release deleted");
        Ok(())
    }
}

/// Workloads a release renders to
fn release_workloads(values: &RuntimeValues) -> Vec<Workload> {
    let info = RuntimeInfo::new(
        NamespacedName::new(values.namespace.clone(), values.fullname.clone()),
        values.runtime_type,
    );

    let mut workloads = Vec::new();
    if values.master_replicas > 0 {
        workloads.push(workload(
            &info,
            Tier::Master,
            WorkloadKind::StatefulSet,
            values.master_replicas,
            Default::default(),
        ));
    }
    workloads.push(workload(
        &info,
        Tier::Worker,
        WorkloadKind::StatefulSet,
        values.worker_replicas,
        values.worker_node_selector.clone(),
    ));

    let mut fuse_selector = values.fuse_node_selector.clone();
    if values.fuse_global {
        // Held back until fuse setup lifts it
        fuse_selector.insert(FUSE_BALLOON_KEY.to_string(), LABEL_TRUE.to_string());
    }
    workloads.push(workload(
        &info,
        Tier::Fuse,
        WorkloadKind::DaemonSet,
        0,
        fuse_selector,
    ));
    workloads
}

fn workload(
    info: &RuntimeInfo,
    tier: Tier,
    kind: WorkloadKind,
    replicas: u32,
    node_selector: BTreeMap<String, String>,
) -> Workload {
    let metadata = ObjectMeta::new(info.namespace(), info.workload_name(tier))
        .with_label(RELEASE_LABEL, info.release_name())
        .with_label("app", info.runtime_type().as_str());
    let spec = WorkloadSpec {
        replicas,
        selector: info.pod_labels(tier),
        node_selector,
    };
    Workload::new(metadata, kind, spec)
}
