//! Cluster objects the engine reads and writes: workloads, pods, nodes and
//! config objects

use crate::meta::{LabelSelector, ObjectMeta};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadKind {
    /// Fixed replica count (master, worker)
    StatefulSet,
    /// One pod per eligible node (fuse)
    DaemonSet,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Desired replicas; ignored for daemon sets
    pub replicas: u32,
    pub selector: LabelSelector,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadStatus {
    /// Pods currently scheduled
    pub replicas: u32,
    pub ready_replicas: u32,
    pub available_replicas: u32,
    /// Daemon sets only: nodes that should run a pod
    pub desired_number_scheduled: u32,
}

/// A controller-managed group of pods for one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub metadata: ObjectMeta,
    pub kind: WorkloadKind,
    pub spec: WorkloadSpec,
    #[serde(default)]
    pub status: WorkloadStatus,
}

impl Workload {
    pub fn new(metadata: ObjectMeta, kind: WorkloadKind, spec: WorkloadSpec) -> Self {
        Self {
            metadata,
            kind,
            spec,
            status: WorkloadStatus::default(),
        }
    }

    /// Number of pods this workload is trying to run
    pub fn desired(&self) -> u32 {
        match self.kind {
            WorkloadKind::StatefulSet => self.spec.replicas,
            WorkloadKind::DaemonSet => self.status.desired_number_scheduled,
        }
    }

    pub fn unavailable(&self) -> u32 {
        self.desired().saturating_sub(self.status.available_replicas)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub phase: PodPhase,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub pod_ip: Option<String>,
    /// Name of the owning workload
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub containers: Vec<String>,
    /// Persistent volume claims mounted by this pod
    #[serde(default)]
    pub claims: Vec<String>,
}

impl Pod {
    pub fn is_running(&self) -> bool {
        self.phase == PodPhase::Running
    }

    pub fn is_running_and_ready(&self) -> bool {
        self.is_running() && self.ready
    }

    pub fn is_owned_by(&self, workload: &str) -> bool {
        self.owner.as_deref() == Some(workload)
    }

    pub fn mounts_claim(&self, claim: &str) -> bool {
        self.claims.iter().any(|c| c == claim)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    #[serde(default)]
    pub value: String,
    pub effect: TaintEffect,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TolerationOperator {
    #[default]
    Equal,
    Exists,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toleration {
    /// Empty key with `Exists` tolerates every taint
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub operator: TolerationOperator,
    #[serde(default)]
    pub value: String,
    /// `None` matches every effect
    #[serde(default)]
    pub effect: Option<TaintEffect>,
}

impl Toleration {
    pub fn tolerates(&self, taint: &Taint) -> bool {
        if let Some(effect) = self.effect {
            if effect != taint.effect {
                return false;
            }
        }
        match self.operator {
            TolerationOperator::Exists => self.key.is_empty() || self.key == taint.key,
            TolerationOperator::Equal => self.key == taint.key && self.value == taint.value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeAddressType {
    InternalIp,
    Hostname,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub address_type: NodeAddressType,
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub unschedulable: bool,
    #[serde(default)]
    pub taints: Vec<Taint>,
    /// Allocatable memory in bytes
    #[serde(default)]
    pub allocatable_memory: u64,
    #[serde(default)]
    pub addresses: Vec<NodeAddress>,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.get(key).map(String::as_str)
    }

    pub fn internal_ip(&self) -> Option<&str> {
        self.addresses
            .iter()
            .find(|a| a.address_type == NodeAddressType::InternalIp)
            .map(|a| a.address.as_str())
    }

    /// Taints that forbid scheduling and are not covered by `tolerations`
    pub fn untolerated_taints<'a>(
        &'a self,
        tolerations: &'a [Toleration],
    ) -> impl Iterator<Item = &'a Taint> + 'a {
        self.taints
            .iter()
            .filter(|t| t.effect != TaintEffect::PreferNoSchedule)
            .filter(move |t| !tolerations.iter().any(|tol| tol.tolerates(t)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigMap {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl ConfigMap {
    pub fn new(metadata: ObjectMeta) -> Self {
        Self {
            metadata,
            data: BTreeMap::new(),
        }
    }

    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}
