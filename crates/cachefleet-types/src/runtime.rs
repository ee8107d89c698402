//! Cache runtime resource
//!
//! A [`Runtime`] is one deployed cache cluster (master, workers, fuse
//! clients) fronting the storage behind a single dataset. The spec is owned
//! by users; the status is owned by the engine and written through the status
//! subresource only.

use crate::condition::Condition;
use crate::meta::{NamespacedName, ObjectMeta};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Backend engine behind a runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    Alluxio,
    JuiceFs,
}

impl RuntimeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alluxio => "alluxio",
            Self::JuiceFs => "juicefs",
        }
    }
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "alluxio" => Ok(Self::Alluxio),
            "juicefs" => Ok(Self::JuiceFs),
            other => Err(format!("unknown runtime type: {}", other)),
        }
    }
}

/// Per-tier readiness phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuntimePhase {
    #[default]
    None,
    NotReady,
    PartialReady,
    Ready,
}

impl RuntimePhase {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Display for RuntimePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "",
            Self::NotReady => "NotReady",
            Self::PartialReady => "PartialReady",
            Self::Ready => "Ready",
        };
        f.write_str(s)
    }
}

/// Storage medium of a tiered-store level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediumType {
    #[serde(rename = "MEM")]
    Mem,
    #[serde(rename = "SSD")]
    Ssd,
    #[serde(rename = "HDD")]
    Hdd,
}

impl MediumType {
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Mem)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub medium: MediumType,
    /// Comma separated cache directories
    pub path: String,
    /// Quota in bytes
    pub quota: u64,
}

impl Level {
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.path
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TieredStore {
    #[serde(default)]
    pub levels: Vec<Level>,
}

impl TieredStore {
    pub fn memory_quota(&self) -> u64 {
        self.levels
            .iter()
            .filter(|l| l.medium.is_memory())
            .map(|l| l.quota)
            .sum()
    }

    pub fn disk_quota(&self) -> u64 {
        self.levels
            .iter()
            .filter(|l| !l.medium.is_memory())
            .map(|l| l.quota)
            .sum()
    }

    pub fn total_quota(&self) -> u64 {
        self.memory_quota() + self.disk_quota()
    }

    pub fn cache_paths(&self) -> Vec<String> {
        self.levels
            .iter()
            .flat_map(|l| l.paths().map(str::to_string).collect::<Vec<_>>())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_master_replicas")]
    pub replicas: u32,
}

impl Default for MasterSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            replicas: default_master_replicas(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FuseSpec {
    /// Run a fuse client on every eligible node rather than only cache nodes
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSpec {
    /// Desired worker replicas
    #[serde(default)]
    pub replicas: u32,
    #[serde(default)]
    pub master: MasterSpec,
    #[serde(default)]
    pub worker: WorkerSpec,
    #[serde(default)]
    pub fuse: FuseSpec,
    #[serde(default)]
    pub tiered_store: TieredStore,
}

/// Keys of the cache-state map published in status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheStateName {
    CacheCapacity,
    Cached,
    CachedPercentage,
    CacheHitRatio,
    CacheThroughputRatio,
}

pub type CacheStateList = BTreeMap<CacheStateName, String>;

/// Observed state of a runtime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeStatus {
    /// Name of the config object holding the rendered values
    pub value_file_configmap: String,

    pub master_phase: RuntimePhase,
    pub master_reason: String,
    pub worker_phase: RuntimePhase,
    pub worker_reason: String,
    pub fuse_phase: RuntimePhase,
    pub fuse_reason: String,

    pub desired_master_number_scheduled: u32,
    pub current_master_number_scheduled: u32,
    pub master_number_ready: u32,

    pub desired_worker_number_scheduled: u32,
    pub current_worker_number_scheduled: u32,
    pub worker_number_ready: u32,
    pub worker_number_available: u32,
    pub worker_number_unavailable: u32,

    pub desired_fuse_number_scheduled: u32,
    pub current_fuse_number_scheduled: u32,
    pub fuse_number_ready: u32,
    pub fuse_number_available: u32,
    pub fuse_number_unavailable: u32,

    pub conditions: Vec<Condition>,
    pub cache_states: CacheStateList,

    /// Worker selector rendered as `k=v,k=v`
    pub selector: String,

    /// Time from creation to first full readiness, e.g. `1m30s`
    pub setup_duration: Option<String>,
}

/// The persisted cache runtime resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Runtime {
    pub metadata: ObjectMeta,
    pub runtime_type: RuntimeType,
    #[serde(default)]
    pub spec: RuntimeSpec,
    #[serde(default)]
    pub status: RuntimeStatus,
}

impl Runtime {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        runtime_type: RuntimeType,
        spec: RuntimeSpec,
    ) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            runtime_type,
            spec,
            status: RuntimeStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn key(&self) -> NamespacedName {
        self.metadata.key()
    }

    pub fn replicas(&self) -> u32 {
        self.spec.replicas
    }

    /// Desired master replicas; zero when the master tier is disabled
    pub fn master_replicas(&self) -> u32 {
        if self.spec.master.enabled {
            self.spec.master.replicas.max(1)
        } else {
            0
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_master_replicas() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiered() -> TieredStore {
        TieredStore {
            levels: vec![
                Level {
                    medium: MediumType::Mem,
                    path: "/dev/shm".into(),
                    quota: 2 << 30,
                },
                Level {
                    medium: MediumType::Ssd,
                    path: "/mnt/ssd0, /mnt/ssd1".into(),
                    quota: 10 << 30,
                },
            ],
        }
    }

    #[test]
    fn test_tiered_store_quotas() {
        let store = tiered();
        assert_eq!(store.memory_quota(), 2 << 30);
        assert_eq!(store.disk_quota(), 10 << 30);
        assert_eq!(store.total_quota(), 12 << 30);
        assert_eq!(store.cache_paths(), vec!["/dev/shm", "/mnt/ssd0", "/mnt/ssd1"]);
    }

    #[test]
    fn test_master_replicas_respects_enable_flag() {
        let mut runtime = Runtime::new("default", "hbase", RuntimeType::Alluxio, RuntimeSpec::default());
        assert_eq!(runtime.master_replicas(), 1);
        runtime.spec.master.enabled = false;
        assert_eq!(runtime.master_replicas(), 0);
    }

    #[test]
    fn test_runtime_type_parse() {
        assert_eq!("JuiceFS".parse::<RuntimeType>().unwrap(), RuntimeType::JuiceFs);
        assert!("ceph".parse::<RuntimeType>().is_err());
    }

    #[test]
    fn test_status_deserializes_with_defaults() {
        let status: RuntimeStatus = serde_json::from_str("{}").unwrap();
        assert_eq!(status, RuntimeStatus::default());
        assert!(status.master_phase.is_none());
    }
}
