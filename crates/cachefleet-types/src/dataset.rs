//! Dataset resource bound to a runtime

use crate::meta::ObjectMeta;
use crate::runtime::CacheStateList;
use crate::workload::Toleration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetPhase {
    #[default]
    None,
    NotBound,
    Bound,
    Failed,
}

impl fmt::Display for DatasetPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "",
            Self::NotBound => "NotBound",
            Self::Bound => "Bound",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// How cache workers share nodes with other datasets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementMode {
    /// At most one dataset cache per node
    #[default]
    Exclusive,
    Shared,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetSpec {
    pub placement: PlacementMode,
    /// Labels a node must carry to host this dataset's cache
    pub node_affinity: BTreeMap<String, String>,
    pub tolerations: Vec<Toleration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetStatus {
    pub phase: DatasetPhase,
    /// Total size of the underlying storage, human readable
    pub ufs_total: Option<String>,
    pub cache_states: CacheStateList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: DatasetSpec,
    #[serde(default)]
    pub status: DatasetStatus,
}

impl Dataset {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: DatasetSpec::default(),
            status: DatasetStatus::default(),
        }
    }

    pub fn is_exclusive(&self) -> bool {
        self.spec.placement == PlacementMode::Exclusive
    }
}
