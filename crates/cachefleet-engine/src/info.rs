//! Naming of a runtime's child objects

use cachefleet_types::{LabelSelector, NamespacedName, Runtime, RuntimeLabels, RuntimeType};
use std::fmt;

/// Component tier of a cache runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Master,
    Worker,
    Fuse,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Worker => "worker",
            Self::Fuse => "fuse",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one runtime and the names derived from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeInfo {
    key: NamespacedName,
    runtime_type: RuntimeType,
    labels: RuntimeLabels,
}

impl RuntimeInfo {
    pub fn new(key: NamespacedName, runtime_type: RuntimeType) -> Self {
        let labels = RuntimeLabels::new(&key, runtime_type);
        Self {
            key,
            runtime_type,
            labels,
        }
    }

    pub fn from_runtime(runtime: &Runtime) -> Self {
        Self::new(runtime.key(), runtime.runtime_type)
    }

    pub fn key(&self) -> &NamespacedName {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn namespace(&self) -> &str {
        &self.key.namespace
    }

    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    pub fn labels(&self) -> &RuntimeLabels {
        &self.labels
    }

    /// Release installed by the deploy collaborator
    pub fn release_name(&self) -> &str {
        &self.key.name
    }

    /// Workload backing `tier`
    pub fn workload_name(&self, tier: Tier) -> String {
        format!("{}-{}", self.key.name, tier.as_str())
    }

    pub fn values_configmap_name(&self) -> String {
        format!("{}-{}-values", self.key.name, self.runtime_type)
    }

    pub fn endpoints_configmap_name(&self) -> String {
        format!("{}-worker-endpoints", self.key.name)
    }

    /// Claim application pods mount to reach the dataset
    pub fn claim_name(&self) -> &str {
        &self.key.name
    }

    /// Labels carried by pods of `tier`
    pub fn pod_labels(&self, tier: Tier) -> LabelSelector {
        LabelSelector::from_pairs([
            ("app", self.runtime_type.as_str().to_string()),
            ("role", format!("{}-{}", self.runtime_type, tier)),
            ("release", self.key.name.clone()),
        ])
    }
}

impl fmt::Display for RuntimeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}
