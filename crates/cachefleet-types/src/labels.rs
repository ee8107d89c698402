//! Node label naming for cache placement
//!
//! A node belongs to a runtime's cache iff it carries the runtime's common
//! label `cachefleet.io/s-<namespace>-<name>=true`. The remaining labels in
//! this module travel with it and are applied and removed as one set.

use crate::meta::NamespacedName;
use crate::runtime::RuntimeType;

/// Prefix shared by every cache label
pub const CACHE_LABEL_PREFIX: &str = "cachefleet.io/s-";

/// Prefix of the capacity labels
pub const CAPACITY_LABEL_PREFIX: &str = "cachefleet.io/s-h-";

/// Key of the exclusive placement label, valued `<namespace>_<name>`
pub const EXCLUSIVE_LABEL_KEY: &str = "cachefleet_exclusive";

/// Node-selector key held by the fuse daemon set until fuse is enabled
pub const FUSE_BALLOON_KEY: &str = "cachefleet.io/fuse-balloon";

/// Label values written by the engine
pub const LABEL_TRUE: &str = "true";

/// Label names for one runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLabels {
    namespace: String,
    name: String,
    runtime_type: RuntimeType,
}

impl RuntimeLabels {
    pub fn new(key: &NamespacedName, runtime_type: RuntimeType) -> Self {
        Self {
            namespace: key.namespace.clone(),
            name: key.name.clone(),
            runtime_type,
        }
    }

    /// `cachefleet.io/s-<namespace>-<name>`
    pub fn common(&self) -> String {
        format!("{}{}-{}", CACHE_LABEL_PREFIX, self.namespace, self.name)
    }

    /// `cachefleet.io/s-<type>-<namespace>-<name>`
    pub fn runtime(&self) -> String {
        format!(
            "{}{}-{}-{}",
            CACHE_LABEL_PREFIX, self.runtime_type, self.namespace, self.name
        )
    }

    pub fn memory_capacity(&self) -> String {
        self.capacity("m")
    }

    pub fn disk_capacity(&self) -> String {
        self.capacity("d")
    }

    pub fn total_capacity(&self) -> String {
        self.capacity("t")
    }

    fn capacity(&self, kind: &str) -> String {
        format!(
            "{}{}-{}-{}-{}",
            CAPACITY_LABEL_PREFIX, self.runtime_type, kind, self.namespace, self.name
        )
    }

    pub fn exclusive_value(&self) -> String {
        format!("{}_{}", self.namespace, self.name)
    }

    /// Label keys owned by this runtime, excluding the exclusive key
    pub fn owned_keys(&self) -> Vec<String> {
        vec![
            self.common(),
            self.runtime(),
            self.memory_capacity(),
            self.disk_capacity(),
            self.total_capacity(),
        ]
    }

    /// Whether `key` is a cache label belonging to some other runtime
    pub fn is_foreign_cache_label(&self, key: &str) -> bool {
        key.starts_with(CACHE_LABEL_PREFIX) && !self.owned_keys().iter().any(|k| k == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> RuntimeLabels {
        RuntimeLabels::new(&NamespacedName::new("default", "hbase"), RuntimeType::Alluxio)
    }

    #[test]
    fn test_label_names() {
        let l = labels();
        assert_eq!(l.common(), "cachefleet.io/s-default-hbase");
        assert_eq!(l.runtime(), "cachefleet.io/s-alluxio-default-hbase");
        assert_eq!(l.memory_capacity(), "cachefleet.io/s-h-alluxio-m-default-hbase");
        assert_eq!(l.disk_capacity(), "cachefleet.io/s-h-alluxio-d-default-hbase");
        assert_eq!(l.total_capacity(), "cachefleet.io/s-h-alluxio-t-default-hbase");
        assert_eq!(l.exclusive_value(), "default_hbase");
    }

    #[test]
    fn test_foreign_label_detection() {
        let l = labels();
        assert!(!l.is_foreign_cache_label("cachefleet.io/s-default-hbase"));
        assert!(l.is_foreign_cache_label("cachefleet.io/s-default-spark"));
        assert!(!l.is_foreign_cache_label("kubernetes.io/hostname"));
    }
}
