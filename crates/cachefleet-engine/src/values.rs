//! Rendered values for a runtime's release
//!
//! Master setup renders one [`RuntimeValues`] document, stores it in the
//! `<name>-<type>-values` config object and installs the release from it.
//! Shutdown and restart recovery read the reserved ports back from there.

use crate::error::{EngineError, Result};
use crate::info::RuntimeInfo;
use cachefleet_store::ClusterClient;
use cachefleet_types::{ConfigMap, LabelSelector, ObjectMeta, RuntimeType, TieredStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Data key holding the rendered document
pub const VALUES_DATA_KEY: &str = "data";

/// Label marking config objects that hold rendered values
pub const VALUES_LABEL: &str = "cachefleet.io/values";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeValues {
    pub fullname: String,
    pub namespace: String,
    pub runtime_type: RuntimeType,
    /// Host ports by name, e.g. `master-rpc`
    #[serde(default)]
    pub ports: BTreeMap<String, u16>,
    pub master_replicas: u32,
    pub worker_replicas: u32,
    #[serde(default)]
    pub tiered_store: TieredStore,
    #[serde(default)]
    pub worker_node_selector: BTreeMap<String, String>,
    pub fuse_global: bool,
    #[serde(default)]
    pub fuse_node_selector: BTreeMap<String, String>,
}

impl RuntimeValues {
    pub fn port(&self, name: &str) -> Option<u16> {
        self.ports.get(name).copied()
    }

    pub fn reserved_ports(&self) -> Vec<u16> {
        self.ports.values().copied().collect()
    }

    pub fn render(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| EngineError::InvalidValues {
            configmap: self.fullname.clone(),
            reason: e.to_string(),
        })
    }

    pub fn to_configmap(&self, info: &RuntimeInfo) -> Result<ConfigMap> {
        let metadata = ObjectMeta::new(info.namespace(), info.values_configmap_name())
            .with_label(VALUES_LABEL, "true")
            .with_label("release", info.release_name());
        Ok(ConfigMap::new(metadata).with_entry(VALUES_DATA_KEY, self.render()?))
    }

    pub fn from_configmap(configmap: &ConfigMap) -> Result<Self> {
        let invalid = |reason: String| EngineError::InvalidValues {
            configmap: configmap.metadata.key().to_string(),
            reason,
        };
        let raw = configmap
            .data
            .get(VALUES_DATA_KEY)
            .ok_or_else(|| invalid(format!("missing key {:?}", VALUES_DATA_KEY)))?;
        serde_json::from_str(raw).map_err(|e| invalid(e.to_string()))
    }
}

/// Load the values of one runtime; `None` if the config object is gone
pub async fn load_values(client: &ClusterClient, info: &RuntimeInfo) -> Result<Option<RuntimeValues>> {
    match client
        .configmaps
        .get(info.namespace(), &info.values_configmap_name())
        .await
    {
        Ok(configmap) => Ok(Some(RuntimeValues::from_configmap(&configmap)?)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Every port recorded by existing runtimes, for rebuilding the allocator
/// after a restart. Unreadable documents are skipped.
pub async fn collect_reserved_ports(client: &ClusterClient) -> Result<Vec<u16>> {
    let selector = LabelSelector::from_pairs([(VALUES_LABEL, "true")]);
    let mut ports = Vec::new();
    for configmap in client.configmaps.list(None, &selector).await? {
        match RuntimeValues::from_configmap(&configmap) {
            Ok(values) => ports.extend(values.reserved_ports()),
            Err(e) => warn!(
                configmap = %configmap.metadata.key(),
                error = %e,
                "Skipping unreadable values while reconstructing ports"
            ),
        }
    }
    Ok(ports)
}
