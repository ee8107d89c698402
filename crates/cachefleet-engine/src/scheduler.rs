//! Node Scheduler - Cache placement bookkeeping on nodes
//!
//! A node belongs to a runtime's cache while it carries the runtime's common
//! label. Labels follow where ready workers actually run: the sync step adds
//! them to nodes that gained a ready worker and strips them from nodes that
//! lost one. Assignment only estimates how many nodes could take a worker.
//!
//! Teardown of workers is serialized across all runtimes by one lock so two
//! runtimes never race on the same node's labels while shrinking.

use crate::error::{EngineError, Result};
use crate::info::{RuntimeInfo, Tier};
use cachefleet_store::{retry_on, Backoff, ClusterClient};
use cachefleet_types::{
    bytes_size, Dataset, LabelSelector, Node, Runtime, EXCLUSIVE_LABEL_KEY, LABEL_TRUE,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, trace};

/// Nodes whose labels changed in one sync
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSync {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl LabelSync {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub struct NodeScheduler {
    client: ClusterClient,
    lock: Arc<Mutex<()>>,
    backoff: Backoff,
}

impl NodeScheduler {
    pub fn new(client: ClusterClient, lock: Arc<Mutex<()>>, backoff: Backoff) -> Self {
        Self {
            client,
            lock,
            backoff,
        }
    }

    /// Count nodes able to host a worker, capped at `desired`.
    ///
    /// Nodes already labelled for this runtime count first; the rest are
    /// taken in name order when they pass placement filtering. No node is
    /// modified.
    pub async fn assign_nodes_to_cache(
        &self,
        info: &RuntimeInfo,
        runtime: &Runtime,
        dataset: Option<&Dataset>,
        desired: u32,
    ) -> Result<u32> {
        let _guard = self.lock.lock().await;
        let common = info.labels().common();
        let nodes = self
            .client
            .nodes
            .list(None, &LabelSelector::everything())
            .await?;

        let mut count = nodes
            .iter()
            .filter(|n| n.label(&common) == Some(LABEL_TRUE))
            .count() as u32;
        for node in &nodes {
            if count >= desired {
                break;
            }
            if node.label(&common).is_some() {
                continue;
            }
            match unschedulable_reason(info, runtime, dataset, node) {
                Some(reason) => trace!(node = node.name(), reason, "Node skipped"),
                None => count += 1,
            }
        }

        let count = count.min(desired);
        debug!(runtime = %info, count, desired, "Assigned nodes to cache");
        Ok(count)
    }

    /// Converge cache labels on the nodes running ready workers.
    ///
    /// Repeating a sync with no change in worker placement writes nothing.
    pub async fn sync_schedule_info_to_cache_nodes(
        &self,
        info: &RuntimeInfo,
        runtime: &Runtime,
        exclusive: bool,
    ) -> Result<LabelSync> {
        let current: BTreeSet<String> = self
            .client
            .pods
            .list(Some(info.namespace()), &info.pod_labels(Tier::Worker))
            .await?
            .into_iter()
            .filter(|p| p.is_running_and_ready())
            .filter_map(|p| p.node_name)
            .collect();
        let previous: BTreeSet<String> = self
            .client
            .nodes
            .list(None, &cache_node_selector(info))
            .await?
            .into_iter()
            .map(|n| n.metadata.name)
            .collect();

        let labels = cache_labels(info, runtime, exclusive);
        let mut sync = LabelSync::default();
        for node in current.difference(&previous) {
            if self.label_node(node, &labels).await? {
                sync.added.push(node.clone());
            }
        }
        for node in previous.difference(&current) {
            if self.unlabel_node(info, node).await? {
                sync.removed.push(node.clone());
            }
        }

        if !sync.is_empty() {
            info!(
                runtime = %info,
                added = ?sync.added,
                removed = ?sync.removed,
                "Synced cache node labels"
            );
        }
        Ok(sync)
    }

    /// Strip cache labels until at most `expected` nodes keep them; `None`
    /// strips every node. Nodes with the least cached data go first and
    /// `protected` nodes are left alone when shrinking. Returns how many
    /// labelled nodes remain.
    pub async fn teardown_workers(
        &self,
        info: &RuntimeInfo,
        expected: Option<u32>,
        protected: &BTreeSet<String>,
        usage: &BTreeMap<String, u64>,
    ) -> Result<u32> {
        let _guard = self.lock.lock().await;
        let labelled = self.client.nodes.list(None, &cache_node_selector(info)).await?;
        let target = expected.unwrap_or(0);
        let mut remaining = labelled.len() as u32;
        if remaining <= target {
            return Ok(remaining);
        }

        let mut candidates: Vec<&Node> = labelled
            .iter()
            .filter(|n| expected.is_none() || !protected.contains(n.name()))
            .collect();
        let used = |n: &Node| usage.get(n.name()).copied().unwrap_or(0);
        candidates.sort_by(|a, b| used(*a).cmp(&used(*b)).then_with(|| a.name().cmp(b.name())));

        for node in candidates {
            if remaining <= target {
                break;
            }
            self.unlabel_node(info, node.name()).await?;
            remaining -= 1;
        }

        info!(runtime = %info, remaining, target, "Tore down workers");
        Ok(remaining)
    }

    /// Add `labels` to a node; false when it already carried them all
    async fn label_node(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<bool> {
        let nodes = &self.client.nodes;
        retry_on(&self.backoff, EngineError::is_conflict, move || async move {
            let mut node = nodes.get("", name).await?;
            if labels.iter().all(|(k, v)| node.label(k) == Some(v.as_str())) {
                return Ok(false);
            }
            node.metadata.labels.extend(labels.clone());
            nodes.update(node).await?;
            Ok::<bool, EngineError>(true)
        })
        .await
    }

    /// Remove this runtime's labels from a node; false when none were there
    async fn unlabel_node(&self, info: &RuntimeInfo, name: &str) -> Result<bool> {
        let nodes = &self.client.nodes;
        let keys = info.labels().owned_keys();
        let keys = keys.as_slice();
        let exclusive = info.labels().exclusive_value();
        let exclusive = exclusive.as_str();

        retry_on(&self.backoff, EngineError::is_conflict, move || async move {
            let mut node = nodes.get("", name).await?;
            let labels = &mut node.metadata.labels;
            let mut changed = false;
            for key in keys {
                changed |= labels.remove(key).is_some();
            }
            if labels.get(EXCLUSIVE_LABEL_KEY).map(String::as_str) == Some(exclusive) {
                labels.remove(EXCLUSIVE_LABEL_KEY);
                changed = true;
            }
            if !changed {
                return Ok(false);
            }
            nodes.update(node).await?;
            Ok::<bool, EngineError>(true)
        })
        .await
    }
}

fn cache_node_selector(info: &RuntimeInfo) -> LabelSelector {
    LabelSelector::from_pairs([(info.labels().common(), LABEL_TRUE)])
}

/// Labels a cache node carries for one runtime
pub fn cache_labels(info: &RuntimeInfo, runtime: &Runtime, exclusive: bool) -> BTreeMap<String, String> {
    let names = info.labels();
    let store = &runtime.spec.tiered_store;
    let mut labels = BTreeMap::from([
        (names.common(), LABEL_TRUE.to_string()),
        (names.runtime(), LABEL_TRUE.to_string()),
    ]);

    let capacities = [
        (names.memory_capacity(), store.memory_quota()),
        (names.disk_capacity(), store.disk_quota()),
        (names.total_capacity(), store.total_quota()),
    ];
    for (key, quota) in capacities {
        if quota > 0 {
            labels.insert(key, bytes_size(quota));
        }
    }
    if exclusive {
        labels.insert(EXCLUSIVE_LABEL_KEY.to_string(), names.exclusive_value());
    }
    labels
}

/// Why a node cannot take a worker, or `None` if it can
fn unschedulable_reason(
    info: &RuntimeInfo,
    runtime: &Runtime,
    dataset: Option<&Dataset>,
    node: &Node,
) -> Option<&'static str> {
    if !node.ready || node.unschedulable {
        return Some("not schedulable");
    }
    let selector = LabelSelector {
        match_labels: runtime.spec.worker.node_selector.clone(),
    };
    if !selector.matches(&node.metadata.labels) {
        return Some("worker node selector mismatch");
    }
    if let Some(owner) = node.label(EXCLUSIVE_LABEL_KEY) {
        if owner != info.labels().exclusive_value() {
            return Some("held exclusively by another dataset");
        }
    }
    if let Some(dataset) = dataset {
        let affinity = LabelSelector {
            match_labels: dataset.spec.node_affinity.clone(),
        };
        if !affinity.matches(&node.metadata.labels) {
            return Some("dataset affinity mismatch");
        }
        if node.untolerated_taints(&dataset.spec.tolerations).next().is_some() {
            return Some("untolerated taint");
        }
        if dataset.is_exclusive()
            && node
                .metadata
                .labels
                .keys()
                .any(|k| info.labels().is_foreign_cache_label(k))
        {
            return Some("already caches another dataset");
        }
    }
    let memory = runtime.spec.tiered_store.memory_quota();
    if memory > 0 && node.allocatable_memory < memory {
        return Some("insufficient memory");
    }
    None
}
