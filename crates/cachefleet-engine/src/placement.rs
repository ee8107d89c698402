//! Engine entry points into the node scheduler

use crate::engine::CacheEngine;
use crate::error::Result;
use cachefleet_types::LabelSelector;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, instrument};

impl CacheEngine {
    pub async fn assign_nodes_to_cache(&self, desired: u32) -> Result<u32> {
        let runtime = self.get_runtime().await?;
        let dataset = self.get_dataset().await?;
        self.scheduler
            .assign_nodes_to_cache(&self.info, &runtime, dataset.as_ref(), desired)
            .await
    }

    #[instrument(skip(self), fields(runtime = %self.info))]
    pub async fn sync_schedule_info_to_cache_nodes(&self) -> Result<()> {
        let runtime = self.get_runtime().await?;
        let exclusive = self
            .get_dataset()
            .await?
            .map(|d| d.is_exclusive())
            .unwrap_or(false);
        self.scheduler
            .sync_schedule_info_to_cache_nodes(&self.info, &runtime, exclusive)
            .await?;
        Ok(())
    }

    /// Shrink the cache to `expected` nodes, or drop it entirely with `None`.
    /// Returns the number of cache nodes left.
    ///
    /// When shrinking a runtime with node-local fuses, nodes where
    /// application pods still mount the dataset keep their worker.
    pub(crate) async fn destroy_workers(&self, expected: Option<u32>) -> Result<u32> {
        // Protection and usage only rank victims of a partial scale-in
        let (protected, usage) = match expected {
            Some(_) => {
                let runtime = self.get_runtime().await?;
                let protected = if runtime.spec.fuse.global {
                    BTreeSet::new()
                } else {
                    self.nodes_serving_dataset().await?
                };
                (protected, self.worker_cache_usage().await)
            }
            None => (BTreeSet::new(), BTreeMap::new()),
        };
        debug!(runtime = %self.info, ?expected, protected = ?protected, "Destroying workers");

        self.scheduler
            .teardown_workers(&self.info, expected, &protected, &usage)
            .await
    }

    /// Nodes running pods that mount this runtime's dataset claim
    async fn nodes_serving_dataset(&self) -> Result<BTreeSet<String>> {
        let pods = self
            .ctx
            .client
            .pods
            .list(Some(self.info.namespace()), &LabelSelector::everything())
            .await?;
        Ok(pods
            .into_iter()
            .filter(|p| p.is_running() && p.mounts_claim(self.info.claim_name()))
            .filter_map(|p| p.node_name)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::info::Tier;
    use crate::testing::{Fixture, JUICEFS_STATS};
    use cachefleet_types::RuntimeType;

    #[tokio::test]
    async fn test_full_teardown_skips_usage_queries() {
        let fixture = Fixture::new();
        fixture.add_nodes(2).await;
        let runtime = fixture.add_runtime(RuntimeType::JuiceFs, 2).await;
        let engine = fixture.engine(&runtime);
        let common = engine.info().labels().common();
        fixture.label_node("node-0", &common).await;
        fixture.label_node("node-1", &common).await;
        fixture.add_pod(engine.info(), Tier::Worker, 0, "node-0", true).await;
        fixture.add_pod(engine.info(), Tier::Worker, 1, "node-1", true).await;
        fixture.executor.respond(".stats", JUICEFS_STATS);

        assert_eq!(engine.destroy_workers(None).await.unwrap(), 0);
        assert_eq!(fixture.executor.calls_matching(".stats"), 0);

        engine.shutdown().await.unwrap();
        assert_eq!(fixture.executor.calls_matching(".stats"), 0);
    }
}
