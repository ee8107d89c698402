//! Cache facts and eviction through the backend's pods

use crate::backend::{alluxio, juicefs, Backend, CacheReport, ReportSource};
use crate::engine::CacheEngine;
use crate::error::{EngineError, Result};
use crate::info::Tier;
use crate::operations::PodCommand;
use cachefleet_types::{bytes_size, Pod, Runtime};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

impl CacheEngine {
    fn pod_command<'a>(&'a self, pod: &'a Pod, container: &'a str) -> PodCommand<'a> {
        PodCommand::new(
            self.ctx.executor.as_ref(),
            &pod.metadata.name,
            container,
            self.info.namespace(),
            self.ctx.config.exec_timeout,
        )
    }

    /// Query cache facts; `None` while no pod is around to ask
    pub(crate) async fn query_cache_report(&self, runtime: &Runtime) -> Result<Option<CacheReport>> {
        match self.backend.report_source() {
            ReportSource::Master => {
                let Some(master) = self.running_pods(Tier::Master).await?.into_iter().next() else {
                    return Ok(None);
                };
                let container = self.backend.container(Tier::Master);
                let command = self.pod_command(&master, &container);

                let summary = command.run(&alluxio::summary_command()).await?;
                let mut report = alluxio::parse_summary(&summary.stdout)?;
                match command.run(&alluxio::metrics_command()).await {
                    Ok(metrics) => alluxio::apply_metrics(&mut report, &metrics.stdout),
                    Err(e) => warn!(runtime = %self.info, error = %e, "Cache metrics unavailable"),
                }
                Ok(Some(report))
            }
            ReportSource::Workers => {
                let per_node = self.juicefs_worker_stats().await?;
                if per_node.is_empty() {
                    return Ok(None);
                }
                let mut total = juicefs::WorkerStats::default();
                for stats in per_node.values() {
                    total.merge(stats);
                }
                let capacity = runtime.spec.tiered_store.total_quota() * per_node.len() as u64;
                Ok(Some(total.into_report(Some(capacity))))
            }
        }
    }

    /// Cached bytes per node, for picking scale-in victims. Best effort:
    /// Alluxio only reports cluster totals.
    pub(crate) async fn worker_cache_usage(&self) -> BTreeMap<String, u64> {
        if self.backend != Backend::JuiceFs {
            return BTreeMap::new();
        }
        match self.juicefs_worker_stats().await {
            Ok(stats) => stats
                .into_iter()
                .map(|(node, s)| (node, s.cached_bytes as u64))
                .collect(),
            Err(e) => {
                warn!(runtime = %self.info, error = %e, "Worker cache usage unavailable");
                BTreeMap::new()
            }
        }
    }

    async fn juicefs_worker_stats(&self) -> Result<BTreeMap<String, juicefs::WorkerStats>> {
        let container = self.backend.container(Tier::Worker);
        let command_line = juicefs::stats_command(&self.info);
        let mut stats = BTreeMap::new();
        for pod in self.running_pods(Tier::Worker).await? {
            let output = self.pod_command(&pod, &container).run(&command_line).await?;
            let node = pod.node_name.clone().unwrap_or_else(|| pod.metadata.name.clone());
            stats.insert(node, juicefs::parse_stats(&output.stdout));
        }
        Ok(stats)
    }

    /// Evict cached data before teardown
    pub(crate) async fn clean_cache(&self, runtime: &Runtime) -> Result<()> {
        match self.backend {
            Backend::Alluxio => self.clean_alluxio_cache().await,
            Backend::JuiceFs => self.clean_juicefs_cache(runtime).await,
        }
    }

    /// One master-side free evicts every worker
    async fn clean_alluxio_cache(&self) -> Result<()> {
        let Some(master) = self.running_pods(Tier::Master).await?.into_iter().next() else {
            info!(runtime = %self.info, "No running master, skipping cache cleanup");
            return Ok(());
        };
        let container = self.backend.container(Tier::Master);
        let command = self.pod_command(&master, &container);

        let before = alluxio::parse_summary(&command.run(&alluxio::summary_command()).await?.stdout)?;
        if before.cached == 0 {
            return Ok(());
        }
        command.run(&alluxio::free_command()).await?;
        tokio::time::sleep(self.ctx.config.cache_cleanup_settle).await;

        let after = alluxio::parse_summary(&command.run(&alluxio::summary_command()).await?.stdout)?;
        if after.cached > 0 {
            return Err(EngineError::CacheNotCleaned {
                runtime: self.info.to_string(),
                remaining: bytes_size(after.cached),
            });
        }
        info!(runtime = %self.info, freed = %bytes_size(before.cached), "Cache cleaned");
        Ok(())
    }

    /// Remove chunk directories on every worker; vanished pods are skipped
    async fn clean_juicefs_cache(&self, runtime: &Runtime) -> Result<()> {
        let paths = runtime.spec.tiered_store.cache_paths();
        let Some(command_line) = juicefs::clean_cache_command(&paths) else {
            debug!(runtime = %self.info, "No cache directories to clean");
            return Ok(());
        };
        let container = self.backend.container(Tier::Worker);
        for pod in self.running_pods(Tier::Worker).await? {
            match self.pod_command(&pod, &container).run(&command_line).await {
                Ok(_) => {}
                Err(EngineError::Exec(e)) if e.is_pod_gone() => {
                    debug!(pod = %pod.metadata.name, "Worker gone, skipping cache cleanup");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::info::Tier;
    use crate::testing::{Fixture, ALLUXIO_METRICS, ALLUXIO_SUMMARY, JUICEFS_STATS};
    use cachefleet_types::RuntimeType;

    #[tokio::test]
    async fn test_alluxio_report_from_master() {
        let fixture = Fixture::new();
        let runtime = fixture.add_runtime(RuntimeType::Alluxio, 1).await;
        let engine = fixture.engine(&runtime);
        assert!(engine.query_cache_report(&runtime).await.unwrap().is_none());

        fixture.add_pod(engine.info(), Tier::Master, 0, "node-0", true).await;
        fixture.executor.respond("report summary", ALLUXIO_SUMMARY);
        fixture.executor.respond("report metrics", ALLUXIO_METRICS);

        let report = engine.query_cache_report(&runtime).await.unwrap().unwrap();
        assert_eq!(report.cached, 1 << 30);
        assert_eq!(report.capacity, Some(4 << 30));
        assert!(report.hit_ratio.is_some());
    }

    #[tokio::test]
    async fn test_juicefs_report_sums_workers() {
        let fixture = Fixture::new();
        let runtime = fixture.add_runtime(RuntimeType::JuiceFs, 2).await;
        let engine = fixture.engine(&runtime);
        fixture.add_pod(engine.info(), Tier::Worker, 0, "node-0", true).await;
        fixture.add_pod(engine.info(), Tier::Worker, 1, "node-1", true).await;
        fixture.executor.respond(".stats", JUICEFS_STATS);

        let report = engine.query_cache_report(&runtime).await.unwrap().unwrap();
        assert_eq!(report.cached, 2 * 396462);
        assert_eq!(report.capacity, Some(2 << 30));

        let usage = engine.worker_cache_usage().await;
        assert_eq!(usage.len(), 2);
        assert_eq!(usage["node-0"], 396462);
    }

    #[tokio::test]
    async fn test_alluxio_cleanup_verifies_eviction() {
        let fixture = Fixture::new();
        let runtime = fixture.add_runtime(RuntimeType::Alluxio, 1).await;
        let engine = fixture.engine(&runtime);
        fixture.add_pod(engine.info(), Tier::Master, 0, "node-0", true).await;

        fixture.executor.respond("report summary", ALLUXIO_SUMMARY);
        assert!(engine.clean_cache(&runtime).await.is_err());
        assert_eq!(fixture.executor.calls_matching("fs free"), 1);

        fixture.executor.clear();
        fixture.executor.respond_once("report summary", ALLUXIO_SUMMARY);
        fixture.executor.respond("report summary", "Used Capacity: 0B");
        engine.clean_cache(&runtime).await.unwrap();
        assert_eq!(fixture.executor.calls_matching("fs free"), 2);
    }

    #[tokio::test]
    async fn test_alluxio_cleanup_without_master_is_skipped() {
        let fixture = Fixture::new();
        let runtime = fixture.add_runtime(RuntimeType::Alluxio, 1).await;
        let engine = fixture.engine(&runtime);

        engine.clean_cache(&runtime).await.unwrap();
        assert!(fixture.executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_juicefs_cleanup_ignores_vanished_workers() {
        let fixture = Fixture::new();
        let runtime = fixture.add_runtime(RuntimeType::JuiceFs, 2).await;
        let engine = fixture.engine(&runtime);
        fixture.add_pod(engine.info(), Tier::Worker, 0, "node-0", true).await;
        fixture.add_pod(engine.info(), Tier::Worker, 1, "node-1", true).await;
        fixture.executor.lose_pod("hbase-worker-0");

        engine.clean_cache(&runtime).await.unwrap();
        assert_eq!(fixture.executor.calls_matching("rm -rf /dev/shm/raw/chunks"), 2);

        fixture.executor.fail("rm -rf", "read-only file system");
        assert!(engine.clean_cache(&runtime).await.is_err());
    }
}
