//! Shutdown Sequencer - Ordered, retryable teardown of a runtime
//!
//! The sequence is: evict cached data, strip cache labels from every node,
//! release the reserved ports, delete the release, and finally remove the
//! leftover fuse pods and config objects. Every step tolerates objects that
//! are already gone, so a shutdown interrupted halfway is simply repeated.
//!
//! Cache eviction may fail while the backend is unhealthy. After the
//! configured number of failed attempts it is skipped and teardown goes on.

use crate::engine::CacheEngine;
use crate::error::{EngineError, Result};
use crate::info::Tier;
use crate::values::{RuntimeValues, VALUES_DATA_KEY};
use cachefleet_store::{ignore_not_found, retry_on};
use cachefleet_types::{event_reasons, EventType};
use std::sync::atomic::Ordering;
use tracing::{debug, info, instrument, warn};

impl CacheEngine {
    #[instrument(skip(self), fields(runtime = %self.info))]
    pub async fn shutdown(&self) -> Result<()> {
        let limit = self.ctx.config.graceful_shutdown_limit;
        let retries = self.shutdown_retries.load(Ordering::SeqCst);

        if retries < limit {
            let runtime = match self.get_runtime().await {
                Ok(runtime) => Some(runtime),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e),
            };
            if let Some(runtime) = runtime {
                if let Err(e) = self.clean_cache(&runtime).await {
                    let failed = self.shutdown_retries.fetch_add(1, Ordering::SeqCst) + 1;
                    warn!(
                        runtime = %self.info,
                        error = %e,
                        attempt = failed,
                        limit,
                        "Cache cleanup failed"
                    );
                    self.emit(
                        EventType::Warning,
                        event_reasons::CACHE_CLEANUP_FAILED,
                        format!("Attempt {}/{}: {}", failed, limit, e),
                    );
                    return Err(e);
                }
            }
        } else {
            warn!(runtime = %self.info, retries, "Skipping cache cleanup after repeated failures");
            self.emit(
                EventType::Warning,
                event_reasons::FORCED_TEARDOWN,
                format!("Cache cleanup skipped after {} failed attempts", retries),
            );
        }

        self.destroy_workers(None).await?;
        self.release_ports().await?;
        self.destroy_master().await?;
        self.clean_all().await?;

        info!(runtime = %self.info, "Runtime shut down");
        self.emit(EventType::Normal, event_reasons::RUNTIME_DELETED, "Runtime torn down");
        Ok(())
    }

    /// Return the ports recorded in the values object to the allocator.
    ///
    /// The ports are cleared from the values object before they are handed
    /// back, so a teardown repeated after a later step failed finds nothing
    /// left to release.
    async fn release_ports(&self) -> Result<()> {
        let configmaps = &self.ctx.client.configmaps;
        let info = &self.info;

        let ports = retry_on(&self.ctx.config.backoff, EngineError::is_conflict, move || async move {
            let mut configmap = match configmaps
                .get(info.namespace(), &info.values_configmap_name())
                .await
            {
                Ok(configmap) => configmap,
                Err(e) if e.is_not_found() => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            };
            let mut values = RuntimeValues::from_configmap(&configmap)?;
            let ports = values.reserved_ports();
            if ports.is_empty() {
                return Ok(ports);
            }
            values.ports.clear();
            configmap
                .data
                .insert(VALUES_DATA_KEY.to_string(), values.render()?);
            configmaps.update(configmap).await?;
            Ok::<Vec<u16>, EngineError>(ports)
        })
        .await?;

        if ports.is_empty() {
            debug!(runtime = %self.info, "No ports left to release");
        } else {
            self.ctx.ports.release_reserved_ports(&ports);
            info!(runtime = %self.info, ports = ?ports, "Released ports");
        }
        Ok(())
    }

    async fn destroy_master(&self) -> Result<()> {
        let releases = &self.ctx.releases;
        let (name, namespace) = (self.info.release_name(), self.info.namespace());
        if releases.check_release(name, namespace).await? {
            ignore_not_found(releases.delete_release(name, namespace).await)?;
            info!(runtime = %self.info, "Release deleted");
        }
        Ok(())
    }

    /// Delete leftover fuse pods and this runtime's config objects
    async fn clean_all(&self) -> Result<()> {
        let client = &self.ctx.client;
        let namespace = self.info.namespace();

        let fuses = client
            .pods
            .list(Some(namespace), &self.info.pod_labels(Tier::Fuse))
            .await?;
        for pod in fuses {
            ignore_not_found(client.pods.delete(namespace, &pod.metadata.name).await)?;
        }
        for configmap in [
            self.info.values_configmap_name(),
            self.info.endpoints_configmap_name(),
        ] {
            ignore_not_found(client.configmaps.delete(namespace, &configmap).await)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::info::Tier;
    use crate::testing::{Fixture, ALLUXIO_SUMMARY};
    use cachefleet_types::{RuntimeType, LABEL_TRUE};

    #[tokio::test]
    async fn test_shutdown_releases_everything() {
        let fixture = Fixture::new();
        fixture.add_nodes(2).await;
        let runtime = fixture.add_runtime(RuntimeType::JuiceFs, 2).await;
        let engine = fixture.engine(&runtime);
        engine.setup_master().await.unwrap();
        let ports = fixture.values(engine.info()).await.reserved_ports();
        let common = engine.info().labels().common();
        fixture.label_node("node-0", &common).await;
        fixture.label_node("node-1", &common).await;
        fixture.add_pod(engine.info(), Tier::Fuse, 0, "node-0", true).await;
        engine.sync_worker_endpoints().await.unwrap();

        engine.shutdown().await.unwrap();

        assert!(ports.iter().all(|p| !fixture.ports.is_reserved(*p)));
        assert!(fixture.releases.release("hbase", "default").is_none());
        assert!(fixture
            .nodes()
            .await
            .iter()
            .all(|n| n.label(&common) != Some(LABEL_TRUE)));
        assert!(fixture.cluster.configmaps.is_empty());
        assert!(fixture.cluster.pods.is_empty());

        // Everything is gone already; repeating must still succeed
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_retried_shutdown_does_not_release_ports_twice() {
        let fixture = Fixture::new();
        let runtime = fixture.add_runtime(RuntimeType::JuiceFs, 1).await;
        let engine = fixture.engine(&runtime);
        engine.setup_master().await.unwrap();
        let mine = fixture.values(engine.info()).await.reserved_ports();
        fixture.releases.fail_deletes(1);

        assert!(engine.shutdown().await.is_err());
        assert!(mine.iter().all(|p| !fixture.ports.is_reserved(*p)));
        assert!(fixture.values(engine.info()).await.ports.is_empty());

        // Another runtime picks up the freed ports before the retry
        let other = fixture.ports.get_available_ports(mine.len()).unwrap();
        engine.shutdown().await.unwrap();

        assert!(fixture.releases.release("hbase", "default").is_none());
        assert!(other.iter().all(|p| fixture.ports.is_reserved(*p)));
    }

    #[tokio::test]
    async fn test_teardown_is_forced_after_limit() {
        let fixture = Fixture::new();
        let runtime = fixture.add_runtime(RuntimeType::Alluxio, 1).await;
        let engine = fixture.engine(&runtime);
        engine.setup_master().await.unwrap();
        fixture.add_pod(engine.info(), Tier::Master, 0, "node-0", true).await;
        fixture.executor.respond("report summary", ALLUXIO_SUMMARY);

        let limit = fixture.ctx.config.graceful_shutdown_limit;
        for _ in 0..limit {
            assert!(engine.shutdown().await.is_err());
            assert!(fixture.releases.release("hbase", "default").is_some());
        }

        engine.shutdown().await.unwrap();
        assert!(fixture.releases.release("hbase", "default").is_none());
        assert_eq!(fixture.executor.calls_matching("fs free"), limit as usize);
    }
}
