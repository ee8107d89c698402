//! Runtime controller
//!
//! The controller drives every runtime through the engine phases:
//! - A per-key work queue guarantees at most one reconcile per runtime
//! - A semaphore bounds reconciles running across runtimes
//! - Failures are requeued with capped exponential backoff
//! - Deleted runtimes are shut down before their finalizer is removed
//!
//! One engine is cached per runtime so state kept across ticks, such as the
//! shutdown retry counter, survives until the runtime is gone.

mod queue;

pub use queue::WorkQueue;

use crate::config::SchedulerConfig;
use crate::error::DaemonResult;
use cachefleet_engine::{create_engine, Engine, EngineContext};
use cachefleet_store::{retry_on, StoreError};
use cachefleet_types::{EventType, LabelSelector, NamespacedName, Runtime, RuntimeEvent};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch, Semaphore};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Finalizer holding a runtime until its teardown has finished
pub const FINALIZER: &str = "cachefleet.io/runtime-controller";

/// What a reconcile asks of the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Converged; the next resync picks it up again
    Done,
    /// Not ready yet, look again after the delay
    Requeue(Duration),
}

/// Last reconcile result of a runtime, served by the status API
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileRecord {
    pub last_reconcile: DateTime<Utc>,
    pub duration_ms: u64,
    pub ready: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

pub struct Controller {
    ctx: EngineContext,
    config: SchedulerConfig,
    queue: Arc<WorkQueue>,
    engines: DashMap<NamespacedName, Arc<dyn Engine>>,
    failures: DashMap<NamespacedName, u32>,
    records: DashMap<NamespacedName, ReconcileRecord>,
    semaphore: Arc<Semaphore>,
}

impl Controller {
    pub fn new(ctx: EngineContext, config: SchedulerConfig) -> Self {
        let permits = config.max_concurrent_reconciles.max(1);
        Self {
            ctx,
            config,
            queue: Arc::new(WorkQueue::new()),
            engines: DashMap::new(),
            failures: DashMap::new(),
            records: DashMap::new(),
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn enqueue(&self, key: NamespacedName) {
        self.queue.add(key);
    }

    pub fn enqueue_after(&self, key: NamespacedName, delay: Duration) {
        self.queue.add_after(key, delay);
    }

    /// Runtimes waiting for a reconcile
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Runtimes with a cached engine
    pub fn managed(&self) -> usize {
        self.engines.len()
    }

    pub fn record(&self, key: &NamespacedName) -> Option<ReconcileRecord> {
        self.records.get(key).map(|r| r.value().clone())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.ctx.subscribe()
    }

    /// Enqueue every runtime in the cluster
    pub async fn resync(&self) -> DaemonResult<usize> {
        let runtimes = self
            .ctx
            .client
            .runtimes
            .list(None, &LabelSelector::everything())
            .await?;
        let count = runtimes.len();
        for runtime in runtimes {
            self.enqueue(runtime.key());
        }
        debug!(runtimes = count, "Resync enqueued runtimes");
        Ok(count)
    }

    /// Run the work loop until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(self.config.resync_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            resync_secs = self.config.resync_interval_secs,
            max_concurrent = self.config.max_concurrent_reconciles,
            "Controller started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.resync().await {
                        error!(error = %e, "Resync failed");
                    }
                }
                key = self.queue.get() => {
                    let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    let controller = Arc::clone(&self);
                    tokio::spawn(async move {
                        controller.process(key).await;
                        drop(permit);
                    });
                }
            }
        }

        info!("Controller stopped");
    }

    /// Reconcile one key and schedule its next visit
    pub async fn process(&self, key: NamespacedName) {
        let started = Instant::now();
        let result = self.reconcile(&key).await;
        self.queue.done(&key);
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(outcome) => {
                self.failures.remove(&key);
                let ready = outcome == Outcome::Done;
                self.store_record(&key, duration_ms, ready, 0, None);
                if let Outcome::Requeue(delay) = outcome {
                    info!(
                        runtime = %key,
                        delay_ms = delay.as_millis() as u64,
                        "Runtime not ready, requeueing"
                    );
                    self.enqueue_after(key, delay);
                }
            }
            Err(e) => {
                let failures = {
                    let mut count = self.failures.entry(key.clone()).or_insert(0);
                    *count += 1;
                    *count
                };
                let delay = self.config.requeue_delay(failures);
                error!(
                    runtime = %key,
                    error = %e,
                    retry = failures,
                    delay_ms = delay.as_millis() as u64,
                    "Reconcile failed"
                );
                self.store_record(&key, duration_ms, false, failures, Some(e.to_string()));
                self.enqueue_after(key, delay);
            }
        }
    }

    fn store_record(
        &self,
        key: &NamespacedName,
        duration_ms: u64,
        ready: bool,
        consecutive_failures: u32,
        last_error: Option<String>,
    ) {
        if !self.engines.contains_key(key) {
            self.records.remove(key);
            return;
        }
        self.records.insert(
            key.clone(),
            ReconcileRecord {
                last_reconcile: Utc::now(),
                duration_ms,
                ready,
                consecutive_failures,
                last_error,
            },
        );
    }

    /// One reconcile tick for `key`
    pub async fn reconcile(&self, key: &NamespacedName) -> DaemonResult<Outcome> {
        let runtime = match self.ctx.client.runtimes.get(&key.namespace, &key.name).await {
            Ok(runtime) => runtime,
            Err(e) if e.is_not_found() => {
                if self.engines.remove(key).is_some() {
                    info!(runtime = %key, "Runtime gone, dropped engine");
                }
                return Ok(Outcome::Done);
            }
            Err(e) => return Err(e.into()),
        };
        let engine = self.engine_for(&runtime);

        if runtime.metadata.is_being_deleted() {
            if runtime.metadata.has_finalizer(FINALIZER) {
                engine.shutdown().await?;
                self.remove_finalizer(key).await?;
            }
            self.engines.remove(key);
            info!(runtime = %key, "Runtime deleted");
            return Ok(Outcome::Done);
        }

        self.ensure_finalizer(key).await?;

        if self.run_phases(&runtime, engine.as_ref()).await? {
            Ok(Outcome::Done)
        } else {
            Ok(Outcome::Requeue(Duration::from_secs(
                self.config.not_ready_requeue_secs,
            )))
        }
    }

    /// The fixed phase order. Returns whether the runtime is ready.
    async fn run_phases(&self, runtime: &Runtime, engine: &dyn Engine) -> DaemonResult<bool> {
        if engine.should_setup_master().await? {
            engine.setup_master().await?;
        }
        if !engine.check_master_ready().await? {
            info!(runtime = %engine.id(), "Master not ready");
            return Ok(false);
        }

        if engine.should_setup_workers().await? {
            engine.setup_workers().await?;
        }
        if !engine.check_workers_ready().await? {
            info!(runtime = %engine.id(), "Workers not ready");
        }

        if engine.should_setup_fuse().await? {
            engine.setup_fuse().await?;
        }
        if !engine.check_fuse_ready().await? {
            info!(runtime = %engine.id(), "Fuse not ready");
        }

        engine.sync_replicas().await?;
        let ready = engine.check_and_update_runtime_status().await?;
        // A runtime still coming up has no healthy state to regress from
        let healthy = if runtime.status.setup_duration.is_some() {
            engine.check_runtime_healthy().await
        } else {
            Ok(())
        };
        // Labels follow the ready workers even while the runtime is unhealthy
        engine.sync_schedule_info_to_cache_nodes().await?;
        healthy?;
        Ok(ready)
    }

    /// The cached engine for `runtime`, rebuilt if the runtime was recreated
    /// with another backend
    fn engine_for(&self, runtime: &Runtime) -> Arc<dyn Engine> {
        let key = runtime.key();
        if let Some(engine) = self.engines.get(&key) {
            if engine.runtime_type() == runtime.runtime_type {
                return Arc::clone(engine.value());
            }
            warn!(runtime = %key, "Runtime type changed, rebuilding engine");
        }
        let engine = create_engine(runtime, self.ctx.clone());
        self.engines.insert(key, Arc::clone(&engine));
        engine
    }

    async fn ensure_finalizer(&self, key: &NamespacedName) -> DaemonResult<()> {
        let runtimes = &self.ctx.client.runtimes;
        retry_on(&self.ctx.config.backoff, StoreError::is_conflict, || async move {
            let mut runtime = runtimes.get(&key.namespace, &key.name).await?;
            if runtime.metadata.has_finalizer(FINALIZER) {
                return Ok(());
            }
            runtime.metadata.finalizers.push(FINALIZER.to_string());
            runtimes.update(runtime).await?;
            debug!(runtime = %key, "Added finalizer");
            Ok(())
        })
        .await
        .map_err(Into::into)
    }

    async fn remove_finalizer(&self, key: &NamespacedName) -> DaemonResult<()> {
        let runtimes = &self.ctx.client.runtimes;
        let result = retry_on(&self.ctx.config.backoff, StoreError::is_conflict, || async move {
            let mut runtime = runtimes.get(&key.namespace, &key.name).await?;
            runtime.metadata.finalizers.retain(|f| f != FINALIZER);
            runtimes.update(runtime).await?;
            Ok::<_, StoreError>(())
        })
        .await;
        match result {
            Err(e) if e.is_not_found() => Ok(()),
            other => other.map_err(Into::into),
        }
    }
}

/// Log engine events until `shutdown` flips to true
pub async fn log_events(
    mut events: broadcast::Receiver<RuntimeEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(event) => match event.event_type {
                    EventType::Normal => info!(
                        runtime = %event.runtime,
                        reason = %event.reason,
                        "{}",
                        event.message
                    ),
                    EventType::Warning => warn!(
                        runtime = %event.runtime,
                        reason = %event.reason,
                        "{}",
                        event.message
                    ),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}
