//! Engine Context - Shared collaborators injected into every engine
//!
//! Built once by the driver and cloned into each engine instance. The port
//! allocator and the scheduling lock are the process-wide shared state;
//! tests build an isolated context per case.

use crate::config::EngineConfig;
use cachefleet_ports::RuntimePortAllocator;
use cachefleet_store::{ClusterClient, CommandExecutor, ReleaseManager};
use cachefleet_types::RuntimeEvent;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Capacity of the runtime event channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct EngineContext {
    /// Resource store
    pub client: ClusterClient,
    /// Deploy collaborator
    pub releases: Arc<dyn ReleaseManager>,
    /// Remote-command collaborator
    pub executor: Arc<dyn CommandExecutor>,
    /// Cluster-wide port allocator
    pub ports: Arc<RuntimePortAllocator>,
    /// Serializes label mutations of worker teardown across runtimes
    pub schedule_lock: Arc<Mutex<()>>,
    /// Runtime events
    pub events: broadcast::Sender<RuntimeEvent>,
    pub config: EngineConfig,
}

impl EngineContext {
    pub fn new(
        client: ClusterClient,
        releases: Arc<dyn ReleaseManager>,
        executor: Arc<dyn CommandExecutor>,
        ports: Arc<RuntimePortAllocator>,
        config: EngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            client,
            releases,
            executor,
            ports,
            schedule_lock: Arc::new(Mutex::new(())),
            events,
            config,
        }
    }

    /// Subscribe to runtime events
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.events.subscribe()
    }
}
