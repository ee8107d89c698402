//! Shared handler state

use crate::controller::Controller;
use cachefleet_store::ClusterClient;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub client: ClusterClient,
    pub controller: Arc<Controller>,
    pub version: &'static str,
    started_at: Instant,
}

impl AppState {
    pub fn new(client: ClusterClient, controller: Arc<Controller>) -> Self {
        Self {
            client,
            controller,
            version: env!("CARGO_PKG_VERSION"),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
