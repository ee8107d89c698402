//! Engine configuration

use cachefleet_store::Backoff;
use std::time::Duration;

/// Knobs shared by every engine instance
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Failed cache cleanups tolerated before teardown is forced
    pub graceful_shutdown_limit: u32,
    /// Upper bound on a single remote command
    pub exec_timeout: Duration,
    /// Wait between cache eviction and verifying the cache is empty
    pub cache_cleanup_settle: Duration,
    /// Retry policy for conflicting writes
    pub backoff: Backoff,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            graceful_shutdown_limit: 5,
            exec_timeout: Duration::from_secs(1500),
            cache_cleanup_settle: Duration::from_secs(10),
            backoff: Backoff::default(),
        }
    }
}
