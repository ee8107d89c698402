//! Configuration for cachefleet-daemon

use cachefleet_engine::EngineConfig;
use cachefleet_ports::{AllocationPolicy, PortRange};
use cachefleet_store::Backoff;
use cachefleet_types::RuntimeType;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Status API server
    #[serde(default)]
    pub server: ServerConfig,

    /// Work queue and requeue policy
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Knobs handed to every engine
    #[serde(default)]
    pub engine: EngineSettings,

    /// Cluster-wide port pool
    #[serde(default)]
    pub ports: PortsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// In-process cluster simulation
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_cors: true,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Every runtime is enqueued at this interval, in seconds
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,

    /// Maximum concurrent reconciliations across runtimes
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_reconciles: usize,

    /// Delay before the first retry of a failed reconcile, in milliseconds
    #[serde(default = "default_requeue_base")]
    pub requeue_base_ms: u64,

    /// Cap on the retry delay, in seconds
    #[serde(default = "default_requeue_max")]
    pub requeue_max_secs: u64,

    /// Requeue delay for runtimes that are not ready yet, in seconds
    #[serde(default = "default_not_ready_requeue")]
    pub not_ready_requeue_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            resync_interval_secs: default_resync_interval(),
            max_concurrent_reconciles: default_max_concurrent(),
            requeue_base_ms: default_requeue_base(),
            requeue_max_secs: default_requeue_max(),
            not_ready_requeue_secs: default_not_ready_requeue(),
        }
    }
}

impl SchedulerConfig {
    /// Capped exponential delay after `failures` consecutive failures
    pub fn requeue_delay(&self, failures: u32) -> Duration {
        let max = Duration::from_secs(self.requeue_max_secs);
        let exponent = failures.saturating_sub(1).min(31);
        Duration::from_millis(self.requeue_base_ms)
            .checked_mul(1u32 << exponent)
            .map_or(max, |delay| delay.min(max))
    }
}

/// Engine settings, in seconds where they are durations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Failed cache cleanups tolerated before teardown is forced
    #[serde(default = "default_graceful_shutdown_limit")]
    pub graceful_shutdown_limit: u32,

    /// Upper bound on a single remote command
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_secs: u64,

    /// Wait between cache eviction and verification
    #[serde(default = "default_cleanup_settle")]
    pub cache_cleanup_settle_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            graceful_shutdown_limit: default_graceful_shutdown_limit(),
            exec_timeout_secs: default_exec_timeout(),
            cache_cleanup_settle_secs: default_cleanup_settle(),
        }
    }
}

impl EngineSettings {
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            graceful_shutdown_limit: self.graceful_shutdown_limit,
            exec_timeout: Duration::from_secs(self.exec_timeout_secs),
            cache_cleanup_settle: Duration::from_secs(self.cache_cleanup_settle_secs),
            backoff: Backoff::default(),
        }
    }
}

/// Port pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortsConfig {
    /// Inclusive range, e.g. `20000-26000`
    #[serde(default = "default_port_range")]
    pub range: String,

    /// `bitmap` or `random`
    #[serde(default)]
    pub policy: AllocationPolicy,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            range: default_port_range(),
            policy: AllocationPolicy::default(),
        }
    }
}

impl PortsConfig {
    pub fn parse_range(&self) -> Result<PortRange, cachefleet_ports::PortAllocatorError> {
        self.range.parse()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of simulated nodes
    #[serde(default = "default_node_count")]
    pub node_count: usize,

    /// Allocatable memory per node, in GiB
    #[serde(default = "default_node_memory")]
    pub node_memory_gib: u64,

    /// How often simulated workloads converge, in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Runtime created at startup
    #[serde(default)]
    pub demo_runtime: Option<DemoRuntime>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            node_count: default_node_count(),
            node_memory_gib: default_node_memory(),
            tick_interval_ms: default_tick_interval(),
            demo_runtime: Some(DemoRuntime::default()),
        }
    }
}

/// A runtime seeded into the simulated cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoRuntime {
    pub namespace: String,
    pub name: String,
    pub runtime_type: RuntimeType,
    pub replicas: u32,
    /// Memory tier quota per worker, in MiB
    pub memory_quota_mib: u64,
}

impl Default for DemoRuntime {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            name: "demo".to_string(),
            runtime_type: RuntimeType::Alluxio,
            replicas: 2,
            memory_quota_mib: 1024,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

fn default_resync_interval() -> u64 {
    10
}

fn default_max_concurrent() -> usize {
    10
}

fn default_requeue_base() -> u64 {
    500
}

fn default_requeue_max() -> u64 {
    300
}

fn default_not_ready_requeue() -> u64 {
    5
}

fn default_graceful_shutdown_limit() -> u32 {
    5
}

fn default_exec_timeout() -> u64 {
    1500
}

fn default_cleanup_settle() -> u64 {
    10
}

fn default_port_range() -> String {
    "20000-26000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_node_count() -> usize {
    3
}

fn default_node_memory() -> u64 {
    16
}

fn default_tick_interval() -> u64 {
    1000
}

impl DaemonConfig {
    /// Load configuration from defaults, an optional file and
    /// `CACHEFLEET_`-prefixed environment variables, e.g.
    /// `CACHEFLEET_SCHEDULER__RESYNC_INTERVAL_SECS=30`
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CACHEFLEET")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.server.listen_addr.port(), 8080);
        assert_eq!(config.ports.policy, AllocationPolicy::BitMap);
        assert_eq!(config.ports.parse_range().unwrap().size(), 6001);
        assert!(config.simulation.demo_runtime.is_some());
    }

    #[test]
    fn test_engine_settings_convert_to_durations() {
        let engine = EngineSettings::default().to_engine_config();
        assert_eq!(engine.graceful_shutdown_limit, 5);
        assert_eq!(engine.exec_timeout, Duration::from_secs(1500));
        assert_eq!(engine.cache_cleanup_settle, Duration::from_secs(10));
    }

    #[test]
    fn test_requeue_delay_is_capped_exponential() {
        let config = SchedulerConfig {
            requeue_base_ms: 100,
            requeue_max_secs: 1,
            ..Default::default()
        };
        assert_eq!(config.requeue_delay(1), Duration::from_millis(100));
        assert_eq!(config.requeue_delay(2), Duration::from_millis(200));
        assert_eq!(config.requeue_delay(4), Duration::from_millis(800));
        assert_eq!(config.requeue_delay(5), Duration::from_secs(1));
        assert_eq!(config.requeue_delay(64), Duration::from_secs(1));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.scheduler.max_concurrent_reconciles, 10);
        assert_eq!(config.engine.graceful_shutdown_limit, 5);
    }
}
