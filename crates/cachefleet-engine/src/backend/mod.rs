//! Backend variants
//!
//! Every runtime type is served by the same engine; what differs per backend
//! is the chart, the ports it needs, container names, and how cache facts
//! are queried and evicted. The closed set of variants is selected once from
//! the runtime-type tag.

pub mod alluxio;
pub mod juicefs;

use crate::info::Tier;
use cachefleet_types::{bytes_size, from_human_size, CacheStateList, CacheStateName, RuntimeType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Alluxio,
    JuiceFs,
}

/// Where cache facts are queried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSource {
    /// One query against the master
    Master,
    /// One query per running worker, summed
    Workers,
}

impl Backend {
    pub fn for_runtime_type(runtime_type: RuntimeType) -> Self {
        match runtime_type {
            RuntimeType::Alluxio => Self::Alluxio,
            RuntimeType::JuiceFs => Self::JuiceFs,
        }
    }

    pub fn runtime_type(&self) -> RuntimeType {
        match self {
            Self::Alluxio => RuntimeType::Alluxio,
            Self::JuiceFs => RuntimeType::JuiceFs,
        }
    }

    pub fn chart(&self) -> &'static str {
        match self {
            Self::Alluxio => "charts/alluxio",
            Self::JuiceFs => "charts/juicefs",
        }
    }

    /// Named host ports reserved at master setup
    pub fn port_names(&self) -> &'static [&'static str] {
        match self {
            Self::Alluxio => alluxio::PORT_NAMES,
            Self::JuiceFs => juicefs::PORT_NAMES,
        }
    }

    /// Port published in the worker endpoints object
    pub fn worker_endpoint_port(&self) -> &'static str {
        match self {
            Self::Alluxio => "worker-rpc",
            Self::JuiceFs => "worker-metrics",
        }
    }

    pub fn container(&self, tier: Tier) -> String {
        format!("{}-{}", self.runtime_type(), tier)
    }

    pub fn report_source(&self) -> ReportSource {
        match self {
            Self::Alluxio => ReportSource::Master,
            Self::JuiceFs => ReportSource::Workers,
        }
    }
}

/// Cache facts reported by a backend
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheReport {
    /// Total cache capacity in bytes, if the backend reports it
    pub capacity: Option<u64>,
    /// Cached bytes
    pub cached: u64,
    /// Fraction of reads served from cache
    pub hit_ratio: Option<f64>,
    /// Fraction of read throughput served from cache
    pub throughput_ratio: Option<f64>,
}

impl CacheReport {
    /// Render into the status cache-state map. `ufs_total` is the size of
    /// the underlying storage when known.
    pub fn to_cache_states(&self, ufs_total: Option<&str>) -> CacheStateList {
        let mut states = CacheStateList::new();
        if let Some(capacity) = self.capacity {
            states.insert(CacheStateName::CacheCapacity, bytes_size(capacity));
        }
        states.insert(CacheStateName::Cached, bytes_size(self.cached));

        if let Some(total) = ufs_total.and_then(|t| from_human_size(t).ok()) {
            if total > 0 {
                states.insert(
                    CacheStateName::CachedPercentage,
                    percentage(ratio(self.cached, total)),
                );
            }
        }
        if let Some(hit) = self.hit_ratio {
            states.insert(CacheStateName::CacheHitRatio, percentage(hit));
        }
        if let Some(throughput) = self.throughput_ratio {
            states.insert(CacheStateName::CacheThroughputRatio, percentage(throughput));
        }
        states
    }
}

/// `part / total`, zero when `total` is zero
pub(crate) fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

fn percentage(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_states_rendering() {
        let report = CacheReport {
            capacity: Some(4 << 30),
            cached: 1 << 30,
            hit_ratio: Some(0.5),
            throughput_ratio: None,
        };
        let states = report.to_cache_states(Some("4GiB"));
        assert_eq!(states[&CacheStateName::CacheCapacity], "4GiB");
        assert_eq!(states[&CacheStateName::Cached], "1GiB");
        assert_eq!(states[&CacheStateName::CachedPercentage], "25.0%");
        assert_eq!(states[&CacheStateName::CacheHitRatio], "50.0%");
        assert!(!states.contains_key(&CacheStateName::CacheThroughputRatio));
    }

    #[test]
    fn test_unknown_ufs_total_omits_percentage() {
        let states = CacheReport::default().to_cache_states(None);
        assert!(!states.contains_key(&CacheStateName::CachedPercentage));
        assert_eq!(states[&CacheStateName::Cached], "0B");
    }

    #[test]
    fn test_backend_selection() {
        let backend = Backend::for_runtime_type(RuntimeType::JuiceFs);
        assert_eq!(backend.report_source(), ReportSource::Workers);
        assert_eq!(backend.container(Tier::Worker), "juicefs-worker");
        assert_eq!(Backend::Alluxio.port_names().len(), 6);
    }
}
