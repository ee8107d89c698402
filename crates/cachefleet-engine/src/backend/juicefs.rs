//! JuiceFS commands and metrics parsing
//!
//! JuiceFS has no master to ask; every worker exposes its block cache
//! counters through the `.stats` file of its mount point, and cache eviction
//! removes the chunk directories on each worker.

use super::{ratio, CacheReport};
use crate::info::RuntimeInfo;

const BLOCKCACHE_BYTES: &str = "juicefs_blockcache_bytes";
const BLOCKCACHE_HITS: &str = "juicefs_blockcache_hits";
const BLOCKCACHE_MISS: &str = "juicefs_blockcache_miss";
const BLOCKCACHE_HIT_BYTES: &str = "juicefs_blockcache_hit_bytes";
const BLOCKCACHE_MISS_BYTES: &str = "juicefs_blockcache_miss_bytes";

/// Suffix every evictable cache directory must carry
const CHUNKS_SUFFIX: &str = "raw/chunks";

pub const PORT_NAMES: &[&str] = &["worker-metrics", "fuse-metrics"];

pub fn mount_path(info: &RuntimeInfo) -> String {
    format!(
        "/runtime-mnt/juicefs/{}/{}/juicefs-fuse",
        info.namespace(),
        info.name()
    )
}

pub fn stats_command(info: &RuntimeInfo) -> Vec<String> {
    vec!["cat".to_string(), format!("{}/.stats", mount_path(info))]
}

/// `rm -rf` over the chunk directories under each cache path
pub fn clean_cache_command(cache_paths: &[String]) -> Option<Vec<String>> {
    let dirs: Vec<String> = cache_paths
        .iter()
        .map(|p| format!("{}/{}", p.trim_end_matches('/'), CHUNKS_SUFFIX))
        .filter(|d| valid_cache_dir(d))
        .collect();
    if dirs.is_empty() {
        return None;
    }
    let mut command = vec!["rm".to_string(), "-rf".to_string()];
    command.extend(dirs);
    Some(command)
}

fn valid_cache_dir(dir: &str) -> bool {
    dir.ends_with(CHUNKS_SUFFIX) && dir.len() > CHUNKS_SUFFIX.len() + 1
}

/// Block cache counters of one worker
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WorkerStats {
    pub cached_bytes: f64,
    pub hits: f64,
    pub misses: f64,
    pub hit_bytes: f64,
    pub miss_bytes: f64,
}

impl WorkerStats {
    pub fn merge(&mut self, other: &WorkerStats) {
        self.cached_bytes += other.cached_bytes;
        self.hits += other.hits;
        self.misses += other.misses;
        self.hit_bytes += other.hit_bytes;
        self.miss_bytes += other.miss_bytes;
    }

    pub fn into_report(self, capacity: Option<u64>) -> CacheReport {
        CacheReport {
            capacity,
            cached: self.cached_bytes as u64,
            hit_ratio: Some(ratio(self.hits as u64, (self.hits + self.misses) as u64)),
            throughput_ratio: Some(ratio(
                self.hit_bytes as u64,
                (self.hit_bytes + self.miss_bytes) as u64,
            )),
        }
    }
}

/// Parse prometheus text exposition from `.stats`
pub fn parse_stats(stats: &str) -> WorkerStats {
    let mut parsed = WorkerStats::default();
    for line in stats.lines().map(str::trim) {
        if line.starts_with('#') {
            continue;
        }
        let Some((name, value)) = split_sample(line) else {
            continue;
        };
        let slot = match name {
            BLOCKCACHE_BYTES => &mut parsed.cached_bytes,
            BLOCKCACHE_HITS => &mut parsed.hits,
            BLOCKCACHE_MISS => &mut parsed.misses,
            BLOCKCACHE_HIT_BYTES => &mut parsed.hit_bytes,
            BLOCKCACHE_MISS_BYTES => &mut parsed.miss_bytes,
            _ => continue,
        };
        *slot = value;
    }
    parsed
}

/// Split `name{labels} value` into the metric name and value
fn split_sample(line: &str) -> Option<(&str, f64)> {
    let (series, value) = line.rsplit_once(' ')?;
    let name = series.split('{').next()?.trim();
    let value = value.trim().parse().ok()?;
    Some((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachefleet_types::{NamespacedName, RuntimeType};

    const STATS: &str = r#"# HELP juicefs_blockcache_blocks number of cached blocks
# TYPE juicefs_blockcache_blocks gauge
juicefs_blockcache_blocks{mp="/jfs/pvc-60cd",vol_name="minio"} 51
juicefs_blockcache_bytes{mp="/jfs/pvc-60cd",vol_name="minio"} 396462
juicefs_blockcache_hit_bytes{mp="/jfs/pvc-60cd",vol_name="minio"} 3e+06
juicefs_blockcache_hits{mp="/jfs/pvc-60cd",vol_name="minio"} 300
juicefs_blockcache_miss{mp="/jfs/pvc-60cd",vol_name="minio"} 100
juicefs_blockcache_miss_bytes{mp="/jfs/pvc-60cd",vol_name="minio"} 1e+06
"#;

    #[test]
    fn test_parse_stats() {
        let stats = parse_stats(STATS);
        assert_eq!(stats.cached_bytes, 396462.0);
        assert_eq!(stats.hits, 300.0);
        assert_eq!(stats.hit_bytes, 3_000_000.0);

        let report = stats.into_report(None);
        assert_eq!(report.cached, 396462);
        assert_eq!(report.hit_ratio, Some(0.75));
        assert_eq!(report.throughput_ratio, Some(0.75));
    }

    #[test]
    fn test_clean_cache_command_only_targets_chunk_dirs() {
        let command =
            clean_cache_command(&["/var/jfsCache/".to_string(), "/mnt/ssd".to_string()]).unwrap();
        assert_eq!(
            command,
            vec!["rm", "-rf", "/var/jfsCache/raw/chunks", "/mnt/ssd/raw/chunks"]
        );
        assert!(clean_cache_command(&["/".to_string()]).is_none());
        assert!(clean_cache_command(&[]).is_none());
    }

    #[test]
    fn test_stats_command_targets_mount_point() {
        let info = RuntimeInfo::new(NamespacedName::new("default", "minio"), RuntimeType::JuiceFs);
        assert_eq!(
            stats_command(&info),
            vec!["cat", "/runtime-mnt/juicefs/default/minio/juicefs-fuse/.stats"]
        );
    }
}
