//! Alluxio commands and report parsing
//!
//! Cache facts come from the master: `fsadmin report summary` for capacity
//! and usage, `fsadmin report metrics` for cluster read counters.

use super::{ratio, CacheReport};
use crate::error::{EngineError, Result};
use cachefleet_types::from_human_size;

const SUMMARY_TOTAL_CAPACITY: &str = "Total Capacity:";
const SUMMARY_USED_CAPACITY: &str = "Used Capacity:";

const BYTES_READ_LOCAL: &str = "Cluster.BytesReadLocal ";
const BYTES_READ_REMOTE: &str = "Cluster.BytesReadRemote ";
const BYTES_READ_UFS_ALL: &str = "Cluster.BytesReadUfsAll ";
const BYTES_READ_LOCAL_THROUGHPUT: &str = "Cluster.BytesReadLocalThroughput ";
const BYTES_READ_REMOTE_THROUGHPUT: &str = "Cluster.BytesReadRemoteThroughput ";
const BYTES_READ_UFS_THROUGHPUT: &str = "Cluster.BytesReadUfsThroughput ";

pub const PORT_NAMES: &[&str] = &[
    "master-rpc",
    "master-web",
    "job-master-rpc",
    "worker-rpc",
    "worker-web",
    "job-worker-rpc",
];

pub fn summary_command() -> Vec<String> {
    to_command(&["alluxio", "fsadmin", "report", "summary"])
}

pub fn metrics_command() -> Vec<String> {
    to_command(&["alluxio", "fsadmin", "report", "metrics"])
}

pub fn free_command() -> Vec<String> {
    to_command(&["alluxio", "fs", "free", "-f", "/"])
}

/// Parse `report summary` output into capacity and used bytes
pub fn parse_summary(summary: &str) -> Result<CacheReport> {
    let mut capacity = None;
    let mut cached = None;
    for line in summary.lines().map(str::trim) {
        if let Some(value) = line.strip_prefix(SUMMARY_TOTAL_CAPACITY) {
            capacity = Some(parse_size(value)?);
        } else if let Some(value) = line.strip_prefix(SUMMARY_USED_CAPACITY) {
            cached = Some(parse_size(value)?);
        }
    }

    let cached = cached.ok_or_else(|| {
        EngineError::Report(format!("{} missing from summary", SUMMARY_USED_CAPACITY))
    })?;
    Ok(CacheReport {
        capacity,
        cached,
        ..Default::default()
    })
}

/// Fill hit and throughput ratios from `report metrics` output
pub fn apply_metrics(report: &mut CacheReport, metrics: &str) {
    let mut local = 0;
    let mut remote = 0;
    let mut ufs = 0;
    let mut local_throughput = 0;
    let mut remote_throughput = 0;
    let mut ufs_throughput = 0;

    for line in metrics.lines().map(str::trim) {
        let slot = if line.starts_with(BYTES_READ_LOCAL) {
            &mut local
        } else if line.starts_with(BYTES_READ_REMOTE) {
            &mut remote
        } else if line.starts_with(BYTES_READ_UFS_ALL) {
            &mut ufs
        } else if line.starts_with(BYTES_READ_LOCAL_THROUGHPUT) {
            &mut local_throughput
        } else if line.starts_with(BYTES_READ_REMOTE_THROUGHPUT) {
            &mut remote_throughput
        } else if line.starts_with(BYTES_READ_UFS_THROUGHPUT) {
            &mut ufs_throughput
        } else {
            continue;
        };
        if let Some(value) = metric_value(line) {
            *slot = value;
        }
    }

    report.hit_ratio = Some(ratio(local + remote, local + remote + ufs));
    report.throughput_ratio = Some(ratio(
        local_throughput + remote_throughput,
        local_throughput + remote_throughput + ufs_throughput,
    ));
}

/// Extract the byte value from `Name  (Type: COUNTER, Value: 19.37MB)` or
/// `Name  (Type: GAUGE, Value: 495.97KB/MIN)`
fn metric_value(line: &str) -> Option<u64> {
    let value = line.split("Value:").nth(1)?;
    let value = value.trim().trim_end_matches(')').trim_end_matches("/MIN");
    from_human_size(value).ok()
}

fn parse_size(value: &str) -> Result<u64> {
    from_human_size(value).map_err(|e| EngineError::Report(e.to_string()))
}

fn to_command(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUMMARY: &str = "Alluxio cluster summary:
    Master Address: 192.168.0.193:20009
    Web Port: 20010
    Live Workers: 1
    Lost Workers: 0
    Total Capacity: 19.07MB
        Tier: MEM  Size: 19.07MB
    Used Capacity: 9.54MB
        Tier: MEM  Size: 9.54MB
    Free Capacity: 9.53MB";

    const METRICS: &str = "Cluster.BytesReadAlluxio  (Type: COUNTER, Value: 0B)
    Cluster.BytesReadLocal  (Type: COUNTER, Value: 30MB)
    Cluster.BytesReadLocalThroughput  (Type: GAUGE, Value: 300KB/MIN)
    Cluster.BytesReadRemote  (Type: COUNTER, Value: 10MB)
    Cluster.BytesReadUfsAll  (Type: COUNTER, Value: 60MB)
    Cluster.BytesReadUfsThroughput  (Type: GAUGE, Value: 100KB/MIN)
    Cluster.CapacityTotal  (Type: GAUGE, Value: 20,000,000)";

    #[test]
    fn test_parse_summary() {
        let report = parse_summary(SUMMARY).unwrap();
        assert_eq!(report.capacity, Some(from_human_size("19.07MB").unwrap()));
        assert_eq!(report.cached, from_human_size("9.54MB").unwrap());
    }

    #[test]
    fn test_summary_without_usage_is_an_error() {
        assert!(matches!(
            parse_summary("Total Capacity: 1GB"),
            Err(EngineError::Report(_))
        ));
    }

    #[test]
    fn test_apply_metrics_ratios() {
        let mut report = CacheReport::default();
        apply_metrics(&mut report, METRICS);
        assert_eq!(report.hit_ratio, Some(0.4));
        assert_eq!(report.throughput_ratio, Some(0.75));
    }

    #[test]
    fn test_metrics_without_reads_report_zero() {
        let mut report = CacheReport::default();
        apply_metrics(&mut report, "");
        assert_eq!(report.hit_ratio, Some(0.0));
    }
}
