//! Engine error types

use cachefleet_ports::PortAllocatorError;
use cachefleet_store::{ExecError, StoreError};
use thiserror::Error;

/// Engine errors
///
/// Not-ready is never an error: readiness checks return `Ok(false)`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Port allocation failed: {0}")]
    Ports(#[from] PortAllocatorError),

    #[error("Remote command failed: {0}")]
    Exec(#[from] ExecError),

    #[error("Timeout after {seconds}s waiting for {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("Cache of {runtime} not cleaned up: {remaining} still cached")]
    CacheNotCleaned { runtime: String, remaining: String },

    #[error("No schedulable nodes for {runtime}")]
    NoSchedulableNodes { runtime: String },

    #[error("Scale-in of {runtime} incomplete: {remaining} cache nodes left, wanted {desired}")]
    ScaleInIncomplete {
        runtime: String,
        remaining: u32,
        desired: u32,
    },

    #[error("Invalid values in {configmap}: {reason}")]
    InvalidValues { configmap: String, reason: String },

    #[error("Failed to parse backend report: {0}")]
    Report(String),

    #[error("{tier} of {runtime} is unhealthy: {reason}")]
    Unhealthy {
        runtime: String,
        tier: &'static str,
        reason: String,
    },
}

impl EngineError {
    /// Stale resource version on a write
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_conflict())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
