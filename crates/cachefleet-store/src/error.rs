//! Store error types

use thiserror::Error;

/// Errors returned by the resource store and the deploy collaborator
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: String },

    #[error("Conflict on {kind} {key}: current version {current}, got {expected}")]
    Conflict {
        kind: &'static str,
        key: String,
        current: u64,
        expected: u64,
    },

    #[error("Invalid {kind}: {message}")]
    Invalid { kind: &'static str, message: String },

    #[error("Release {release} failed: {message}")]
    Release { release: String, message: String },

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Treat a not-found outcome as success
pub fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
