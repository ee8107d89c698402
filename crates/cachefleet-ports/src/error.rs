//! Port allocator errors

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortAllocatorError {
    #[error("Invalid port range {0:?}")]
    InvalidRange(String),

    #[error("Unknown allocation policy {0:?}")]
    UnknownPolicy(String),

    #[error("Port range exhausted: requested {requested}, {available} available")]
    Exhausted { requested: usize, available: usize },

    #[error("Failed to reconstruct reserved ports: {0}")]
    Reconstruction(String),
}

/// Result type for port allocation
pub type Result<T> = std::result::Result<T, PortAllocatorError>;
