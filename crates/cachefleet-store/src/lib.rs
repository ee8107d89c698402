//! CacheFleet Store - External interfaces consumed by the engine
//!
//! This crate provides the engine's view of the outside world:
//!
//! - **ResourceApi**: Typed custom-resource store with optimistic concurrency
//! - **ReleaseManager**: Deploy collaborator (check / install / delete release)
//! - **CommandExecutor**: Remote command execution inside pods
//! - **retry_on**: Bounded retry combinator for conflicting writes
//!
//! ## In-Memory vs Cluster Backends
//!
//! The crate provides in-memory implementations suitable for development,
//! simulation and testing. A cluster deployment plugs API-server backed
//! implementations into the same traits.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod api;
pub mod cluster;
pub mod error;
pub mod exec;
pub mod memory;
pub mod release;
pub mod resource;
pub mod retry;

// Re-exports
pub use api::ResourceApi;
pub use cluster::{ClusterClient, InMemoryCluster};
pub use error::{ignore_not_found, Result, StoreError};
pub use exec::{CommandExecutor, ExecCall, ExecError, ExecOutput, ScriptedExecutor};
pub use memory::InMemoryResourceApi;
pub use release::{InMemoryReleaseManager, ReleaseManager, ReleaseRecord};
pub use resource::Resource;
pub use retry::{retry_on, Backoff};
