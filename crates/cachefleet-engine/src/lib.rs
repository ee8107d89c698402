//! CacheFleet Engine - Reconciliation of distributed cache runtimes
//!
//! One [`CacheEngine`] drives one runtime through its lifecycle:
//!
//! - **Components**: setup and readiness of the master, worker and fuse tiers
//! - **Scheduling**: choosing cache nodes and keeping their labels in sync
//!   with the workers actually serving
//! - **Status**: folding workload state and cache reports into the runtime
//!   and dataset status
//! - **Scaling**: moving the worker tier to the desired replica count
//! - **Shutdown**: evicting cached data and tearing every trace down
//!
//! ## Architectural Boundaries
//!
//! - `cachefleet-store` owns: resource storage, releases, pod exec
//! - `cachefleet-ports` owns: the cluster-wide port pool
//! - `cachefleet-engine` owns: everything a single runtime needs to converge
//!
//! Backend differences (Alluxio, JuiceFS) live in [`backend`] as a closed
//! set of variants; the engine itself is backend agnostic.
//!
//! ## Usage
//!
//! ```no_run
//! use cachefleet_engine::{create_engine, EngineConfig, EngineContext};
//! use cachefleet_ports::{AllocationPolicy, PortRange, RuntimePortAllocator};
//! use cachefleet_store::{InMemoryCluster, InMemoryReleaseManager, ResourceApi, ScriptedExecutor};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cluster = InMemoryCluster::new();
//! let ports = RuntimePortAllocator::new(PortRange::new(20000, 1000)?, AllocationPolicy::Random);
//! let ctx = EngineContext::new(
//!     cluster.client(),
//!     Arc::new(InMemoryReleaseManager::new()),
//!     Arc::new(ScriptedExecutor::new()),
//!     Arc::new(ports),
//!     EngineConfig::default(),
//! );
//!
//! let runtime = cluster.runtimes.get("default", "hbase").await?;
//! let engine = create_engine(&runtime, ctx);
//! if engine.should_setup_master().await? {
//!     engine.setup_master().await?;
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod backend;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod info;
pub mod operations;
pub mod reconciler;
pub mod scheduler;
pub mod values;

mod cache;
mod fuse;
mod health;
mod master;
mod placement;
mod replicas;
mod shutdown;
mod worker;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-exports
pub use backend::{Backend, CacheReport};
pub use config::EngineConfig;
pub use context::EngineContext;
pub use engine::{create_engine, CacheEngine, Engine};
pub use error::{EngineError, Result};
pub use info::{RuntimeInfo, Tier};
pub use reconciler::WorkerEndpoints;
pub use scheduler::{LabelSync, NodeScheduler};
pub use values::{collect_reserved_ports, load_values, RuntimeValues};
