//! CacheFleet daemon library
//!
//! This module provides the components of the `cachefleetd` binary:
//! - The runtime controller and its work queue
//! - The read-only REST status API
//! - An in-process simulated cluster backend
//! - Server lifecycle management

pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod server;
pub mod simulation;

pub use config::DaemonConfig;
pub use controller::{Controller, Outcome, ReconcileRecord, FINALIZER};
pub use error::{ApiError, DaemonError, DaemonResult};
pub use server::Server;
pub use simulation::Simulation;
