//! CacheFleet Ports - Cluster-wide port allocation
//!
//! Cache runtimes using host networking reserve ports from one shared range.
//! The [`RuntimePortAllocator`] is constructed once per process, rebuilt from
//! the reservations recorded by existing runtimes, and injected into every
//! engine.
//!
//! Guarantees:
//!
//! - `get_available_ports(n)` reserves exactly `n` distinct ports or nothing
//! - `release_reserved_ports` is idempotent, so retried teardowns are safe
//! - All access is serialized through one internal lock

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod allocator;
pub mod error;
pub mod pool;
pub mod range;

pub use allocator::RuntimePortAllocator;
pub use error::{PortAllocatorError, Result};
pub use pool::AllocationPolicy;
pub use range::PortRange;
