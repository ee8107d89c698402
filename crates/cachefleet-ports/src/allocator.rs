//! Process-wide port allocator shared by every runtime
//!
//! Runtimes that run with host networking need ports unique across the
//! cluster. One allocator is built at startup and handed to every engine;
//! all access goes through its internal lock since reconciles of different
//! runtimes race on it.

use crate::error::{PortAllocatorError, Result};
use crate::pool::{AllocationPolicy, PortPool};
use crate::range::PortRange;
use parking_lot::Mutex;
use std::fmt::Display;
use std::future::Future;
use tracing::{debug, info, warn};

pub struct RuntimePortAllocator {
    range: PortRange,
    policy: AllocationPolicy,
    pool: Mutex<PortPool>,
}

impl RuntimePortAllocator {
    /// Create an allocator with no reservations
    pub fn new(range: PortRange, policy: AllocationPolicy) -> Self {
        Self {
            range,
            policy,
            pool: Mutex::new(PortPool::new(range)),
        }
    }

    /// Create an allocator, marking `reserved` as already in use.
    ///
    /// Ports outside the range are ignored.
    pub fn with_reserved(
        range: PortRange,
        policy: AllocationPolicy,
        reserved: impl IntoIterator<Item = u16>,
    ) -> Self {
        let allocator = Self::new(range, policy);
        {
            let mut pool = allocator.pool.lock();
            for port in reserved {
                if !range.contains(port) {
                    warn!(port, range = %range, "Reserved port outside allocator range, ignoring");
                    continue;
                }
                pool.reserve(port);
            }
        }
        allocator
    }

    /// Build the allocator from the ports recorded by runtimes that already
    /// exist, so a restart does not reissue ports that are in use.
    pub async fn build<F, Fut, E>(
        range: PortRange,
        policy: AllocationPolicy,
        reserved_ports: F,
    ) -> Result<Self>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Vec<u16>, E>>,
        E: Display,
    {
        let reserved = reserved_ports()
            .await
            .map_err(|e| PortAllocatorError::Reconstruction(e.to_string()))?;
        let count = reserved.len();
        let allocator = Self::with_reserved(range, policy, reserved);
        info!(
            range = %range,
            policy = ?policy,
            reconstructed = count,
            available = allocator.available(),
            "Port allocator initialized"
        );
        Ok(allocator)
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    pub fn policy(&self) -> AllocationPolicy {
        self.policy
    }

    /// Atomically reserve `n` distinct free ports.
    ///
    /// Fails with `Exhausted` and reserves nothing if fewer than `n` remain.
    pub fn get_available_ports(&self, n: usize) -> Result<Vec<u16>> {
        let ports = self.pool.lock().allocate(n, self.policy)?;
        debug!(?ports, "Reserved ports");
        Ok(ports)
    }

    /// Atomically free `ports`. Ports already free or outside the range are
    /// skipped.
    pub fn release_reserved_ports(&self, ports: &[u16]) {
        let mut pool = self.pool.lock();
        let released = ports.iter().filter(|&&p| pool.release(p)).count();
        debug!(?ports, released, "Released ports");
    }

    pub fn available(&self) -> usize {
        self.pool.lock().available()
    }

    pub fn is_reserved(&self, port: u16) -> bool {
        self.pool.lock().is_reserved(port)
    }
}
