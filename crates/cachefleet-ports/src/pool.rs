//! Bitmap of reserved ports within a range

use crate::error::{PortAllocatorError, Result};
use crate::range::PortRange;
use rand::seq::SliceRandom;

const WORD_BITS: usize = 64;

/// How free ports are picked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationPolicy {
    /// Lowest free ports first
    #[default]
    BitMap,
    /// Uniformly random free ports
    Random,
}

impl std::str::FromStr for AllocationPolicy {
    type Err = PortAllocatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bitmap" => Ok(Self::BitMap),
            "random" => Ok(Self::Random),
            other => Err(PortAllocatorError::UnknownPolicy(other.to_string())),
        }
    }
}

/// Reservation state for every port in a range. Not synchronized.
#[derive(Debug, Clone)]
pub(crate) struct PortPool {
    range: PortRange,
    bits: Vec<u64>,
    reserved: usize,
}

impl PortPool {
    pub(crate) fn new(range: PortRange) -> Self {
        Self {
            range,
            bits: vec![0; range.size().div_ceil(WORD_BITS)],
            reserved: 0,
        }
    }

    pub(crate) fn available(&self) -> usize {
        self.range.size() - self.reserved
    }

    pub(crate) fn is_reserved(&self, port: u16) -> bool {
        self.range
            .offset(port)
            .map(|offset| self.test(offset))
            .unwrap_or(false)
    }

    /// Mark `port` reserved. Returns false if it is outside the range or
    /// already reserved.
    pub(crate) fn reserve(&mut self, port: u16) -> bool {
        match self.range.offset(port) {
            Some(offset) if !self.test(offset) => {
                self.set(offset, true);
                true
            }
            _ => false,
        }
    }

    /// Mark `port` free. Returns false if nothing changed.
    pub(crate) fn release(&mut self, port: u16) -> bool {
        match self.range.offset(port) {
            Some(offset) if self.test(offset) => {
                self.set(offset, false);
                true
            }
            _ => false,
        }
    }

    /// Reserve `n` ports, or none at all
    pub(crate) fn allocate(&mut self, n: usize, policy: AllocationPolicy) -> Result<Vec<u16>> {
        let available = self.available();
        if n > available {
            return Err(PortAllocatorError::Exhausted {
                requested: n,
                available,
            });
        }

        let offsets: Vec<usize> = match policy {
            AllocationPolicy::BitMap => self.free_offsets().take(n).collect(),
            AllocationPolicy::Random => {
                let free: Vec<usize> = self.free_offsets().collect();
                free.choose_multiple(&mut rand::thread_rng(), n)
                    .copied()
                    .collect()
            }
        };

        Ok(offsets
            .into_iter()
            .map(|offset| {
                self.set(offset, true);
                self.range.port_at(offset)
            })
            .collect())
    }

    fn free_offsets(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.range.size()).filter(move |&offset| !self.test(offset))
    }

    fn test(&self, offset: usize) -> bool {
        self.bits[offset / WORD_BITS] & (1 << (offset % WORD_BITS)) != 0
    }

    fn set(&mut self, offset: usize, reserved: bool) {
        let word = &mut self.bits[offset / WORD_BITS];
        let mask = 1u64 << (offset % WORD_BITS);
        if reserved {
            *word |= mask;
            self.reserved += 1;
        } else {
            *word &= !mask;
            self.reserved -= 1;
        }
    }
}
