//! Port ranges

use crate::error::{PortAllocatorError, Result};
use std::fmt;
use std::str::FromStr;

/// A contiguous range of ports, `[base, base + size)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    base: u16,
    size: u32,
}

impl PortRange {
    pub fn new(base: u16, size: u32) -> Result<Self> {
        if size == 0 || base as u32 + size > u16::MAX as u32 + 1 {
            return Err(PortAllocatorError::InvalidRange(format!("{}+{}", base, size)));
        }
        Ok(Self { base, size })
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size as usize
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.base && (port as u32) < self.base as u32 + self.size
    }

    /// Offset of `port` within the range
    pub(crate) fn offset(&self, port: u16) -> Option<usize> {
        self.contains(port).then(|| (port - self.base) as usize)
    }

    pub(crate) fn port_at(&self, offset: usize) -> u16 {
        self.base + offset as u16
    }
}

/// Parses `first-last` (inclusive) or a single port
impl FromStr for PortRange {
    type Err = PortAllocatorError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || PortAllocatorError::InvalidRange(s.to_string());
        let (first, last) = match s.trim().split_once('-') {
            Some((first, last)) => (first.trim(), last.trim()),
            None => (s.trim(), s.trim()),
        };
        let first: u16 = first.parse().map_err(|_| invalid())?;
        let last: u16 = last.parse().map_err(|_| invalid())?;
        if last < first {
            return Err(invalid());
        }
        Self::new(first, (last - first) as u32 + 1)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.base as u32 + self.size - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inclusive_range() {
        let range: PortRange = "20000-26000".parse().unwrap();
        assert_eq!(range.base(), 20000);
        assert_eq!(range.size(), 6001);
        assert!(range.contains(26000));
        assert!(!range.contains(26001));
        assert_eq!(range.to_string(), "20000-26000");
    }

    #[test]
    fn test_parse_rejects_bad_ranges() {
        assert!("26000-20000".parse::<PortRange>().is_err());
        assert!("abc".parse::<PortRange>().is_err());
        assert!("1-70000".parse::<PortRange>().is_err());
        assert!(PortRange::new(65535, 2).is_err());
    }

    #[test]
    fn test_full_range_is_valid() {
        let range: PortRange = "0-65535".parse().unwrap();
        assert_eq!(range.size(), 65536);
        assert!(range.contains(65535));
    }
}
