//! Human readable byte sizes
//!
//! Backends report sizes such as `4.00GB` or `512.00MiB`; all units are
//! interpreted as binary (powers of 1024).

use thiserror::Error;

const BINARY_UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitsError {
    #[error("Invalid size: {0:?}")]
    InvalidSize(String),

    #[error("Unknown size unit in {0:?}")]
    UnknownUnit(String),
}

/// Parse a human readable size into bytes
pub fn from_human_size(input: &str) -> Result<u64, UnitsError> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| UnitsError::InvalidSize(input.to_string()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(UnitsError::InvalidSize(input.to_string()));
    }

    let exponent = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 0,
        "k" | "kb" | "kib" => 1,
        "m" | "mb" | "mib" => 2,
        "g" | "gb" | "gib" => 3,
        "t" | "tb" | "tib" => 4,
        "p" | "pb" | "pib" => 5,
        "e" | "eb" | "eib" => 6,
        _ => return Err(UnitsError::UnknownUnit(input.to_string())),
    };

    Ok((value * 1024f64.powi(exponent)).round() as u64)
}

/// Format bytes with binary units, e.g. `1.5GiB`
pub fn bytes_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < BINARY_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rendered = format!("{:.2}", value);
    let rendered = rendered.trim_end_matches('0').trim_end_matches('.');
    format!("{}{}", rendered, BINARY_UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend_sizes() {
        assert_eq!(from_human_size("4.00GB").unwrap(), 4 << 30);
        assert_eq!(from_human_size("512.00MiB").unwrap(), 512 << 20);
        assert_eq!(from_human_size("0B").unwrap(), 0);
        assert_eq!(from_human_size(" 1.5 KB ").unwrap(), 1536);
        assert_eq!(from_human_size("100").unwrap(), 100);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(from_human_size("GB"), Err(UnitsError::InvalidSize(_))));
        assert!(matches!(from_human_size("3 parsecs"), Err(UnitsError::UnknownUnit(_))));
    }

    #[test]
    fn test_format() {
        assert_eq!(bytes_size(0), "0B");
        assert_eq!(bytes_size(2 << 30), "2GiB");
        assert_eq!(bytes_size(1536 << 20), "1.5GiB");
        assert_eq!(bytes_size(1000), "1000B");
    }
}
