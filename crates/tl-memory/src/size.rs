//! Human-readable byte sizes used by dump policy parameters.
//!
//! Accepted forms are a non-negative integer followed by an optional unit:
//! `B`, decimal `KB`/`MB`/`GB`/`TB` (powers of 1000) or binary
//! `KiB`/`MiB`/`GiB`/`TiB` (powers of 1024). Units are case-insensitive and may
//! be separated from the number by whitespace.

use crate::error::MemoryError;

const UNITS: &[(&str, u64)] = &[
    ("b", 1),
    ("kb", 1_000),
    ("mb", 1_000_000),
    ("gb", 1_000_000_000),
    ("tb", 1_000_000_000_000),
    ("kib", 1 << 10),
    ("mib", 1 << 20),
    ("gib", 1 << 30),
    ("tib", 1 << 40),
];

/// Parse a size such as `"512MiB"`, `"1B"` or `"4096"` into bytes.
///
/// # Errors
///
/// Returns [`MemoryError::InvalidSize`] for negative, empty, malformed or
/// overflowing input.
pub fn parse_byte_size(input: &str) -> Result<u64, MemoryError> {
    let invalid = |reason| MemoryError::InvalidSize {
        value: input.to_string(),
        reason,
    };

    let trimmed = input.trim();
    if trimmed.starts_with('-') {
        return Err(invalid("size must not be negative"));
    }

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    if digits.is_empty() {
        return Err(invalid("missing number"));
    }

    let value: u64 = digits.parse().map_err(|_| invalid("number out of range"))?;
    let unit = unit.trim().to_ascii_lowercase();
    let multiplier = if unit.is_empty() {
        1
    } else {
        UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, factor)| *factor)
            .ok_or_else(|| invalid("unknown unit"))?
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| invalid("size overflows u64"))
}

/// Format a byte count with the largest binary unit that divides it exactly.
#[must_use]
pub fn format_byte_size(bytes: u64) -> String {
    const UNITS: [(&str, u64); 4] = [
        ("TiB", 1 << 40),
        ("GiB", 1 << 30),
        ("MiB", 1 << 20),
        ("KiB", 1 << 10),
    ];
    for (name, factor) in UNITS {
        if bytes >= factor && bytes % factor == 0 {
            return format!("{}{}", bytes / factor, name);
        }
    }
    format!("{}B", bytes)
}
