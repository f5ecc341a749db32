//! Size string parsing

use crate::Result;
use anyhow::{bail, Context};

/// Parse a size string (e.g., "4096", "4k", "1G") to bytes
///
/// Accepted suffixes are k/K (KiB), m/M (MiB) and g/G (GiB). A bare number
/// is taken as bytes.
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num_str, suffix) = s.split_at(split);

    let num: u64 = num_str
        .parse()
        .with_context(|| format!("Invalid size: '{}'", s))?;

    let multiplier = match suffix {
        "" => 1,
        "k" | "K" => 1024,
        "m" | "M" => 1024 * 1024,
        "g" | "G" => 1024 * 1024 * 1024,
        _ => bail!("Invalid size suffix: '{}'", suffix),
    };

    Ok(num * multiplier)
}
