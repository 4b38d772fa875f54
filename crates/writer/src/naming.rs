//! Output filenames.
//!
//! ```text
//! {prefix}-{yyyyMMddHHmmss}-{serial:05}{suffix}[.open]
//! ```
//!
//! The serial comes from a counter shared by every writer built from the same
//! factory, so two writers opening in the same second never collide.

use chrono::{DateTime, Utc};

/// Appended to a file's name while a writer still has it open.
pub const OCCUPIED_SUFFIX: &str = ".open";

/// Zero-pads `serial` to five digits. Larger serials are printed in full.
#[must_use]
pub fn format_serial(serial: u64) -> String {
    format!("{:05}", serial)
}

/// 14-digit UTC timestamp, `yyyyMMddHHmmss`.
#[must_use]
pub fn timestamp14(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

/// Finalized filename without directory or occupied marker.
#[must_use]
pub fn basename(prefix: &str, at: DateTime<Utc>, serial: u64, suffix: &str) -> String {
    format!(
        "{}-{}-{}{}",
        prefix,
        timestamp14(at),
        format_serial(serial),
        suffix
    )
}

/// Joins a directory and a filename with exactly one `/`.
#[must_use]
pub fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Returns `path` without the occupied marker, or `None` if it has none.
#[must_use]
pub fn strip_occupied(path: &str) -> Option<&str> {
    path.strip_suffix(OCCUPIED_SUFFIX)
}
