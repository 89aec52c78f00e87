/*!
 * Run summary and human-readable formatting helpers
 */

use std::time::Duration;

use serde::Serialize;

use crate::core::progress::OperationResult;

/// Aggregate outcome of one sync run
#[derive(Debug, Default, Serialize)]
pub struct SyncSummary {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    pub conflicts: u64,
    pub skipped: u64,
    pub bytes_transferred: u64,
    #[serde(skip)]
    pub duration: Duration,
    pub errors: Vec<OperationResult>,
}

impl SyncSummary {
    /// A run succeeded iff no per-file errors were recorded
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn files_processed(&self) -> u64 {
        self.created + self.updated + self.deleted + self.skipped + self.errors.len() as u64
    }

    /// One-line report for logs and CLI collaborators
    pub fn overview(&self) -> String {
        format!(
            "{} created, {} updated, {} deleted, {} conflicts, {} errors ({} in {})",
            self.created,
            self.updated,
            self.deleted,
            self.conflicts,
            self.errors.len(),
            format_bytes(self.bytes_transferred),
            format_duration(self.duration),
        )
    }
}

/// Byte count with binary units, one decimal past KiB
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Duration at the two most significant fields: `640ms`, `4.2s`,
/// `3m07s`, `2h15m`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        return format!("{}ms", duration.subsec_millis());
    }
    if secs < 60 {
        return format!("{}.{}s", secs, duration.subsec_millis() / 100);
    }
    let mins = secs / 60;
    if mins < 60 {
        return format!("{}m{:02}s", mins, secs % 60);
    }
    format!("{}h{:02}m", mins / 60, mins % 60)
}
