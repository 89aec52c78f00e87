/*!
 * Run state, progress snapshots, and the listener interface
 *
 * Workers publish `WorkerEvent`s on a concurrent queue; only the
 * controller consumes them, mutates `SyncState`, and fans read-only
 * snapshots out to the typed listener record. Snapshot emission is
 * therefore totally ordered.
 */

use std::collections::HashSet;
use std::time::Instant;

use serde::Serialize;

use crate::error::ErrorKind;

/// Pipeline phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Scanning,
    Planning,
    Copying,
    Deleting,
    Completed,
    Aborted,
}

/// Why an operation was skipped rather than executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Cancel observed mid-operation; not an error
    Aborted,
    /// Dry-run simulation
    DryRun,
}

/// Terminal outcome of one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum Outcome {
    Success,
    Failure(ErrorKind),
    Skipped(SkipReason),
}

/// Result of one executed (or skipped) operation
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub rel_path: String,
    pub outcome: Outcome,
    pub duration_ms: u64,
    pub bytes_transferred: u64,
    pub attempts: u32,
}

impl OperationResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failure(_))
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match self.outcome {
            Outcome::Failure(kind) => Some(kind),
            _ => None,
        }
    }
}

/// Events workers push to the controller
#[derive(Debug)]
pub enum WorkerEvent {
    /// A worker picked up an operation
    FileStarted { rel_path: String },
    /// Bytes written since the last progress event for this file
    FileProgress { rel_path: String, bytes_delta: u64 },
    /// Terminal result for an operation
    FileResult { result: OperationResult },
}

/// Runtime state owned exclusively by the controller
#[derive(Debug)]
pub struct SyncState {
    pub total_files: u64,
    pub total_bytes: u64,
    pub processed_files: u64,
    pub processed_bytes: u64,
    pub in_flight: HashSet<String>,
    pub errors: Vec<OperationResult>,
    pub phase: Phase,
    current_file: Option<String>,
}

impl SyncState {
    pub fn new(total_files: u64, total_bytes: u64) -> Self {
        Self {
            total_files,
            total_bytes,
            processed_files: 0,
            processed_bytes: 0,
            in_flight: HashSet::new(),
            errors: Vec::new(),
            phase: Phase::Idle,
            current_file: None,
        }
    }

    pub fn file_started(&mut self, rel_path: &str) {
        self.in_flight.insert(rel_path.to_string());
        self.current_file = Some(rel_path.to_string());
    }

    pub fn file_progress(&mut self, bytes_delta: u64) {
        self.processed_bytes += bytes_delta;
    }

    /// Remove the partial progress of a failed or abandoned file so the
    /// totals reflect completed work only
    pub fn rollback_progress(&mut self, bytes: u64) {
        self.processed_bytes = self.processed_bytes.saturating_sub(bytes);
    }

    /// Fold a terminal result into the state. Progress deltas already
    /// accounted through `file_progress` are not double-counted; the
    /// caller passes the remainder.
    pub fn file_finished(&mut self, result: &OperationResult, unreported_bytes: u64) {
        self.in_flight.remove(&result.rel_path);
        self.processed_files += 1;
        self.processed_bytes += unreported_bytes;
        if result.is_failure() {
            self.errors.push(result.clone());
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn snapshot(&self, paused: bool, bytes_per_second: f64) -> ProgressSnapshot {
        let percentage = if self.total_bytes == 0 {
            if self.total_files == 0 {
                100.0
            } else {
                (self.processed_files as f64 / self.total_files as f64) * 100.0
            }
        } else {
            (self.processed_bytes as f64 / self.total_bytes as f64) * 100.0
        };

        let remaining = self.total_bytes.saturating_sub(self.processed_bytes);
        let eta_seconds = if bytes_per_second > 1.0 && remaining > 0 {
            Some((remaining as f64 / bytes_per_second).ceil() as u64)
        } else {
            None
        };

        ProgressSnapshot {
            phase: self.phase,
            percentage: percentage.min(100.0),
            processed_files: self.processed_files,
            total_files: self.total_files,
            processed_bytes: self.processed_bytes,
            total_bytes: self.total_bytes,
            current_file: self.current_file.clone(),
            bytes_per_second,
            eta_seconds,
            errors_count: self.errors.len(),
            paused,
        }
    }
}

/// Read-only view published to progress listeners
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub phase: Phase,
    pub percentage: f64,
    pub processed_files: u64,
    pub total_files: u64,
    pub processed_bytes: u64,
    pub total_bytes: u64,
    pub current_file: Option<String>,
    pub bytes_per_second: f64,
    pub eta_seconds: Option<u64>,
    pub errors_count: usize,
    pub paused: bool,
}

/// Typed listener record; the controller fans results into it
#[derive(Default)]
pub struct SyncListeners {
    pub on_progress: Option<Box<dyn Fn(&ProgressSnapshot) + Send>>,
    pub on_file_complete: Option<Box<dyn Fn(&OperationResult) + Send>>,
    pub on_file_error: Option<Box<dyn Fn(&OperationResult) + Send>>,
    pub on_phase_change: Option<Box<dyn Fn(Phase) + Send>>,
}

impl SyncListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(mut self, f: impl Fn(&ProgressSnapshot) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub fn file_complete(mut self, f: impl Fn(&OperationResult) + Send + 'static) -> Self {
        self.on_file_complete = Some(Box::new(f));
        self
    }

    pub fn file_error(mut self, f: impl Fn(&OperationResult) + Send + 'static) -> Self {
        self.on_file_error = Some(Box::new(f));
        self
    }

    pub fn phase_change(mut self, f: impl Fn(Phase) + Send + 'static) -> Self {
        self.on_phase_change = Some(Box::new(f));
        self
    }
}

/// Exponentially weighted transfer-rate estimate over a ~2 second window.
/// Paused intervals are excluded by resetting the sample clock on resume.
#[derive(Debug)]
pub struct RateEstimator {
    window_secs: f64,
    last_sample: Instant,
    pending_bytes: u64,
    rate: f64,
}

impl RateEstimator {
    pub fn new() -> Self {
        Self {
            window_secs: 2.0,
            last_sample: Instant::now(),
            pending_bytes: 0,
            rate: 0.0,
        }
    }

    /// Account bytes transferred since the previous call
    pub fn add_bytes(&mut self, bytes: u64) {
        self.pending_bytes += bytes;
        let elapsed = self.last_sample.elapsed().as_secs_f64();
        if elapsed >= 0.25 {
            let sample = self.pending_bytes as f64 / elapsed;
            let alpha = (elapsed / self.window_secs).min(1.0);
            self.rate = if self.rate == 0.0 {
                sample
            } else {
                alpha * sample + (1.0 - alpha) * self.rate
            };
            self.pending_bytes = 0;
            self.last_sample = Instant::now();
        }
    }

    /// Drop the interval spent paused from the estimate
    pub fn reset_clock(&mut self) {
        self.last_sample = Instant::now();
        self.pending_bytes = 0;
    }

    pub fn bytes_per_second(&self) -> f64 {
        self.rate
    }
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new()
    }
}
