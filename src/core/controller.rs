/*!
 * Sync orchestration
 *
 * Drives scan → plan → copy → delete, owns the run state, fans progress
 * into the listener record, and handles controller-level retry with
 * exponential backoff. Workers publish events on an unbounded queue; the
 * controller is its only consumer and never blocks holding a lock.
 */

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, RecvTimeoutError};
use sysinfo::Disks;
use tracing::{debug, info, warn};

use super::batch::{build_batches, Batch};
use super::control::{ControlHandle, ControlSignals};
use super::deletion::DeletionManager;
use super::filter::SyncFilter;
use super::planner::{plan_sync, Operation, Plan};
use super::progress::{
    Outcome, Phase, ProgressSnapshot, RateEstimator, SyncListeners, SyncState, WorkerEvent,
};
use super::retry::{backoff_delay, should_retry};
use super::scanner::scan_pair;
use super::worker::WorkerPool;
use crate::config::SyncOptions;
use crate::error::{Result, SyncError};
use crate::logging::{ErrorLog, ErrorRecord};
use crate::summary::SyncSummary;

pub struct SyncController {
    root_a: PathBuf,
    root_b: PathBuf,
    options: SyncOptions,
    signals: Arc<ControlSignals>,
}

impl SyncController {
    pub fn new(root_a: &Path, root_b: &Path, options: SyncOptions) -> Self {
        Self {
            root_a: root_a.to_path_buf(),
            root_b: root_b.to_path_buf(),
            options,
            signals: ControlSignals::new(),
        }
    }

    /// Cloneable pause/resume/abort surface for other threads
    pub fn handle(&self) -> ControlHandle {
        ControlHandle::new(self.signals.clone())
    }

    pub fn pause(&self) {
        self.signals.pause();
    }

    pub fn resume(&self) {
        self.signals.resume();
    }

    pub fn abort(&self) {
        self.signals.cancel();
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Scan both roots and compute the operation set. Pure: nothing on
    /// either side is touched.
    pub fn plan(&self) -> Result<Plan> {
        let filter_a = SyncFilter::for_root(&self.root_a, &self.options)?;
        let filter_b = SyncFilter::for_root(&self.root_b, &self.options)?;

        let (outcome_a, outcome_b) = scan_pair(
            &self.root_a,
            &self.root_b,
            &filter_a,
            &filter_b,
            &self.options,
        );
        let outcome_a = outcome_a?;
        let outcome_b = outcome_b?;

        let plan = plan_sync(
            &outcome_a,
            &outcome_b,
            &self.root_a,
            &self.root_b,
            &self.options,
        );
        plan.validate()?;
        Ok(plan)
    }

    /// Alias for `plan`; kept for callers that want to make the
    /// no-mutation contract explicit.
    pub fn preview(&self) -> Result<Plan> {
        self.plan()
    }

    /// Full pipeline: scan, plan, execute
    pub fn run(&self, listeners: &SyncListeners) -> Result<SyncSummary> {
        notify_phase(listeners, Phase::Scanning);
        let plan = self.plan()?;
        if self.signals.is_cancelled() {
            notify_phase(listeners, Phase::Aborted);
            return Err(SyncError::Aborted);
        }
        notify_phase(listeners, Phase::Planning);
        self.execute(plan, listeners)
    }

    /// Execute a previously computed plan
    pub fn execute(&self, plan: Plan, listeners: &SyncListeners) -> Result<SyncSummary> {
        let started = Instant::now();
        plan.validate()?;

        if !self.options.dry_run {
            let a_to_b_bytes: u64 = plan.copy_a_to_b.iter().map(|op| op.transfer_size()).sum();
            let b_to_a_bytes: u64 = plan.copy_b_to_a.iter().map(|op| op.transfer_size()).sum();
            ensure_disk_space(&self.root_b, a_to_b_bytes)?;
            ensure_disk_space(&self.root_a, b_to_a_bytes)?;
        }

        let total_ops = plan.copy_op_count();
        let total_files = (total_ops + plan.deletions.len()) as u64;
        let mut state = SyncState::new(total_files, plan.counts.total_bytes);
        state.phase = Phase::Copying;
        notify_phase(listeners, Phase::Copying);

        let mut summary = SyncSummary {
            conflicts: plan.counts.conflicts as u64,
            ..Default::default()
        };
        let error_log = ErrorLog::new(&self.options.state_dir());

        // every rel path maps to exactly one copy operation (plan
        // disjointness), which makes retry resubmission a lookup
        let ops_by_rel: HashMap<String, Operation> = plan
            .copy_a_to_b
            .iter()
            .chain(plan.copy_b_to_a.iter())
            .map(|op| (op.rel_path().to_string(), op.clone()))
            .collect();

        let batches = build_batches(
            &plan.copy_a_to_b,
            &plan.copy_b_to_a,
            self.options.batch_size,
            self.options.small_file_threshold,
        );

        let (batch_tx, batch_rx) = bounded::<Batch>(self.options.queue_depth.max(1));
        let (event_tx, event_rx) = unbounded::<WorkerEvent>();

        let pool = WorkerPool::spawn(
            self.options.performance_mode.worker_count(),
            batch_rx,
            event_tx,
            self.signals.clone(),
            Arc::new(self.options.clone()),
        );

        let retry_tx = batch_tx.clone();
        let dispatcher = thread::spawn(move || {
            for batch in batches {
                if batch_tx.send(batch).is_err() {
                    break;
                }
            }
        });

        let mut outstanding = total_ops;
        let mut pending_retries: Vec<(Instant, Batch)> = Vec::new();
        let mut progress_acc: HashMap<String, u64> = HashMap::new();
        let mut rate = RateEstimator::new();
        let mut last_paused = false;
        let mut aborted_for_errors = false;

        while outstanding > 0 {
            let paused = self.signals.is_paused();
            if paused != last_paused {
                if !paused {
                    // exclude the paused interval from the rate estimate
                    rate.reset_clock();
                }
                last_paused = paused;
                publish(listeners, &state.snapshot(paused, rate.bytes_per_second()));
            }

            let now = Instant::now();
            let mut index = 0;
            while index < pending_retries.len() {
                if pending_retries[index].0 <= now {
                    let (_, batch) = pending_retries.remove(index);
                    if retry_tx.send(batch).is_err() {
                        break;
                    }
                } else {
                    index += 1;
                }
            }

            let event = match event_rx.recv_timeout(Duration::from_millis(50)) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            match event {
                WorkerEvent::FileStarted { rel_path } => {
                    state.file_started(&rel_path);
                    publish(listeners, &state.snapshot(paused, rate.bytes_per_second()));
                }
                WorkerEvent::FileProgress {
                    rel_path,
                    bytes_delta,
                } => {
                    *progress_acc.entry(rel_path).or_default() += bytes_delta;
                    state.file_progress(bytes_delta);
                    if !paused {
                        rate.add_bytes(bytes_delta);
                    }
                    publish(listeners, &state.snapshot(paused, rate.bytes_per_second()));
                }
                WorkerEvent::FileResult { result } => {
                    let wants_retry = result
                        .failure_kind()
                        .map(|kind| should_retry(kind, result.attempts, &self.options.retry))
                        .unwrap_or(false);

                    if wants_retry && !self.signals.is_cancelled() {
                        if let Some(op) = ops_by_rel.get(&result.rel_path) {
                            let partial = progress_acc.remove(&result.rel_path).unwrap_or(0);
                            state.rollback_progress(partial);
                            let delay = backoff_delay(&self.options.retry, result.attempts);
                            debug!(
                                "retrying {} (attempt {}) in {:?}",
                                result.rel_path,
                                result.attempts + 1,
                                delay
                            );
                            pending_retries
                                .push((Instant::now() + delay, Batch::single(op.clone(), result.attempts + 1)));
                            continue;
                        }
                    }

                    outstanding -= 1;
                    let partial = progress_acc.remove(&result.rel_path).unwrap_or(0);

                    match result.outcome {
                        Outcome::Success => {
                            let unreported = result.bytes_transferred.saturating_sub(partial);
                            state.file_finished(&result, unreported);
                            if !paused {
                                rate.add_bytes(unreported);
                            }
                            summary.bytes_transferred += result.bytes_transferred;
                            let is_update = matches!(
                                ops_by_rel.get(&result.rel_path),
                                Some(Operation::Update { .. })
                            );
                            if is_update {
                                summary.updated += 1;
                            } else {
                                summary.created += 1;
                            }
                            if let Some(cb) = &listeners.on_file_complete {
                                cb(&result);
                            }
                        }
                        Outcome::Skipped(_) => {
                            state.rollback_progress(partial);
                            state.file_finished(&result, 0);
                            summary.skipped += 1;
                        }
                        Outcome::Failure(kind) => {
                            state.rollback_progress(partial);
                            state.file_finished(&result, 0);
                            summary.errors.push(result.clone());
                            let record = ErrorRecord::new(
                                &result.rel_path,
                                kind,
                                result.attempts,
                                format!("copy of {} failed ({})", result.rel_path, kind),
                            );
                            if let Err(e) = error_log.append(&record) {
                                warn!("failed to write error log: {}", e);
                            }
                            if !self.options.skip_errors {
                                if let Some(cb) = &listeners.on_file_error {
                                    cb(&result);
                                }
                            }
                            if summary.errors.len() >= self.options.max_errors {
                                warn!(
                                    "aborting after {} errors (max {})",
                                    summary.errors.len(),
                                    self.options.max_errors
                                );
                                aborted_for_errors = true;
                                self.signals.cancel();
                            }
                        }
                    }
                    publish(listeners, &state.snapshot(paused, rate.bytes_per_second()));
                }
            }
        }

        drop(retry_tx);
        let _ = dispatcher.join();
        pool.join();

        if self.signals.is_cancelled() {
            state.phase = Phase::Aborted;
            notify_phase(listeners, Phase::Aborted);
            publish(listeners, &state.snapshot(false, 0.0));
            summary.duration = started.elapsed();
            return if aborted_for_errors {
                Err(SyncError::SyncFailed {
                    errors: summary.errors.len(),
                })
            } else {
                Err(SyncError::Aborted)
            };
        }

        if !plan.deletions.is_empty() {
            state.phase = Phase::Deleting;
            notify_phase(listeners, Phase::Deleting);
            self.run_deletions(&plan, listeners, &mut state, &mut summary, &error_log);

            if self.signals.is_cancelled() {
                state.phase = Phase::Aborted;
                notify_phase(listeners, Phase::Aborted);
                summary.duration = started.elapsed();
                return if aborted_for_errors || summary.errors.len() >= self.options.max_errors {
                    Err(SyncError::SyncFailed {
                        errors: summary.errors.len(),
                    })
                } else {
                    Err(SyncError::Aborted)
                };
            }
        }

        state.phase = Phase::Completed;
        notify_phase(listeners, Phase::Completed);
        publish(listeners, &state.snapshot(false, rate.bytes_per_second()));

        summary.duration = started.elapsed();
        info!("sync finished: {}", summary.overview());
        Ok(summary)
    }

    fn run_deletions(
        &self,
        plan: &Plan,
        listeners: &SyncListeners,
        state: &mut SyncState,
        summary: &mut SyncSummary,
        error_log: &ErrorLog,
    ) {
        let manager = DeletionManager::new(&self.options.state_dir());

        for op in &plan.deletions {
            // deletions pause and cancel at file boundaries
            if !self.signals.wait_if_paused() {
                return;
            }

            state.file_started(op.rel_path());
            let outcome = manager.execute(op, &self.options);

            match outcome.result.outcome {
                Outcome::Success => summary.deleted += 1,
                Outcome::Skipped(_) => summary.skipped += 1,
                Outcome::Failure(kind) => {
                    summary.errors.push(outcome.result.clone());
                    let record = ErrorRecord::new(
                        &outcome.result.rel_path,
                        kind,
                        1,
                        format!("delete of {} failed ({})", outcome.result.rel_path, kind),
                    );
                    if let Err(e) = error_log.append(&record) {
                        warn!("failed to write error log: {}", e);
                    }
                    if !self.options.skip_errors {
                        if let Some(cb) = &listeners.on_file_error {
                            cb(&outcome.result);
                        }
                    }
                    if summary.errors.len() >= self.options.max_errors {
                        self.signals.cancel();
                        return;
                    }
                }
            }
            state.file_finished(&outcome.result, 0);
            publish(listeners, &state.snapshot(false, 0.0));
        }

        // scheduled retention pass for old backups
        match manager.cleanup(self.options.backup_retention_days) {
            Ok(removed) if removed > 0 => {
                info!("removed {} expired backup directories", removed)
            }
            Ok(_) => {}
            Err(e) => warn!("backup cleanup failed: {}", e),
        }
    }

    /// Bring a backed-up deletion back to its original location (or
    /// `target` when given)
    pub fn restore(&self, rel_path: &str, target: Option<&Path>) -> Result<PathBuf> {
        DeletionManager::new(&self.options.state_dir()).restore(rel_path, target)
    }
}

/// Pre-flight free-space check against the destination volume
fn ensure_disk_space(dest_root: &Path, required: u64) -> Result<()> {
    if required == 0 {
        return Ok(());
    }
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .iter()
        .filter(|disk| dest_root.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len());

    match disk {
        Some(disk) if disk.available_space() < required => Err(SyncError::InsufficientDiskSpace {
            required,
            available: disk.available_space(),
        }),
        Some(_) => Ok(()),
        None => {
            warn!(
                "could not determine available disk space for {}",
                dest_root.display()
            );
            Ok(())
        }
    }
}

fn publish(listeners: &SyncListeners, snapshot: &ProgressSnapshot) {
    if let Some(cb) = &listeners.on_progress {
        cb(snapshot);
    }
}

fn notify_phase(listeners: &SyncListeners, phase: Phase) {
    if let Some(cb) = &listeners.on_phase_change {
        cb(phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Direction;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn options_with_state(state_dir: &Path, direction: Direction) -> SyncOptions {
        SyncOptions {
            direction,
            state_dir: Some(state_dir.to_path_buf()),
            performance_mode: crate::config::PerformanceMode::Balanced,
            ..Default::default()
        }
    }

    #[test]
    fn test_plan_missing_root() {
        let dir = tempdir().unwrap();
        let state = tempdir().unwrap();
        let controller = SyncController::new(
            &dir.path().join("absent"),
            dir.path(),
            options_with_state(state.path(), Direction::AToB),
        );
        assert!(matches!(
            controller.plan(),
            Err(SyncError::PathMissing(_))
        ));
    }

    #[test]
    fn test_empty_roots_complete_with_empty_summary() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let state = tempdir().unwrap();

        let controller = SyncController::new(
            a.path(),
            b.path(),
            options_with_state(state.path(), Direction::TwoWay),
        );

        let phases = Arc::new(Mutex::new(Vec::new()));
        let listeners = {
            let phases = phases.clone();
            SyncListeners::new().phase_change(move |phase| phases.lock().unwrap().push(phase))
        };

        let summary = controller.run(&listeners).unwrap();
        assert!(summary.success());
        assert_eq!(summary.files_processed(), 0);

        let phases = phases.lock().unwrap();
        assert_eq!(
            *phases,
            vec![
                Phase::Scanning,
                Phase::Planning,
                Phase::Copying,
                Phase::Completed
            ]
        );
    }

    #[test]
    fn test_run_copies_and_reports() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let state = tempdir().unwrap();
        fs::create_dir_all(a.path().join("sub")).unwrap();
        fs::write(a.path().join("sub/one.txt"), b"one").unwrap();
        fs::write(a.path().join("two.txt"), b"two2").unwrap();

        let controller = SyncController::new(
            a.path(),
            b.path(),
            options_with_state(state.path(), Direction::AToB),
        );

        let completions = Arc::new(AtomicUsize::new(0));
        let listeners = {
            let completions = completions.clone();
            SyncListeners::new().file_complete(move |result| {
                assert!(result.is_success());
                completions.fetch_add(1, Ordering::SeqCst);
            })
        };

        let summary = controller.run(&listeners).unwrap();
        assert!(summary.success());
        assert_eq!(summary.created, 2);
        assert_eq!(summary.bytes_transferred, 7);
        assert_eq!(completions.load(Ordering::SeqCst), 2);
        assert_eq!(fs::read(b.path().join("sub/one.txt")).unwrap(), b"one");
        assert_eq!(fs::read(b.path().join("two.txt")).unwrap(), b"two2");
    }

    #[test]
    fn test_abort_before_run() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let state = tempdir().unwrap();
        fs::write(a.path().join("f.txt"), b"x").unwrap();

        let controller = SyncController::new(
            a.path(),
            b.path(),
            options_with_state(state.path(), Direction::AToB),
        );
        controller.abort();

        let result = controller.run(&SyncListeners::new());
        assert!(result.is_err());
        assert!(!b.path().join("f.txt").exists());
    }

    #[test]
    fn test_execute_runs_deletions_with_backup() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let state = tempdir().unwrap();
        fs::write(b.path().join("orphan.txt"), b"bye").unwrap();

        let options = SyncOptions {
            delete_orphaned: true,
            ..options_with_state(state.path(), Direction::AToB)
        };
        let controller = SyncController::new(a.path(), b.path(), options);

        let summary = controller.run(&SyncListeners::new()).unwrap();
        assert_eq!(summary.deleted, 1);
        assert!(!b.path().join("orphan.txt").exists());

        let restored = controller.restore("orphan.txt", None).unwrap();
        assert_eq!(fs::read(restored).unwrap(), b"bye");
    }

    #[test]
    fn test_preview_reports_same_operations_and_mutates_nothing() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let state = tempdir().unwrap();
        fs::write(a.path().join("f.txt"), b"data").unwrap();

        let controller = SyncController::new(
            a.path(),
            b.path(),
            options_with_state(state.path(), Direction::AToB),
        );

        let preview = controller.preview().unwrap();
        let plan = controller.plan().unwrap();
        assert_eq!(preview.counts, plan.counts);
        assert_eq!(preview.copy_a_to_b.len(), 1);
        assert!(!b.path().join("f.txt").exists());
    }

    #[test]
    fn test_dry_run_executes_nothing() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let state = tempdir().unwrap();
        fs::write(a.path().join("f.txt"), b"data").unwrap();

        let options = SyncOptions {
            dry_run: true,
            ..options_with_state(state.path(), Direction::AToB)
        };
        let controller = SyncController::new(a.path(), b.path(), options);

        let summary = controller.run(&SyncListeners::new()).unwrap();
        assert_eq!(summary.created, 0);
        assert_eq!(summary.skipped, 1);
        assert!(!b.path().join("f.txt").exists());
    }
}
