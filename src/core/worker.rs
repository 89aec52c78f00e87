/*!
 * Fixed-size pool of copy workers
 *
 * Workers pull batches from a bounded channel, execute each operation
 * through the copy executor, and publish start/progress/result events on
 * the unbounded event queue. Pause and cancel are observed at batch
 * boundaries here and at chunk boundaries inside the executor; a worker
 * never holds a lock across I/O.
 */

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use tracing::debug;

use super::batch::Batch;
use super::control::ControlSignals;
use super::executor::execute_copy;
use super::progress::{OperationResult, Outcome, SkipReason, WorkerEvent};
use crate::config::SyncOptions;
use crate::error::SyncError;

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `worker_count` threads consuming from `batches`
    pub fn spawn(
        worker_count: usize,
        batches: Receiver<Batch>,
        events: Sender<WorkerEvent>,
        signals: Arc<ControlSignals>,
        options: Arc<SyncOptions>,
    ) -> Self {
        let mut handles = Vec::with_capacity(worker_count.max(1));
        for index in 0..worker_count.max(1) {
            let batches = batches.clone();
            let events = events.clone();
            let signals = signals.clone();
            let options = options.clone();

            let handle = thread::Builder::new()
                .name(format!("copy-worker-{}", index))
                .spawn(move || worker_loop(batches, events, signals, options))
                .expect("failed to spawn copy worker");
            handles.push(handle);
        }

        Self { handles }
    }

    /// Wait for every worker to drain and exit
    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    batches: Receiver<Batch>,
    events: Sender<WorkerEvent>,
    signals: Arc<ControlSignals>,
    options: Arc<SyncOptions>,
) {
    for batch in batches.iter() {
        // batch boundary is a safe point for both signals
        let alive = signals.wait_if_paused();

        for item in batch.items {
            if !alive || signals.is_cancelled() {
                send_result(
                    &events,
                    OperationResult {
                        rel_path: item.op.rel_path().to_string(),
                        outcome: Outcome::Skipped(SkipReason::Aborted),
                        duration_ms: 0,
                        bytes_transferred: 0,
                        attempts: item.attempt,
                    },
                );
                continue;
            }

            if options.dry_run {
                send_result(
                    &events,
                    OperationResult {
                        rel_path: item.op.rel_path().to_string(),
                        outcome: Outcome::Skipped(SkipReason::DryRun),
                        duration_ms: 0,
                        bytes_transferred: 0,
                        attempts: item.attempt,
                    },
                );
                continue;
            }

            let rel_path = item.op.rel_path().to_string();
            let _ = events.send(WorkerEvent::FileStarted {
                rel_path: rel_path.clone(),
            });

            let started = Instant::now();
            let outcome = {
                let progress_events = events.clone();
                let progress_rel = rel_path.clone();
                let mut on_progress = move |bytes_delta: u64| {
                    let _ = progress_events.send(WorkerEvent::FileProgress {
                        rel_path: progress_rel.clone(),
                        bytes_delta,
                    });
                };
                execute_copy(&item.op, &options, &signals, &mut on_progress)
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            let result = match outcome {
                Ok(bytes) => OperationResult {
                    rel_path,
                    outcome: Outcome::Success,
                    duration_ms,
                    bytes_transferred: bytes,
                    attempts: item.attempt,
                },
                Err(SyncError::Aborted) => OperationResult {
                    rel_path,
                    outcome: Outcome::Skipped(SkipReason::Aborted),
                    duration_ms,
                    bytes_transferred: 0,
                    attempts: item.attempt,
                },
                Err(e) => {
                    debug!("copy of {} failed: {}", rel_path, e);
                    OperationResult {
                        rel_path,
                        outcome: Outcome::Failure(e.kind()),
                        duration_ms,
                        bytes_transferred: 0,
                        attempts: item.attempt,
                    }
                }
            };
            send_result(&events, result);
        }
    }
}

fn send_result(events: &Sender<WorkerEvent>, result: OperationResult) {
    let _ = events.send(WorkerEvent::FileResult { result });
}
