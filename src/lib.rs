/*!
 * bisync - Two-way directory synchronization engine
 *
 * Mirrors file trees between two roots:
 * - Filtered tree scanning with `.syncignore` rules
 * - Reconciliation planning with conflict detection
 * - Parallel copy workers with batching and streaming for large files
 * - Pause/resume and cooperative cancellation
 * - Post-copy integrity verification
 * - Safe deletion with backups, staging, and restore
 */

use std::path::Path;

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod summary;

// Re-export commonly used types for convenience
pub use config::{
    find_profile, load_profiles, ConflictResolution, Direction, IdentityMapper, PathMapper,
    PerformanceMode, Settings, SymlinkPolicy, SyncOptions, SyncProfile,
};
pub use core::control::ControlHandle;
pub use core::controller::SyncController;
pub use core::deletion::{BackupRecord, DeleteMethod, DeletionManager, DeletionRecord};
pub use core::planner::{ConflictKind, Operation, Plan, PlanCounts};
pub use core::progress::{
    OperationResult, Outcome, Phase, ProgressSnapshot, SkipReason, SyncListeners,
};
pub use core::scanner::{FileEntry, ScanOutcome};
pub use error::{ErrorKind, Result, SyncError};
pub use summary::SyncSummary;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Compute the operation set for two roots without touching either side
pub fn plan(root_a: &Path, root_b: &Path, options: SyncOptions) -> Result<Plan> {
    SyncController::new(root_a, root_b, options).plan()
}

/// Alias for [`plan`] emphasizing the no-mutation contract
pub fn preview(root_a: &Path, root_b: &Path, options: SyncOptions) -> Result<Plan> {
    SyncController::new(root_a, root_b, options).preview()
}

/// Plan and execute a full sync in one call
pub fn sync(
    root_a: &Path,
    root_b: &Path,
    options: SyncOptions,
    listeners: &SyncListeners,
) -> Result<SyncSummary> {
    SyncController::new(root_a, root_b, options).run(listeners)
}
