/*!
 * Reconciliation planning
 *
 * Pairs the file entries of both roots by canonical relative path and
 * derives the operations needed to reconcile them under the configured
 * direction, tolerance, and conflict-resolution policy. Deletion planning
 * runs as a separate pass over destination orphans.
 */

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::deletion::matches_safe_mode_pattern;
use super::scanner::{FileEntry, ScanOutcome};
use crate::config::{ConflictResolution, Direction, SyncOptions};
use crate::error::{Result, SyncError};

/// Why a file pair could not be reconciled automatically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides changed beyond the tolerance
    BothModified,
    /// A file on one side is a directory on the other
    TypeMismatch,
}

/// One planned change to be applied to one side
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Create {
        source_abs: PathBuf,
        dest_abs: PathBuf,
        rel_path: String,
        size: u64,
        source_mtime_ms: i64,
    },
    Update {
        source_abs: PathBuf,
        dest_abs: PathBuf,
        rel_path: String,
        size: u64,
        source_mtime_ms: i64,
        dest_mtime_ms: i64,
    },
    Delete {
        dest_abs: PathBuf,
        rel_path: String,
        size: u64,
        dest_mtime_ms: i64,
        safe: bool,
    },
    Conflict {
        rel_path: String,
        side_a: FileEntry,
        side_b: FileEntry,
        kind: ConflictKind,
    },
}

impl Operation {
    pub fn rel_path(&self) -> &str {
        match self {
            Operation::Create { rel_path, .. }
            | Operation::Update { rel_path, .. }
            | Operation::Delete { rel_path, .. }
            | Operation::Conflict { rel_path, .. } => rel_path,
        }
    }

    /// Destination path this operation writes or removes, if any
    pub fn dest_abs(&self) -> Option<&Path> {
        match self {
            Operation::Create { dest_abs, .. }
            | Operation::Update { dest_abs, .. }
            | Operation::Delete { dest_abs, .. } => Some(dest_abs),
            Operation::Conflict { .. } => None,
        }
    }

    /// Bytes a copy of this operation moves
    pub fn transfer_size(&self) -> u64 {
        match self {
            Operation::Create { size, .. } | Operation::Update { size, .. } => *size,
            _ => 0,
        }
    }

    pub fn is_copy(&self) -> bool {
        matches!(self, Operation::Create { .. } | Operation::Update { .. })
    }
}

/// Aggregate plan counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanCounts {
    pub to_create: usize,
    pub to_update: usize,
    pub to_delete: usize,
    pub conflicts: usize,
    pub total_bytes: u64,
}

/// Immutable set of operations produced by the planner
#[derive(Debug, Default, Serialize)]
pub struct Plan {
    /// Creates and updates writing into root B, in plan order
    pub copy_a_to_b: Vec<Operation>,
    /// Creates and updates writing into root A, in plan order
    pub copy_b_to_a: Vec<Operation>,
    /// Safe orphan deletions on the destination side
    pub deletions: Vec<Operation>,
    /// Orphans matching a safe-mode pattern, demoted from deletion;
    /// carried as `Delete { safe: false }` and never executed
    pub unsafe_deletes: Vec<Operation>,
    /// Unresolved conflicts; never executed
    pub conflicts: Vec<Operation>,
    pub counts: PlanCounts,
}

impl Plan {
    /// Total copy operations across both directions
    pub fn copy_op_count(&self) -> usize {
        self.copy_a_to_b.len() + self.copy_b_to_a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.copy_op_count() == 0
            && self.deletions.is_empty()
            && self.unsafe_deletes.is_empty()
            && self.conflicts.is_empty()
    }

    /// Verify that no two operations write the same destination
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashSet<&Path> = HashSet::new();
        for op in self
            .copy_a_to_b
            .iter()
            .chain(self.copy_b_to_a.iter())
            .chain(self.deletions.iter())
            .chain(self.unsafe_deletes.iter())
        {
            if let Some(dest) = op.dest_abs() {
                if !seen.insert(dest) {
                    return Err(SyncError::Validation(format!(
                        "duplicate destination in plan: {}",
                        dest.display()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Compute the plan for two scanned roots
pub fn plan_sync(
    outcome_a: &ScanOutcome,
    outcome_b: &ScanOutcome,
    root_a: &Path,
    root_b: &Path,
    options: &SyncOptions,
) -> Plan {
    let map_a: HashMap<&str, &FileEntry> = outcome_a
        .entries
        .iter()
        .map(|e| (e.relative_path.as_str(), e))
        .collect();
    let map_b: HashMap<&str, &FileEntry> = outcome_b
        .entries
        .iter()
        .map(|e| (e.relative_path.as_str(), e))
        .collect();
    let dirs_a: HashSet<&str> = outcome_a.directories.iter().map(String::as_str).collect();
    let dirs_b: HashSet<&str> = outcome_b.directories.iter().map(String::as_str).collect();

    let mut rel_paths: Vec<&str> = map_a.keys().chain(map_b.keys()).copied().collect();
    rel_paths.sort_unstable();
    rel_paths.dedup();

    let tol = options.mtime_tolerance_ms as i64;
    let mut plan = Plan::default();

    for rel in rel_paths {
        let in_a = map_a.get(rel).copied();
        let in_b = map_b.get(rel).copied();

        // A file on one side shadowed by a directory on the other cannot
        // be reconciled by copying
        if let Some(entry_a) = in_a {
            if dirs_b.contains(rel) {
                plan.conflicts.push(Operation::Conflict {
                    rel_path: rel.to_string(),
                    side_a: entry_a.clone(),
                    side_b: directory_entry(root_b, rel),
                    kind: ConflictKind::TypeMismatch,
                });
                continue;
            }
        }
        if let Some(entry_b) = in_b {
            if dirs_a.contains(rel) {
                plan.conflicts.push(Operation::Conflict {
                    rel_path: rel.to_string(),
                    side_a: directory_entry(root_a, rel),
                    side_b: entry_b.clone(),
                    kind: ConflictKind::TypeMismatch,
                });
                continue;
            }
        }

        match (in_a, in_b) {
            (Some(a), Some(b)) => pair_decision(a, b, tol, options, &mut plan),
            (Some(a), None) => match options.direction {
                Direction::AToB | Direction::TwoWay => {
                    plan.copy_a_to_b.push(create_op(a, root_b));
                }
                // orphan on the destination side; handled by the deletion pass
                Direction::BToA => {}
            },
            (None, Some(b)) => match options.direction {
                Direction::BToA | Direction::TwoWay => {
                    plan.copy_b_to_a.push(create_op(b, root_a));
                }
                Direction::AToB => {}
            },
            (None, None) => unreachable!("rel path came from one of the maps"),
        }
    }

    if options.delete_orphaned {
        plan_deletions(&map_a, &map_b, options.direction, &mut plan);
    }

    finalize_counts(&mut plan);
    debug_assert!(plan.validate().is_ok());
    plan
}

/// Decision table for a rel path present on both sides
fn pair_decision(a: &FileEntry, b: &FileEntry, tol: i64, options: &SyncOptions, plan: &mut Plan) {
    let diff = a.mtime_ms - b.mtime_ms;

    match options.direction {
        Direction::AToB => {
            if diff > tol || (options.overwrite_newer && diff < -tol) {
                plan.copy_a_to_b.push(update_op(a, b));
            }
        }
        Direction::BToA => {
            if -diff > tol || (options.overwrite_newer && -diff < -tol) {
                plan.copy_b_to_a.push(update_op(b, a));
            }
        }
        Direction::TwoWay => {
            if diff.abs() <= tol {
                return;
            }
            match options.conflict_resolution {
                ConflictResolution::Newer => {
                    if diff > 0 {
                        plan.copy_a_to_b.push(update_op(a, b));
                    } else {
                        plan.copy_b_to_a.push(update_op(b, a));
                    }
                }
                ConflictResolution::PreferA => plan.copy_a_to_b.push(update_op(a, b)),
                ConflictResolution::PreferB => plan.copy_b_to_a.push(update_op(b, a)),
                ConflictResolution::Manual => plan.conflicts.push(Operation::Conflict {
                    rel_path: a.relative_path.clone(),
                    side_a: a.clone(),
                    side_b: b.clone(),
                    kind: ConflictKind::BothModified,
                }),
            }
        }
    }
}

/// Orphan pass: destination entries whose rel path is absent from the
/// filtered source. Candidates matching a safe-mode pattern are demoted
/// out of the executable set, carried as `Delete { safe: false }` for
/// the user to resolve.
fn plan_deletions(
    map_a: &HashMap<&str, &FileEntry>,
    map_b: &HashMap<&str, &FileEntry>,
    direction: Direction,
    plan: &mut Plan,
) {
    let (source, dest) = match direction {
        Direction::AToB => (map_a, map_b),
        Direction::BToA => (map_b, map_a),
        // two-way creates on both sides instead of deleting
        Direction::TwoWay => return,
    };

    let mut orphans: Vec<&&FileEntry> = dest
        .iter()
        .filter(|(rel, _)| !source.contains_key(*rel))
        .map(|(_, entry)| entry)
        .collect();
    orphans.sort_unstable_by(|x, y| x.relative_path.cmp(&y.relative_path));

    for entry in orphans {
        let safe = !matches_safe_mode_pattern(&entry.relative_path);
        let op = Operation::Delete {
            dest_abs: entry.absolute_path.clone(),
            rel_path: entry.relative_path.clone(),
            size: entry.size,
            dest_mtime_ms: entry.mtime_ms,
            safe,
        };
        if safe {
            plan.deletions.push(op);
        } else {
            plan.unsafe_deletes.push(op);
        }
    }
}

fn create_op(source: &FileEntry, dest_root: &Path) -> Operation {
    Operation::Create {
        source_abs: source.absolute_path.clone(),
        dest_abs: dest_root.join(&source.relative_path),
        rel_path: source.relative_path.clone(),
        size: source.size,
        source_mtime_ms: source.mtime_ms,
    }
}

fn update_op(source: &FileEntry, dest: &FileEntry) -> Operation {
    Operation::Update {
        source_abs: source.absolute_path.clone(),
        dest_abs: dest.absolute_path.clone(),
        rel_path: source.relative_path.clone(),
        size: source.size,
        source_mtime_ms: source.mtime_ms,
        dest_mtime_ms: dest.mtime_ms,
    }
}

fn directory_entry(root: &Path, rel: &str) -> FileEntry {
    FileEntry {
        absolute_path: root.join(rel),
        relative_path: rel.to_string(),
        size: 0,
        mtime_ms: 0,
        is_directory: true,
    }
}

fn finalize_counts(plan: &mut Plan) {
    let mut counts = PlanCounts::default();
    for op in plan.copy_a_to_b.iter().chain(plan.copy_b_to_a.iter()) {
        match op {
            Operation::Create { size, .. } => {
                counts.to_create += 1;
                counts.total_bytes += size;
            }
            Operation::Update { size, .. } => {
                counts.to_update += 1;
                counts.total_bytes += size;
            }
            _ => {}
        }
    }
    counts.to_delete = plan.deletions.len();
    // demoted deletions need the user's attention just like conflicts
    counts.conflicts = plan.conflicts.len() + plan.unsafe_deletes.len();
    plan.counts = counts;
}
