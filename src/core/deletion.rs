/*!
 * Deletion management: orphan analysis, backup-before-delete, staging,
 * restore, and retention cleanup
 *
 * Backups land under `<state_dir>/deletion-history/<YYYY-MM-DD>/` as
 * `<epoch>-<basename>` with a `.meta.json` sidecar. Deletion records are
 * appended to `records.jsonl` and never rewritten. A file is deleted
 * only after its backup completed.
 */

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::metadata::set_mtime_millis;
use super::planner::Operation;
use super::progress::{OperationResult, Outcome, SkipReason};
use super::scanner::FileEntry;
use crate::config::SyncOptions;
use crate::error::{Result, SyncError};

const HISTORY_DIR: &str = "deletion-history";
const STAGING_DIR: &str = "staging";
const RECORDS_FILE: &str = "records.jsonl";

/// Paths that are never deleted silently: VCS metadata, host system
/// directories, and executable or library files inside system paths.
pub fn matches_safe_mode_pattern(rel_path: &str) -> bool {
    let rel = rel_path.trim_start_matches('/');
    let segments: Vec<&str> = rel.split('/').collect();

    if segments
        .iter()
        .any(|s| matches!(*s, ".git" | ".svn" | ".hg"))
    {
        return true;
    }

    let system_roots: &[&str] = if cfg!(windows) {
        &[
            "Windows",
            "Program Files",
            "Program Files (x86)",
            "ProgramData",
            "System Volume Information",
            "$RECYCLE.BIN",
        ]
    } else {
        &["etc", "usr", "bin", "sbin", "lib", "lib64", "boot", "var"]
    };

    let first = segments.first().copied().unwrap_or_default();
    if system_roots.iter().any(|root| first == *root) {
        return true;
    }

    // binary artifacts anywhere under a path that looks system-owned
    let binary_exts: &[&str] = if cfg!(windows) {
        &["exe", "dll", "sys", "msi"]
    } else {
        &["so", "ko"]
    };
    if let Some(ext) = rel.rsplit('.').next() {
        if binary_exts.contains(&ext.to_ascii_lowercase().as_str())
            && segments
                .iter()
                .any(|s| matches!(*s, "system" | "System" | "System32" | "SysWOW64"))
        {
            return true;
        }
    }

    false
}

/// How a deletion was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMethod {
    /// Moved into the staging area; recoverable without a backup
    Recycled,
    /// Unlinked from the filesystem
    Permanent,
    /// Simulated only
    DryRun,
    /// The delete (or its backup) failed
    Failed,
}

/// Append-only record of one deletion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub rel_path: String,
    pub method: DeleteMethod,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sidecar metadata written next to every backup file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub original_abs: PathBuf,
    pub rel_path: String,
    pub size: u64,
    pub original_mtime_ms: i64,
    pub backup_abs: PathBuf,
    pub recorded_at: DateTime<Utc>,
    pub reason: String,
}

/// Classified orphans: safe to delete vs. demoted out of the
/// executable set by a safe-mode pattern match
#[derive(Debug, Default)]
pub struct DeletionPlan {
    pub delete: Vec<FileEntry>,
    pub unsafe_deletes: Vec<FileEntry>,
}

/// Outcome of executing one delete operation
#[derive(Debug)]
pub struct DeletionOutcome {
    pub record: DeletionRecord,
    pub result: OperationResult,
}

pub struct DeletionManager {
    history_dir: PathBuf,
    staging_dir: PathBuf,
}

impl DeletionManager {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            history_dir: state_dir.join(HISTORY_DIR),
            staging_dir: state_dir.join(STAGING_DIR),
        }
    }

    /// Classify destination entries absent from the source
    pub fn analyze(&self, source_rels: &HashSet<String>, dest_entries: &[FileEntry]) -> DeletionPlan {
        let mut plan = DeletionPlan::default();
        for entry in dest_entries {
            if source_rels.contains(&entry.relative_path) {
                continue;
            }
            if matches_safe_mode_pattern(&entry.relative_path) {
                plan.unsafe_deletes.push(entry.clone());
            } else {
                plan.delete.push(entry.clone());
            }
        }
        plan
    }

    /// Execute one planned Delete operation
    pub fn execute(&self, op: &Operation, options: &SyncOptions) -> DeletionOutcome {
        let started = Instant::now();
        let (dest_abs, rel_path, size, dest_mtime_ms) = match op {
            Operation::Delete {
                dest_abs,
                rel_path,
                size,
                dest_mtime_ms,
                ..
            } => (dest_abs, rel_path.as_str(), *size, *dest_mtime_ms),
            other => {
                let record = self.record(other.rel_path(), DeleteMethod::Failed, false, Some("not a delete operation".to_string()));
                return DeletionOutcome {
                    record,
                    result: failure_result(other.rel_path(), crate::error::ErrorKind::Validation, started),
                };
            }
        };

        if options.dry_run {
            let record = self.record(rel_path, DeleteMethod::DryRun, false, None);
            return DeletionOutcome {
                record,
                result: OperationResult {
                    rel_path: rel_path.to_string(),
                    outcome: Outcome::Skipped(SkipReason::DryRun),
                    duration_ms: started.elapsed().as_millis() as u64,
                    bytes_transferred: 0,
                    attempts: 1,
                },
            };
        }

        // the backup must exist before anything destructive happens
        let mut backed_up = false;
        if options.backup_deleted {
            match self.backup(dest_abs, rel_path, size, dest_mtime_ms) {
                Ok(_) => backed_up = true,
                Err(e) => {
                    warn!("backup of {} failed, keeping file: {}", rel_path, e);
                    let record =
                        self.record(rel_path, DeleteMethod::Failed, false, Some(e.to_string()));
                    return DeletionOutcome {
                        record,
                        result: failure_result(rel_path, e.kind(), started),
                    };
                }
            }
        }

        let delete_result = if options.use_staging {
            self.stage(dest_abs, rel_path).map(|_| DeleteMethod::Recycled)
        } else {
            fs::remove_file(dest_abs)
                .map(|_| DeleteMethod::Permanent)
                .map_err(SyncError::from)
        };

        match delete_result {
            Ok(method) => {
                let recoverable = backed_up || method == DeleteMethod::Recycled;
                let record = self.record(rel_path, method, recoverable, None);
                DeletionOutcome {
                    record,
                    result: OperationResult {
                        rel_path: rel_path.to_string(),
                        outcome: Outcome::Success,
                        duration_ms: started.elapsed().as_millis() as u64,
                        bytes_transferred: 0,
                        attempts: 1,
                    },
                }
            }
            Err(e) => {
                let record = self.record(rel_path, DeleteMethod::Failed, backed_up, Some(e.to_string()));
                DeletionOutcome {
                    record,
                    result: failure_result(rel_path, e.kind(), started),
                }
            }
        }
    }

    /// Copy the newest backup of `rel_path` back to its recorded location
    /// (or `target`), re-applying the original mtime
    pub fn restore(&self, rel_path: &str, target: Option<&Path>) -> Result<PathBuf> {
        if let Some(backup) = self.find_latest_backup(rel_path)? {
            let destination = target
                .map(Path::to_path_buf)
                .unwrap_or_else(|| backup.original_abs.clone());
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&backup.backup_abs, &destination)?;
            set_mtime_millis(&destination, backup.original_mtime_ms)?;
            return Ok(destination);
        }

        // staged deletions are recoverable without a backup record
        let staged = self.staging_dir.join(rel_path);
        if staged.exists() {
            if let Some(target) = target {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::rename(&staged, target)
                    .or_else(|_| fs::copy(&staged, target).map(|_| ()))?;
                return Ok(target.to_path_buf());
            }
            return Err(SyncError::Validation(format!(
                "staged file {} has no recorded destination; pass a target",
                rel_path
            )));
        }

        Err(SyncError::BackupMissing(rel_path.to_string()))
    }

    /// Remove dated backup directories older than the retention window.
    /// Returns how many directories were removed.
    pub fn cleanup(&self, retention_days: u32) -> Result<usize> {
        if !self.history_dir.exists() {
            return Ok(0);
        }
        let today = Utc::now().date_naive();
        let mut removed = 0;

        for entry in fs::read_dir(&self.history_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Ok(date) = NaiveDate::parse_from_str(name, "%Y-%m-%d") else {
                continue;
            };
            let age = today.signed_duration_since(date);
            if age.num_days() > retention_days as i64 {
                fs::remove_dir_all(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// All deletion records, oldest first
    pub fn records(&self) -> Result<Vec<DeletionRecord>> {
        let path = self.history_dir.join(RECORDS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)?;
        let mut records = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!("skipping malformed deletion record: {}", e),
            }
        }
        Ok(records)
    }

    fn backup(
        &self,
        dest_abs: &Path,
        rel_path: &str,
        size: u64,
        dest_mtime_ms: i64,
    ) -> Result<BackupRecord> {
        let now = Utc::now();
        let date_dir = self.history_dir.join(now.format("%Y-%m-%d").to_string());
        fs::create_dir_all(&date_dir)?;

        let basename = dest_abs
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let mut backup_abs = date_dir.join(format!("{}-{}", now.timestamp_millis(), basename));
        let mut bump = 1;
        while backup_abs.exists() {
            backup_abs = date_dir.join(format!(
                "{}-{}-{}",
                now.timestamp_millis(),
                bump,
                basename
            ));
            bump += 1;
        }

        fs::copy(dest_abs, &backup_abs)?;

        let record = BackupRecord {
            original_abs: dest_abs.to_path_buf(),
            rel_path: rel_path.to_string(),
            size,
            original_mtime_ms: dest_mtime_ms,
            backup_abs: backup_abs.clone(),
            recorded_at: now,
            reason: "pre-delete backup".to_string(),
        };

        let meta_path = sidecar_path(&backup_abs);
        fs::write(&meta_path, serde_json::to_string_pretty(&record)?)?;
        Ok(record)
    }

    fn stage(&self, dest_abs: &Path, rel_path: &str) -> Result<()> {
        let staged = self.staging_dir.join(rel_path);
        if let Some(parent) = staged.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::rename(dest_abs, &staged) {
            Ok(()) => Ok(()),
            // cross-device move: fall back to copy + unlink
            Err(_) => {
                fs::copy(dest_abs, &staged)?;
                fs::remove_file(dest_abs)?;
                Ok(())
            }
        }
    }

    fn record(
        &self,
        rel_path: &str,
        method: DeleteMethod,
        recoverable: bool,
        error: Option<String>,
    ) -> DeletionRecord {
        let now = Utc::now();
        let record = DeletionRecord {
            id: format!("del-{:x}-{:04x}", now.timestamp_millis(), rand::random::<u16>()),
            timestamp: now,
            rel_path: rel_path.to_string(),
            method,
            recoverable,
            error,
        };
        if let Err(e) = self.append_record(&record) {
            warn!("failed to append deletion record: {}", e);
        }
        record
    }

    fn append_record(&self, record: &DeletionRecord) -> Result<()> {
        use std::io::Write;
        fs::create_dir_all(&self.history_dir)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.history_dir.join(RECORDS_FILE))?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }

    fn find_latest_backup(&self, rel_path: &str) -> Result<Option<BackupRecord>> {
        if !self.history_dir.exists() {
            return Ok(None);
        }
        let mut latest: Option<BackupRecord> = None;

        for day in fs::read_dir(&self.history_dir)? {
            let day = day?;
            if !day.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(day.path())? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Ok(content) = fs::read_to_string(&path) else {
                    continue;
                };
                let Ok(record) = serde_json::from_str::<BackupRecord>(&content) else {
                    continue;
                };
                if record.rel_path != rel_path {
                    continue;
                }
                let newer = latest
                    .as_ref()
                    .map(|cur| record.recorded_at > cur.recorded_at)
                    .unwrap_or(true);
                if newer && record.backup_abs.exists() {
                    latest = Some(record);
                }
            }
        }
        Ok(latest)
    }
}

fn sidecar_path(backup_abs: &Path) -> PathBuf {
    let mut name = backup_abs
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".meta.json");
    backup_abs.with_file_name(name)
}

fn failure_result(
    rel_path: &str,
    kind: crate::error::ErrorKind,
    started: Instant,
) -> OperationResult {
    OperationResult {
        rel_path: rel_path.to_string(),
        outcome: Outcome::Failure(kind),
        duration_ms: started.elapsed().as_millis() as u64,
        bytes_transferred: 0,
        attempts: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metadata::mtime_millis;
    use tempfile::tempdir;

    fn delete_op(dest: &Path, rel: &str, mtime_ms: i64) -> Operation {
        Operation::Delete {
            dest_abs: dest.to_path_buf(),
            rel_path: rel.to_string(),
            size: std::fs::metadata(dest).map(|m| m.len()).unwrap_or(0),
            dest_mtime_ms: mtime_ms,
            safe: true,
        }
    }

    #[test]
    fn test_safe_mode_patterns() {
        assert!(matches_safe_mode_pattern(".git/config"));
        assert!(matches_safe_mode_pattern("project/.git/HEAD"));
        assert!(matches_safe_mode_pattern(".svn/entries"));
        assert!(!matches_safe_mode_pattern("src/main.rs"));
        assert!(!matches_safe_mode_pattern("gitlog.txt"));

        #[cfg(not(windows))]
        {
            assert!(matches_safe_mode_pattern("etc/passwd"));
            assert!(matches_safe_mode_pattern("usr/share/doc"));
            assert!(!matches_safe_mode_pattern("my-etc/notes.txt"));
        }
    }

    #[test]
    fn test_analyze_classifies_orphans() {
        let state = tempdir().unwrap();
        let manager = DeletionManager::new(state.path());

        let source: HashSet<String> = ["kept.txt".to_string()].into_iter().collect();
        let dest = vec![
            FileEntry {
                absolute_path: PathBuf::from("/b/kept.txt"),
                relative_path: "kept.txt".to_string(),
                size: 1,
                mtime_ms: 0,
                is_directory: false,
            },
            FileEntry {
                absolute_path: PathBuf::from("/b/orphan.txt"),
                relative_path: "orphan.txt".to_string(),
                size: 1,
                mtime_ms: 0,
                is_directory: false,
            },
            FileEntry {
                absolute_path: PathBuf::from("/b/.git/config"),
                relative_path: ".git/config".to_string(),
                size: 1,
                mtime_ms: 0,
                is_directory: false,
            },
        ];

        let plan = manager.analyze(&source, &dest);
        assert_eq!(plan.delete.len(), 1);
        assert_eq!(plan.delete[0].relative_path, "orphan.txt");
        assert_eq!(plan.unsafe_deletes.len(), 1);
        assert_eq!(plan.unsafe_deletes[0].relative_path, ".git/config");
    }

    #[test]
    fn test_backup_then_delete_then_restore() {
        let state = tempdir().unwrap();
        let tree = tempdir().unwrap();
        let manager = DeletionManager::new(state.path());

        let victim = tree.path().join("old.txt");
        fs::write(&victim, b"x").unwrap();
        crate::core::metadata::set_mtime_millis(&victim, 100_000).unwrap();

        let op = delete_op(&victim, "old.txt", 100_000);
        let options = SyncOptions::default();
        let outcome = manager.execute(&op, &options);

        assert!(outcome.result.is_success());
        assert_eq!(outcome.record.method, DeleteMethod::Permanent);
        assert!(outcome.record.recoverable);
        assert!(!victim.exists());

        let restored = manager.restore("old.txt", None).unwrap();
        assert_eq!(restored, victim);
        assert_eq!(fs::read(&victim).unwrap(), b"x");
        let ms = mtime_millis(&fs::metadata(&victim).unwrap());
        assert!((ms - 100_000).abs() < 1000);
    }

    #[test]
    fn test_backup_exists_before_delete() {
        let state = tempdir().unwrap();
        let tree = tempdir().unwrap();
        let manager = DeletionManager::new(state.path());

        let victim = tree.path().join("data.bin");
        fs::write(&victim, b"payload").unwrap();

        let op = delete_op(&victim, "data.bin", 0);
        manager.execute(&op, &SyncOptions::default());

        // exactly one backup with matching content and sidecar
        let mut found = None;
        for day in fs::read_dir(state.path().join(HISTORY_DIR)).unwrap() {
            let day = day.unwrap();
            if !day.file_type().unwrap().is_dir() {
                continue;
            }
            for entry in fs::read_dir(day.path()).unwrap() {
                let path = entry.unwrap().path();
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    let record: BackupRecord =
                        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
                    assert_eq!(record.size, 7);
                    assert_eq!(fs::read(&record.backup_abs).unwrap(), b"payload");
                    found = Some(record);
                }
            }
        }
        assert!(found.is_some());
    }

    #[test]
    fn test_staging_keeps_file_recoverable() {
        let state = tempdir().unwrap();
        let tree = tempdir().unwrap();
        let manager = DeletionManager::new(state.path());

        let victim = tree.path().join("sub/staged.txt");
        fs::create_dir_all(victim.parent().unwrap()).unwrap();
        fs::write(&victim, b"staged").unwrap();

        let options = SyncOptions {
            use_staging: true,
            backup_deleted: false,
            ..Default::default()
        };
        let op = delete_op(&victim, "sub/staged.txt", 0);
        let outcome = manager.execute(&op, &options);

        assert_eq!(outcome.record.method, DeleteMethod::Recycled);
        assert!(outcome.record.recoverable);
        assert!(!victim.exists());
        assert_eq!(
            fs::read(state.path().join(STAGING_DIR).join("sub/staged.txt")).unwrap(),
            b"staged"
        );

        let target = tree.path().join("sub/staged.txt");
        manager.restore("sub/staged.txt", Some(&target)).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"staged");
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let state = tempdir().unwrap();
        let tree = tempdir().unwrap();
        let manager = DeletionManager::new(state.path());

        let victim = tree.path().join("kept.txt");
        fs::write(&victim, b"still here").unwrap();

        let options = SyncOptions {
            dry_run: true,
            ..Default::default()
        };
        let outcome = manager.execute(&delete_op(&victim, "kept.txt", 0), &options);

        assert!(matches!(
            outcome.result.outcome,
            Outcome::Skipped(SkipReason::DryRun)
        ));
        assert_eq!(outcome.record.method, DeleteMethod::DryRun);
        assert!(victim.exists());
    }

    #[test]
    fn test_records_are_append_only() {
        let state = tempdir().unwrap();
        let tree = tempdir().unwrap();
        let manager = DeletionManager::new(state.path());

        for i in 0..3 {
            let victim = tree.path().join(format!("f{}.txt", i));
            fs::write(&victim, b"x").unwrap();
            manager.execute(
                &delete_op(&victim, &format!("f{}.txt", i), 0),
                &SyncOptions::default(),
            );
        }

        let records = manager.records().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].rel_path, "f0.txt");
        assert_eq!(records[2].rel_path, "f2.txt");
        assert!(records.iter().all(|r| r.method == DeleteMethod::Permanent));
    }

    #[test]
    fn test_restore_without_backup_fails() {
        let state = tempdir().unwrap();
        let manager = DeletionManager::new(state.path());
        let err = manager.restore("never-deleted.txt", None).unwrap_err();
        assert!(matches!(err, SyncError::BackupMissing(_)));
    }

    #[test]
    fn test_cleanup_removes_expired_days() {
        let state = tempdir().unwrap();
        let manager = DeletionManager::new(state.path());

        let history = state.path().join(HISTORY_DIR);
        fs::create_dir_all(history.join("2000-01-01")).unwrap();
        let recent = Utc::now().format("%Y-%m-%d").to_string();
        fs::create_dir_all(history.join(&recent)).unwrap();

        let removed = manager.cleanup(30).unwrap();
        assert_eq!(removed, 1);
        assert!(!history.join("2000-01-01").exists());
        assert!(history.join(&recent).exists());
    }
}
