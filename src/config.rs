/*!
 * Configuration structures and defaults for bisync
 *
 * The engine accepts `SyncOptions` by value; persistence of profiles and
 * settings lives in the state directory and is consumed, not produced, by
 * the core.
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::thread;

use crate::error::{Result, SyncError};

/// Default small-file threshold: files at or above stream, below copy whole
pub const DEFAULT_SMALL_FILE_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Sync direction policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Mirror A onto B
    AToB,
    /// Mirror B onto A
    BToA,
    /// Reconcile both sides
    TwoWay,
}

impl Default for Direction {
    fn default() -> Self {
        Self::TwoWay
    }
}

/// How two-way mtime conflicts are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Newer side wins
    Newer,
    /// Side A always wins
    PreferA,
    /// Side B always wins
    PreferB,
    /// Emit a conflict operation and leave it unexecuted
    Manual,
}

impl Default for ConflictResolution {
    fn default() -> Self {
        Self::Manual
    }
}

/// Worker-count presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceMode {
    Safe,
    Balanced,
    Fast,
    Max,
}

impl Default for PerformanceMode {
    fn default() -> Self {
        Self::Balanced
    }
}

impl PerformanceMode {
    /// Number of copy workers for this mode
    pub fn worker_count(self) -> usize {
        match self {
            PerformanceMode::Safe => 1,
            PerformanceMode::Balanced => 4,
            PerformanceMode::Fast => 8,
            PerformanceMode::Max => logical_cpus(),
        }
    }
}

/// How symbolic links are treated during a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymlinkPolicy {
    /// Ignore symlinks entirely
    Skip,
    /// Report symlinks in the scan outcome; never follow or plan them
    Record,
}

impl Default for SymlinkPolicy {
    fn default() -> Self {
        Self::Skip
    }
}

/// Controller-level retry tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per operation, first try included
    pub max_attempts: u32,
    /// Base backoff delay; doubles per attempt
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

/// Main configuration for a sync run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Direction policy
    pub direction: Direction,

    /// Two-way conflict resolution policy
    pub conflict_resolution: ConflictResolution,

    /// Worker-count preset
    pub performance_mode: PerformanceMode,

    /// Symlink treatment
    pub symlink_policy: SymlinkPolicy,

    /// Timestamp quantization tolerance in milliseconds
    pub mtime_tolerance_ms: u64,

    /// Delete destination files absent from the source
    pub delete_orphaned: bool,

    /// One-way sync may overwrite a destination that is newer than the source
    pub overwrite_newer: bool,

    /// Verify copies with a post-copy SHA-256 comparison
    pub verify: bool,

    /// Plan and report without touching the filesystem
    pub dry_run: bool,

    /// Copy files to the deletion history before destructive deletes
    pub backup_deleted: bool,

    /// Move deletions into the staging area instead of unlinking
    pub use_staging: bool,

    /// Max operations per small-file batch
    pub batch_size: usize,

    /// Size at which the executor switches to the streaming path
    pub small_file_threshold: u64,

    /// Batches in flight ahead of the workers
    pub queue_depth: usize,

    /// Abort the run once this many per-file errors accumulate
    pub max_errors: usize,

    /// Suppress per-file failures from listeners (still logged)
    pub skip_errors: bool,

    /// Recursion cap for loop prevention
    pub max_scan_depth: usize,

    /// Retry policy for retryable failures
    pub retry: RetryPolicy,

    /// Inline ignore rules, applied after `.syncignore` contents
    pub ignore_rules: Vec<String>,

    /// Allowed extensions (lowercase, no dot); None disables the predicate
    pub include_extensions: Option<Vec<String>>,

    /// File size range predicate
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,

    /// Modification time range predicate (UTC millis)
    pub modified_after_ms: Option<i64>,
    pub modified_before_ms: Option<i64>,

    /// Additive name patterns; a file must match one when any are set
    pub name_patterns: Vec<String>,

    /// State directory override
    pub state_dir: Option<PathBuf>,

    /// Days deletion backups are retained
    pub backup_retention_days: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            direction: Direction::default(),
            conflict_resolution: ConflictResolution::default(),
            performance_mode: PerformanceMode::default(),
            symlink_policy: SymlinkPolicy::default(),
            mtime_tolerance_ms: 1000,
            delete_orphaned: false,
            overwrite_newer: false,
            verify: false,
            dry_run: false,
            backup_deleted: true,
            use_staging: false,
            batch_size: 50,
            small_file_threshold: DEFAULT_SMALL_FILE_THRESHOLD,
            queue_depth: 4,
            max_errors: 50,
            skip_errors: false,
            max_scan_depth: 64,
            retry: RetryPolicy::default(),
            ignore_rules: Vec::new(),
            include_extensions: None,
            min_size: None,
            max_size: None,
            modified_after_ms: None,
            modified_before_ms: None,
            name_patterns: Vec::new(),
            state_dir: None,
            backup_retention_days: 30,
        }
    }
}

impl SyncOptions {
    /// Resolve the state directory, creating nothing
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(default_state_dir)
    }
}

/// Default state directory: `~/.bisync`
pub fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".bisync")
}

fn logical_cpus() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or_else(|e| {
        tracing::warn!("failed to detect available parallelism: {}, using 1", e);
        1
    })
}

/// A named sync configuration stored in `profiles.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncProfile {
    pub name: String,
    pub root_a: PathBuf,
    pub root_b: PathBuf,
    #[serde(default)]
    pub options: SyncOptions,
}

/// Load all profiles from `<state_dir>/profiles.json`
pub fn load_profiles(state_dir: &Path) -> Result<Vec<SyncProfile>> {
    let path = state_dir.join("profiles.json");
    let content = std::fs::read_to_string(&path)
        .map_err(|e| SyncError::Config(format!("failed to read {}: {}", path.display(), e)))?;
    let profiles: Vec<SyncProfile> = serde_json::from_str(&content)?;
    Ok(profiles)
}

/// Look up a profile by name
pub fn find_profile(state_dir: &Path, name: &str) -> Result<SyncProfile> {
    let profiles = load_profiles(state_dir)?;
    profiles
        .into_iter()
        .find(|p| p.name == name)
        .ok_or_else(|| SyncError::ProfileNotFound(name.to_string()))
}

/// Persisted tunables loaded from `<state_dir>/settings.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub performance_mode: Option<PerformanceMode>,
    pub batch_size: Option<usize>,
    pub queue_depth: Option<usize>,
    pub mtime_tolerance_ms: Option<u64>,
    pub max_errors: Option<usize>,
    pub verify: Option<bool>,
    pub backup_retention_days: Option<u32>,
    pub max_scan_depth: Option<usize>,
}

impl Settings {
    /// Load settings from disk
    pub fn load(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join("settings.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| SyncError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load settings, substituting defaults when the file is missing or invalid
    pub fn load_or_default(state_dir: &Path) -> Self {
        let path = state_dir.join("settings.json");
        if !path.exists() {
            return Self::default();
        }
        match Self::load(state_dir) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("unreadable settings, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// Apply these settings over a set of options
    pub fn apply_to(&self, options: &mut SyncOptions) {
        if let Some(mode) = self.performance_mode {
            options.performance_mode = mode;
        }
        if let Some(batch_size) = self.batch_size {
            options.batch_size = batch_size;
        }
        if let Some(queue_depth) = self.queue_depth {
            options.queue_depth = queue_depth;
        }
        if let Some(tol) = self.mtime_tolerance_ms {
            options.mtime_tolerance_ms = tol;
        }
        if let Some(max_errors) = self.max_errors {
            options.max_errors = max_errors;
        }
        if let Some(verify) = self.verify {
            options.verify = verify;
        }
        if let Some(days) = self.backup_retention_days {
            options.backup_retention_days = days;
        }
        if let Some(depth) = self.max_scan_depth {
            options.max_scan_depth = depth;
        }
    }
}

/// Boundary hook for tools that address files in another path namespace
/// (e.g. a Windows host presenting `\\wsl$`-style paths for a Linux root).
/// The engine itself only ever consumes host-canonical absolute paths.
pub trait PathMapper: Send + Sync {
    /// Translate a foreign-namespace path into a host-canonical one
    fn to_native(&self, foreign: &str) -> Result<PathBuf>;
}

/// Mapper for tools already speaking the host namespace
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityMapper;

impl PathMapper for IdentityMapper {
    fn to_native(&self, foreign: &str) -> Result<PathBuf> {
        if foreign.is_empty() {
            return Err(SyncError::Validation("empty path".to_string()));
        }
        Ok(PathBuf::from(foreign))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_options() {
        let options = SyncOptions::default();
        assert_eq!(options.mtime_tolerance_ms, 1000);
        assert_eq!(options.batch_size, 50);
        assert_eq!(options.small_file_threshold, 10 * 1024 * 1024);
        assert_eq!(options.max_errors, 50);
        assert!(options.backup_deleted);
        assert!(!options.delete_orphaned);
        assert_eq!(options.retry.max_attempts, 3);
    }

    #[test]
    fn test_worker_counts() {
        assert_eq!(PerformanceMode::Safe.worker_count(), 1);
        assert_eq!(PerformanceMode::Balanced.worker_count(), 4);
        assert_eq!(PerformanceMode::Fast.worker_count(), 8);
        assert!(PerformanceMode::Max.worker_count() >= 1);
    }

    #[test]
    fn test_options_roundtrip() {
        let mut options = SyncOptions::default();
        options.direction = Direction::AToB;
        options.delete_orphaned = true;

        let json = serde_json::to_string(&options).unwrap();
        let back: SyncOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back.direction, Direction::AToB);
        assert!(back.delete_orphaned);
    }

    #[test]
    fn test_options_deserialize_partial() {
        let back: SyncOptions = serde_json::from_str(r#"{"direction":"a_to_b"}"#).unwrap();
        assert_eq!(back.direction, Direction::AToB);
        assert_eq!(back.batch_size, 50);
    }

    #[test]
    fn test_profile_lookup() {
        let dir = tempdir().unwrap();
        let profiles = vec![SyncProfile {
            name: "work".to_string(),
            root_a: PathBuf::from("/a"),
            root_b: PathBuf::from("/b"),
            options: SyncOptions::default(),
        }];
        std::fs::write(
            dir.path().join("profiles.json"),
            serde_json::to_string(&profiles).unwrap(),
        )
        .unwrap();

        let found = find_profile(dir.path(), "work").unwrap();
        assert_eq!(found.root_a, PathBuf::from("/a"));

        let missing = find_profile(dir.path(), "home");
        assert!(matches!(missing, Err(SyncError::ProfileNotFound(_))));
    }

    #[test]
    fn test_settings_substitute_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("settings.json"), "{not json").unwrap();

        let settings = Settings::load_or_default(dir.path());
        assert!(settings.batch_size.is_none());
    }

    #[test]
    fn test_settings_apply() {
        let settings = Settings {
            batch_size: Some(10),
            verify: Some(true),
            ..Default::default()
        };
        let mut options = SyncOptions::default();
        settings.apply_to(&mut options);
        assert_eq!(options.batch_size, 10);
        assert!(options.verify);
        assert_eq!(options.queue_depth, 4);
    }

    #[test]
    fn test_identity_mapper() {
        let mapper = IdentityMapper;
        assert_eq!(
            mapper.to_native("/some/path").unwrap(),
            PathBuf::from("/some/path")
        );
        assert!(mapper.to_native("").is_err());
    }
}
