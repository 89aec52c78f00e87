/*!
 * Error types for bisync
 */

use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug)]
pub enum SyncError {
    /// Access denied or read-only target
    PermissionDenied(PathBuf),

    /// Source vanished or a required path does not exist
    PathMissing(PathBuf),

    /// Expected a directory, found a file
    NotADirectory(PathBuf),

    /// Expected a file, found a directory
    IsADirectory(PathBuf),

    /// Insufficient disk space on the destination volume
    InsufficientDiskSpace { required: u64, available: u64 },

    /// Post-copy hash comparison failed
    VerificationFailed {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Invalid path or malformed pattern
    Validation(String),

    /// Unreadable or invalid configuration
    Config(String),

    /// Named profile does not exist
    ProfileNotFound(String),

    /// Cancel signal observed; not a failure
    Aborted,

    /// Run stopped after too many per-file errors
    SyncFailed { errors: usize },

    /// Backup missing for a requested restore
    BackupMissing(String),

    /// I/O error
    Io(io::Error),
}

/// Error kind for classification, retry decisions, and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Permission,
    PathMissing,
    NotADirectory,
    IsADirectory,
    DiskSpace,
    Transient,
    VerificationFailed,
    Validation,
    Config,
    Aborted,
    Other,
}

impl ErrorKind {
    /// Whether operations failing with this kind are worth resubmitting
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::VerificationFailed)
    }

    /// One-line remediation hint appended to user-visible messages
    pub fn hint(self) -> &'static str {
        match self {
            ErrorKind::Permission => "check ownership and write permissions on the target",
            ErrorKind::PathMissing => "verify the path exists and is spelled correctly",
            ErrorKind::NotADirectory | ErrorKind::IsADirectory => {
                "a file and a directory share this path; resolve the mismatch manually"
            }
            ErrorKind::DiskSpace => "free space on the destination volume or narrow the sync scope",
            ErrorKind::Transient => {
                "the operation may succeed if repeated; check device availability"
            }
            ErrorKind::VerificationFailed => {
                "re-run the sync; a persistent mismatch suggests disk corruption"
            }
            ErrorKind::Validation => "correct the reported pattern or path and retry",
            ErrorKind::Config => "fix or remove the settings file; defaults are substituted",
            ErrorKind::Aborted => "the run was cancelled; re-run to finish remaining files",
            ErrorKind::Other => "inspect the underlying I/O error for details",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Permission => "permission",
            ErrorKind::PathMissing => "path-missing",
            ErrorKind::NotADirectory => "not-a-directory",
            ErrorKind::IsADirectory => "is-a-directory",
            ErrorKind::DiskSpace => "disk-space",
            ErrorKind::Transient => "transient",
            ErrorKind::VerificationFailed => "verification-failed",
            ErrorKind::Validation => "validation",
            ErrorKind::Config => "config",
            ErrorKind::Aborted => "aborted",
            ErrorKind::Other => "io",
        };
        write!(f, "{}", name)
    }
}

impl SyncError {
    /// Classify this error into the reporting taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::PermissionDenied(_) => ErrorKind::Permission,
            SyncError::PathMissing(_) => ErrorKind::PathMissing,
            SyncError::NotADirectory(_) => ErrorKind::NotADirectory,
            SyncError::IsADirectory(_) => ErrorKind::IsADirectory,
            SyncError::InsufficientDiskSpace { .. } => ErrorKind::DiskSpace,
            SyncError::VerificationFailed { .. } => ErrorKind::VerificationFailed,
            SyncError::Validation(_) => ErrorKind::Validation,
            SyncError::Config(_) => ErrorKind::Config,
            SyncError::ProfileNotFound(_) => ErrorKind::Config,
            SyncError::Aborted => ErrorKind::Aborted,
            SyncError::SyncFailed { .. } => ErrorKind::Other,
            SyncError::BackupMissing(_) => ErrorKind::Validation,
            SyncError::Io(err) => classify_io(err),
        }
    }

    /// Whether the controller should resubmit the failing operation
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Exit code for a CLI collaborator driving the engine
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::Validation(_) => 2,
            SyncError::ProfileNotFound(_) => 3,
            SyncError::PathMissing(_) => 4,
            SyncError::SyncFailed { .. } => 5,
            SyncError::PermissionDenied(_) => 6,
            SyncError::Config(_) => 7,
            SyncError::Io(err) if classify_io(err) == ErrorKind::Permission => 6,
            SyncError::Io(err) if classify_io(err) == ErrorKind::PathMissing => 4,
            _ => 1,
        }
    }

    /// Full user-facing message: classification, offending path, remediation hint
    pub fn user_message(&self) -> String {
        format!("[{}] {} ({})", self.kind(), self, self.kind().hint())
    }
}

/// Map an I/O error onto the taxonomy
fn classify_io(err: &io::Error) -> ErrorKind {
    use io::ErrorKind::*;
    match err.kind() {
        PermissionDenied => ErrorKind::Permission,
        NotFound => ErrorKind::PathMissing,
        NotADirectory => ErrorKind::NotADirectory,
        IsADirectory => ErrorKind::IsADirectory,
        StorageFull => ErrorKind::DiskSpace,
        TimedOut | Interrupted | WouldBlock | BrokenPipe | ConnectionReset | ConnectionAborted
        | WriteZero => ErrorKind::Transient,
        InvalidInput | InvalidData => ErrorKind::Validation,
        _ => ErrorKind::Other,
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::PermissionDenied(path) => {
                write!(f, "Permission denied: {}", path.display())
            }
            SyncError::PathMissing(path) => {
                write!(f, "Path not found: {}", path.display())
            }
            SyncError::NotADirectory(path) => {
                write!(f, "Not a directory: {}", path.display())
            }
            SyncError::IsADirectory(path) => {
                write!(f, "Is a directory: {}", path.display())
            }
            SyncError::InsufficientDiskSpace {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient disk space: {} bytes required, {} bytes available",
                    required, available
                )
            }
            SyncError::VerificationFailed {
                path,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Verification failed for {}: expected {}, got {}",
                    path.display(),
                    expected,
                    actual
                )
            }
            SyncError::Validation(msg) => {
                write!(f, "Validation error: {}", msg)
            }
            SyncError::Config(msg) => {
                write!(f, "Configuration error: {}", msg)
            }
            SyncError::ProfileNotFound(name) => {
                write!(f, "Profile not found: {}", name)
            }
            SyncError::Aborted => {
                write!(f, "Sync aborted")
            }
            SyncError::SyncFailed { errors } => {
                write!(f, "Sync failed with {} file errors", errors)
            }
            SyncError::BackupMissing(rel) => {
                write!(f, "No backup recorded for {}", rel)
            }
            SyncError::Io(err) => {
                write!(f, "I/O error: {}", err)
            }
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for SyncError {
    fn from(err: io::Error) -> Self {
        SyncError::Io(err)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Config(format!("JSON error: {}", err))
    }
}
