/*!
 * Logging and tracing initialization, plus the rotating NDJSON error log
 */

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::error::{ErrorKind, Result, SyncError};

/// Initialize compact logging to stdout
pub fn init_logging(verbose: bool) -> Result<()> {
    let default_filter = if verbose { "bisync=debug" } else { "bisync=info" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| SyncError::Config(format!("failed to create log filter: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| SyncError::Config(format!("failed to initialize logging: {}", e)))?;

    Ok(())
}

/// Initialize JSON logging to a file
pub fn init_file_logging(log_path: &Path) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("bisync=info"))
        .map_err(|e| SyncError::Config(format!("failed to create log filter: {}", e)))?;

    let file = File::create(log_path)
        .map_err(|e| SyncError::Config(format!("failed to create log file: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_writer(Arc::new(file))
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_ansi(false)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| SyncError::Config(format!("failed to initialize logging: {}", e)))?;

    Ok(())
}

/// Rotation threshold for the error log
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Rotated generations kept on disk
const MAX_GENERATIONS: u32 = 5;

/// One persisted error entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub rel_path: String,
    pub kind: ErrorKind,
    pub attempts: u32,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(rel_path: &str, kind: ErrorKind, attempts: u32, message: String) -> Self {
        Self {
            timestamp: Utc::now(),
            rel_path: rel_path.to_string(),
            kind,
            attempts,
            message,
        }
    }
}

/// Newline-delimited JSON error log under `<state_dir>/logs/`, rotated at
/// 10 MiB keeping five generations (`error.log.1` … `error.log.5`).
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("logs").join("error.log"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, rotating first when the log is full
    pub fn append(&self, record: &ErrorRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.rotate_if_needed()?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }

    /// Read back every record in the current generation
    pub fn read_current(&self) -> Result<Vec<ErrorRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        let mut records = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(record) = serde_json::from_str(line) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn rotate_if_needed(&self) -> Result<()> {
        let size = match fs::metadata(&self.path) {
            Ok(metadata) => metadata.len(),
            Err(_) => return Ok(()),
        };
        if size < MAX_LOG_SIZE {
            return Ok(());
        }

        // shift error.log.N up, dropping the oldest
        for generation in (1..MAX_GENERATIONS).rev() {
            let from = self.generation_path(generation);
            if from.exists() {
                fs::rename(&from, self.generation_path(generation + 1))?;
            }
        }
        fs::rename(&self.path, self.generation_path(1))?;
        Ok(())
    }

    fn generation_path(&self, generation: u32) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "error.log".to_string());
        name.push_str(&format!(".{}", generation));
        self.path.with_file_name(name)
    }
}

/// Initialize logging with test-friendly defaults
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bisync=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}
