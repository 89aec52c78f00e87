/*!
 * Per-file copy execution
 *
 * Small files go through the platform copy primitive; files at or above
 * the configured threshold stream through a fixed buffer with pause and
 * cancel gates at every chunk boundary. On completion the destination
 * mtime is set to the source mtime, and an optional SHA-256 comparison
 * verifies the copy. The executor never retries; that is the
 * controller's job.
 */

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};

use super::control::ControlSignals;
use super::metadata::set_mtime_millis;
use super::planner::Operation;
use crate::config::SyncOptions;
use crate::error::{Result, SyncError};

/// Streaming copy buffer size
pub const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Execute one Create or Update operation. Progress deltas are reported
/// through `on_progress` at every ≥5% step and at completion. Returns the
/// bytes written, or `Aborted` when the cancel flag interrupts the stream.
pub fn execute_copy(
    op: &Operation,
    options: &SyncOptions,
    signals: &ControlSignals,
    on_progress: &mut dyn FnMut(u64),
) -> Result<u64> {
    let (source_abs, dest_abs, size, source_mtime_ms) = match op {
        Operation::Create {
            source_abs,
            dest_abs,
            size,
            source_mtime_ms,
            ..
        }
        | Operation::Update {
            source_abs,
            dest_abs,
            size,
            source_mtime_ms,
            ..
        } => (source_abs, dest_abs, *size, *source_mtime_ms),
        other => {
            return Err(SyncError::Validation(format!(
                "not a copy operation: {}",
                other.rel_path()
            )))
        }
    };

    // plan-time entries can race against the filesystem
    if !source_abs.exists() {
        return Err(SyncError::PathMissing(source_abs.clone()));
    }

    if let Some(parent) = dest_abs.parent() {
        std::fs::create_dir_all(parent).map_err(|e| path_error(parent, e))?;
    }

    let bytes = if size < options.small_file_threshold {
        let copied = std::fs::copy(source_abs, dest_abs).map_err(|e| path_error(source_abs, e))?;
        on_progress(copied);
        copied
    } else {
        copy_streaming(source_abs, dest_abs, size, signals, on_progress)?
    };

    set_mtime_millis(dest_abs, source_mtime_ms)?;

    if options.verify {
        let expected = calculate_checksum(source_abs)?;
        let actual = calculate_checksum(dest_abs)?;
        if expected != actual {
            return Err(SyncError::VerificationFailed {
                path: dest_abs.clone(),
                expected,
                actual,
            });
        }
    }

    Ok(bytes)
}

/// Chunked copy loop: read, observe pause, observe cancel, write
fn copy_streaming(
    source: &Path,
    dest: &Path,
    expected_size: u64,
    signals: &ControlSignals,
    on_progress: &mut dyn FnMut(u64),
) -> Result<u64> {
    let mut reader = BufReader::new(File::open(source).map_err(|e| path_error(source, e))?);
    let mut writer = File::create(dest).map_err(|e| path_error(dest, e))?;

    let mut buffer = vec![0u8; STREAM_BUFFER_SIZE];
    let mut copied: u64 = 0;
    let mut last_reported: u64 = 0;
    let report_step = (expected_size / 20).max(1);

    loop {
        let n = reader.read(&mut buffer).map_err(|e| path_error(source, e))?;
        if n == 0 {
            break;
        }

        // cancel leaves the partial destination in place for the caller
        if !signals.wait_if_paused() {
            return Err(SyncError::Aborted);
        }

        writer
            .write_all(&buffer[..n])
            .map_err(|e| path_error(dest, e))?;
        copied += n as u64;

        if copied - last_reported >= report_step || copied == expected_size {
            on_progress(copied - last_reported);
            last_reported = copied;
        }
    }

    writer.flush().map_err(|e| path_error(dest, e))?;
    if copied > last_reported {
        on_progress(copied - last_reported);
    }

    Ok(copied)
}

/// SHA-256 of a file, streamed
pub fn calculate_checksum(path: &Path) -> Result<String> {
    let mut file = BufReader::new(File::open(path).map_err(|e| path_error(path, e))?);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; STREAM_BUFFER_SIZE];

    loop {
        let n = file.read(&mut buffer).map_err(|e| path_error(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Attach the offending path to permission and missing-path failures
fn path_error(path: &Path, err: std::io::Error) -> SyncError {
    match err.kind() {
        std::io::ErrorKind::NotFound => SyncError::PathMissing(path.to_path_buf()),
        std::io::ErrorKind::PermissionDenied => SyncError::PermissionDenied(path.to_path_buf()),
        _ => SyncError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metadata::mtime_millis;
    use crate::core::planner::Operation;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn create_op(source: &Path, dest: &Path, size: u64, mtime_ms: i64) -> Operation {
        Operation::Create {
            source_abs: source.to_path_buf(),
            dest_abs: dest.to_path_buf(),
            rel_path: source
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned(),
            size,
            source_mtime_ms: mtime_ms,
        }
    }

    fn run(op: &Operation, options: &SyncOptions) -> Result<u64> {
        let signals = ControlSignals::new();
        let mut reported = 0u64;
        let result = {
            let mut on_progress = |delta: u64| reported += delta;
            execute_copy(op, options, &signals, &mut on_progress)
        };
        if let Ok(bytes) = &result {
            assert_eq!(*bytes, reported, "progress deltas must sum to bytes copied");
        }
        result
    }

    #[test]
    fn test_small_copy_preserves_content_and_mtime() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src.txt");
        let dest = dir.path().join("nested/dir/dst.txt");
        fs::write(&source, b"hello").unwrap();
        crate::core::metadata::set_mtime_millis(&source, 1_600_000_000_000).unwrap();

        let op = create_op(&source, &dest, 5, 1_600_000_000_000);
        let bytes = run(&op, &SyncOptions::default()).unwrap();

        assert_eq!(bytes, 5);
        assert_eq!(fs::read(&dest).unwrap(), b"hello");
        let dest_ms = mtime_millis(&fs::metadata(&dest).unwrap());
        assert!((dest_ms - 1_600_000_000_000).abs() < 1000);
    }

    #[test]
    fn test_streaming_path_at_threshold() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("big.bin");
        let dest = dir.path().join("out.bin");
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&source, &payload).unwrap();

        // force the streaming branch
        let options = SyncOptions {
            small_file_threshold: 1024,
            ..Default::default()
        };
        let op = create_op(&source, &dest, payload.len() as u64, 0);
        let bytes = run(&op, &options).unwrap();

        assert_eq!(bytes, payload.len() as u64);
        assert_eq!(fs::read(&dest).unwrap(), payload);
    }

    #[test]
    fn test_threshold_boundary_sizes() {
        let dir = tempdir().unwrap();
        let options = SyncOptions {
            small_file_threshold: 4,
            ..Default::default()
        };

        for size in [0usize, 3, 4, 5] {
            let source = dir.path().join(format!("in-{}.bin", size));
            let dest = dir.path().join(format!("out-{}.bin", size));
            let payload = vec![0xAB; size];
            fs::write(&source, &payload).unwrap();

            let op = create_op(&source, &dest, size as u64, 0);
            let bytes = run(&op, &options).unwrap();
            assert_eq!(bytes, size as u64);
            assert_eq!(fs::read(&dest).unwrap(), payload);
        }
    }

    #[test]
    fn test_vanished_source_is_path_missing() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("gone.txt");
        let dest = dir.path().join("dst.txt");

        let op = create_op(&source, &dest, 10, 0);
        let err = run(&op, &SyncOptions::default()).unwrap_err();
        assert!(matches!(err, SyncError::PathMissing(p) if p == source));
    }

    #[test]
    fn test_verification_passes_on_clean_copy() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src.bin");
        let dest = dir.path().join("dst.bin");
        fs::write(&source, b"verified payload").unwrap();

        let options = SyncOptions {
            verify: true,
            ..Default::default()
        };
        let op = create_op(&source, &dest, 16, 0);
        assert!(run(&op, &options).is_ok());
    }

    #[test]
    fn test_cancel_interrupts_stream() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("big.bin");
        let dest = dir.path().join("dst.bin");
        fs::write(&source, vec![1u8; 256 * 1024]).unwrap();

        let options = SyncOptions {
            small_file_threshold: 1,
            ..Default::default()
        };
        let signals = ControlSignals::new();
        signals.cancel();

        let op = create_op(&source, &dest, 256 * 1024, 0);
        let result = execute_copy(&op, &options, &signals, &mut |_| {});
        assert!(matches!(result, Err(SyncError::Aborted)));
    }

    #[test]
    fn test_delete_op_rejected() {
        let op = Operation::Delete {
            dest_abs: PathBuf::from("/x"),
            rel_path: "x".to_string(),
            size: 0,
            dest_mtime_ms: 0,
            safe: true,
        };
        let err = run(&op, &SyncOptions::default()).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[test]
    fn test_checksum_known_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("known.txt");
        fs::write(&path, b"hello world").unwrap();

        assert_eq!(
            calculate_checksum(&path).unwrap(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
