/*!
 * File timestamp helpers (millisecond UTC, filetime-backed)
 */

use std::fs::Metadata;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use filetime::FileTime;

use crate::error::Result;

/// Modification time as UTC milliseconds
pub fn mtime_millis(metadata: &Metadata) -> i64 {
    metadata
        .modified()
        .map(system_time_millis)
        .unwrap_or_default()
}

/// Convert a system time to UTC milliseconds
pub fn system_time_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

/// Set a file's mtime from UTC milliseconds; atime becomes now
pub fn set_mtime_millis(path: &Path, mtime_ms: i64) -> Result<()> {
    let mtime = file_time_from_millis(mtime_ms);
    let atime = FileTime::from_system_time(SystemTime::now());
    filetime::set_file_times(path, atime, mtime)?;
    Ok(())
}

fn file_time_from_millis(ms: i64) -> FileTime {
    let secs = ms.div_euclid(1000);
    let nanos = (ms.rem_euclid(1000) as u32) * 1_000_000;
    FileTime::from_unix_time(secs, nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_set_and_read_mtime() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"data").unwrap();
        file.flush().unwrap();

        set_mtime_millis(file.path(), 1_700_000_000_123).unwrap();

        let metadata = std::fs::metadata(file.path()).unwrap();
        let ms = mtime_millis(&metadata);
        // some filesystems truncate below millisecond resolution
        assert!((ms - 1_700_000_000_123).abs() < 1000);
    }

    #[test]
    fn test_negative_millis() {
        let ft = file_time_from_millis(-1500);
        assert_eq!(ft.unix_seconds(), -2);
        assert_eq!(ft.nanoseconds(), 500_000_000);
    }

    #[test]
    fn test_epoch_conversion() {
        assert_eq!(system_time_millis(UNIX_EPOCH), 0);
        let later = UNIX_EPOCH + std::time::Duration::from_millis(42);
        assert_eq!(system_time_millis(later), 42);
    }
}
