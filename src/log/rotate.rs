//! Rotating file sink.
//!
//! Size (or daily) rotation, backup count and gzip come from `file-rotate`.
//! Age-based cleanup of rotated files is swept here, on open and then at
//! most once per local day from the write path.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{Local, NaiveDate};
use file_rotate::compression::Compression;
use file_rotate::suffix::{AppendTimestamp, FileLimit};
use file_rotate::{ContentLimit, FileRotate, TimeFrequency};

use crate::config::LogConfig;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

pub(crate) struct RotatingFile {
    inner: FileRotate<AppendTimestamp>,
    dir: PathBuf,
    file_name: String,
    max_age: Duration,
    last_sweep: Option<NaiveDate>,
}

impl RotatingFile {
    /// Opens the active file. Failures surface as write errors, which the
    /// logger drops.
    pub(crate) fn open(config: &LogConfig) -> Self {
        let path = Path::new(&config.file_name);
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let _ = fs::create_dir_all(&dir);

        let content_limit = if config.rotate_by_day {
            ContentLimit::Time(TimeFrequency::Daily)
        } else {
            let bytes = config.max_size.saturating_mul(1 << 20);
            ContentLimit::BytesSurpassed(usize::try_from(bytes).unwrap_or(usize::MAX))
        };
        let compression = if config.compress {
            Compression::OnRotate(0)
        } else {
            Compression::None
        };

        let inner = FileRotate::new(
            path,
            AppendTimestamp::default(FileLimit::MaxFiles(config.max_backups)),
            content_limit,
            compression,
            #[cfg(unix)]
            None,
        );

        let mut file = Self {
            inner,
            dir,
            file_name: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            max_age: Duration::from_secs(u64::from(config.max_age) * SECS_PER_DAY),
            last_sweep: None,
        };
        file.sweep_if_due();
        file
    }

    fn sweep_if_due(&mut self) {
        let today = Local::now().date_naive();
        if self.last_sweep == Some(today) {
            return;
        }
        self.last_sweep = Some(today);
        remove_expired(&self.dir, &self.file_name, self.max_age);
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.sweep_if_due();
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Deletes rotated siblings of `file_name` (`<file_name>.<suffix>`) whose
/// last modification is at least `max_age` ago. The active file is kept.
fn remove_expired(dir: &Path, file_name: &str, max_age: Duration) {
    if file_name.is_empty() {
        return;
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let rotated_prefix = format!("{}.", file_name);
    let now = SystemTime::now();

    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(&rotated_prefix) {
            continue;
        }
        let expired = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age >= max_age);
        if expired {
            let _ = fs::remove_file(entry.path());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_expired_keeps_active_and_unrelated_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["app.log", "app.log.20260101T000000", "app.log.20260102T000000.gz", "other.log.1"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::thread::sleep(Duration::from_millis(50));

        remove_expired(dir.path(), "app.log", Duration::from_millis(10));

        let mut left: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["app.log", "other.log.1"]);
    }

    #[test]
    fn test_recent_rotated_files_survive() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.log.20260101T000000"), b"x").unwrap();

        remove_expired(dir.path(), "app.log", Duration::from_secs(SECS_PER_DAY));

        assert!(dir.path().join("app.log.20260101T000000").exists());
    }

    #[test]
    fn test_open_creates_directory_and_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/service.log");
        let config = LogConfig {
            file_name: path.to_string_lossy().into_owned(),
            compress: false,
            ..LogConfig::default()
        };

        let mut file = RotatingFile::open(&config);
        file.write_all(b"hello\n").unwrap();
        file.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "hello\n");
    }
}
