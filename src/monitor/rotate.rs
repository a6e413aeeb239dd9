use crate::archive::Archiver;
use crate::process::ToolError;
use crate::stamp::FILE_STAMP;
use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum RotateError {
    #[error("ротация {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("ротация {path}: сжатие не удалось: {source}")]
    Compress { path: PathBuf, source: ToolError },
}

/// Path the current log is moved to before compression.
pub fn rotated_path(log_file: &Path, now: &DateTime<Local>) -> PathBuf {
    let mut name = log_file.as_os_str().to_os_string();
    name.push(format!(".{}", now.format(FILE_STAMP)));
    PathBuf::from(name)
}

/// Rotates `log_file` once it grows past `max_size_bytes`: the file is moved
/// to `<path>.<YYYYMMDD_HHMMSS>`, compressed, and an empty log is created at
/// `log_file` again. Returns whether a rotation happened.
pub async fn maybe_rotate<A: Archiver>(
    log_file: &Path,
    max_size_bytes: u64,
    now: DateTime<Local>,
    archiver: &A,
) -> Result<bool, RotateError> {
    let size = match fs::metadata(log_file) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(source) => {
            return Err(RotateError::Io {
                path: log_file.to_path_buf(),
                source,
            })
        }
    };
    if size <= max_size_bytes {
        return Ok(false);
    }

    let archive = rotated_path(log_file, &now);
    fs::rename(log_file, &archive).map_err(|source| RotateError::Io {
        path: log_file.to_path_buf(),
        source,
    })?;
    // Writers reopen by path, so the fresh file exists before compression starts.
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .map_err(|source| RotateError::Io {
            path: log_file.to_path_buf(),
            source,
        })?;

    let compressed = archiver
        .compress(&archive)
        .await
        .map_err(|source| RotateError::Compress {
            path: archive.clone(),
            source,
        })?;

    info!(
        log = %log_file.display(),
        archive = %compressed.display(),
        size_bytes = size,
        "log rotated"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::gz_path;
    use chrono::TimeZone;

    /// Stands in for gzip: moves the input to `<input>.gz`.
    struct RenameArchiver;

    impl Archiver for RenameArchiver {
        async fn archive_dir(&self, _source: &Path, _dest: &Path) -> Result<(), ToolError> {
            Ok(())
        }

        async fn compress(&self, path: &Path) -> Result<PathBuf, ToolError> {
            let dest = gz_path(path);
            fs::rename(path, &dest)?;
            Ok(dest)
        }
    }

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2023, 1, 10, 8, 30, 15).unwrap()
    }

    #[tokio::test]
    async fn small_log_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("sys_monitor.log");
        fs::write(&log, b"0123456789").unwrap();

        let rotated = maybe_rotate(&log, 10, now(), &RenameArchiver).await.unwrap();

        assert!(!rotated);
        assert_eq!(fs::read(&log).unwrap(), b"0123456789");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn missing_log_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("sys_monitor.log");

        let rotated = maybe_rotate(&log, 10, now(), &RenameArchiver).await.unwrap();

        assert!(!rotated);
        assert!(!log.exists());
    }

    #[tokio::test]
    async fn oversized_log_is_archived_and_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("sys_monitor.log");
        fs::write(&log, b"01234567890").unwrap();

        let rotated = maybe_rotate(&log, 10, now(), &RenameArchiver).await.unwrap();

        assert!(rotated);
        assert_eq!(fs::metadata(&log).unwrap().len(), 0);

        let archived: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| n != "sys_monitor.log")
            .collect();
        assert_eq!(archived, vec!["sys_monitor.log.20230110_083015.gz".to_string()]);
        assert_eq!(
            fs::read(dir.path().join("sys_monitor.log.20230110_083015.gz")).unwrap(),
            b"01234567890"
        );
    }

    #[tokio::test]
    async fn compression_failure_keeps_renamed_copy_and_fresh_log() {
        struct FailingArchiver;

        impl Archiver for FailingArchiver {
            async fn archive_dir(&self, _source: &Path, _dest: &Path) -> Result<(), ToolError> {
                Ok(())
            }

            async fn compress(&self, _path: &Path) -> Result<PathBuf, ToolError> {
                Err(ToolError::Io(io::Error::other("gzip missing")))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("sys_alerts.log");
        fs::write(&log, vec![b'x'; 64]).unwrap();

        let err = maybe_rotate(&log, 10, now(), &FailingArchiver).await.unwrap_err();

        assert!(matches!(err, RotateError::Compress { .. }));
        assert!(log.exists());
        assert!(rotated_path(&log, &now()).exists());
    }
}
