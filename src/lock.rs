use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use sysinfo::{Pid, System, SystemExt};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("запуск {name} уже выполняется: найден файл блокировки {path}")]
    Held { name: String, path: PathBuf },
    #[error("не удалось создать файл блокировки {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Guards a pipeline against overlapping invocations. The lock file is
/// removed when the guard is dropped.
///
/// A lock file whose recorded PID no longer runs is left over from a killed
/// run; it is removed and the lock is taken once more.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(dir: &Path, name: &str) -> Result<Self, LockError> {
        let path = dir.join(format!("hostkeeper-{name}.lock"));
        fs::create_dir_all(dir).map_err(|source| LockError::Io {
            path: path.clone(),
            source,
        })?;

        let mut file = match create_lock_file(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                let Some(pid) = stale_holder(&path) else {
                    return Err(LockError::Held {
                        name: name.to_string(),
                        path,
                    });
                };
                warn!(lock = %path.display(), pid, "процесс-владелец блокировки не найден, блокировка снята");
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(source) => return Err(LockError::Io { path, source }),
                }
                match create_lock_file(&path) {
                    Ok(file) => file,
                    Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                        return Err(LockError::Held {
                            name: name.to_string(),
                            path,
                        });
                    }
                    Err(source) => return Err(LockError::Io { path, source }),
                }
            }
            Err(source) => return Err(LockError::Io { path, source }),
        };

        if let Err(source) = writeln!(file, "{}", std::process::id()) {
            let _ = fs::remove_file(&path);
            return Err(LockError::Io { path, source });
        }

        debug!(lock = %path.display(), "lock acquired");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %err, "failed to remove lock file");
        }
    }
}

fn create_lock_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/// PID recorded in the lock file when that process is gone. An unreadable
/// or empty file counts as held: its owner may not have written the PID yet.
fn stale_holder(path: &Path) -> Option<usize> {
    let pid: usize = fs::read_to_string(path).ok()?.trim().parse().ok()?;
    let mut system = System::new();
    if system.refresh_process(Pid::from(pid)) {
        None
    } else {
        Some(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_first_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let first = RunLock::acquire(dir.path(), "backup").expect("первая блокировка");

        let err = RunLock::acquire(dir.path(), "backup").unwrap_err();
        assert!(matches!(err, LockError::Held { .. }));

        // other pipelines are independent
        let _monitor = RunLock::acquire(dir.path(), "monitor").expect("другой конвейер");

        drop(first);
        RunLock::acquire(dir.path(), "backup").expect("после освобождения блокировка снова доступна");
    }

    #[test]
    fn lock_file_records_pid_and_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let lock = RunLock::acquire(dir.path(), "monitor").unwrap();
        let path = lock.path().to_path_buf();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());

        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn lock_left_by_dead_process_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostkeeper-monitor.lock");
        fs::write(&path, format!("{}\n", u32::MAX)).unwrap();

        let lock = RunLock::acquire(dir.path(), "monitor").expect("устаревшая блокировка снимается");

        assert_eq!(lock.path(), path.as_path());
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }

    #[test]
    fn lock_without_pid_is_still_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostkeeper-backup.lock");
        fs::write(&path, "").unwrap();

        let err = RunLock::acquire(dir.path(), "backup").unwrap_err();

        assert!(matches!(err, LockError::Held { .. }));
        assert!(path.exists());
    }
}
