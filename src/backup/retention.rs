//! Age-based pruning of backup artifacts.
//!
//! Artifacts are selected by a plain name prefix, never a glob or regex, and
//! deleted when their last modification is strictly older than the cutoff.

use crate::config::RetentionConfig;
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{info, warn};

pub const WAL_ARCHIVE_DIR: &str = "wal_archive";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Logs,
    DatabaseFull,
    Config,
    WalArchive,
}

impl Category {
    /// Sweep order. It only affects the order of log lines.
    pub const ALL: [Category; 4] = [
        Category::Logs,
        Category::DatabaseFull,
        Category::Config,
        Category::WalArchive,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            Category::Logs => "logs_",
            Category::DatabaseFull => "db_full_",
            Category::Config => "config_",
            Category::WalArchive => WAL_ARCHIVE_DIR,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::Logs => "logs",
            Category::DatabaseFull => "db_full",
            Category::Config => "config",
            Category::WalArchive => "wal_archive",
        }
    }

    #[cfg(test)]
    pub fn of(name: &str) -> Option<Category> {
        Category::ALL
            .into_iter()
            .find(|category| name.starts_with(category.prefix()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub logs_days: u32,
    pub database_days: u32,
    pub config_days: u32,
    pub wal_archive_days: u32,
}

impl RetentionPolicy {
    pub fn days_for(&self, category: Category) -> u32 {
        match category {
            Category::Logs => self.logs_days,
            Category::DatabaseFull => self.database_days,
            Category::Config => self.config_days,
            Category::WalArchive => self.wal_archive_days,
        }
    }
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(cfg: &RetentionConfig) -> Self {
        Self {
            logs_days: cfg.logs_days,
            database_days: cfg.database_days,
            config_days: cfg.config_days,
            wal_archive_days: cfg.wal_archive_days,
        }
    }
}

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("не удалось прочитать каталог {path}: {source}")]
    ReadDir { path: PathBuf, source: io::Error },
    #[error("не удалось получить время изменения {path}: {source}")]
    Mtime { path: PathBuf, source: io::Error },
    #[error("не удалось удалить {path}: {source}")]
    Delete { path: PathBuf, source: io::Error },
}

#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub deleted: Vec<PathBuf>,
    pub errors: Vec<SweepError>,
}

impl SweepOutcome {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn cutoff(now: DateTime<Utc>, retention_days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(retention_days))
}

/// Deletes every entry directly inside `directory` whose name starts with
/// `prefix` and whose modification time is before `now - retention_days`.
///
/// Problems with single entries are collected in [`SweepOutcome::errors`]
/// and never stop the sweep. A missing directory yields an empty outcome.
pub fn sweep(directory: &Path, prefix: &str, retention_days: u32, now: DateTime<Utc>) -> SweepOutcome {
    sweep_with(directory, prefix, retention_days, now, entry_times)
}

fn sweep_with<F>(
    directory: &Path,
    prefix: &str,
    retention_days: u32,
    now: DateTime<Utc>,
    entry_times: F,
) -> SweepOutcome
where
    F: Fn(&Path) -> io::Result<(SystemTime, bool)>,
{
    let mut outcome = SweepOutcome::default();
    let cutoff = cutoff(now, retention_days);

    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return outcome,
        Err(source) => {
            warn!(dir = %directory.display(), error = %source, "cannot list backup directory");
            outcome.errors.push(SweepError::ReadDir {
                path: directory.to_path_buf(),
                source,
            });
            return outcome;
        }
    };

    let mut candidates: Vec<PathBuf> = Vec::new();
    for entry in entries {
        match entry {
            Ok(entry) => {
                if entry.file_name().to_string_lossy().starts_with(prefix) {
                    candidates.push(entry.path());
                }
            }
            Err(source) => {
                warn!(dir = %directory.display(), error = %source, "cannot read directory entry");
                outcome.errors.push(SweepError::ReadDir {
                    path: directory.to_path_buf(),
                    source,
                });
            }
        }
    }
    candidates.sort();

    for path in candidates {
        let (mtime, is_dir) = match entry_times(&path) {
            Ok(v) => v,
            Err(source) => {
                warn!(path = %path.display(), error = %source, "cannot read modification time, skipping");
                outcome.errors.push(SweepError::Mtime { path, source });
                continue;
            }
        };

        if DateTime::<Utc>::from(mtime) >= cutoff {
            continue;
        }

        let removed = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match removed {
            Ok(()) => {
                info!(path = %path.display(), retention_days, "old backup deleted");
                outcome.deleted.push(path);
            }
            Err(source) => {
                warn!(path = %path.display(), error = %source, "cannot delete old backup");
                outcome.errors.push(SweepError::Delete { path, source });
            }
        }
    }

    outcome
}

// symlink_metadata: a link to a directory is removed as a link.
fn entry_times(path: &Path) -> io::Result<(SystemTime, bool)> {
    let meta = fs::symlink_metadata(path)?;
    Ok((meta.modified()?, meta.is_dir()))
}
