use crate::archive::Archiver;
use crate::backup::retention::{Category, WAL_ARCHIVE_DIR};
use crate::config::BackupConfig;
use crate::process::{run_tool, ToolError};
use crate::stamp::FILE_STAMP;
use chrono::{DateTime, TimeZone};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotKind {
    DatabaseFull,
    WalArchive,
    Config,
    Logs,
}

impl SnapshotKind {
    /// Creation order within one backup run.
    pub const ALL: [SnapshotKind; 4] = [
        SnapshotKind::DatabaseFull,
        SnapshotKind::WalArchive,
        SnapshotKind::Config,
        SnapshotKind::Logs,
    ];

    pub fn category(self) -> Category {
        match self {
            SnapshotKind::DatabaseFull => Category::DatabaseFull,
            SnapshotKind::WalArchive => Category::WalArchive,
            SnapshotKind::Config => Category::Config,
            SnapshotKind::Logs => Category::Logs,
        }
    }

    pub fn label(self) -> &'static str {
        self.category().label()
    }

    /// File name of the artifact produced at `now`. The WAL archive is a
    /// single persistent directory and carries no timestamp.
    pub fn artifact_name<Tz: TimeZone>(self, now: &DateTime<Tz>) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        let stamp = now.format(FILE_STAMP);
        match self {
            SnapshotKind::DatabaseFull => format!("db_full_{stamp}"),
            SnapshotKind::WalArchive => WAL_ARCHIVE_DIR.to_string(),
            SnapshotKind::Config => format!("config_{stamp}.tar.gz"),
            SnapshotKind::Logs => format!("logs_{stamp}.tar.gz"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotResult {
    pub kind: SnapshotKind,
    pub location: PathBuf,
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("снимок {}: {source}", .kind.label())]
    Tool {
        kind: SnapshotKind,
        source: ToolError,
    },
    #[error("снимок {}: {path}: {source}", .kind.label())]
    Io {
        kind: SnapshotKind,
        path: PathBuf,
        source: std::io::Error,
    },
}

impl SnapshotError {
    pub fn kind(&self) -> SnapshotKind {
        match self {
            SnapshotError::Tool { kind, .. } | SnapshotError::Io { kind, .. } => *kind,
        }
    }
}

/// Produces one backup artifact at `dest`.
pub trait SnapshotProducer {
    async fn create(&self, kind: SnapshotKind, dest: &Path) -> Result<SnapshotResult, SnapshotError>;
}

/// Production producer: `pg_basebackup` for the database, the archiver for
/// configuration and application logs.
#[derive(Debug, Clone)]
pub struct CommandSnapshotProducer<A> {
    db_user: String,
    config_dir: PathBuf,
    log_dir: PathBuf,
    timeout: Duration,
    archiver: A,
}

impl<A: Archiver> CommandSnapshotProducer<A> {
    pub fn new(cfg: &BackupConfig, archiver: A) -> Self {
        Self {
            db_user: cfg.database.user.clone(),
            config_dir: cfg.config_dir.clone(),
            log_dir: cfg.log_dir.clone(),
            timeout: cfg.tool_timeout,
            archiver,
        }
    }

    async fn base_backup(&self, dest: &Path) -> Result<(), ToolError> {
        let args: [OsString; 8] = [
            "-U".into(),
            self.db_user.as_str().into(),
            "-D".into(),
            dest.into(),
            "-F".into(),
            "tar".into(),
            "-z".into(),
            "-P".into(),
        ];
        run_tool("pg_basebackup", args, self.timeout)
            .await?
            .ensure_success()?;
        Ok(())
    }
}

impl<A: Archiver> SnapshotProducer for CommandSnapshotProducer<A> {
    async fn create(&self, kind: SnapshotKind, dest: &Path) -> Result<SnapshotResult, SnapshotError> {
        let tool_err = |source| SnapshotError::Tool { kind, source };
        match kind {
            SnapshotKind::DatabaseFull => self.base_backup(dest).await.map_err(tool_err)?,
            SnapshotKind::WalArchive => {
                fs::create_dir_all(dest).map_err(|source| SnapshotError::Io {
                    kind,
                    path: dest.to_path_buf(),
                    source,
                })?;
            }
            SnapshotKind::Config => self
                .archiver
                .archive_dir(&self.config_dir, dest)
                .await
                .map_err(tool_err)?,
            SnapshotKind::Logs => self
                .archiver
                .archive_dir(&self.log_dir, dest)
                .await
                .map_err(tool_err)?,
        }

        Ok(SnapshotResult {
            kind,
            location: dest.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, Utc};

    #[test]
    fn artifact_names_are_bit_exact() {
        let now = Utc.with_ymd_and_hms(2023, 1, 10, 7, 5, 3).unwrap();
        assert_eq!(
            SnapshotKind::DatabaseFull.artifact_name(&now),
            "db_full_20230110_070503"
        );
        assert_eq!(
            SnapshotKind::Config.artifact_name(&now),
            "config_20230110_070503.tar.gz"
        );
        assert_eq!(
            SnapshotKind::Logs.artifact_name(&now),
            "logs_20230110_070503.tar.gz"
        );
        assert_eq!(SnapshotKind::WalArchive.artifact_name(&now), "wal_archive");
    }

    #[test]
    fn artifact_names_belong_to_their_category() {
        let now = Local::now();
        for kind in SnapshotKind::ALL {
            assert_eq!(Category::of(&kind.artifact_name(&now)), Some(kind.category()));
        }
    }

    struct NoopArchiver;

    impl Archiver for NoopArchiver {
        async fn archive_dir(&self, _source: &Path, _dest: &Path) -> Result<(), ToolError> {
            Ok(())
        }

        async fn compress(&self, path: &Path) -> Result<PathBuf, ToolError> {
            Ok(path.to_path_buf())
        }
    }

    #[tokio::test]
    async fn wal_archive_directory_is_created_once_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let producer = CommandSnapshotProducer::new(&BackupConfig::default(), NoopArchiver);
        let dest = dir.path().join(WAL_ARCHIVE_DIR);

        let first = producer.create(SnapshotKind::WalArchive, &dest).await.unwrap();
        fs::write(dest.join("000000010000000000000001"), b"wal").unwrap();
        let second = producer.create(SnapshotKind::WalArchive, &dest).await.unwrap();

        assert_eq!(first, second);
        assert!(dest.join("000000010000000000000001").exists());
    }
}
