pub mod retention;
pub mod snapshot;

use crate::config::BackupConfig;
use crate::outcome::Outcome;
use chrono::{DateTime, Local, Utc};
use retention::{sweep, Category, RetentionPolicy, SweepOutcome};
use snapshot::{SnapshotError, SnapshotKind, SnapshotProducer, SnapshotResult};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("не удалось создать каталог резервных копий {path}: {source}")]
    CreateRoot {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub struct BackupReport {
    pub started_at: DateTime<Local>,
    pub snapshots: Vec<SnapshotResult>,
    pub snapshot_failures: Vec<SnapshotError>,
    pub sweeps: Vec<(Category, SweepOutcome)>,
    pub retention_skipped: bool,
}

impl BackupReport {
    pub fn deleted(&self) -> impl Iterator<Item = &PathBuf> {
        self.sweeps.iter().flat_map(|(_, s)| s.deleted.iter())
    }

    pub fn sweep_error_count(&self) -> usize {
        self.sweeps.iter().map(|(_, s)| s.errors.len()).sum()
    }

    pub fn outcome(&self) -> Outcome {
        if self.retention_skipped {
            return Outcome::SnapshotFailed;
        }
        if !self.snapshot_failures.is_empty() || self.sweeps.iter().any(|(_, s)| !s.is_clean()) {
            return Outcome::Partial;
        }
        Outcome::Success
    }

    pub fn summary_json(&self) -> serde_json::Value {
        serde_json::json!({
            "started_at": self.started_at.to_rfc3339(),
            "outcome": self.outcome().label(),
            "snapshots": self
                .snapshots
                .iter()
                .map(|s| serde_json::json!({
                    "kind": s.kind.label(),
                    "location": s.location.display().to_string(),
                }))
                .collect::<Vec<_>>(),
            "snapshot_failures": self
                .snapshot_failures
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>(),
            "deleted": self
                .deleted()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>(),
            "sweep_errors": self.sweep_error_count(),
            "retention_skipped": self.retention_skipped,
        })
    }
}

/// One backup run: create every snapshot, then prune each category.
///
/// A failed full database snapshot skips retention entirely so the last good
/// backups survive. Any other failure is recorded and the run continues.
pub async fn run_backup<P: SnapshotProducer>(
    cfg: &BackupConfig,
    producer: &P,
    now: DateTime<Local>,
) -> Result<BackupReport, BackupError> {
    fs::create_dir_all(&cfg.root).map_err(|source| BackupError::CreateRoot {
        path: cfg.root.clone(),
        source,
    })?;

    info!(
        root = %cfg.root.display(),
        database = %cfg.database.name,
        "запуск резервного копирования"
    );

    let mut report = BackupReport {
        started_at: now,
        snapshots: Vec::new(),
        snapshot_failures: Vec::new(),
        sweeps: Vec::new(),
        retention_skipped: false,
    };

    for kind in SnapshotKind::ALL {
        let dest = cfg.root.join(kind.artifact_name(&now));
        println!("{}", progress_line(kind, &dest));
        match producer.create(kind, &dest).await {
            Ok(result) => {
                info!(kind = kind.label(), location = %result.location.display(), "snapshot created");
                report.snapshots.push(result);
            }
            Err(err) => {
                error!(kind = kind.label(), error = %err, "snapshot failed");
                println!("Snapshot {} failed: {err}", kind.label());
                if err.kind() == SnapshotKind::DatabaseFull {
                    report.retention_skipped = true;
                }
                report.snapshot_failures.push(err);
            }
        }
    }

    if report.retention_skipped {
        warn!("полная копия базы не создана, очистка старых копий пропущена");
        println!("Full database backup failed, retention skipped.");
        return Ok(report);
    }

    let policy = RetentionPolicy::from(&cfg.retention);
    let now_utc = now.with_timezone(&Utc);
    for category in Category::ALL {
        let days = policy.days_for(category);
        let outcome = sweep(&cfg.root, category.prefix(), days, now_utc);
        for path in &outcome.deleted {
            println!("Deleting old backup: {}", path.display());
            if category == Category::WalArchive {
                warn!(
                    path = %path.display(),
                    "архив WAL удалён целиком, история WAL до этого момента потеряна"
                );
            }
        }
        for err in &outcome.errors {
            println!("Retention error: {err}");
        }
        report.sweeps.push((category, outcome));
    }

    println!("Backup + WAL archive process completed!");
    Ok(report)
}

fn progress_line(kind: SnapshotKind, dest: &std::path::Path) -> String {
    let dest = dest.display();
    match kind {
        SnapshotKind::DatabaseFull => format!("Creating full database backup in {dest} ..."),
        SnapshotKind::WalArchive => format!("Archiving WAL files to {dest} ..."),
        SnapshotKind::Config => format!("Backing up configs to {dest} ..."),
        SnapshotKind::Logs => format!("Backing up logs to {dest} ..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::retention::SweepError;
    use crate::process::ToolError;
    use chrono::{Duration, TimeZone};
    use std::fs::File;
    use std::path::Path;
    use std::time::SystemTime;

    struct FakeProducer {
        fail: Option<SnapshotKind>,
    }

    impl SnapshotProducer for FakeProducer {
        async fn create(&self, kind: SnapshotKind, dest: &Path) -> Result<SnapshotResult, SnapshotError> {
            if self.fail == Some(kind) {
                return Err(SnapshotError::Tool {
                    kind,
                    source: ToolError::Io(std::io::Error::other("boom")),
                });
            }
            match kind {
                SnapshotKind::DatabaseFull | SnapshotKind::WalArchive => fs::create_dir_all(dest),
                SnapshotKind::Config | SnapshotKind::Logs => fs::write(dest, b"tar"),
            }
            .map_err(|source| SnapshotError::Io {
                kind,
                path: dest.to_path_buf(),
                source,
            })?;
            Ok(SnapshotResult {
                kind,
                location: dest.to_path_buf(),
            })
        }
    }

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2023, 1, 10, 12, 0, 0).unwrap()
    }

    fn backup_cfg(root: &Path) -> BackupConfig {
        BackupConfig {
            root: root.to_path_buf(),
            ..BackupConfig::default()
        }
    }

    fn aged(root: &Path, name: &str, age_days: i64) -> PathBuf {
        let path = root.join(name);
        fs::write(&path, b"old").unwrap();
        File::open(&path)
            .unwrap()
            .set_modified(SystemTime::from(now() - Duration::days(age_days)))
            .unwrap();
        path
    }

    #[tokio::test]
    async fn creates_all_snapshots_and_prunes_expired_ones() {
        let dir = tempfile::tempdir().unwrap();
        let old_logs = aged(dir.path(), "logs_20230101_000000.tar.gz", 9);
        let kept_logs = aged(dir.path(), "logs_20230107_000000.tar.gz", 3);
        let old_cfg = aged(dir.path(), "config_20221201_000000.tar.gz", 40);

        let report = run_backup(&backup_cfg(dir.path()), &FakeProducer { fail: None }, now())
            .await
            .unwrap();

        assert_eq!(report.outcome(), Outcome::Success);
        assert_eq!(report.snapshots.len(), 4);
        let deleted: Vec<&PathBuf> = report.deleted().collect();
        assert_eq!(deleted, vec![&old_logs, &old_cfg]);
        assert!(kept_logs.exists());
        assert!(dir.path().join("db_full_20230110_120000").is_dir());
        assert!(dir.path().join("config_20230110_120000.tar.gz").exists());
        assert!(dir.path().join("logs_20230110_120000.tar.gz").exists());
        assert!(dir.path().join("wal_archive").is_dir());

        let order: Vec<Category> = report.sweeps.iter().map(|(c, _)| *c).collect();
        assert_eq!(order, Category::ALL.to_vec());
    }

    #[tokio::test]
    async fn failed_database_snapshot_skips_retention() {
        let dir = tempfile::tempdir().unwrap();
        let old_db = aged(dir.path(), "db_full_20221101_000000", 60);

        let producer = FakeProducer {
            fail: Some(SnapshotKind::DatabaseFull),
        };
        let report = run_backup(&backup_cfg(dir.path()), &producer, now())
            .await
            .unwrap();

        assert_eq!(report.outcome(), Outcome::SnapshotFailed);
        assert!(report.retention_skipped);
        assert!(report.sweeps.is_empty());
        assert!(old_db.exists());
        // the remaining snapshots are still attempted
        assert_eq!(report.snapshots.len(), 3);
    }

    #[tokio::test]
    async fn failed_config_archive_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let old_logs = aged(dir.path(), "logs_20221101_000000.tar.gz", 60);

        let producer = FakeProducer {
            fail: Some(SnapshotKind::Config),
        };
        let report = run_backup(&backup_cfg(dir.path()), &producer, now())
            .await
            .unwrap();

        assert_eq!(report.outcome(), Outcome::Partial);
        assert_eq!(report.sweeps.len(), 4);
        assert!(!old_logs.exists());
        assert_eq!(report.summary_json()["outcome"], "partial");
    }

    #[tokio::test]
    async fn sweep_errors_make_the_run_partial() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = run_backup(&backup_cfg(dir.path()), &FakeProducer { fail: None }, now())
            .await
            .unwrap();
        assert_eq!(report.outcome(), Outcome::Success);

        report.sweeps[0].1.errors.push(SweepError::Delete {
            path: dir.path().join("logs_20221101_000000"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        });

        assert_eq!(report.outcome(), Outcome::Partial);
        assert_eq!(report.summary_json()["sweep_errors"], 1);
    }
}
