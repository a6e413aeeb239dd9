use crate::backup::retention::Category;
use crate::backup::snapshot::SnapshotKind;
use crate::backup::BackupReport;
use crate::monitor::evaluate::Evaluation;
use crate::monitor::sample::{Metric, MetricSample};
use crate::outcome::Outcome;
use prometheus::core::Collector;
use prometheus::{opts, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
    #[error("запись метрик в {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Gauges describing the last run of one pipeline, exported in the text
/// format read by the node_exporter textfile collector.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pipeline: &'static str,
    pub monitor_cpu_usage_percent: Gauge,
    pub monitor_memory_usage_percent: Gauge,
    pub monitor_disk_usage_percent: Gauge,
    pub monitor_network_loss_percent: Gauge,
    pub monitor_measurement_unavailable: GaugeVec,
    pub monitor_alerts: GaugeVec,
    pub backup_snapshot_success: GaugeVec,
    pub backup_artifacts_deleted: GaugeVec,
    pub backup_sweep_errors: Gauge,
    pub last_run_timestamp_seconds: GaugeVec,
    pub last_run_exit_code: GaugeVec,
}

impl Metrics {
    pub fn new(pipeline: &'static str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let monitor_cpu_usage_percent = Gauge::with_opts(opts!(
            "hostkeeper_monitor_cpu_usage_percent",
            "Average CPU usage across cores in percent (0..100)"
        ))?;
        let monitor_memory_usage_percent = Gauge::with_opts(opts!(
            "hostkeeper_monitor_memory_usage_percent",
            "Memory usage in percent"
        ))?;
        let monitor_disk_usage_percent = Gauge::with_opts(opts!(
            "hostkeeper_monitor_disk_usage_percent",
            "Usage of the monitored mount in percent"
        ))?;
        let monitor_network_loss_percent = Gauge::with_opts(opts!(
            "hostkeeper_monitor_network_loss_percent",
            "Packet loss of the reachability probe in percent"
        ))?;
        let monitor_measurement_unavailable = GaugeVec::new(
            opts!(
                "hostkeeper_monitor_measurement_unavailable",
                "1 when the metric could not be measured in the last run"
            ),
            &["metric"],
        )?;
        let monitor_alerts = GaugeVec::new(
            opts!(
                "hostkeeper_monitor_alerts",
                "Alerts raised in the last run by metric"
            ),
            &["metric"],
        )?;
        let backup_snapshot_success = GaugeVec::new(
            opts!(
                "hostkeeper_backup_snapshot_success",
                "1 when the snapshot of this kind was created in the last run"
            ),
            &["kind"],
        )?;
        let backup_artifacts_deleted = GaugeVec::new(
            opts!(
                "hostkeeper_backup_artifacts_deleted",
                "Artifacts removed by retention in the last run"
            ),
            &["category"],
        )?;
        let backup_sweep_errors = Gauge::with_opts(opts!(
            "hostkeeper_backup_sweep_errors",
            "Entries skipped by retention because of filesystem errors"
        ))?;
        let last_run_timestamp_seconds = GaugeVec::new(
            opts!(
                "hostkeeper_last_run_timestamp_seconds",
                "Unix time the pipeline finished"
            ),
            &["pipeline"],
        )?;
        let last_run_exit_code = GaugeVec::new(
            opts!(
                "hostkeeper_last_run_exit_code",
                "Exit code of the last run (0 = success)"
            ),
            &["pipeline"],
        )?;

        if pipeline == "monitor" {
            register(&registry, &monitor_cpu_usage_percent)?;
            register(&registry, &monitor_memory_usage_percent)?;
            register(&registry, &monitor_disk_usage_percent)?;
            register(&registry, &monitor_network_loss_percent)?;
            register(&registry, &monitor_measurement_unavailable)?;
            register(&registry, &monitor_alerts)?;
        } else {
            register(&registry, &backup_snapshot_success)?;
            register(&registry, &backup_artifacts_deleted)?;
            register(&registry, &backup_sweep_errors)?;
        }
        register(&registry, &last_run_timestamp_seconds)?;
        register(&registry, &last_run_exit_code)?;

        Ok(Self {
            registry,
            pipeline,
            monitor_cpu_usage_percent,
            monitor_memory_usage_percent,
            monitor_disk_usage_percent,
            monitor_network_loss_percent,
            monitor_measurement_unavailable,
            monitor_alerts,
            backup_snapshot_success,
            backup_artifacts_deleted,
            backup_sweep_errors,
            last_run_timestamp_seconds,
            last_run_exit_code,
        })
    }

    pub fn update_from_sample(&self, sample: &MetricSample, evaluation: &Evaluation) {
        let gauges = [
            (Metric::Cpu, &self.monitor_cpu_usage_percent),
            (Metric::Memory, &self.monitor_memory_usage_percent),
            (Metric::Disk, &self.monitor_disk_usage_percent),
            (Metric::NetworkLoss, &self.monitor_network_loss_percent),
        ];
        for (metric, gauge) in gauges {
            let value = sample.value(metric);
            // NaN keeps an absent reading from looking like a healthy zero
            gauge.set(value.unwrap_or(f64::NAN));
            self.monitor_measurement_unavailable
                .with_label_values(&[metric.label()])
                .set(if value.is_some() { 0.0 } else { 1.0 });
            let alerts = evaluation
                .alerts
                .iter()
                .filter(|a| a.metric == Some(metric))
                .count();
            self.monitor_alerts
                .with_label_values(&[metric.label()])
                .set(alerts as f64);
        }
    }

    pub fn update_from_backup(&self, report: &BackupReport) {
        for kind in SnapshotKind::ALL {
            let ok = report.snapshots.iter().any(|s| s.kind == kind);
            self.backup_snapshot_success
                .with_label_values(&[kind.label()])
                .set(if ok { 1.0 } else { 0.0 });
        }
        for category in Category::ALL {
            let deleted = report
                .sweeps
                .iter()
                .filter(|(c, _)| *c == category)
                .map(|(_, s)| s.deleted.len())
                .sum::<usize>();
            self.backup_artifacts_deleted
                .with_label_values(&[category.label()])
                .set(deleted as f64);
        }
        self.backup_sweep_errors
            .set(report.sweep_error_count() as f64);
    }

    pub fn finish(&self, outcome: Outcome) {
        self.last_run_timestamp_seconds
            .with_label_values(&[self.pipeline])
            .set(now_unix() as f64);
        self.last_run_exit_code
            .with_label_values(&[self.pipeline])
            .set(f64::from(outcome.code()));
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }

    /// Writes `hostkeeper_<pipeline>.prom` into `dir`; the file is replaced
    /// atomically so the collector never reads a partial export.
    pub fn write_textfile(&self, dir: &Path) -> Result<PathBuf, MetricsError> {
        let body = self.encode_metrics()?;
        let path = dir.join(format!("hostkeeper_{}.prom", self.pipeline));
        let tmp = dir.join(format!(".hostkeeper_{}.prom.tmp", self.pipeline));
        let write_err = |source| MetricsError::Write {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(dir).map_err(write_err)?;
        fs::write(&tmp, body).map_err(write_err)?;
        fs::rename(&tmp, &path).map_err(write_err)?;
        Ok(path)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::evaluate::{evaluate, ThresholdSet};
    use chrono::Local;

    #[test]
    fn monitor_export_marks_absent_metrics() {
        let metrics = Metrics::new("monitor").expect("инициализация метрик");
        let mut sample = MetricSample::empty(Local::now());
        sample.cpu_percent = Some(95.0);
        sample.memory_percent = Some(10.0);
        sample.disk_percent = Some(10.0);
        let evaluation = evaluate(&sample, &ThresholdSet::default());

        metrics.update_from_sample(&sample, &evaluation);
        metrics.finish(Outcome::Success);

        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(text.contains("hostkeeper_monitor_measurement_unavailable{metric=\"network_loss\"} 1"));
        assert!(text.contains("hostkeeper_monitor_alerts{metric=\"cpu\"} 1"));
        assert!(text.contains("hostkeeper_last_run_exit_code{pipeline=\"monitor\"} 0"));
        assert!(!text.contains("hostkeeper_backup_"));
    }

    #[test]
    fn textfile_is_written_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = Metrics::new("backup").unwrap();
        metrics.backup_sweep_errors.set(2.0);
        metrics.finish(Outcome::Partial);

        let path = metrics.write_textfile(dir.path()).unwrap();

        assert_eq!(path, dir.path().join("hostkeeper_backup.prom"));
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("hostkeeper_backup_sweep_errors 2"));
        assert!(text.contains("hostkeeper_last_run_exit_code{pipeline=\"backup\"} 5"));
        assert!(!dir.path().join(".hostkeeper_backup.prom.tmp").exists());
    }
}
