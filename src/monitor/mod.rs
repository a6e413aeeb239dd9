pub mod evaluate;
pub mod probe;
pub mod rotate;
pub mod sample;
pub mod sink;

use crate::archive::Archiver;
use crate::config::MonitorConfig;
use crate::outcome::Outcome;
use chrono::{DateTime, Local};
use evaluate::{evaluate, AlertEvent, Evaluation, ThresholdSet};
use rotate::{maybe_rotate, RotateError};
use sample::{MetricSample, MetricsProvider};
use sink::{metrics_line, report_line, SinkError, TextSink};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Rotate(#[from] RotateError),
}

#[derive(Debug, Clone)]
pub struct MonitorSinks {
    pub log: TextSink,
    pub alerts: TextSink,
    pub report: TextSink,
}

impl MonitorSinks {
    pub fn from_config(cfg: &MonitorConfig) -> Self {
        Self {
            log: TextSink::new(cfg.log_path()),
            alerts: TextSink::new(cfg.alert_path()),
            report: TextSink::new(cfg.report_path()),
        }
    }
}

#[derive(Debug)]
pub struct MonitorReport {
    pub sample: MetricSample,
    pub evaluation: Evaluation,
    pub rotated: Vec<std::path::PathBuf>,
    /// Rotations whose compression step failed; the pass went on regardless.
    pub rotation_failures: Vec<RotateError>,
}

#[derive(Debug)]
pub struct MonitorRun {
    pub outcome: Outcome,
    pub report: Option<MonitorReport>,
}

/// One monitoring pass. Any error of the pass itself is turned into an
/// alert so failures of the monitor show up where operators already look.
///
/// A failed compression of a rotated log is alerted as well but does not stop
/// sampling; the pass then ends as [`Outcome::Partial`].
pub async fn run_monitor<M, A>(
    cfg: &MonitorConfig,
    sinks: &MonitorSinks,
    provider: &mut M,
    archiver: &A,
    now: DateTime<Local>,
) -> MonitorRun
where
    M: MetricsProvider,
    A: Archiver,
{
    match monitor_once(cfg, sinks, provider, archiver, now).await {
        Ok(report) => MonitorRun {
            outcome: if report.rotation_failures.is_empty() {
                Outcome::Success
            } else {
                Outcome::Partial
            },
            report: Some(report),
        },
        Err(err) => {
            error!(error = %err, "ошибка цикла мониторинга");
            let event = AlertEvent::monitor_failure(now, &err);
            emit_alert(sinks, &event);
            MonitorRun {
                outcome: Outcome::MonitorFailed,
                report: None,
            }
        }
    }
}

async fn monitor_once<M, A>(
    cfg: &MonitorConfig,
    sinks: &MonitorSinks,
    provider: &mut M,
    archiver: &A,
    now: DateTime<Local>,
) -> Result<MonitorReport, MonitorError>
where
    M: MetricsProvider,
    A: Archiver,
{
    for sink in [&sinks.log, &sinks.alerts, &sinks.report] {
        sink.ensure_exists(&now)?;
    }

    let mut rotated = Vec::new();
    let mut rotation_failures = Vec::new();
    for sink in [&sinks.log, &sinks.alerts] {
        match maybe_rotate(sink.path(), cfg.log_max_size_bytes, now, archiver).await {
            Ok(true) => {
                rotated.push(sink.path().to_path_buf());
                sinks.log.append(
                    &now,
                    &format!(
                        "Rotated {} (>{} bytes)",
                        sink.path().display(),
                        cfg.log_max_size_bytes
                    ),
                )?;
            }
            Ok(false) => {}
            Err(err @ RotateError::Compress { .. }) => {
                warn!(error = %err, "сжатие журнала не удалось, мониторинг продолжается");
                sinks.log.append(&now, &format!("Log rotation incomplete: {err}"))?;
                emit_alert(sinks, &AlertEvent::monitor_failure(now, &err));
                rotation_failures.push(err);
            }
            Err(err) => return Err(err.into()),
        }
    }

    let sample = provider.sample().await;
    let evaluation = evaluate(&sample, &ThresholdSet::from(&cfg.thresholds));

    for alert in &evaluation.alerts {
        println!("ALERT: {}", alert.message);
        warn!(metric = ?alert.metric, value = ?alert.value, "{}", alert.message);
        sinks.alerts.append(&alert.timestamp, &alert.message)?;
    }
    for diagnostic in &evaluation.diagnostics {
        warn!(diagnostic = ?diagnostic, "метрика не измерена");
        sinks.log.append(&sample.taken_at, &diagnostic.message())?;
    }

    let line = metrics_line(&sample);
    sinks.log.append(&sample.taken_at, &line)?;
    sinks.report.write_raw(&report_line(&sample))?;

    info!(
        alerts = evaluation.alerts.len(),
        unavailable = evaluation.diagnostics.len(),
        "мониторинг завершён"
    );
    println!("{line}");

    Ok(MonitorReport {
        sample,
        evaluation,
        rotated,
        rotation_failures,
    })
}

fn emit_alert(sinks: &MonitorSinks, event: &AlertEvent) {
    println!("ALERT: {}", event.message);
    if let Err(err) = sinks.alerts.append(&event.timestamp, &event.message) {
        error!(error = %err, "не удалось записать алерт");
    }
}
