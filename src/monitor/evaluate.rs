use crate::config::ThresholdsConfig;
use crate::monitor::sample::{Metric, MetricSample};
use chrono::{DateTime, Local};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdSet {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub network_loss_percent: f64,
}

impl ThresholdSet {
    pub fn limit(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Cpu => self.cpu_percent,
            Metric::Memory => self.memory_percent,
            Metric::Disk => self.disk_percent,
            Metric::NetworkLoss => self.network_loss_percent,
        }
    }
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self::from(&ThresholdsConfig::default())
    }
}

impl From<&ThresholdsConfig> for ThresholdSet {
    fn from(cfg: &ThresholdsConfig) -> Self {
        Self {
            cpu_percent: cfg.cpu_percent,
            memory_percent: cfg.memory_percent,
            disk_percent: cfg.disk_percent,
            network_loss_percent: cfg.network_loss_percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub timestamp: DateTime<Local>,
    /// `None` for failures of the monitor itself.
    pub metric: Option<Metric>,
    pub value: Option<f64>,
    pub message: String,
}

impl AlertEvent {
    pub fn breach(timestamp: DateTime<Local>, metric: Metric, value: f64, limit: f64) -> Self {
        let subject = match metric {
            Metric::Cpu => "CPU usage",
            Metric::Memory => "Memory usage",
            Metric::Disk => "Disk usage",
            Metric::NetworkLoss => "Network packet loss",
        };
        let message = format!(
            "{subject} high: {}% (threshold {limit}%)",
            above_limit(value, limit)
        );
        Self {
            timestamp,
            metric: Some(metric),
            value: Some(value),
            message,
        }
    }

    pub fn monitor_failure(timestamp: DateTime<Local>, error: &dyn std::fmt::Display) -> Self {
        Self {
            timestamp,
            metric: None,
            value: None,
            message: format!("Monitor run failed: {error}"),
        }
    }
}

/// Shortest rendering of `value` (1 to 6 decimals) that still reads as
/// above `limit`, so 80.01 against 80 is never shown as `80.0`.
fn above_limit(value: f64, limit: f64) -> String {
    (1..=6)
        .map(|precision| format!("{value:.precision$}"))
        .find(|text| text.parse::<f64>().is_ok_and(|shown| shown > limit))
        .unwrap_or_else(|| value.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    MeasurementUnavailable { metric: Metric, reason: String },
}

impl Diagnostic {
    pub fn message(&self) -> String {
        match self {
            Diagnostic::MeasurementUnavailable { metric, reason } => {
                format!("{} measurement unavailable: {reason}", metric.label())
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    pub alerts: Vec<AlertEvent>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Compares every present metric against its limit; only values strictly
/// above the limit alert. Absent metrics never alert and produce a
/// diagnostic instead. Output order is CPU, memory, disk, network loss.
pub fn evaluate(sample: &MetricSample, thresholds: &ThresholdSet) -> Evaluation {
    let mut out = Evaluation::default();

    for metric in Metric::ALL {
        match sample.value(metric) {
            Some(value) if value > thresholds.limit(metric) => {
                out.alerts
                    .push(AlertEvent::breach(sample.taken_at, metric, value, thresholds.limit(metric)));
            }
            Some(_) => {}
            None => out.diagnostics.push(Diagnostic::MeasurementUnavailable {
                metric,
                reason: sample
                    .unavailable_reason(metric)
                    .unwrap_or("no value")
                    .to_string(),
            }),
        }
    }

    out
}
