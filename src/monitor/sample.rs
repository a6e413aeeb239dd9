use crate::monitor::probe::NetworkProbe;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use sysinfo::{CpuExt, DiskExt, System, SystemExt};
use tracing::debug;

/// One reading of the host. Every metric may be absent when it could not be
/// measured; absence is never reported as zero.
#[derive(Debug, Clone, Serialize)]
pub struct MetricSample {
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub disk_percent: Option<f64>,
    pub network_loss_percent: Option<f64>,
    pub taken_at: DateTime<Local>,
    /// Why each absent metric is absent, keyed by metric name.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unavailable_reasons: Vec<(Metric, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Cpu,
    Memory,
    Disk,
    NetworkLoss,
}

impl Metric {
    /// Evaluation order.
    pub const ALL: [Metric; 4] = [Metric::Cpu, Metric::Memory, Metric::Disk, Metric::NetworkLoss];

    pub fn label(self) -> &'static str {
        match self {
            Metric::Cpu => "cpu",
            Metric::Memory => "memory",
            Metric::Disk => "disk",
            Metric::NetworkLoss => "network_loss",
        }
    }
}

impl MetricSample {
    pub fn empty(taken_at: DateTime<Local>) -> Self {
        Self {
            cpu_percent: None,
            memory_percent: None,
            disk_percent: None,
            network_loss_percent: None,
            taken_at,
            unavailable_reasons: Vec::new(),
        }
    }

    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Cpu => self.cpu_percent,
            Metric::Memory => self.memory_percent,
            Metric::Disk => self.disk_percent,
            Metric::NetworkLoss => self.network_loss_percent,
        }
    }

    pub fn unavailable_reason(&self, metric: Metric) -> Option<&str> {
        self.unavailable_reasons
            .iter()
            .find(|(m, _)| *m == metric)
            .map(|(_, reason)| reason.as_str())
    }
}

pub trait MetricsProvider {
    async fn sample(&mut self) -> MetricSample;
}

/// Host metrics from `sysinfo`, network loss from a [`NetworkProbe`].
pub struct SysinfoProvider<P> {
    system: System,
    cpu_window: Duration,
    disk_mount: PathBuf,
    probe: P,
    probe_host: String,
    probe_count: u32,
}

impl<P: NetworkProbe> SysinfoProvider<P> {
    pub fn new(
        cpu_window: Duration,
        disk_mount: PathBuf,
        probe: P,
        probe_host: String,
        probe_count: u32,
    ) -> Self {
        Self {
            system: System::new(),
            cpu_window,
            disk_mount,
            probe,
            probe_host,
            probe_count,
        }
    }

    async fn cpu_percent(&mut self) -> Option<f64> {
        // Usage is a delta between two refreshes.
        self.system.refresh_cpu();
        tokio::time::sleep(self.cpu_window.max(System::MINIMUM_CPU_UPDATE_INTERVAL)).await;
        self.system.refresh_cpu();
        let cpus = self.system.cpus();
        if cpus.is_empty() {
            return None;
        }
        let sum: f32 = cpus.iter().map(|c| c.cpu_usage()).sum();
        Some((sum / cpus.len() as f32) as f64)
    }

    fn memory_percent(&mut self) -> Option<f64> {
        self.system.refresh_memory();
        percent(self.system.used_memory(), self.system.total_memory())
    }

    fn disk_percent(&mut self) -> Option<f64> {
        self.system.refresh_disks_list();
        self.system.refresh_disks();
        let disk = self
            .system
            .disks()
            .iter()
            .find(|d| d.mount_point() == self.disk_mount.as_path())?;
        let total = disk.total_space();
        percent(total.saturating_sub(disk.available_space()), total)
    }
}

impl<P: NetworkProbe> MetricsProvider for SysinfoProvider<P> {
    async fn sample(&mut self) -> MetricSample {
        let mut sample = MetricSample::empty(Local::now());

        sample.cpu_percent = self.cpu_percent().await;
        if sample.cpu_percent.is_none() {
            sample
                .unavailable_reasons
                .push((Metric::Cpu, "процессоры не обнаружены".to_string()));
        }

        sample.memory_percent = self.memory_percent();
        if sample.memory_percent.is_none() {
            sample
                .unavailable_reasons
                .push((Metric::Memory, "объём памяти неизвестен".to_string()));
        }

        sample.disk_percent = self.disk_percent();
        if sample.disk_percent.is_none() {
            sample.unavailable_reasons.push((
                Metric::Disk,
                format!("точка монтирования {} не найдена", self.disk_mount.display()),
            ));
        }

        match self.probe.ping(&self.probe_host, self.probe_count).await {
            Ok(loss) => sample.network_loss_percent = Some(loss),
            Err(err) => {
                debug!(host = %self.probe_host, error = %err, "network probe failed");
                sample
                    .unavailable_reasons
                    .push((Metric::NetworkLoss, err.to_string()));
            }
        }

        sample
    }
}

fn percent(used: u64, total: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some((used as f64 / total as f64) * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::probe::ProbeError;

    struct FixedProbe(Option<f64>);

    impl NetworkProbe for FixedProbe {
        async fn ping(&self, _host: &str, _count: u32) -> Result<f64, ProbeError> {
            self.0.ok_or(ProbeError::Unparseable)
        }
    }

    #[test]
    fn percent_of_zero_total_is_unknown() {
        assert_eq!(percent(10, 0), None);
        assert_eq!(percent(50, 200), Some(25.0));
    }

    #[tokio::test]
    async fn failed_probe_leaves_loss_absent_with_reason() {
        let mut provider = SysinfoProvider::new(
            Duration::from_millis(1),
            PathBuf::from("/definitely/not/a/mount"),
            FixedProbe(None),
            "127.0.0.1".to_string(),
            1,
        );
        let sample = provider.sample().await;

        assert_eq!(sample.network_loss_percent, None);
        assert!(sample.unavailable_reason(Metric::NetworkLoss).is_some());
        assert_eq!(sample.disk_percent, None);
        assert!(sample
            .unavailable_reason(Metric::Disk)
            .is_some_and(|r| r.contains("/definitely/not/a/mount")));
    }

    #[tokio::test]
    async fn probe_result_is_recorded() {
        let mut provider = SysinfoProvider::new(
            Duration::from_millis(1),
            PathBuf::from("/"),
            FixedProbe(Some(0.0)),
            "127.0.0.1".to_string(),
            1,
        );
        let sample = provider.sample().await;
        assert_eq!(sample.network_loss_percent, Some(0.0));
        assert!(sample.unavailable_reason(Metric::NetworkLoss).is_none());
    }
}
