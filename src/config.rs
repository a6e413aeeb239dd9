use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const MAX_RETENTION_DAYS: u32 = 36_500;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,
    #[serde(default)]
    pub metrics_textfile_dir: Option<PathBuf>,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackupConfig {
    #[serde(default = "default_backup_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
    #[serde(default = "default_app_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_tool_timeout", with = "humantime_str")]
    pub tool_timeout: Duration,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_name")]
    pub name: String,
    #[serde(default = "default_db_user")]
    pub user: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_logs_days")]
    pub logs_days: u32,
    #[serde(default = "default_database_days")]
    pub database_days: u32,
    #[serde(default = "default_database_days")]
    pub config_days: u32,
    #[serde(default = "default_wal_archive_days")]
    pub wal_archive_days: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default = "default_alert_file")]
    pub alert_file: String,
    #[serde(default = "default_report_file")]
    pub report_file: String,
    #[serde(default = "default_log_max_size_bytes")]
    pub log_max_size_bytes: u64,
    #[serde(default = "default_disk_mount")]
    pub disk_mount: PathBuf,
    #[serde(default = "default_cpu_sample_window", with = "humantime_str")]
    pub cpu_sample_window: Duration,
    #[serde(default = "default_compress_timeout", with = "humantime_str")]
    pub compress_timeout: Duration,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_host")]
    pub host: String,
    #[serde(default = "default_probe_count")]
    pub count: u32,
    #[serde(default = "default_probe_timeout", with = "humantime_str")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ThresholdsConfig {
    #[serde(default = "default_cpu_percent")]
    pub cpu_percent: f64,
    #[serde(default = "default_memory_percent")]
    pub memory_percent: f64,
    #[serde(default = "default_disk_percent")]
    pub disk_percent: f64,
    #[serde(default = "default_network_loss_percent")]
    pub network_loss_percent: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_dir: default_lock_dir(),
            metrics_textfile_dir: None,
            backup: BackupConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            root: default_backup_root(),
            database: DatabaseConfig::default(),
            config_dir: default_config_dir(),
            log_dir: default_app_log_dir(),
            tool_timeout: default_tool_timeout(),
            retention: RetentionConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: default_db_name(),
            user: default_db_user(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            logs_days: default_logs_days(),
            database_days: default_database_days(),
            config_days: default_database_days(),
            wal_archive_days: default_wal_archive_days(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            log_dir: default_monitor_log_dir(),
            log_file: default_log_file(),
            alert_file: default_alert_file(),
            report_file: default_report_file(),
            log_max_size_bytes: default_log_max_size_bytes(),
            disk_mount: default_disk_mount(),
            cpu_sample_window: default_cpu_sample_window(),
            compress_timeout: default_compress_timeout(),
            probe: ProbeConfig::default(),
            thresholds: ThresholdsConfig::default(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            host: default_probe_host(),
            count: default_probe_count(),
            timeout: default_probe_timeout(),
        }
    }
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            cpu_percent: default_cpu_percent(),
            memory_percent: default_memory_percent(),
            disk_percent: default_disk_percent(),
            network_loss_percent: default_network_loss_percent(),
        }
    }
}

impl MonitorConfig {
    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(&self.log_file)
    }

    pub fn alert_path(&self) -> PathBuf {
        self.log_dir.join(&self.alert_file)
    }

    pub fn report_path(&self) -> PathBuf {
        self.log_dir.join(&self.report_file)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("не удалось прочитать файл конфигурации {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось разобрать YAML в {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("ошибка валидации конфигурации: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        Self::from_yaml_str(&text, &path_display)
    }

    pub fn from_yaml_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let cfg: Config = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "поле lock_dir не должно быть пустым".to_string(),
            ));
        }
        if let Some(path) = &self.metrics_textfile_dir {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Validation(
                    "поле metrics_textfile_dir не должно быть пустым, уберите его или укажите путь"
                        .to_string(),
                ));
            }
        }

        validate_backup(&self.backup)?;
        validate_monitor(&self.monitor)?;

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_backup(cfg: &BackupConfig) -> Result<(), ConfigError> {
    for (name, path) in [
        ("backup.root", &cfg.root),
        ("backup.config_dir", &cfg.config_dir),
        ("backup.log_dir", &cfg.log_dir),
    ] {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(format!(
                "поле {name} не должно быть пустым"
            )));
        }
    }
    if cfg.database.name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "backup.database.name не должен быть пустым".to_string(),
        ));
    }
    if cfg.database.user.trim().is_empty() {
        return Err(ConfigError::Validation(
            "backup.database.user не должен быть пустым".to_string(),
        ));
    }
    if cfg.tool_timeout.is_zero() {
        return Err(ConfigError::Validation(
            "backup.tool_timeout должен быть > 0".to_string(),
        ));
    }

    for (name, days) in [
        ("logs_days", cfg.retention.logs_days),
        ("database_days", cfg.retention.database_days),
        ("config_days", cfg.retention.config_days),
        ("wal_archive_days", cfg.retention.wal_archive_days),
    ] {
        if !(1..=MAX_RETENTION_DAYS).contains(&days) {
            return Err(ConfigError::Validation(format!(
                "backup.retention.{name} должно быть в диапазоне 1..{MAX_RETENTION_DAYS}"
            )));
        }
    }

    Ok(())
}

fn validate_monitor(cfg: &MonitorConfig) -> Result<(), ConfigError> {
    if cfg.log_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "monitor.log_dir не должен быть пустым".to_string(),
        ));
    }
    for (name, file) in [
        ("log_file", &cfg.log_file),
        ("alert_file", &cfg.alert_file),
        ("report_file", &cfg.report_file),
    ] {
        if file.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "monitor.{name} не должен быть пустым"
            )));
        }
    }
    if cfg.log_file == cfg.alert_file
        || cfg.log_file == cfg.report_file
        || cfg.alert_file == cfg.report_file
    {
        return Err(ConfigError::Validation(
            "monitor.log_file, alert_file и report_file должны различаться".to_string(),
        ));
    }
    if cfg.log_max_size_bytes == 0 {
        return Err(ConfigError::Validation(
            "monitor.log_max_size_bytes должно быть > 0".to_string(),
        ));
    }
    if cfg.cpu_sample_window.is_zero() {
        return Err(ConfigError::Validation(
            "monitor.cpu_sample_window должно быть > 0".to_string(),
        ));
    }
    if cfg.compress_timeout.is_zero() {
        return Err(ConfigError::Validation(
            "monitor.compress_timeout должен быть > 0".to_string(),
        ));
    }
    if cfg.probe.host.trim().is_empty() {
        return Err(ConfigError::Validation(
            "monitor.probe.host не должен быть пустым".to_string(),
        ));
    }
    if cfg.probe.count == 0 {
        return Err(ConfigError::Validation(
            "monitor.probe.count должно быть >= 1".to_string(),
        ));
    }
    if cfg.probe.timeout.is_zero() {
        return Err(ConfigError::Validation(
            "monitor.probe.timeout должен быть > 0".to_string(),
        ));
    }

    let t = &cfg.thresholds;
    for (name, value) in [
        ("cpu_percent", t.cpu_percent),
        ("memory_percent", t.memory_percent),
        ("disk_percent", t.disk_percent),
        ("network_loss_percent", t.network_loss_percent),
    ] {
        if !(0.0..=100.0).contains(&value) {
            return Err(ConfigError::Validation(format!(
                "monitor.thresholds.{name} должно быть в диапазоне 0..100"
            )));
        }
    }

    Ok(())
}

mod humantime_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

fn default_lock_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_backup_root() -> PathBuf {
    PathBuf::from("/home/user/backups")
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("/etc/myapp")
}

fn default_app_log_dir() -> PathBuf {
    PathBuf::from("/var/log/trading")
}

const fn default_tool_timeout() -> Duration {
    Duration::from_secs(2 * 60 * 60)
}

fn default_db_name() -> String {
    "trading_db".to_string()
}

fn default_db_user() -> String {
    "postgres".to_string()
}

const fn default_logs_days() -> u32 {
    7
}

const fn default_database_days() -> u32 {
    30
}

const fn default_wal_archive_days() -> u32 {
    2
}

#[cfg(target_os = "windows")]
fn default_monitor_log_dir() -> PathBuf {
    match std::env::var_os("USERPROFILE") {
        Some(profile) => PathBuf::from(profile).join("Desktop"),
        None => PathBuf::from("."),
    }
}

#[cfg(not(target_os = "windows"))]
fn default_monitor_log_dir() -> PathBuf {
    PathBuf::from("/var/log")
}

fn default_log_file() -> String {
    "sys_monitor.log".to_string()
}

fn default_alert_file() -> String {
    "sys_alerts.log".to_string()
}

fn default_report_file() -> String {
    "daily_report.txt".to_string()
}

const fn default_log_max_size_bytes() -> u64 {
    1024 * 1024 * 1024
}

fn default_disk_mount() -> PathBuf {
    PathBuf::from("/")
}

const fn default_cpu_sample_window() -> Duration {
    Duration::from_secs(5)
}

const fn default_compress_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_probe_host() -> String {
    "8.8.8.8".to_string()
}

const fn default_probe_count() -> u32 {
    10
}

const fn default_probe_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_cpu_percent() -> f64 {
    80.0
}

const fn default_memory_percent() -> f64 {
    90.0
}

const fn default_disk_percent() -> f64 {
    85.0
}

const fn default_network_loss_percent() -> f64 {
    0.1
}
