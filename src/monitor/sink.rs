use crate::monitor::sample::MetricSample;
use crate::stamp::LINE_STAMP;
use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("запись в {path}: {source}")]
pub struct SinkError {
    pub path: PathBuf,
    pub source: io::Error,
}

/// Append-only text file addressed by a fixed path. Each write opens the
/// file anew, so a rotation between writes is picked up.
#[derive(Debug, Clone)]
pub struct TextSink {
    path: PathBuf,
}

impl TextSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the file with a header line when it does not exist yet.
    pub fn ensure_exists(&self, now: &DateTime<Local>) -> Result<(), SinkError> {
        if self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| self.err(source))?;
        }
        self.write_raw(&format!("Created {} at {}", self.path.display(), now.format(LINE_STAMP)))
    }

    /// Appends `[YYYY-MM-DD HH:MM:SS] message`.
    pub fn append(&self, now: &DateTime<Local>, message: &str) -> Result<(), SinkError> {
        self.write_raw(&format!("[{}] {message}", now.format(LINE_STAMP)))
    }

    pub fn write_raw(&self, line: &str) -> Result<(), SinkError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.err(source))?;
        writeln!(file, "{line}").map_err(|source| self.err(source))
    }

    fn err(&self, source: io::Error) -> SinkError {
        SinkError {
            path: self.path.clone(),
            source,
        }
    }
}

/// `CPU=x% | MEM=y% | DISK=z% | LOSS=w%`, absent values shown as `n/a`.
pub fn metrics_line(sample: &MetricSample) -> String {
    format!(
        "CPU={} | MEM={} | DISK={} | LOSS={}",
        fmt_value(sample.cpu_percent),
        fmt_value(sample.memory_percent),
        fmt_value(sample.disk_percent),
        fmt_value(sample.network_loss_percent),
    )
}

/// Daily report line: timestamp without brackets, then the metrics.
pub fn report_line(sample: &MetricSample) -> String {
    format!("{} | {}", sample.taken_at.format(LINE_STAMP), metrics_line(sample))
}

fn fmt_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.1}%"),
        None => "n/a".to_string(),
    }
}
