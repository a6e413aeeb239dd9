use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::time;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{program}: не удалось запустить: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program}: превышен таймаут {}", human_duration(.timeout))]
    Timeout { program: String, timeout: Duration },
    #[error("{program}: завершился с кодом {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct ToolOutput {
    pub program: String,
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn ensure_success(self) -> Result<Self, ToolError> {
        if self.status.success() {
            return Ok(self);
        }
        Err(ToolError::Failed {
            program: self.program,
            status: self.status,
            stderr: self.stderr.trim().to_string(),
        })
    }
}

/// Runs an external tool to completion, killing it once `timeout` elapses.
///
/// A nonzero exit status is not an error here; callers that need one use
/// [`ToolOutput::ensure_success`].
pub async fn run_tool<I, S>(program: &str, args: I, timeout: Duration) -> Result<ToolOutput, ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let start = Instant::now();
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ToolError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let output = match time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => return Err(ToolError::Io(err)),
        Err(_elapsed) => {
            warn!(program, timeout_ms = timeout.as_millis() as u64, "external tool timeout");
            return Err(ToolError::Timeout {
                program: program.to_string(),
                timeout,
            });
        }
    };

    debug!(
        program,
        status = %output.status,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "external tool finished"
    );

    Ok(ToolOutput {
        program: program.to_string(),
        status: output.status,
        stdout: decode_cmd_stdout(&output.stdout),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

fn human_duration(d: &Duration) -> String {
    humantime::format_duration(*d).to_string()
}

// Windows console tools may emit UTF-16LE.
fn decode_cmd_stdout(bytes: &[u8]) -> String {
    if let Ok(utf8) = std::str::from_utf8(bytes) {
        return utf8.to_string();
    }

    if bytes.len() >= 2 && bytes.len() % 2 == 0 {
        let u16buf: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if let Ok(s) = String::from_utf16(&u16buf) {
            return s;
        }
    }

    String::from_utf8_lossy(bytes).to_string()
}
