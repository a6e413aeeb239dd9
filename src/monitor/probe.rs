use crate::process::{run_tool, ToolError};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

// Windows: "Lost = 1 (10% loss)"
static LOSS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)%\s*loss").expect("valid regex"));
// Linux/macOS: "10 packets transmitted, 9 received, 10% packet loss"
static PACKET_LOSS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)%\s*packet loss").expect("valid regex"));

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("в выводе ping не найден процент потерь")]
    Unparseable,
}

pub trait NetworkProbe {
    /// Sends `count` echo requests to `host` and returns the loss in percent.
    async fn ping(&self, host: &str, count: u32) -> Result<f64, ProbeError>;
}

#[derive(Debug, Clone)]
pub struct PingProbe {
    pub timeout: Duration,
}

impl NetworkProbe for PingProbe {
    async fn ping(&self, host: &str, count: u32) -> Result<f64, ProbeError> {
        let count_flag = if cfg!(target_os = "windows") { "-n" } else { "-c" };
        let count = count.to_string();
        // ping exits nonzero when packets are lost; the summary is still printed.
        let output = run_tool("ping", [count_flag, count.as_str(), host], self.timeout).await?;
        parse_loss_percent(&output.stdout).ok_or(ProbeError::Unparseable)
    }
}

/// Extracts the packet loss percentage from ping output.
///
/// The bare `N% loss` form is tried first, then `N.N% packet loss`.
/// `None` means the loss is unknown, not zero.
pub fn parse_loss_percent(output: &str) -> Option<f64> {
    let output = output.to_lowercase();
    [&*LOSS_RE, &*PACKET_LOSS_RE].into_iter().find_map(|re| {
        re.captures(&output)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linux_summary_uses_packet_loss_form() {
        let out = "10 packets transmitted, 9 received, 10% packet loss, time 9012ms";
        assert_eq!(parse_loss_percent(out), Some(10.0));
    }

    #[test]
    fn windows_summary_uses_bare_loss_form() {
        let out = "Packets: Sent = 10, Received = 9, Lost = 1 (10% loss),";
        assert_eq!(parse_loss_percent(out), Some(10.0));
    }

    #[test]
    fn fractional_loss_is_kept() {
        let out = "1000 packets transmitted, 995 received, 0.5% packet loss, time 999ms";
        assert_eq!(parse_loss_percent(out), Some(0.5));
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(parse_loss_percent("Lost = 10 (100% LOSS)"), Some(100.0));
    }

    #[test]
    fn bare_loss_form_wins_when_both_are_present() {
        let out = "(20% loss)\n10 packets transmitted, 9 received, 10% packet loss";
        assert_eq!(parse_loss_percent(out), Some(20.0));
    }

    #[test]
    fn missing_summary_is_unknown_not_zero() {
        assert_eq!(parse_loss_percent("ping: unknown host example.invalid"), None);
        assert_eq!(parse_loss_percent(""), None);
    }
}
