use std::process::ExitCode;

/// Result class of one pipeline invocation, reported to the scheduler via
/// the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    ConfigInvalid,
    LockHeld,
    /// The full database snapshot failed; retention was not applied.
    SnapshotFailed,
    /// The run finished but some recoverable step failed.
    Partial,
    /// The monitor itself failed; reported through the alert sink.
    MonitorFailed,
}

impl Outcome {
    pub fn code(self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::ConfigInvalid => 2,
            Outcome::LockHeld => 3,
            Outcome::SnapshotFailed => 4,
            Outcome::Partial => 5,
            Outcome::MonitorFailed => 6,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::ConfigInvalid => "config_invalid",
            Outcome::LockHeld => "lock_held",
            Outcome::SnapshotFailed => "snapshot_failed",
            Outcome::Partial => "partial",
            Outcome::MonitorFailed => "monitor_failed",
        }
    }
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        ExitCode::from(outcome.code())
    }
}
