mod archive;
mod backup;
mod config;
mod lock;
mod metrics;
mod monitor;
mod outcome;
mod process;
mod stamp;

use archive::CommandArchiver;
use backup::run_backup;
use backup::snapshot::CommandSnapshotProducer;
use chrono::Local;
use clap::{CommandFactory, Parser, Subcommand};
use config::Config;
use lock::{LockError, RunLock};
use metrics::Metrics;
use monitor::probe::PingProbe;
use monitor::sample::SysinfoProvider;
use monitor::{run_monitor, MonitorSinks};
use outcome::Outcome;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hostkeeper")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Print a machine-readable summary of the run to stdout.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Create snapshots, then prune expired backups.
    Backup,
    /// Sample host metrics once, raise alerts and rotate the logs.
    Monitor,
}

impl Command {
    fn name(self) -> &'static str {
        match self {
            Command::Backup => "backup",
            Command::Monitor => "monitor",
        }
    }

    fn failure(self) -> Outcome {
        match self {
            Command::Backup => Outcome::SnapshotFailed,
            Command::Monitor => Outcome::MonitorFailed,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return ExitCode::SUCCESS;
    }
    let Some(command) = cli.command else {
        let _ = Cli::command().print_help();
        return Outcome::ConfigInvalid.into();
    };

    let cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "не удалось загрузить конфигурацию");
            return Outcome::ConfigInvalid.into();
        }
    };

    let lock = match RunLock::acquire(&cfg.lock_dir, command.name()) {
        Ok(lock) => lock,
        Err(err @ LockError::Held { .. }) => {
            warn!(error = %err, "запуск пропущен");
            return Outcome::LockHeld.into();
        }
        Err(err) => {
            error!(error = %err, "не удалось захватить блокировку");
            return command.failure().into();
        }
    };

    info!(
        pipeline = command.name(),
        config = %cli.config,
        lock = %lock.path().display(),
        "запуск hostkeeper"
    );

    let metrics = match Metrics::new(command.name()) {
        Ok(m) => Some(m),
        Err(err) => {
            warn!(error = %err, "не удалось инициализировать метрики");
            None
        }
    };

    let outcome = match command {
        Command::Backup => backup_command(&cfg, cli.json, metrics.as_ref()).await,
        Command::Monitor => monitor_command(&cfg, cli.json, metrics.as_ref()).await,
    };

    if let (Some(metrics), Some(dir)) = (&metrics, &cfg.metrics_textfile_dir) {
        metrics.finish(outcome);
        match metrics.write_textfile(dir) {
            Ok(path) => tracing::debug!(path = %path.display(), "метрики записаны"),
            Err(err) => warn!(error = %err, "не удалось записать метрики"),
        }
    }

    info!(
        pipeline = command.name(),
        outcome = outcome.label(),
        code = outcome.code(),
        "hostkeeper завершён"
    );
    outcome.into()
}

async fn backup_command(cfg: &Config, json: bool, metrics: Option<&Metrics>) -> Outcome {
    let archiver = CommandArchiver::new(cfg.backup.tool_timeout);
    let producer = CommandSnapshotProducer::new(&cfg.backup, archiver);

    match run_backup(&cfg.backup, &producer, Local::now()).await {
        Ok(report) => {
            if let Some(metrics) = metrics {
                metrics.update_from_backup(&report);
            }
            if json {
                println!("{:#}", report.summary_json());
            }
            report.outcome()
        }
        Err(err) => {
            error!(error = %err, "резервное копирование не выполнено");
            Outcome::SnapshotFailed
        }
    }
}

async fn monitor_command(cfg: &Config, json: bool, metrics: Option<&Metrics>) -> Outcome {
    let mon = &cfg.monitor;
    let probe = PingProbe {
        timeout: mon.probe.timeout,
    };
    let mut provider = SysinfoProvider::new(
        mon.cpu_sample_window,
        mon.disk_mount.clone(),
        probe,
        mon.probe.host.clone(),
        mon.probe.count,
    );
    let archiver = CommandArchiver::new(mon.compress_timeout);
    let sinks = MonitorSinks::from_config(mon);

    let run = run_monitor(mon, &sinks, &mut provider, &archiver, Local::now()).await;

    if let Some(report) = &run.report {
        if let Some(metrics) = metrics {
            metrics.update_from_sample(&report.sample, &report.evaluation);
        }
        if json {
            let summary = serde_json::json!({
                "outcome": run.outcome.label(),
                "sample": &report.sample,
                "alerts": &report.evaluation.alerts,
                "diagnostics": &report.evaluation.diagnostics,
                "rotation_failures": report
                    .rotation_failures
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>(),
                "rotated": report
                    .rotated
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>(),
            });
            println!("{summary:#}");
        }
    }
    run.outcome
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
