use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sniffy_rs::config::AppConfig;
use sniffy_rs::logging;
use sniffy_rs::orchestrator::{ScanOrchestrator, ScanSettings};
use sniffy_rs::probe::Capabilities;
use sniffy_rs::report::{self, ReportDocument, ScanResults};
use sniffy_rs::scheduler::ScopeScheduler;
use sniffy_rs::stealth::StealthPolicy;
use sniffy_rs::target::{self, Target};
use sniffy_rs::types::FailureKind;

/// sniffy: multi-phase reconnaissance for a single target or a scope file.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sniffy",
    version,
    about = "Multi-phase reconnaissance: discovery, port scan, service enumeration, web probe and risk scoring.",
    long_about = None
)]
#[command(group(ArgGroup::new("input").required(true).args(["target", "scope"])))]
struct Cli {
    /// IP address, CIDR range (e.g., 192.168.1.0/24) or hostname.
    #[arg(short, long)]
    target: Option<String>,

    /// File with one target per line; blank lines and `#` comments are skipped.
    #[arg(short, long)]
    scope: Option<PathBuf>,

    /// Report path. Defaults to sniffy_report_<unix-time>.json.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Lower concurrency, jittered delays and decoys.
    #[arg(long, default_value_t = false)]
    stealth: bool,

    /// Scan all 65535 ports instead of 1-1000.
    #[arg(long, default_value_t = false)]
    deep: bool,

    /// Port-scan attempts per second per host (0 = unlimited).
    #[arg(long = "rate-limit", default_value_t = 1000)]
    rate_limit: u32,

    /// Global scan timeout in seconds.
    #[arg(long, default_value_t = 3600)]
    timeout: u64,

    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose logging.
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    logging::init(cli.debug);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// `Ok(false)` when the report was written but the run did not finish cleanly.
async fn run(cli: Cli) -> Result<bool> {
    let config = AppConfig::load(cli.config.as_deref())?;
    let targets: Vec<Target> = match (&cli.target, &cli.scope) {
        (Some(t), _) => vec![Target::parse(t)?],
        (None, Some(path)) => target::load_scope(path)?,
        (None, None) => bail!("either --target or --scope is required"),
    };
    let solo = cli.target.is_some();

    let policy = StealthPolicy::from_config(cli.stealth, &config.stealth);
    let settings = ScanSettings::from_config(&config, cli.deep, cli.rate_limit);
    info!(
        "mode: {}, ports {}, {} target(s), timeout {}s",
        if policy.is_enabled() { "stealth" } else { "normal" },
        settings.port_range(),
        targets.len(),
        cli.timeout
    );

    let caps = Capabilities::tcp_connect(&config).context("failed to initialise scanners")?;
    let orchestrator = ScanOrchestrator::new(caps, policy, settings);
    let scheduler = ScopeScheduler::new(orchestrator, config.scanning.max_parallel_targets)
        .with_timeout(Duration::from_secs(cli.timeout));

    // Ctrl-C cancels the batch; the report is still written.
    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping scan");
            cancel_ctrlc.cancel();
        }
    });

    let batch = scheduler.run(targets, cancel.clone()).await;
    let mut clean = !cancel.is_cancelled();
    for (key, entry) in batch.iter() {
        match entry.failure() {
            Some((FailureKind::Timeout | FailureKind::Interrupted, _)) => clean = false,
            Some((FailureKind::Fatal, reason)) if solo => {
                error!("{key}: {reason}");
                clean = false;
            }
            _ => {}
        }
    }

    // A solo target reports its result directly; a failed one keeps the
    // keyed entry so the reason is still in the report.
    let single = solo
        .then(|| batch.iter().next().and_then(|(_, e)| e.completed().cloned()))
        .flatten();
    let results = match single {
        Some(r) => ScanResults::Single(Box::new(r)),
        None => ScanResults::Batch(batch),
    };

    let doc = ReportDocument::new(results);
    let path = cli.output.unwrap_or_else(report::default_output_path);
    report::write_report(&path, &doc)?;
    info!("report written to {}", path.display());
    report::print_summary(&report::summary_rows(&doc.scan_results));

    Ok(clean)
}
