use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::output;
use crate::report::ReportFetcher;
use crate::repro::{ReproLimits, ReproductionRunner, SshSession};
use crate::source::BugSource;
use crate::triage::TriageOrchestrator;

#[derive(Parser)]
#[command(name = "syztriage")]
#[command(author, version, about = "Kernel Fuzzer Bug Triage Tool", long_about = None)]
pub struct Cli {
    /// Increase logs verbosity level
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Validate connectivity and report structure without executing reproducers
    #[arg(short = 'd', long, default_value_t = false)]
    dry_run: bool,

    /// Triage internal bugs instead of external report URLs
    #[arg(short, long, default_value_t = false)]
    internal: bool,

    /// Path to a configuration file
    #[arg(short, long, env = "SYZTRIAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Write the run report as JSON to this path
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl Cli {
    /// Dry runs always log at debug level so the skipped commands stay
    /// visible.
    pub fn verbose(&self) -> bool {
        self.verbose || self.dry_run
    }

    /// Returns `true` when every bug triaged without a pipeline failure.
    pub async fn execute(&self) -> Result<bool> {
        let config = Config::load(self.config.as_deref())?;

        let source = if self.internal {
            BugSource::Internal {
                bugs: config.bugs.internal.clone(),
            }
        } else {
            BugSource::External {
                urls: config.bugs.reports.clone(),
            }
        };
        if source.is_empty() {
            warn!("Bug list is empty; nothing to triage");
        }
        info!(
            "Triaging {} {} bug(s) against {}:{}",
            source.len(),
            if self.internal { "internal" } else { "external" },
            config.vm.host,
            config.vm.port
        );

        let fetcher = ReportFetcher::new(Duration::from_secs(config.limits.fetch_timeout_secs))?;
        let session = SshSession::new(&config.vm)?;
        let runner =
            ReproductionRunner::new(session, ReproLimits::from(&config.limits), self.dry_run);
        let orchestrator = TriageOrchestrator::new(fetcher, runner, config.bugs.clone());

        let report = orchestrator.run(source).await;

        let log_path = format!("syztriage-{}.log", Utc::now().timestamp());
        let mut log_file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create capture log: {log_path}"))?;
        report.write_capture_log(&mut log_file)?;
        info!("Captured output written to: {log_path}");

        output::print_summary(&report);

        if let Some(output_path) = &self.output {
            let json_output = serde_json::to_string_pretty(&report)?;
            std::fs::write(output_path, json_output)?;
            info!("Run report written to: {}", output_path.display());
        }

        Ok(!report.has_failures())
    }
}
