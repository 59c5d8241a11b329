use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::Serialize;
use std::fmt;

use crate::config::BugsConfig;
use crate::error::TriageError;
use crate::output::PhaseProgress;
use crate::report::{CrashTableParser, ReportFetcher};
use crate::repro::{ReproductionResult, ReproductionRunner, Session};
use crate::source::{BugOrigin, BugReference, BugSource};

/// Pipeline stage a per-bug failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Parse,
    Reproduce,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Fetch => "fetch",
            Stage::Parse => "parse",
            Stage::Reproduce => "reproduce",
        };
        f.write_str(label)
    }
}

/// How one bug's triage ended: a completed reproduction attempt, or a
/// pipeline failure caught at the bug boundary.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum Verdict {
    Completed(ReproductionResult),
    Failed { stage: Stage, cause: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TriageEntry {
    pub bug: BugReference,
    pub verdict: Verdict,
}

impl TriageEntry {
    /// True when this bug counts against the run's exit status: the
    /// pipeline broke, or the reproduction attempt itself failed.
    pub fn is_failure(&self) -> bool {
        match &self.verdict {
            Verdict::Completed(result) => result.outcome.is_failure(),
            Verdict::Failed { .. } => true,
        }
    }
}

/// Ordered result sink for one triage run. Entries are appended as each
/// bug's pipeline completes and never mutated afterwards.
#[derive(Debug, Serialize)]
pub struct TriageReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entries: Vec<TriageEntry>,
}

impl TriageReport {
    /// A run with no bugs processed is a failure, as is any failed entry.
    pub fn has_failures(&self) -> bool {
        self.entries.is_empty() || self.entries.iter().any(TriageEntry::is_failure)
    }

    /// Append every bug's captured output to `out`, one delimited section
    /// per bug.
    pub fn write_capture_log(&self, out: &mut impl std::io::Write) -> std::io::Result<()> {
        let rule = "=".repeat(91);
        for entry in &self.entries {
            writeln!(out, "{rule}")?;
            writeln!(out, "{}", entry.bug.id)?;
            writeln!(out, "{rule}")?;
            match &entry.verdict {
                Verdict::Completed(result) => writeln!(out, "{}", result.output)?,
                Verdict::Failed { stage, cause } => writeln!(out, "[{stage} failed] {cause}")?,
            }
        }
        Ok(())
    }
}

type StageResult<T> = std::result::Result<T, (Stage, TriageError)>;

/// Drives each bug through fetch -> parse -> reproduce and records the
/// outcome. Any error is caught at the bug boundary: one bug's failure
/// never aborts the rest of the queue.
pub struct TriageOrchestrator<S: Session> {
    fetcher: ReportFetcher,
    runner: ReproductionRunner<S>,
    bugs: BugsConfig,
}

impl<S: Session> TriageOrchestrator<S> {
    pub fn new(fetcher: ReportFetcher, runner: ReproductionRunner<S>, bugs: BugsConfig) -> Self {
        Self {
            fetcher,
            runner,
            bugs,
        }
    }

    pub async fn run(&self, source: BugSource) -> TriageReport {
        let started_at = Utc::now();
        let mut entries = Vec::new();

        for bug in source {
            info!("Processing bug: {}", bug.id);
            let progress = PhaseProgress::start(&bug.id);

            let verdict = match self.triage_bug(&bug, &progress).await {
                Ok(result) => {
                    info!("Triage of {} finished: {}", bug.id, result.outcome);
                    progress.finish(&result.outcome.to_string());
                    Verdict::Completed(result)
                }
                Err((stage, e)) => {
                    error!("Triage of {} failed during {}: {}", bug.id, stage, e);
                    progress.abandon(&stage.to_string());
                    Verdict::Failed {
                        stage,
                        cause: e.to_string(),
                    }
                }
            };
            entries.push(TriageEntry { bug, verdict });
        }

        if entries.is_empty() {
            error!("No bugs were processed");
        }

        TriageReport {
            started_at,
            finished_at: Utc::now(),
            entries,
        }
    }

    async fn triage_bug(
        &self,
        bug: &BugReference,
        progress: &PhaseProgress,
    ) -> StageResult<ReproductionResult> {
        match &bug.origin {
            BugOrigin::External { url } => self.triage_external(bug, url, progress).await,
            BugOrigin::Internal { commit } => self.triage_internal(bug, commit, progress).await,
        }
    }

    /// Full pipeline: fetch the report, parse its crash table, download the
    /// reproducer, run it.
    async fn triage_external(
        &self,
        bug: &BugReference,
        url: &str,
        progress: &PhaseProgress,
    ) -> StageResult<ReproductionResult> {
        progress.fetching();
        let url = ReportFetcher::parse_url(url).map_err(|e| (Stage::Fetch, e))?;
        let report = self
            .fetcher
            .fetch_report(&url)
            .await
            .map_err(|e| (Stage::Fetch, e))?;
        debug!(
            "Fetched {} bytes at {}",
            report.content.len(),
            report.fetched_at
        );

        progress.parsing();
        let parser = CrashTableParser::new(report.url.clone());
        let records = parser.parse(&report.content).map_err(|e| (Stage::Parse, e))?;
        let crash = CrashTableParser::select_reproducible(&records)
            .map_err(|e| (Stage::Parse, e))?;

        info!(
            "Found {} crash record(s); reproducing '{}'",
            records.len(),
            crash.title
        );
        if let Some(commit) = &crash.commit {
            info!("Crash observed at commit {commit}");
        }
        if let Some(config) = &crash.config {
            info!("Kernel config reference: {config}");
        }

        progress.reproducing();
        let Some(repro_ref) = &crash.repro else {
            return Err((Stage::Parse, TriageError::NoValidCrashes));
        };
        let repro_url = ReportFetcher::parse_url(repro_ref).map_err(|e| (Stage::Reproduce, e))?;
        let source = self
            .fetcher
            .fetch_bytes(&repro_url)
            .await
            .map_err(|e| (Stage::Reproduce, e))?;

        Ok(self.runner.reproduce(bug, &source).await)
    }

    /// Internal bugs have a pre-known commit and a shared kernel config;
    /// fetch and parse are bypassed and the reproducer comes from disk.
    async fn triage_internal(
        &self,
        bug: &BugReference,
        commit: &str,
        progress: &PhaseProgress,
    ) -> StageResult<ReproductionResult> {
        info!("Internal bug {} at commit {}", bug.id, commit);
        info!("Kernel config reference: {}", self.bugs.internal_config_url);

        progress.reproducing();
        let path = self.bugs.repro_dir.join(format!("repro-{}.c", bug.id));
        debug!("Reproducer source path: {}", path.display());

        let source = tokio::fs::read(&path).await.map_err(|e| {
            (
                Stage::Reproduce,
                TriageError::Config(format!(
                    "C reproducer for {} should be placed at {}: {e}",
                    bug.id,
                    path.display()
                )),
            )
        })?;

        Ok(self.runner.reproduce(bug, &source).await)
    }
}
