use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::LimitsConfig;
use crate::error::{Result, TriageError};
use crate::repro::session::{ExecOutput, Session};
use crate::source::BugReference;

/// Console markers that identify a kernel crash in captured output.
const CRASH_SIGNATURES: &[&str] = &[
    "Kernel panic",
    "kernel BUG at",
    "BUG:",
    "KASAN:",
    "KCSAN:",
    "UBSAN:",
    "general protection fault",
    "Call Trace:",
    "Rebooting in",
];

/// Where the compiled reproducer lands on the VM.
const REMOTE_REPRO_PATH: &str = "/root/syzbot-repro";

/// How far back the kernel log probe looks after a reproducer run.
const KERNEL_LOG_PROBE: &str = "dmesg | tail -n 50";

/// What one reproduction attempt found. A value, never an error: "did not
/// reproduce" and "could not attempt" are both legitimate triage findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// A crash signature was observed, or the crash took the VM down
    ReproducedCrash,
    /// The reproducer ran without triggering a crash
    NoCrash,
    /// The attempt itself failed: unreachable VM, rejected credential,
    /// build or upload failure
    ExecutionError,
    /// Dry-run sentinel; the reproducer was not executed
    DryRun,
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::ExecutionError)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Outcome::ReproducedCrash => "crash reproduced",
            Outcome::NoCrash => "no crash",
            Outcome::ExecutionError => "execution error",
            Outcome::DryRun => "dry run",
        };
        f.write_str(label)
    }
}

/// Terminal record of one reproduction attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ReproductionResult {
    pub bug: BugReference,
    pub attempted_at: DateTime<Utc>,
    pub outcome: Outcome,
    /// Combined stdout/stderr plus kernel log probe, truncated to the
    /// configured capture limit
    pub output: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ReproLimits {
    pub repro_timeout: Duration,
    pub capture_limit: usize,
}

impl From<&LimitsConfig> for ReproLimits {
    fn from(limits: &LimitsConfig) -> Self {
        Self {
            repro_timeout: Duration::from_secs(limits.repro_timeout_secs),
            capture_limit: limits.capture_limit_bytes,
        }
    }
}

/// Runs a reproducer against the target VM and classifies what happened.
pub struct ReproductionRunner<S: Session> {
    session: S,
    limits: ReproLimits,
    dry_run: bool,
}

impl<S: Session> ReproductionRunner<S> {
    pub fn new(session: S, limits: ReproLimits, dry_run: bool) -> Self {
        Self {
            session,
            limits,
            dry_run,
        }
    }

    /// Attempt to reproduce `bug` with the given C reproducer source.
    pub async fn reproduce(&self, bug: &BugReference, repro_source: &[u8]) -> ReproductionResult {
        let attempted_at = Utc::now();
        let (outcome, output) = if self.dry_run {
            self.dry_run_probe().await
        } else {
            self.attempt(repro_source).await
        };

        ReproductionResult {
            bug: bug.clone(),
            attempted_at,
            outcome,
            output: truncate_capture(output, self.limits.capture_limit),
            dry_run: self.dry_run,
        }
    }

    /// Dry run: the connectivity probe still runs, the reproducer does not.
    async fn dry_run_probe(&self) -> (Outcome, String) {
        match self.session.check().await {
            Ok(()) => (
                Outcome::DryRun,
                "connectivity check passed; reproducer not executed".to_string(),
            ),
            Err(e) => {
                warn!("Dry-run connectivity check failed: {e}");
                (
                    Outcome::DryRun,
                    format!("connectivity check failed: {e}; reproducer not executed"),
                )
            }
        }
    }

    async fn attempt(&self, repro_source: &[u8]) -> (Outcome, String) {
        if let Err(e) = self.session.check().await {
            return (
                Outcome::ExecutionError,
                format!("connectivity check failed: {e}"),
            );
        }

        let binary = match compile_repro(repro_source).await {
            Ok(binary) => binary,
            Err(e) => return (Outcome::ExecutionError, e.to_string()),
        };

        if let Err(e) = self.deploy(&binary).await {
            return (
                Outcome::ExecutionError,
                format!("deploying reproducer failed: {e}"),
            );
        }

        self.execute_and_classify().await
    }

    async fn deploy(&self, binary: &[u8]) -> Result<()> {
        // A stale reproducer from an earlier attempt must not shadow this one
        self.session
            .exec(&format!("rm -f {REMOTE_REPRO_PATH}"))
            .await?;
        self.session.upload(binary, REMOTE_REPRO_PATH).await?;

        let chmod = self
            .session
            .exec(&format!("chmod +x {REMOTE_REPRO_PATH}"))
            .await?;
        if !chmod.success() {
            return Err(TriageError::Session(format!(
                "chmod on {REMOTE_REPRO_PATH} failed: {}",
                chmod.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn execute_and_classify(&self) -> (Outcome, String) {
        info!(
            "Starting reproducer (limit {}s)",
            self.limits.repro_timeout.as_secs()
        );

        match timeout(self.limits.repro_timeout, self.session.exec(REMOTE_REPRO_PATH)).await {
            Ok(Ok(run)) => {
                debug!("Reproducer exited with {:?}", run.exit_code);
                let mut capture = combine_output(&run);
                // The panic usually lands in the kernel log, not in the
                // reproducer's own output
                match self.session.exec(KERNEL_LOG_PROBE).await {
                    Ok(probe) => {
                        capture.push('\n');
                        capture.push_str(&probe.stdout);
                    }
                    Err(e) => {
                        capture.push_str(&format!(
                            "\n[VM unreachable after reproducer exit: {e}]"
                        ));
                        return (Outcome::ReproducedCrash, capture);
                    }
                }
                if has_crash_signature(&capture) {
                    (Outcome::ReproducedCrash, capture)
                } else {
                    (Outcome::NoCrash, capture)
                }
            }
            Ok(Err(e)) => {
                // The session died under the reproducer. A kernel panic
                // kills the transport, so probe before blaming the network.
                if self.session.check().await.is_err() {
                    (
                        Outcome::ReproducedCrash,
                        format!("remote session lost during reproducer execution: {e}"),
                    )
                } else {
                    (
                        Outcome::ExecutionError,
                        format!("reproducer execution failed: {e}"),
                    )
                }
            }
            Err(_) => {
                info!(
                    "Reproducer still running after {}s",
                    self.limits.repro_timeout.as_secs()
                );
                match self.session.exec(KERNEL_LOG_PROBE).await {
                    Ok(probe) if has_crash_signature(&probe.stdout) => {
                        (Outcome::ReproducedCrash, probe.stdout)
                    }
                    Ok(probe) => (
                        Outcome::NoCrash,
                        format!(
                            "reproducer exceeded the {}s limit without crashing the kernel\n{}",
                            self.limits.repro_timeout.as_secs(),
                            probe.stdout
                        ),
                    ),
                    Err(e) => (
                        Outcome::ReproducedCrash,
                        format!("VM unreachable after reproducer timeout: {e}"),
                    ),
                }
            }
        }
    }
}

/// Build the C reproducer locally the way syzbot reproducers expect:
/// statically linked, with pthreads.
async fn compile_repro(source: &[u8]) -> Result<Vec<u8>> {
    let scratch = tempfile::tempdir()?;
    let src = scratch.path().join("repro.c");
    let bin = scratch.path().join("repro");
    tokio::fs::write(&src, source).await?;

    debug!("CMD: clang -static -lpthread {} -o {}", src.display(), bin.display());
    let output = Command::new("clang")
        .arg("-static")
        .arg("-lpthread")
        .arg(&src)
        .arg("-o")
        .arg(&bin)
        .output()
        .await
        .map_err(|e| TriageError::Build(format!("failed to run clang: {e}")))?;

    if !output.status.success() {
        return Err(TriageError::Build(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }

    Ok(tokio::fs::read(&bin).await?)
}

fn combine_output(run: &ExecOutput) -> String {
    let mut capture = run.stdout.clone();
    if !run.stderr.is_empty() {
        if !capture.is_empty() {
            capture.push('\n');
        }
        capture.push_str(&run.stderr);
    }
    if let Some(code) = run.exit_code {
        capture.push_str(&format!("\n[reproducer exited with code {code}]"));
    }
    capture
}

fn has_crash_signature(text: &str) -> bool {
    CRASH_SIGNATURES.iter().any(|sig| text.contains(sig))
}

fn truncate_capture(mut capture: String, limit: usize) -> String {
    if capture.len() <= limit {
        return capture;
    }
    let mut cut = limit;
    while !capture.is_char_boundary(cut) {
        cut -= 1;
    }
    capture.truncate(cut);
    capture.push_str("\n... [output truncated]");
    capture
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repro::testing::{ok_output, MockExec, MockSession};

    const KASAN_SPLAT: &str = "BUG: KASAN: use-after-free in l2cap_chan_timeout\n\
                               Call Trace:\n dump_stack_lvl+0x1e3/0x2cb";

    fn limits() -> ReproLimits {
        ReproLimits {
            repro_timeout: Duration::from_millis(100),
            capture_limit: 64 * 1024,
        }
    }

    fn bug() -> BugReference {
        BugReference::internal("KERN-48", "34afb82a3c67")
    }

    #[test]
    fn test_crash_signature_detection() {
        assert!(has_crash_signature(KASAN_SPLAT));
        assert!(has_crash_signature("... Rebooting in 86400 seconds ..."));
        assert!(!has_crash_signature("repro ran, nothing in the log"));
    }

    #[test]
    fn test_truncate_capture_respects_limit() {
        let long = "x".repeat(100);
        let truncated = truncate_capture(long, 10);
        assert!(truncated.starts_with("xxxxxxxxxx"));
        assert!(truncated.ends_with("[output truncated]"));

        let short = truncate_capture("short".to_string(), 10);
        assert_eq!(short, "short");
    }

    #[test]
    fn test_truncate_capture_multibyte_boundary() {
        let text = "ééééé".to_string(); // 2 bytes per char
        let truncated = truncate_capture(text, 3);
        assert!(truncated.starts_with('é'));
        assert!(truncated.ends_with("[output truncated]"));
    }

    #[tokio::test]
    async fn test_dry_run_never_executes_reproducer() {
        let session = MockSession::default();
        let runner = ReproductionRunner::new(session, limits(), true);

        let result = runner.reproduce(&bug(), b"int main() {}").await;

        assert_eq!(result.outcome, Outcome::DryRun);
        assert!(result.dry_run);
        // Connectivity was probed, but nothing ran on the VM
        assert!(runner.session.executed_commands().is_empty());
        assert!(runner.session.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_with_unreachable_vm_still_dry_run() {
        let session = MockSession::default().fail_check("connection refused");
        let runner = ReproductionRunner::new(session, limits(), true);

        let result = runner.reproduce(&bug(), b"int main() {}").await;

        assert_eq!(result.outcome, Outcome::DryRun);
        assert!(result.output.contains("connectivity check failed"));
    }

    #[tokio::test]
    async fn test_unreachable_vm_is_execution_error() {
        let session = MockSession::default().fail_check("connection refused");
        let runner = ReproductionRunner::new(session, limits(), false);

        let result = runner.reproduce(&bug(), b"int main() {}").await;

        assert_eq!(result.outcome, Outcome::ExecutionError);
        assert!(result.output.contains("connectivity check failed"));
    }

    #[tokio::test]
    async fn test_crash_signature_classifies_as_reproduced() {
        let session = MockSession::default().script(vec![
            MockExec::Out(ok_output("")),          // rm -f
            MockExec::Out(ok_output("")),          // chmod
            MockExec::Out(ok_output("")),          // reproducer run
            MockExec::Out(ok_output(KASAN_SPLAT)), // kernel log probe
        ]);
        let runner = ReproductionRunner::new(session, limits(), false);

        runner.deploy(b"binary").await.unwrap();
        let (outcome, output) = runner.execute_and_classify().await;

        assert_eq!(outcome, Outcome::ReproducedCrash);
        assert!(output.contains("KASAN"));
        let executed = runner.session.executed_commands();
        assert_eq!(executed[2], REMOTE_REPRO_PATH);
    }

    #[tokio::test]
    async fn test_clean_run_classifies_as_no_crash() {
        let session = MockSession::default().script(vec![
            MockExec::Out(ok_output("")),
            MockExec::Out(ok_output("")),
            MockExec::Out(ok_output("repro finished")),
            MockExec::Out(ok_output("systemd[1]: Started session")),
        ]);
        let runner = ReproductionRunner::new(session, limits(), false);

        runner.deploy(b"binary").await.unwrap();
        let (outcome, output) = runner.execute_and_classify().await;

        assert_eq!(outcome, Outcome::NoCrash);
        assert!(output.contains("repro finished"));
    }

    #[tokio::test]
    async fn test_session_lost_with_dead_vm_is_reproduced() {
        let session = MockSession::default()
            .script(vec![MockExec::Fail("broken pipe".to_string())]);
        *session.check_error.lock().unwrap() = Some("no route to host".to_string());
        let runner = ReproductionRunner::new(session, limits(), false);

        let (outcome, output) = runner.execute_and_classify().await;

        assert_eq!(outcome, Outcome::ReproducedCrash);
        assert!(output.contains("remote session lost"));
    }

    #[tokio::test]
    async fn test_session_lost_with_live_vm_is_execution_error() {
        let session = MockSession::default()
            .script(vec![MockExec::Fail("broken pipe".to_string())]);
        let runner = ReproductionRunner::new(session, limits(), false);

        let (outcome, _) = runner.execute_and_classify().await;

        assert_eq!(outcome, Outcome::ExecutionError);
    }

    #[tokio::test]
    async fn test_timeout_with_live_vm_and_quiet_log_is_no_crash() {
        let session = MockSession::default().script(vec![
            MockExec::Hang,                                       // reproducer never returns
            MockExec::Out(ok_output("systemd[1]: all quiet")),    // kernel log probe
        ]);
        let runner = ReproductionRunner::new(session, limits(), false);

        let (outcome, output) = runner.execute_and_classify().await;

        assert_eq!(outcome, Outcome::NoCrash);
        assert!(output.contains("exceeded"));
    }

    #[tokio::test]
    async fn test_timeout_with_crash_in_kernel_log_is_reproduced() {
        let session = MockSession::default().script(vec![
            MockExec::Hang,
            MockExec::Out(ok_output(KASAN_SPLAT)),
        ]);
        let runner = ReproductionRunner::new(session, limits(), false);

        let (outcome, _) = runner.execute_and_classify().await;

        assert_eq!(outcome, Outcome::ReproducedCrash);
    }

    #[tokio::test]
    async fn test_result_output_is_truncated() {
        let tight = ReproLimits {
            repro_timeout: Duration::from_millis(100),
            capture_limit: 32,
        };
        let session = MockSession::default();
        let runner = ReproductionRunner::new(session, tight, true);

        let result = runner.reproduce(&bug(), b"").await;
        assert!(result.output.len() <= 32 + "\n... [output truncated]".len());
    }
}
