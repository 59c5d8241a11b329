use async_trait::async_trait;
use log::debug;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::config::VmConfig;
use crate::error::{Result, TriageError};

/// ssh reserves this exit code for its own failures (unreachable host,
/// rejected credential); anything else is the remote command's status.
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Captured output of one remote command.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Remote shell session to the target VM.
///
/// The trait is the seam between the triage pipeline and the transport:
/// production uses `SshSession`, tests script a mock. Session failures are
/// `TriageError::Session` values; the remote command's own exit status is
/// data, not an error.
#[async_trait]
pub trait Session: Send + Sync {
    /// Cheap connectivity probe: the target is reachable and accepts the
    /// configured credential.
    async fn check(&self) -> Result<()> {
        let output = self.exec("true").await?;
        if output.success() {
            Ok(())
        } else {
            Err(TriageError::Session(format!(
                "connectivity probe exited with {:?}: {}",
                output.exit_code,
                output.stderr.trim()
            )))
        }
    }

    async fn exec(&self, command: &str) -> Result<ExecOutput>;

    async fn upload(&self, data: &[u8], remote_path: &str) -> Result<()>;
}

/// `Session` backed by the system ssh/scp binaries.
pub struct SshSession {
    host: String,
    port: u16,
    user: String,
    key: PathBuf,
    connect_timeout_secs: u64,
}

impl SshSession {
    pub fn new(config: &VmConfig) -> Result<Self> {
        let key = config
            .ssh_key_path()
            .map_err(|e| TriageError::Config(e.to_string()))?;

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
            key,
            connect_timeout_secs: config.connect_timeout_secs,
        })
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn common_options(&self) -> Vec<String> {
        vec![
            "-i".to_string(),
            self.key.display().to_string(),
            "-o".to_string(),
            "IdentitiesOnly=yes".to_string(),
            "-o".to_string(),
            "NoHostAuthenticationForLocalhost=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
        ]
    }

    fn ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = vec!["-p".to_string(), self.port.to_string()];
        args.extend(self.common_options());
        args.push(self.destination());
        args.push(command.to_string());
        args
    }

    fn scp_args(&self, local: &Path, remote_path: &str) -> Vec<String> {
        let mut args = vec!["-P".to_string(), self.port.to_string()];
        args.extend(self.common_options());
        args.push(local.display().to_string());
        args.push(format!("{}:{}", self.destination(), remote_path));
        args
    }
}

async fn run_local(program: &str, args: &[String]) -> Result<std::process::Output> {
    debug!("CMD: {} {}", program, args.join(" "));
    Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| TriageError::Session(format!("failed to spawn {program}: {e}")))
}

#[async_trait]
impl Session for SshSession {
    async fn exec(&self, command: &str) -> Result<ExecOutput> {
        let output = run_local("ssh", &self.ssh_args(command)).await?;
        let exit_code = output.status.code();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if exit_code == Some(SSH_TRANSPORT_FAILURE) {
            return Err(TriageError::Session(format!(
                "ssh transport failure: {}",
                stderr.trim()
            )));
        }

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
            exit_code,
        })
    }

    async fn upload(&self, data: &[u8], remote_path: &str) -> Result<()> {
        let staging = tempfile::tempdir()?;
        let local = staging.path().join("payload");
        tokio::fs::write(&local, data).await?;

        let output = run_local("scp", &self.scp_args(&local, remote_path)).await?;
        if !output.status.success() {
            return Err(TriageError::Session(format!(
                "scp to {remote_path} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted exec behavior for one `MockSession::exec` call.
    pub enum MockExec {
        Out(ExecOutput),
        Fail(String),
        Hang,
    }

    /// In-memory `Session` used by runner and orchestrator tests. Responses
    /// are consumed in FIFO order; with no script left, exec succeeds with
    /// empty output.
    #[derive(Default)]
    pub struct MockSession {
        pub check_error: Mutex<Option<String>>,
        pub exec_script: Mutex<VecDeque<MockExec>>,
        pub executed: Mutex<Vec<String>>,
        pub uploads: Mutex<Vec<(usize, String)>>,
    }

    pub fn ok_output(stdout: &str) -> ExecOutput {
        ExecOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    impl MockSession {
        pub fn fail_check(self, message: &str) -> Self {
            *self.check_error.lock().unwrap() = Some(message.to_string());
            self
        }

        pub fn script(self, steps: Vec<MockExec>) -> Self {
            *self.exec_script.lock().unwrap() = steps.into();
            self
        }

        pub fn executed_commands(&self) -> Vec<String> {
            self.executed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Session for MockSession {
        async fn check(&self) -> Result<()> {
            match self.check_error.lock().unwrap().clone() {
                Some(message) => Err(TriageError::Session(message)),
                None => Ok(()),
            }
        }

        async fn exec(&self, command: &str) -> Result<ExecOutput> {
            self.executed.lock().unwrap().push(command.to_string());
            let next = self.exec_script.lock().unwrap().pop_front();
            match next {
                None => Ok(ok_output("")),
                Some(MockExec::Out(output)) => Ok(output),
                Some(MockExec::Fail(message)) => Err(TriageError::Session(message)),
                Some(MockExec::Hang) => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }

        async fn upload(&self, data: &[u8], remote_path: &str) -> Result<()> {
            self.uploads
                .lock()
                .unwrap()
                .push((data.len(), remote_path.to_string()));
            Ok(())
        }
    }
}
