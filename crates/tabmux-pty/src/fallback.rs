//! One-shot command execution used when a tab has no live PTY.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

/// Captured result of running a command to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl RunOutput {
    /// A run that never started; `message` becomes the stderr text.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            exit_code: -1,
        }
    }
}

/// Runs a single command line without a terminal attached.
///
/// Implementations never fail outright: launch errors are reported through
/// [`RunOutput::failed`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run_once(&self, command: &str) -> RunOutput;
}

/// Runs commands through the platform shell (`sh -c`, or `cmd /C` on Windows).
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    working_dir: Option<PathBuf>,
}

impl ShellRunner {
    pub fn new(working_dir: Option<PathBuf>) -> Self {
        Self { working_dir }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run_once(&self, command: &str) -> RunOutput {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C");
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c");
            cmd
        };
        cmd.arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        match cmd.output().await {
            Ok(output) => RunOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                // Signal-terminated processes have no code.
                exit_code: output.status.code().unwrap_or(-1),
            },
            Err(e) => {
                log::warn!("could not run `{command}`: {e}");
                RunOutput::failed(format!("failed to run command: {e}"))
            }
        }
    }
}
