//! External command execution: the bundler and other one-shot stages.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Serialize;
use sitefix_core::{CommandConfig, Result, SiteFixError};
use tokio::process::Command;
use tracing::debug;

/// Result of a stage execution.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    /// Stage name.
    pub stage_name: String,

    /// Exit code (0 = success, -1 = killed by signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub success: bool,
}

impl StageResult {
    /// Whether this stage passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// Last `lines` lines of stderr, for failure logs.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.lines().collect();
        all[all.len().saturating_sub(lines)..].join("\n")
    }
}

/// Runs a single command to completion.
pub struct StageRunner;

impl StageRunner {
    /// Execute `command` and capture its output.
    ///
    /// A non-zero exit is reported in the result, not as an error. Spawn
    /// failures and timeouts are errors.
    pub async fn execute(
        name: &str,
        command: &CommandConfig,
        cwd: Option<&Path>,
    ) -> Result<StageResult> {
        let start = Instant::now();

        if command.program.is_empty() {
            return Err(SiteFixError::Configuration(format!(
                "stage {name} has empty command"
            )));
        }

        debug!(stage = %name, command = %command.display(), "spawning stage");
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let child = cmd.spawn()?;

        let output = if command.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(command.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| {
                SiteFixError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!(
                        "stage {name} timed out after {} seconds",
                        command.timeout_secs
                    ),
                ))
            })??
        } else {
            child.wait_with_output().await?
        };

        let exit_code = output.status.code().unwrap_or(-1);
        Ok(StageResult {
            stage_name: name.to_string(),
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
            success: output.status.success(),
        })
    }
}
