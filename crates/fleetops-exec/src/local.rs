//! Local command execution using `tokio::process`
//!
//! Used when a node resolves to this machine, and in tests.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, instrument};

use crate::error::ExecError;
use crate::result::CommandResult;
use crate::traits::RemoteExecutor;
use crate::transfer::{TransferOptions, TransferPlan};

/// Local command executor
///
/// Executes commands on the local machine through `sh -c`.
#[derive(Debug, Clone)]
pub struct LocalExecutor;

impl LocalExecutor {
    /// Create a new local executor
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Internal method to execute command
    #[instrument(skip(self, input), level = "debug")]
    async fn execute(&self, cmd: &str, input: Option<&[u8]>) -> Result<CommandResult, ExecError> {
        let start = Instant::now();

        debug!(command = %cmd, "executing local command");

        // Use shell to support pipes, redirections, etc.
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecError::SpawnError(e.to_string()))?;

        if let Some(data) = input
            && let Some(mut stdin) = child.stdin.take()
        {
            stdin
                .write_all(data)
                .await
                .map_err(|e| ExecError::IoError(e.to_string()))?;
            // Closing stdin signals EOF to the command
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        let duration = start.elapsed();

        let status = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        debug!(
            command = %cmd,
            status = status,
            duration = ?duration,
            "command completed"
        );

        if !output.status.success() {
            error!(
                command = %cmd,
                status = status,
                stderr = %stderr,
                "command failed"
            );
        }

        Ok(CommandResult {
            status,
            stdout,
            stderr,
            duration,
        })
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        self.execute(cmd, None).await
    }

    async fn run_with_timeout(
        &self,
        cmd: &str,
        timeout_duration: Duration,
    ) -> Result<CommandResult, ExecError> {
        let start = Instant::now();

        debug!(command = %cmd, timeout = ?timeout_duration, "executing with timeout");

        match timeout(timeout_duration, self.execute(cmd, None)).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    command = %cmd,
                    timeout = ?timeout_duration,
                    elapsed = ?start.elapsed(),
                    "command timed out"
                );
                Err(ExecError::Timeout {
                    timeout: timeout_duration,
                })
            }
        }
    }

    async fn run_with_input(&self, cmd: &str, input: &[u8]) -> Result<CommandResult, ExecError> {
        self.execute(cmd, Some(input)).await
    }

    #[instrument(skip(self, options), level = "debug")]
    async fn transfer(
        &self,
        local: &Path,
        remote: &str,
        options: &TransferOptions,
    ) -> Result<(), ExecError> {
        let plan = TransferPlan::build(local, remote, options)?;

        for dir in &plan.dirs {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| ExecError::IoError(format!("{dir}: {e}")))?;
        }
        for file in &plan.files {
            // copy carries the permission bits along
            tokio::fs::copy(&file.local, &file.remote)
                .await
                .map_err(|e| ExecError::IoError(format!("{}: {e}", file.remote)))?;
        }

        let mut removed = 0;
        if let (true, Some(listing)) = (options.delete, plan.listing_command()) {
            let listed = self.execute(&listing, None).await?;
            if !listed.success() {
                return Err(ExecError::TransferFailed {
                    path: remote.to_string(),
                    reason: listed.stderr,
                });
            }
            let stale = plan.stale_entries(&listed.stdout, options);
            if let Some(cmd) = stale.removal_command() {
                let result = self.execute(&cmd, None).await?;
                if !result.success() {
                    return Err(ExecError::TransferFailed {
                        path: remote.to_string(),
                        reason: result.stderr,
                    });
                }
                removed = stale.len();
            }
        }

        debug!(files = plan.files.len(), removed, remote = %remote, "local transfer completed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn executor_type(&self) -> &'static str {
        "local"
    }
}
