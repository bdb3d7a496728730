//! Remote executor trait

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::result::CommandResult;
use crate::transfer::TransferOptions;

/// Runs commands and moves files on one node.
///
/// A non-zero exit status is returned as a normal [`CommandResult`];
/// only transport-level problems surface as [`ExecError`].
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a shell command
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError>;

    /// Run a shell command, failing with [`ExecError::Timeout`] after `timeout`
    async fn run_with_timeout(
        &self,
        cmd: &str,
        timeout: Duration,
    ) -> Result<CommandResult, ExecError>;

    /// Run a shell command with `input` written to its stdin
    async fn run_with_input(&self, cmd: &str, input: &[u8]) -> Result<CommandResult, ExecError>;

    /// Copy a local file or directory tree to `remote`
    ///
    /// Directories are copied recursively, honouring `options.excludes`.
    async fn transfer(
        &self,
        local: &Path,
        remote: &str,
        options: &TransferOptions,
    ) -> Result<(), ExecError>;

    /// Whether a session is currently open
    fn is_connected(&self) -> bool {
        false
    }

    /// Short executor name for logs
    fn executor_type(&self) -> &'static str;
}
