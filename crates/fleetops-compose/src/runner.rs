//! Compose stack operations on one node

use std::sync::Arc;
use std::time::Duration;

use fleetops_exec::{CommandResult, RemoteExecutor};
use tracing::{debug, info, instrument, warn};

use crate::error::ComposeError;
use crate::project::{ComposeProject, ServiceScope};

/// Runs compose commands for a [`ComposeProject`] on a node
pub struct ComposeRunner {
    executor: Arc<dyn RemoteExecutor>,
    project: ComposeProject,
    /// Upper bound for a single compose command (builds can be slow)
    command_timeout: Option<Duration>,
}

impl ComposeRunner {
    /// Create a runner for `project` on the node behind `executor`
    pub fn new(executor: Arc<dyn RemoteExecutor>, project: ComposeProject) -> Self {
        Self {
            executor,
            project,
            command_timeout: None,
        }
    }

    /// Fail commands that run longer than `timeout`
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// The project this runner drives
    #[must_use]
    pub fn project(&self) -> &ComposeProject {
        &self.project
    }

    /// Run `cmd` and turn a non-zero exit into [`ComposeError::CommandFailed`]
    async fn checked(&self, cmd: &str) -> Result<CommandResult, ComposeError> {
        let result = match self.command_timeout {
            Some(timeout) => self.executor.run_with_timeout(cmd, timeout).await?,
            None => self.executor.run(cmd).await?,
        };
        ensure_success(cmd, result)
    }

    /// Build images
    ///
    /// # Errors
    /// Returns `ComposeError` if the command cannot run or exits non-zero
    #[instrument(skip(self), fields(path = %self.project.deploy_path()))]
    pub async fn build(&self, scope: &ServiceScope) -> Result<(), ComposeError> {
        self.checked(&self.project.build_cmd(scope)).await?;
        info!("images built");
        Ok(())
    }

    /// Start (or recreate) services in the background
    ///
    /// # Errors
    /// Returns `ComposeError` if the command cannot run or exits non-zero
    #[instrument(skip(self), fields(path = %self.project.deploy_path()))]
    pub async fn up(&self, scope: &ServiceScope) -> Result<(), ComposeError> {
        self.checked(&self.project.up_cmd(scope)).await?;
        info!("services started");
        Ok(())
    }

    /// Restart running services without rebuilding
    ///
    /// # Errors
    /// Returns `ComposeError` if the command cannot run or exits non-zero
    #[instrument(skip(self), fields(path = %self.project.deploy_path()))]
    pub async fn restart(&self, scope: &ServiceScope) -> Result<(), ComposeError> {
        self.checked(&self.project.restart_cmd(scope)).await?;
        info!("services restarted");
        Ok(())
    }

    /// Pull images from the registry
    ///
    /// # Errors
    /// Returns `ComposeError` if the command cannot run or exits non-zero
    #[instrument(skip(self), fields(path = %self.project.deploy_path()))]
    pub async fn pull(&self, scope: &ServiceScope) -> Result<(), ComposeError> {
        self.checked(&self.project.pull_cmd(scope)).await?;
        info!("images pulled");
        Ok(())
    }

    /// Stop and remove existing containers
    ///
    /// # Errors
    /// Returns `ComposeError` if the command cannot run or exits non-zero
    pub async fn remove(&self, scope: &ServiceScope) -> Result<(), ComposeError> {
        self.checked(&self.project.remove_cmd(scope)).await?;
        debug!("containers removed");
        Ok(())
    }

    /// `docker compose ps` output
    ///
    /// # Errors
    /// Returns `ComposeError` if the command cannot run or exits non-zero
    pub async fn ps(&self) -> Result<String, ComposeError> {
        Ok(self.checked(&self.project.ps_cmd()).await?.stdout)
    }

    /// Remove dangling images. Failures are logged and ignored.
    pub async fn prune_images(&self) {
        let cmd = ComposeProject::prune_cmd();
        match self.executor.run(&cmd).await {
            Ok(result) if result.success() => debug!("dangling images pruned"),
            Ok(result) => warn!(status = result.status, stderr = %result.stderr, "image prune failed"),
            Err(e) => warn!(error = %e, "image prune failed"),
        }
    }

    /// Log in to a registry, passing the token on stdin
    ///
    /// # Errors
    /// Returns `ComposeError` if the command cannot run or exits non-zero
    pub async fn login(
        &self,
        registry: &str,
        username: &str,
        token: &str,
    ) -> Result<(), ComposeError> {
        let cmd = ComposeProject::login_cmd(registry, username);
        let result = self
            .executor
            .run_with_input(&cmd, token.as_bytes())
            .await?;
        ensure_success(&cmd, result)?;
        info!(registry = %registry, "registry login succeeded");
        Ok(())
    }
}

fn ensure_success(cmd: &str, result: CommandResult) -> Result<CommandResult, ComposeError> {
    if result.success() {
        Ok(result)
    } else {
        Err(ComposeError::CommandFailed {
            command: cmd.to_string(),
            status: result.status,
            stderr: result.stderr.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use fleetops_exec::{ExecError, TransferOptions};

    use super::*;

    /// Records commands and fails any containing `fail_on`
    struct RecordingExecutor {
        commands: Mutex<Vec<String>>,
        stdin: Mutex<Vec<Vec<u8>>>,
        fail_on: Option<&'static str>,
    }

    impl RecordingExecutor {
        fn new(fail_on: Option<&'static str>) -> Self {
            Self {
                commands: Mutex::new(Vec::new()),
                stdin: Mutex::new(Vec::new()),
                fail_on,
            }
        }
    }

    #[async_trait]
    impl RemoteExecutor for RecordingExecutor {
        async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError> {
            self.commands.lock().unwrap().push(cmd.to_string());
            match self.fail_on {
                Some(pattern) if cmd.contains(pattern) => Ok(CommandResult::failed(1, "boom")),
                _ => Ok(CommandResult::ok("")),
            }
        }

        async fn run_with_timeout(
            &self,
            cmd: &str,
            _timeout: Duration,
        ) -> Result<CommandResult, ExecError> {
            self.run(cmd).await
        }

        async fn run_with_input(
            &self,
            cmd: &str,
            input: &[u8],
        ) -> Result<CommandResult, ExecError> {
            self.stdin.lock().unwrap().push(input.to_vec());
            self.run(cmd).await
        }

        async fn transfer(
            &self,
            _local: &Path,
            _remote: &str,
            _options: &TransferOptions,
        ) -> Result<(), ExecError> {
            Ok(())
        }

        fn executor_type(&self) -> &'static str {
            "recording"
        }
    }

    #[tokio::test]
    async fn test_build_failure_reports_command() {
        let executor = Arc::new(RecordingExecutor::new(Some("build")));
        let runner = ComposeRunner::new(executor, ComposeProject::new("/srv/api"));

        let err = runner.build(&ServiceScope::All).await.unwrap_err();
        match err {
            ComposeError::CommandFailed { command, status, stderr } => {
                assert!(command.ends_with("docker compose build"));
                assert_eq!(status, 1);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_login_sends_token_on_stdin() {
        let executor = Arc::new(RecordingExecutor::new(None));
        let runner = ComposeRunner::new(executor.clone(), ComposeProject::new("/srv/api"));

        runner.login("ghcr.io", "bot", "s3cret").await.unwrap();

        let commands = executor.commands.lock().unwrap();
        assert!(!commands[0].contains("s3cret"));
        assert_eq!(executor.stdin.lock().unwrap()[0], b"s3cret");
    }

    #[tokio::test]
    async fn test_prune_failure_is_ignored() {
        let executor = Arc::new(RecordingExecutor::new(Some("prune")));
        let runner = ComposeRunner::new(executor.clone(), ComposeProject::new("/srv/api"));

        runner.prune_images().await;
        assert_eq!(executor.commands.lock().unwrap().len(), 1);
    }
}
