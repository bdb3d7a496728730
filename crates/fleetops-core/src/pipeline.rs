//! Node deploy pipeline
//!
//! Drives one node through [`PipelineStage::ALL`] in order. The first failing
//! stage ends the run; nothing already started on the node is undone.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use fleetops_api::events::DeployEvent;
use fleetops_compose::ComposeRunner;
use fleetops_exec::transfer::shell_quote;
use fleetops_exec::{RemoteExecutor, TransferOptions};
use tracing::{debug, info, instrument, warn};

use crate::config::Source;
use crate::context::DeployContext;
use crate::error::NodeError;
use crate::health::{HealthChecker, HealthStatus, RemoteProbe};
use crate::model::Node;
use crate::outcome::{DeployOutcome, OutcomeStatus, PipelineStage, StageReport, StageStatus};

const DEPLOY_KEY_PATH: &str = "~/.ssh/deploy_key";

/// How a stage ended when it did not fail
enum StageResult {
    Done(Option<String>),
    Skipped(&'static str),
}

/// Single-node deploy state machine
pub struct NodePipeline {
    ctx: Arc<DeployContext>,
    node: Node,
    executor: Option<Arc<dyn RemoteExecutor>>,
    stages: Vec<StageReport>,
}

impl NodePipeline {
    #[must_use]
    pub fn new(ctx: Arc<DeployContext>, node: Node) -> Self {
        Self {
            ctx,
            node,
            executor: None,
            stages: Vec::with_capacity(PipelineStage::ALL.len()),
        }
    }

    /// Run every stage and report the result. Never fails: errors are
    /// captured in the returned [`DeployOutcome`].
    #[instrument(skip(self), fields(node = self.node.id, address = %self.node.address()))]
    pub async fn run(mut self) -> DeployOutcome {
        let started_at = Utc::now();
        let mut reached = None;
        let mut error = None;

        for stage in PipelineStage::ALL {
            reached = Some(stage);
            self.ctx.emit(DeployEvent::StageStarted {
                node: self.node.id,
                stage: stage.to_string(),
            });

            let clock = Instant::now();
            let result = self.run_stage(stage).await;
            let duration = clock.elapsed();

            let (status, message) = match &result {
                Ok(StageResult::Done(message)) => (StageStatus::Succeeded, message.clone()),
                Ok(StageResult::Skipped(reason)) => (StageStatus::Skipped, Some((*reason).to_string())),
                Err(e) => (StageStatus::Failed, Some(e.to_string())),
            };
            debug!(stage = %stage, status = %status, elapsed_ms = duration.as_millis() as u64, "stage finished");

            self.ctx.emit(DeployEvent::StageFinished {
                node: self.node.id,
                stage: stage.to_string(),
                status: status.to_string(),
                message: message.clone(),
            });
            self.stages.push(StageReport {
                stage,
                status,
                duration,
                message,
            });

            if let Err(e) = result {
                warn!(stage = %stage, error = %e, "node pipeline failed");
                error = Some(e);
                break;
            }
        }

        let status = if error.is_some() {
            OutcomeStatus::Failed
        } else {
            info!("node deployed");
            OutcomeStatus::Success
        };

        self.ctx.emit(DeployEvent::NodeFinished {
            node: self.node.id,
            status: status.to_string(),
            stage: reached.map(|s| s.to_string()).unwrap_or_default(),
        });

        DeployOutcome {
            node_id: self.node.id,
            address: self.node.address().to_string(),
            status,
            stage_reached: reached,
            error,
            skip_reason: None,
            stages: self.stages,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn run_stage(&mut self, stage: PipelineStage) -> Result<StageResult, NodeError> {
        match stage {
            PipelineStage::ResolveRecord => self.resolve_record().await,
            PipelineStage::SyncCode => self.sync_code().await,
            PipelineStage::UploadArtifacts => self.upload_artifacts().await,
            PipelineStage::BuildAndStart => self.build_and_start().await,
            PipelineStage::ConfigureRoutes => self.configure_routes().await,
            PipelineStage::VerifyHealth => self.verify_health().await,
        }
    }

    /// Connect on first use
    async fn executor(&mut self) -> Result<Arc<dyn RemoteExecutor>, NodeError> {
        if let Some(executor) = &self.executor {
            return Ok(Arc::clone(executor));
        }
        let executor = self
            .ctx
            .factory
            .create_executor(&self.node)
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))?;
        debug!(executor = executor.executor_type(), "executor ready");
        self.executor = Some(Arc::clone(&executor));
        Ok(executor)
    }

    fn compose(&self, executor: Arc<dyn RemoteExecutor>) -> ComposeRunner {
        ComposeRunner::new(executor, self.ctx.compose_project())
            .with_timeout(self.ctx.command_timeout)
    }

    async fn resolve_record(&mut self) -> Result<StageResult, NodeError> {
        self.ctx.directory.upsert_app_record(&self.ctx.config).await?;
        Ok(StageResult::Done(None))
    }

    async fn sync_code(&mut self) -> Result<StageResult, NodeError> {
        if self.ctx.restart_only {
            return Ok(StageResult::Skipped("restart-only"));
        }

        let executor = self.executor().await?;
        let ctx = Arc::clone(&self.ctx);
        let path = ctx.config.deploy_path.as_str();

        run_checked(executor.as_ref(), &format!("mkdir -p {path}"), "create deploy directory").await?;

        match &ctx.config.source {
            Source::Git { repo, ssh_key } => {
                let cloned = executor.run(&format!("test -d {path}/.git")).await?.success();
                if cloned {
                    let cmd = format!(
                        "cd {path} && git pull origin {}",
                        shell_quote(&ctx.config.branch)
                    );
                    run_checked(executor.as_ref(), &cmd, "git pull").await?;
                    return Ok(StageResult::Done(Some(format!("pulled {}", ctx.config.branch))));
                }

                if let Some(key) = ssh_key {
                    self.install_deploy_key(executor.as_ref(), key, repo).await?;
                }
                let cmd = format!(
                    "GIT_SSH_COMMAND='ssh -o StrictHostKeyChecking=no' git clone -b {} {} {path}",
                    shell_quote(&ctx.config.branch),
                    shell_quote(repo)
                );
                run_checked(executor.as_ref(), &cmd, "git clone").await?;
                Ok(StageResult::Done(Some(format!("cloned {}", ctx.config.branch))))
            }
            Source::Push => {
                executor
                    .transfer(&ctx.workdir, path, &TransferOptions::working_tree())
                    .await?;
                Ok(StageResult::Done(Some("working tree pushed".to_string())))
            }
            Source::Image { .. } => {
                let compose = self.compose(executor);
                if let Some(login) = &ctx.registry {
                    compose.login(&login.url, &login.username, &login.token).await?;
                }
                compose.pull(&ctx.scope).await?;
                Ok(StageResult::Done(Some("images pulled".to_string())))
            }
        }
    }

    async fn install_deploy_key(
        &self,
        executor: &dyn RemoteExecutor,
        local_key: &str,
        repo: &str,
    ) -> Result<(), NodeError> {
        let path = self.local_path(local_key);
        let key = tokio::fs::read(&path).await.map_err(|e| {
            NodeError::Artifact(format!("cannot read deploy key {}: {e}", path.display()))
        })?;

        let install = format!(
            "mkdir -p ~/.ssh && cat > {DEPLOY_KEY_PATH} && chmod 600 {DEPLOY_KEY_PATH}"
        );
        let result = executor.run_with_input(&install, &key).await?;
        if !result.success() {
            return Err(NodeError::Artifact(format!(
                "installing deploy key: {}",
                result.combined_output()
            )));
        }

        if let Some(host) = git_host(repo) {
            let stanza = format!(
                "Host {host}\n  IdentityFile {DEPLOY_KEY_PATH}\n  IdentitiesOnly yes\n  StrictHostKeyChecking no\n"
            );
            let cmd = "(grep -q 'deploy_key' ~/.ssh/config 2>/dev/null || cat >> ~/.ssh/config) && chmod 600 ~/.ssh/config";
            let result = executor.run_with_input(cmd, stanza.as_bytes()).await?;
            if !result.success() {
                return Err(NodeError::Artifact(format!(
                    "writing ssh config: {}",
                    result.combined_output()
                )));
            }
        }

        info!(key = %path.display(), "deploy key installed");
        Ok(())
    }

    async fn upload_artifacts(&mut self) -> Result<StageResult, NodeError> {
        let ctx = Arc::clone(&self.ctx);
        if ctx.config.env_files.is_empty() && ctx.config.sync.is_empty() {
            return Ok(StageResult::Skipped("no artifacts declared"));
        }

        let mut uploaded = 0;
        let mut skipped = 0;
        for mapping in ctx.config.env_files.iter().chain(&ctx.config.sync) {
            let local = self.local_path(&mapping.local);
            if !local.exists() {
                debug!(local = %local.display(), "artifact missing locally, skipping");
                skipped += 1;
                continue;
            }

            let executor = self.executor().await?;
            let remote = format!("{}/{}", ctx.config.deploy_path, mapping.remote.trim_start_matches("./"));
            executor
                .transfer(&local, &remote, &TransferOptions::new())
                .await
                .map_err(|e| NodeError::Artifact(format!("{} -> {remote}: {e}", mapping.local)))?;
            uploaded += 1;
        }

        Ok(StageResult::Done(Some(format!(
            "{uploaded} uploaded, {skipped} skipped"
        ))))
    }

    async fn build_and_start(&mut self) -> Result<StageResult, NodeError> {
        let executor = self.executor().await?;
        let compose = self.compose(executor);
        let scope = &self.ctx.scope;

        if self.ctx.restart_only {
            compose.restart(scope).await?;
            return Ok(StageResult::Done(Some("restarted".to_string())));
        }

        if self.ctx.force {
            compose.remove(scope).await?;
        }

        if matches!(self.ctx.config.source, Source::Image { .. }) {
            compose.up(scope).await?;
            compose.prune_images().await;
            return Ok(StageResult::Done(Some("started".to_string())));
        }

        compose.build(scope).await?;
        compose.up(scope).await?;
        Ok(StageResult::Done(Some("built and started".to_string())))
    }

    async fn configure_routes(&mut self) -> Result<StageResult, NodeError> {
        if self.ctx.restart_only {
            return Ok(StageResult::Skipped("restart-only"));
        }
        if self.ctx.config.routes.is_empty() {
            return Ok(StageResult::Skipped("no routes declared"));
        }

        let executor = self.executor().await?;
        let ctx = Arc::clone(&self.ctx);
        ctx.routes
            .configure(executor.as_ref(), &ctx.config.target.app, &ctx.config.routes)
            .await?;
        Ok(StageResult::Done(Some(format!("{} routes", ctx.config.routes.len()))))
    }

    async fn verify_health(&mut self) -> Result<StageResult, NodeError> {
        if self.ctx.config.healthchecks.is_empty() {
            return Ok(StageResult::Skipped("no healthchecks declared"));
        }

        let executor = self.executor().await?;
        let checker = HealthChecker::new(
            self.ctx.health_policy.clone(),
            Arc::new(RemoteProbe::new(executor)),
        );

        for check in &self.ctx.config.healthchecks {
            if let HealthStatus::Unhealthy { attempts, reason } = checker.check(&check.url).await {
                return Err(NodeError::HealthCheck {
                    name: check.name.clone(),
                    url: check.url.clone(),
                    attempts,
                    reason,
                });
            }
        }

        Ok(StageResult::Done(Some(format!(
            "{} checks passed",
            self.ctx.config.healthchecks.len()
        ))))
    }

    /// Local path for a descriptor entry: `~/` is the home directory,
    /// relative paths resolve against the working directory
    fn local_path(&self, raw: &str) -> PathBuf {
        if let Some(rest) = raw.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        self.ctx.workdir.join(raw)
    }
}

async fn run_checked(
    executor: &dyn RemoteExecutor,
    cmd: &str,
    what: &str,
) -> Result<(), NodeError> {
    let result = executor.run(cmd).await?;
    if result.success() {
        Ok(())
    } else {
        Err(NodeError::Build(format!(
            "{what} exited with status {}: {}",
            result.status,
            result.stderr.trim()
        )))
    }
}

/// Host part of an ssh-style git remote, `None` for http(s) remotes
fn git_host(repo: &str) -> Option<&str> {
    if repo.starts_with("http://") || repo.starts_with("https://") {
        return None;
    }
    let rest = repo.strip_prefix("ssh://").unwrap_or(repo);
    let rest = rest.split_once('@').map_or(rest, |(_, host)| host);
    let host = rest.split(|c: char| c == ':' || c == '/').next()?;
    (!host.is_empty()).then_some(host)
}
