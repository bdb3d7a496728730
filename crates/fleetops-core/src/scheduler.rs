//! Deploy scheduler
//!
//! Resolves a target to its candidate nodes and fans the node pipeline out
//! across them, in parallel or one node at a time.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetops_api::events::DeployEvent;
use fleetops_compose::{ComposeProject, ComposeRunner, EnvVar};
use futures::future::join_all;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::actor::handle::PoolHandle;
use crate::config::DeployConfig;
use crate::context::DeployContext;
use crate::directory::{DeploymentRecord, DirectoryService, ExecutorFactory};
use crate::error::{ConfigError, CoreError, NodeError, ResolutionError};
use crate::lock::DeployLocks;
use crate::message::CandidateFilter;
use crate::model::{Node, NodeBinding, NodeHealth, NodeId, Target, stable_order};
use crate::outcome::{DeployOutcome, OutcomeStatus};
use crate::pipeline::NodePipeline;
use crate::retry::RetryPolicy;
use crate::routes::RouteConfigurator;

/// Default limit for one remote command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

/// How pipelines are fanned out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeployMode {
    /// All nodes at once; failures are isolated per node
    #[default]
    Parallel,
    /// One node at a time in stable order; the first failure stops the run
    Rolling,
}

impl fmt::Display for DeployMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parallel => "parallel",
            Self::Rolling => "rolling",
        })
    }
}

/// Caller options for one deploy invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    /// `--service`: comma separated compose services
    pub service: Option<String>,
    /// `--app`: app group name from the descriptor
    pub app_group: Option<String>,
    pub filter: CandidateFilter,
    pub mode: DeployMode,
    pub restart_only: bool,
    pub force: bool,
    /// Raw `-e KEY=VALUE` overrides
    pub set_vars: Vec<String>,
    /// Fail instead of prompting when nothing is bound
    pub non_interactive: bool,
    /// Recorded with each deployment, e.g. `cli`
    pub trigger: String,
}

impl Default for DeployRequest {
    fn default() -> Self {
        Self {
            service: None,
            app_group: None,
            filter: CandidateFilter::default(),
            mode: DeployMode::default(),
            restart_only: false,
            force: false,
            set_vars: Vec::new(),
            non_interactive: false,
            trigger: "cli".to_string(),
        }
    }
}

/// Chooses a node to bind when a target has none
#[async_trait]
pub trait NodePicker: Send + Sync {
    /// `None` when the user declines
    ///
    /// # Errors
    /// Returns a `CoreError` if the prompt cannot be shown
    async fn pick(&self, target: &Target, nodes: &[Node]) -> Result<Option<NodeId>, CoreError>;
}

/// Aggregate result across nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryStatus {
    Success,
    PartialFailure,
    Failure,
}

impl fmt::Display for SummaryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::PartialFailure => "partial failure",
            Self::Failure => "failure",
        })
    }
}

/// Every node outcome of one invocation, in stable node order
#[derive(Debug, Clone)]
pub struct DeploySummary {
    pub target: Target,
    pub mode: DeployMode,
    pub outcomes: Vec<DeployOutcome>,
}

impl DeploySummary {
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(OutcomeStatus::Success)
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(OutcomeStatus::Failed)
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(OutcomeStatus::Skipped)
    }

    /// `Success` only if every node succeeded
    #[must_use]
    pub fn status(&self) -> SummaryStatus {
        if self.outcomes.iter().all(DeployOutcome::succeeded) {
            SummaryStatus::Success
        } else if self.succeeded() > 0 {
            SummaryStatus::PartialFailure
        } else {
            SummaryStatus::Failure
        }
    }

    /// Process exit status: 0 iff every targeted node succeeded
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.status() {
            SummaryStatus::Success => 0,
            SummaryStatus::PartialFailure | SummaryStatus::Failure => 1,
        }
    }

    #[must_use]
    pub fn outcome(&self, node_id: NodeId) -> Option<&DeployOutcome> {
        self.outcomes.iter().find(|o| o.node_id == node_id)
    }

    fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

/// `docker compose ps` for one bound node
#[derive(Debug, Clone)]
pub struct NodeStatusReport {
    pub node: Node,
    /// Command output, or why it could not be obtained
    pub output: Result<String, String>,
}

/// Fans deploys out over a target's nodes
pub struct DeployScheduler {
    pool: PoolHandle,
    directory: Arc<dyn DirectoryService>,
    factory: Arc<dyn ExecutorFactory>,
    locks: DeployLocks,
    picker: Option<Arc<dyn NodePicker>>,
    events: broadcast::Sender<DeployEvent>,
    health_policy: RetryPolicy,
    record_policy: RetryPolicy,
    command_timeout: Duration,
    workdir: PathBuf,
    cancel: CancellationToken,
}

impl DeployScheduler {
    #[must_use]
    pub fn new(
        pool: PoolHandle,
        directory: Arc<dyn DirectoryService>,
        factory: Arc<dyn ExecutorFactory>,
        events: broadcast::Sender<DeployEvent>,
    ) -> Self {
        Self {
            pool,
            directory,
            factory,
            locks: DeployLocks::new(),
            picker: None,
            events,
            health_policy: RetryPolicy::default(),
            record_policy: RetryPolicy::exponential(
                3,
                Duration::from_millis(500),
                Duration::from_secs(2),
            ),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            workdir: PathBuf::from("."),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_locks(mut self, locks: DeployLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Prompt for a node when the target has none bound
    #[must_use]
    pub fn with_picker(mut self, picker: Arc<dyn NodePicker>) -> Self {
        self.picker = Some(picker);
        self
    }

    #[must_use]
    pub fn with_health_policy(mut self, policy: RetryPolicy) -> Self {
        self.health_policy = policy;
        self
    }

    /// Retry policy for persisting deployment records
    #[must_use]
    pub fn with_record_policy(mut self, policy: RetryPolicy) -> Self {
        self.record_policy = policy;
        self
    }

    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Directory that descriptor paths resolve against
    #[must_use]
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops nodes not yet started
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Deploy `config` to every candidate node of its target
    ///
    /// Preflight (scoping, `-e` parsing, registry secrets) and resolution
    /// happen before any remote action. Per-node failures are reported in
    /// the summary, not as an error.
    ///
    /// # Errors
    /// Returns `CoreError::Config` for invalid input, `LockContention` if a
    /// deploy for the target is already running, or a resolution error
    #[instrument(skip(self, config, request), fields(deploy_target = %config.target, mode = %request.mode))]
    pub async fn deploy(
        &self,
        config: Arc<DeployConfig>,
        request: DeployRequest,
    ) -> Result<DeploySummary, CoreError> {
        let target = config.target.clone();

        let scope = config.service_scope(request.service.as_deref(), request.app_group.as_deref())?;
        let env = request
            .set_vars
            .iter()
            .map(|raw| {
                raw.parse::<EnvVar>()
                    .map_err(|_| ConfigError::InvalidEnvVar(raw.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let registry = config.registry_login()?;

        let _guard = self.locks.acquire(&target)?;

        let mut nodes = self.candidates(&target, &request).await?;
        stable_order(&mut nodes);

        info!(nodes = nodes.len(), "deploy starting");
        self.emit(DeployEvent::DeployStarted {
            target: target.to_string(),
            mode: request.mode.to_string(),
            nodes: nodes.iter().map(|n| n.id).collect(),
        });

        let ctx = Arc::new(DeployContext {
            config,
            scope,
            env,
            restart_only: request.restart_only,
            force: request.force,
            registry,
            workdir: self.workdir.clone(),
            command_timeout: self.command_timeout,
            health_policy: self.health_policy.clone(),
            directory: Arc::clone(&self.directory),
            factory: Arc::clone(&self.factory),
            routes: RouteConfigurator::new(),
            events: self.events.clone(),
        });

        let outcomes = match request.mode {
            DeployMode::Parallel => self.run_parallel(&ctx, &nodes, &request.trigger).await,
            DeployMode::Rolling => self.run_rolling(&ctx, &nodes, &request.trigger).await,
        };

        let summary = DeploySummary {
            target,
            mode: request.mode,
            outcomes,
        };

        info!(
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            skipped = summary.skipped(),
            status = %summary.status(),
            "deploy finished"
        );
        self.emit(DeployEvent::DeployFinished {
            target: summary.target.to_string(),
            succeeded: summary.succeeded(),
            failed: summary.failed(),
            skipped: summary.skipped(),
        });

        Ok(summary)
    }

    /// `docker compose ps` on every bound node
    ///
    /// # Errors
    /// Returns `ResolutionError::NoNodeBound` if the target has no nodes
    pub async fn status(&self, config: &DeployConfig) -> Result<Vec<NodeStatusReport>, CoreError> {
        let report = self.pool.status(&config.target).await?;
        if report.nodes.is_empty() {
            return Err(ResolutionError::NoNodeBound(config.target.to_string()).into());
        }

        let project = ComposeProject::new(config.deploy_path.clone())
            .with_files(config.compose_files.clone());

        let checks = report.nodes.into_iter().map(|node| {
            let project = project.clone();
            async move {
                let output = match self.factory.create_executor(&node).await {
                    Ok(executor) => ComposeRunner::new(executor, project)
                        .with_timeout(self.command_timeout)
                        .ps()
                        .await
                        .map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                NodeStatusReport { node, output }
            }
        });

        Ok(join_all(checks).await)
    }

    async fn candidates(
        &self,
        target: &Target,
        request: &DeployRequest,
    ) -> Result<Vec<Node>, CoreError> {
        let nodes = self
            .pool
            .resolve_candidates(target, request.filter.clone())
            .await?;
        if !nodes.is_empty() {
            return Ok(nodes);
        }

        let no_node = || CoreError::from(ResolutionError::NoNodeBound(target.to_string()));
        let picker = match &self.picker {
            Some(picker) if !request.non_interactive => picker,
            _ => return Err(no_node()),
        };

        let available = self.directory.available_nodes().await?;
        if available.is_empty() {
            return Err(no_node());
        }
        let Some(node_id) = picker.pick(target, &available).await? else {
            return Err(no_node());
        };

        self.pool
            .bind_node(
                target,
                NodeBinding {
                    node_id,
                    primary: true,
                    weight: None,
                },
            )
            .await?;
        info!(node = node_id, "node bound");

        let nodes = self
            .pool
            .resolve_candidates(target, request.filter.clone())
            .await?;
        if nodes.is_empty() {
            return Err(no_node());
        }
        Ok(nodes)
    }

    async fn run_parallel(
        &self,
        ctx: &Arc<DeployContext>,
        nodes: &[Node],
        trigger: &str,
    ) -> Vec<DeployOutcome> {
        let mut handles = Vec::with_capacity(nodes.len());
        for node in nodes {
            let ctx = Arc::clone(ctx);
            let node = node.clone();
            let cancel = self.cancel.clone();
            handles.push(tokio::spawn(async move {
                if cancel.is_cancelled() {
                    return DeployOutcome::skipped(&node, "cancelled");
                }
                NodePipeline::new(ctx, node).run().await
            }));
        }

        let mut outcomes = Vec::with_capacity(nodes.len());
        for (node, handle) in nodes.iter().zip(handles) {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(node = node.id, error = %e, "pipeline task panicked");
                    DeployOutcome::aborted(node, NodeError::Build(format!("pipeline task died: {e}")))
                }
            };
            self.finish_node(&ctx.config.target, trigger, &outcome).await;
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn run_rolling(
        &self,
        ctx: &Arc<DeployContext>,
        nodes: &[Node],
        trigger: &str,
    ) -> Vec<DeployOutcome> {
        let mut outcomes = Vec::with_capacity(nodes.len());
        let mut halted: Option<String> = None;

        for node in nodes {
            let outcome = if let Some(reason) = &halted {
                DeployOutcome::skipped(node, reason.clone())
            } else if self.cancel.is_cancelled() {
                DeployOutcome::skipped(node, "cancelled")
            } else {
                NodePipeline::new(Arc::clone(ctx), node.clone()).run().await
            };

            if outcome.failed() && halted.is_none() {
                warn!(node = node.id, "rolling deploy halted");
                halted = Some(format!("rolling deploy halted after node {} failed", node.id));
            }

            self.finish_node(&ctx.config.target, trigger, &outcome).await;
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Persist the record and feed health back into the pool. Neither can
    /// change the outcome.
    async fn finish_node(&self, target: &Target, trigger: &str, outcome: &DeployOutcome) {
        if outcome.status == OutcomeStatus::Skipped {
            let reason = outcome.skip_reason.clone().unwrap_or_default();
            debug!(node = outcome.node_id, reason = %reason, "node skipped");
            self.emit(DeployEvent::NodeSkipped {
                node: outcome.node_id,
                reason,
            });
            return;
        }

        let record = DeploymentRecord::from_outcome(outcome, trigger);
        let directory = &self.directory;
        let record_ref = &record;
        if let Err(failed) = self
            .record_policy
            .retry(|_| directory.record_deployment(target, record_ref))
            .await
        {
            warn!(
                node = outcome.node_id,
                attempts = failed.attempts,
                error = %failed.value,
                "failed to record deployment"
            );
        }

        if let Some(health) = health_feedback(outcome) {
            if let Err(e) = self.pool.update_health(outcome.node_id, health).await {
                warn!(node = outcome.node_id, error = %e, "failed to update node health");
            }
        }
    }

    fn emit(&self, event: DeployEvent) {
        let _ = self.events.send(event);
    }
}

/// Node health implied by a pipeline result
fn health_feedback(outcome: &DeployOutcome) -> Option<NodeHealth> {
    match (&outcome.status, &outcome.error) {
        (OutcomeStatus::Success, _) => Some(NodeHealth::Healthy),
        (OutcomeStatus::Failed, Some(NodeError::HealthCheck { .. })) => Some(NodeHealth::Unhealthy),
        (OutcomeStatus::Failed, Some(err)) if err.is_transport() => Some(NodeHealth::Offline),
        _ => None,
    }
}
