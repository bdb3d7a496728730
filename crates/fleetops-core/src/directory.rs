//! Seams to the outside world: the directory service and executor creation

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetops_exec::{ExecError, RemoteExecutor};

use crate::config::DeployConfig;
use crate::error::DirectoryError;
use crate::model::{NewNodeGroup, Node, NodeBinding, NodeGroup, NodeHealth, NodeId, Strategy, Target};
use crate::outcome::{DeployOutcome, OutcomeStatus, PipelineStage, StageReport};

/// Remote store of nodes, node groups, app records and deployment history
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Nodes bound to `target`; empty when nothing is bound
    async fn resolve_target(&self, target: &Target) -> Result<Vec<Node>, DirectoryError>;

    /// Node group serving `target`, `None` in single-node mode
    async fn node_group(&self, target: &Target) -> Result<Option<NodeGroup>, DirectoryError>;

    /// Bound nodes and node group in one read
    ///
    /// Implementations backed by a single endpoint should override this.
    async fn pool_snapshot(
        &self,
        target: &Target,
    ) -> Result<(Vec<Node>, Option<NodeGroup>), DirectoryError> {
        let nodes = self.resolve_target(target).await?;
        let group = self.node_group(target).await?;
        Ok((nodes, group))
    }

    /// Create or update the application record
    async fn upsert_app_record(&self, config: &DeployConfig) -> Result<(), DirectoryError>;

    async fn update_node_health(
        &self,
        node_id: NodeId,
        health: NodeHealth,
    ) -> Result<(), DirectoryError>;

    async fn set_drain(&self, node_id: NodeId, drained: bool) -> Result<(), DirectoryError>;

    async fn set_strategy(&self, group_id: u64, strategy: Strategy) -> Result<(), DirectoryError>;

    /// Append one deployment record
    async fn record_deployment(
        &self,
        target: &Target,
        record: &DeploymentRecord,
    ) -> Result<(), DirectoryError>;

    /// Every node the caller may bind
    async fn available_nodes(&self) -> Result<Vec<Node>, DirectoryError>;

    async fn bind_node(&self, target: &Target, binding: &NodeBinding) -> Result<(), DirectoryError>;

    async fn create_group(&self, group: &NewNodeGroup) -> Result<NodeGroup, DirectoryError>;

    async fn list_groups(&self, project: Option<&str>) -> Result<Vec<NodeGroup>, DirectoryError>;
}

/// Creates a remote executor for a node
#[async_trait]
pub trait ExecutorFactory: Send + Sync {
    /// # Errors
    /// Returns an `ExecError` if no executor can be built for the node
    async fn create_executor(&self, node: &Node) -> Result<Arc<dyn RemoteExecutor>, ExecError>;
}

/// Audit record of one node pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRecord {
    pub node_id: NodeId,
    pub status: OutcomeStatus,
    pub stage: Option<PipelineStage>,
    pub error: Option<String>,
    pub stages: Vec<StageReport>,
    /// What started the run, e.g. `cli`
    pub trigger: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DeploymentRecord {
    #[must_use]
    pub fn from_outcome(outcome: &DeployOutcome, trigger: &str) -> Self {
        Self {
            node_id: outcome.node_id,
            status: outcome.status,
            stage: outcome.stage_reached,
            error: outcome.error.as_ref().map(ToString::to_string),
            stages: outcome.stages.clone(),
            trigger: trigger.to_string(),
            started_at: outcome.started_at,
            finished_at: outcome.finished_at,
        }
    }
}
