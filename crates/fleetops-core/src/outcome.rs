//! Per-node pipeline results

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::NodeError;
use crate::model::{Node, NodeId};

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PipelineStage {
    ResolveRecord,
    SyncCode,
    UploadArtifacts,
    BuildAndStart,
    ConfigureRoutes,
    VerifyHealth,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 6] = [
        Self::ResolveRecord,
        Self::SyncCode,
        Self::UploadArtifacts,
        Self::BuildAndStart,
        Self::ConfigureRoutes,
        Self::VerifyHealth,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ResolveRecord => "resolve_record",
            Self::SyncCode => "sync_code",
            Self::UploadArtifacts => "upload_artifacts",
            Self::BuildAndStart => "build_and_start",
            Self::ConfigureRoutes => "configure_routes",
            Self::VerifyHealth => "verify_health",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a single stage ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Succeeded,
    Skipped,
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Succeeded => "succeeded",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        })
    }
}

/// Timing and result of one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: PipelineStage,
    pub status: StageStatus,
    pub duration: Duration,
    pub message: Option<String>,
}

/// Overall result for one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success,
    Failed,
    /// Never started: an earlier rolling failure or cancellation
    Skipped,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        })
    }
}

/// Result of one node pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    pub node_id: NodeId,
    pub address: String,
    pub status: OutcomeStatus,
    /// Last stage entered; `None` if the pipeline never ran
    pub stage_reached: Option<PipelineStage>,
    pub error: Option<NodeError>,
    /// Why the node was skipped
    pub skip_reason: Option<String>,
    pub stages: Vec<StageReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DeployOutcome {
    /// Outcome for a node that was never started
    #[must_use]
    pub fn skipped(node: &Node, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            node_id: node.id,
            address: node.address().to_string(),
            status: OutcomeStatus::Skipped,
            stage_reached: None,
            error: None,
            skip_reason: Some(reason.into()),
            stages: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    /// Outcome for a pipeline that died without reporting
    #[must_use]
    pub fn aborted(node: &Node, error: NodeError) -> Self {
        let now = Utc::now();
        Self {
            node_id: node.id,
            address: node.address().to_string(),
            status: OutcomeStatus::Failed,
            stage_reached: None,
            error: Some(error),
            skip_reason: None,
            stages: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    #[must_use]
    pub fn failed(&self) -> bool {
        self.status == OutcomeStatus::Failed
    }

    /// Report for `stage`, if the pipeline got that far
    #[must_use]
    pub fn stage(&self, stage: PipelineStage) -> Option<&StageReport> {
        self.stages.iter().find(|report| report.stage == stage)
    }
}
