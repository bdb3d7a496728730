//! Request types for the directory service API

use serde::{Deserialize, Serialize};

use crate::responses::RouteDto;

/// Create-or-update the application record (`PUT /apps/sync`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncAppRequest {
    pub app: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub deploy_path: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_repo: Option<String>,
    pub github_branch: String,
    pub routes: Vec<RouteDto>,
}

/// One per-node deploy result (`POST /apps/{target}/deployments`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecordRequest {
    pub node_id: u64,
    pub status: String,
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub trigger: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub stages: Vec<StageTimingDto>,
}

/// Timing of one pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTimingDto {
    pub stage: String,
    pub status: String,
    pub duration_ms: u64,
}

/// `PATCH /node-groups/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetStrategyRequest {
    pub lb_strategy: String,
}

/// `PUT /nodes/{id}/drain`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetDrainRequest {
    pub drained: bool,
}

/// `PUT /nodes/{id}/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeHealthRequest {
    pub status: String,
}

/// `POST /apps/bind-by-name`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindNodeRequest {
    pub app: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub node_id: u64,
    pub is_primary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<u8>,
}

/// `POST /node-groups`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNodeGroupRequest {
    pub project: String,
    pub environment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub lb_strategy: String,
}
