//! Response types for the directory service API

use serde::{Deserialize, Serialize};

/// Error body returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Plain acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// A declared route as stored with the app record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDto {
    pub domain: String,
    pub port: u16,
    pub ssl: bool,
}

/// Nodes bound to an app (`GET /apps/{project}/{app}/deploy-targets`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployTargetsResponse {
    /// `single` or `pool`
    pub mode: String,
    #[serde(default)]
    pub lb_strategy: Option<String>,
    #[serde(default)]
    pub node_group_id: Option<u64>,
    #[serde(default)]
    pub node_group_name: Option<String>,
    #[serde(default)]
    pub targets: Vec<DeployTargetDto>,
}

/// One bound node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployTargetDto {
    pub node_id: u64,
    pub domain: String,
    pub ip_address: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: u8,
    pub status: String,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub drained: bool,
}

fn default_weight() -> u8 {
    100
}

/// Result of `PUT /apps/sync`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncAppResponse {
    pub app_id: u64,
    pub created: bool,
}

/// Node visible to the caller (`GET /nodes`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDto {
    pub id: u64,
    pub domain: String,
    pub ip_address: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// `GET /nodes`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeListResponse {
    pub nodes: Vec<NodeDto>,
}

/// Node group summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeGroupDto {
    pub id: u64,
    pub name: String,
    pub project_name: String,
    pub environment: String,
    pub lb_strategy: String,
    #[serde(default)]
    pub node_ids: Vec<u64>,
}

/// `GET /node-groups`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeGroupListResponse {
    pub node_groups: Vec<NodeGroupDto>,
}
