//! Message types for the pool actor
//!
//! Handlers live in `actor::pool`; callers normally go through `PoolHandle`.

use crate::model::{NewNodeGroup, Node, NodeBinding, NodeHealth, NodeId, Strategy, Target};
use crate::strategy::RequestContext;

// ============================================================================
// Queries
// ============================================================================

/// Caller filters applied to the bound node set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateFilter {
    /// Deploy only this node, even if drained
    pub node: Option<NodeId>,
    /// Deploy only nodes in this region
    pub region: Option<String>,
}

/// Fresh snapshot of deploy candidates for a target
#[derive(Debug)]
pub struct ResolveCandidates {
    pub target: Target,
    pub filter: CandidateFilter,
}

/// Load-balancing decision for one request
#[derive(Debug)]
pub struct SelectForTraffic {
    pub target: Target,
    pub ctx: RequestContext,
}

/// Pool status report for a target
#[derive(Debug)]
pub struct GetPoolStatus {
    pub target: Target,
}

/// Node groups, optionally for one project
#[derive(Debug)]
pub struct ListGroups {
    pub project: Option<String>,
}

// ============================================================================
// Mutations
// ============================================================================

#[derive(Debug)]
pub struct SetStrategy {
    pub target: Target,
    pub strategy: Strategy,
}

/// Set (`drained = true`) or clear a node's drain flag
#[derive(Debug)]
pub struct SetDrain {
    pub target: Target,
    pub node_id: NodeId,
    pub drained: bool,
}

/// Health feedback for a node
#[derive(Debug)]
pub struct UpdateHealth {
    pub node_id: NodeId,
    pub health: NodeHealth,
}

#[derive(Debug)]
pub struct BindNode {
    pub target: Target,
    pub binding: NodeBinding,
}

#[derive(Debug)]
pub struct CreateGroup {
    pub group: NewNodeGroup,
}

// ============================================================================
// Replies
// ============================================================================

/// Whether a target is served by one node or a node group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMode {
    Single,
    Pool,
}

impl std::fmt::Display for PoolMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Single => "single",
            Self::Pool => "pool",
        })
    }
}

/// Membership, strategy and node state of a target's pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatusReport {
    pub target: Target,
    pub mode: PoolMode,
    pub strategy: Option<Strategy>,
    pub group_id: Option<u64>,
    pub group_name: Option<String>,
    /// Bound nodes in deploy order
    pub nodes: Vec<Node>,
}

impl PoolStatusReport {
    /// Nodes whose health is `healthy`
    #[must_use]
    pub fn healthy_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.health == NodeHealth::Healthy)
            .count()
    }
}
