//! `PoolHandle`: typed front door to the `PoolActor`

use kameo::actor::ActorRef;
use kameo::error::SendError;
use kameo::prelude::*;

use crate::actor::pool::{PoolActor, PoolActorArgs};
use crate::error::CoreError;
use crate::message::{
    BindNode, CandidateFilter, CreateGroup, GetPoolStatus, ListGroups, PoolStatusReport,
    ResolveCandidates, SelectForTraffic, SetDrain, SetStrategy, UpdateHealth,
};
use crate::model::{NewNodeGroup, Node, NodeBinding, NodeGroup, NodeHealth, NodeId, Strategy, Target};
use crate::strategy::RequestContext;

/// Cloneable handle to a running pool actor
#[derive(Clone)]
pub struct PoolHandle {
    actor: ActorRef<PoolActor>,
}

impl PoolHandle {
    /// Spawn the pool actor
    #[must_use]
    pub fn spawn(args: PoolActorArgs) -> Self {
        Self {
            actor: PoolActor::spawn(args),
        }
    }

    /// Deploy candidates for `target`: a fresh directory snapshot with
    /// drained nodes removed (unless targeted by id) and filters applied
    ///
    /// # Errors
    /// Returns `ResolutionError::NoCandidates` if the filters exclude every
    /// bound node, or a directory error
    pub async fn resolve_candidates(
        &self,
        target: &Target,
        filter: CandidateFilter,
    ) -> Result<Vec<Node>, CoreError> {
        flatten(
            self.actor
                .ask(ResolveCandidates {
                    target: target.clone(),
                    filter,
                })
                .await,
        )
    }

    /// Change the group's strategy; metadata only
    ///
    /// # Errors
    /// Returns `CoreError::SingleNodeMode` if the target has no node group
    pub async fn set_strategy(
        &self,
        target: &Target,
        strategy: Strategy,
    ) -> Result<NodeGroup, CoreError> {
        flatten(
            self.actor
                .ask(SetStrategy {
                    target: target.clone(),
                    strategy,
                })
                .await,
        )
    }

    /// Exclude a node from traffic and default deploys
    ///
    /// # Errors
    /// Returns `CoreError::NodeNotFound` if the node is not bound to the target
    pub async fn drain(&self, target: &Target, node_id: NodeId) -> Result<(), CoreError> {
        self.set_drain(target, node_id, true).await
    }

    /// Return a drained node to rotation
    ///
    /// # Errors
    /// Returns `CoreError::NodeNotFound` if the node is not bound to the target
    pub async fn undrain(&self, target: &Target, node_id: NodeId) -> Result<(), CoreError> {
        self.set_drain(target, node_id, false).await
    }

    async fn set_drain(
        &self,
        target: &Target,
        node_id: NodeId,
        drained: bool,
    ) -> Result<(), CoreError> {
        flatten(
            self.actor
                .ask(SetDrain {
                    target: target.clone(),
                    node_id,
                    drained,
                })
                .await,
        )
    }

    /// Load-balancing decision under the group's strategy
    ///
    /// # Errors
    /// Returns `CoreError::EmptyCandidateSet` if no node is routable
    pub async fn select_for_traffic(
        &self,
        target: &Target,
        ctx: RequestContext,
    ) -> Result<Node, CoreError> {
        flatten(
            self.actor
                .ask(SelectForTraffic {
                    target: target.clone(),
                    ctx,
                })
                .await,
        )
    }

    /// Record a node's health in the directory and the cached pools
    ///
    /// # Errors
    /// Returns a directory error if the update is rejected
    pub async fn update_health(&self, node_id: NodeId, health: NodeHealth) -> Result<(), CoreError> {
        flatten(self.actor.ask(UpdateHealth { node_id, health }).await)
    }

    /// Bind a node to a target
    ///
    /// # Errors
    /// Returns `CoreError::GroupConflict` if the node is grouped under another
    /// project in the same environment
    pub async fn bind_node(&self, target: &Target, binding: NodeBinding) -> Result<(), CoreError> {
        flatten(
            self.actor
                .ask(BindNode {
                    target: target.clone(),
                    binding,
                })
                .await,
        )
    }

    /// Create a node group
    ///
    /// # Errors
    /// Returns `CoreError::GroupConflict` if the `(environment, project)` pair
    /// already has a group
    pub async fn create_group(&self, group: NewNodeGroup) -> Result<NodeGroup, CoreError> {
        flatten(self.actor.ask(CreateGroup { group }).await)
    }

    /// # Errors
    /// Returns a directory error if the listing fails
    pub async fn list_groups(&self, project: Option<&str>) -> Result<Vec<NodeGroup>, CoreError> {
        flatten(
            self.actor
                .ask(ListGroups {
                    project: project.map(str::to_string),
                })
                .await,
        )
    }

    /// Pool status report
    ///
    /// # Errors
    /// Returns a directory error if the target cannot be resolved
    pub async fn status(&self, target: &Target) -> Result<PoolStatusReport, CoreError> {
        flatten(
            self.actor
                .ask(GetPoolStatus {
                    target: target.clone(),
                })
                .await,
        )
    }

    /// Stop the actor after queued messages are handled
    pub async fn shutdown(&self) {
        self.actor.stop_gracefully().await.ok();
    }
}

/// Unwrap handler errors; anything else is a mailbox failure
fn flatten<M, T>(result: Result<T, SendError<M, CoreError>>) -> Result<T, CoreError>
where
    SendError<M, CoreError>: std::fmt::Display,
{
    result.map_err(|err| match err {
        SendError::HandlerError(err) => err,
        other => CoreError::ActorError(other.to_string()),
    })
}
