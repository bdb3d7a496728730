//! `PoolActor`: resource pool manager
//!
//! Serializes every pool mutation (drain, strategy, binding, health) through
//! one mailbox. Every read re-fetches the target from the directory; only
//! the per-target selector (round-robin cursor, weighted rng) is kept
//! between calls. Directory writes go first; the local view is only updated
//! once they succeed.

use std::collections::HashMap;
use std::sync::Arc;

use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::ActorStopReason;
use kameo::message::{Context, Message};
use kameo::prelude::*;
use tokio::sync::broadcast;
use tracing::{debug, info};

use fleetops_api::events::DeployEvent;

use crate::directory::DirectoryService;
use crate::error::{CoreError, ResolutionError};
use crate::message::{
    BindNode, CandidateFilter, CreateGroup, GetPoolStatus, ListGroups, PoolMode,
    PoolStatusReport, ResolveCandidates, SelectForTraffic, SetDrain, SetStrategy, UpdateHealth,
};
use crate::model::{Node, NodeGroup, NodeId, Target, stable_order};
use crate::strategy::{RegionDistance, Selector, StaticRegionDistance};

/// Arguments for spawning a `PoolActor`
pub struct PoolActorArgs {
    /// Directory service backing the pool
    pub directory: Arc<dyn DirectoryService>,
    /// Region distance data for `geo`
    pub distance: Arc<dyn RegionDistance>,
    /// Event broadcast sender
    pub event_tx: broadcast::Sender<DeployEvent>,
    /// Seed for `weighted` selection; entropy when `None`
    pub seed: Option<u64>,
}

impl PoolActorArgs {
    /// Defaults: no region data, entropy-seeded selection
    #[must_use]
    pub fn new(
        directory: Arc<dyn DirectoryService>,
        event_tx: broadcast::Sender<DeployEvent>,
    ) -> Self {
        Self {
            directory,
            distance: Arc::new(StaticRegionDistance::new()),
            event_tx,
            seed: None,
        }
    }

    #[must_use]
    pub fn with_distance(mut self, distance: Arc<dyn RegionDistance>) -> Self {
        self.distance = distance;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Cached pool of one target
struct PoolState {
    group: Option<NodeGroup>,
    nodes: Vec<Node>,
    selector: Selector,
}

/// Resource pool manager actor
pub struct PoolActor {
    directory: Arc<dyn DirectoryService>,
    distance: Arc<dyn RegionDistance>,
    event_tx: broadcast::Sender<DeployEvent>,
    seed: Option<u64>,
    pools: HashMap<Target, PoolState>,
}

impl PoolActor {
    /// Reload a target's nodes and group from the directory
    async fn refresh(&mut self, target: &Target) -> Result<&mut PoolState, CoreError> {
        let (mut nodes, group) = self.directory.pool_snapshot(target).await?;
        stable_order(&mut nodes);
        debug!(deploy_target = %target, nodes = nodes.len(), pooled = group.is_some(), "pool refreshed");

        let seed = self.seed;
        let state = self.pools.entry(target.clone()).or_insert_with(|| PoolState {
            group: None,
            nodes: Vec::new(),
            selector: seed.map_or_else(Selector::from_entropy, Selector::seeded),
        });
        state.nodes = nodes;
        state.group = group;
        Ok(state)
    }

    /// Apply `update` to node `node_id` in every cached pool
    fn update_cached_node(&mut self, node_id: NodeId, mut update: impl FnMut(&mut Node)) {
        for state in self.pools.values_mut() {
            for node in state.nodes.iter_mut().filter(|n| n.id == node_id) {
                update(node);
            }
        }
    }

    fn emit(&self, event: DeployEvent) {
        // no subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

/// Apply drain exclusion and caller filters to the bound node set
///
/// An empty bound set passes through so the caller can auto-allocate.
fn filter_candidates(
    target: &Target,
    bound: &[Node],
    filter: &CandidateFilter,
) -> Result<Vec<Node>, CoreError> {
    if bound.is_empty() {
        return Ok(Vec::new());
    }

    let no_candidates = |reason: String| {
        CoreError::from(ResolutionError::NoCandidates {
            target: target.to_string(),
            reason,
        })
    };

    if let Some(id) = filter.node {
        let node = bound
            .iter()
            .find(|n| n.id == id)
            .ok_or_else(|| no_candidates(format!("node {id} is not bound")))?;
        if let Some(region) = &filter.region
            && node.region.as_ref() != Some(region)
        {
            return Err(no_candidates(format!("node {id} is not in region {region}")));
        }
        return Ok(vec![node.clone()]);
    }

    let undrained: Vec<Node> = bound.iter().filter(|n| !n.drained).cloned().collect();
    if undrained.is_empty() {
        return Err(no_candidates("every bound node is drained".to_string()));
    }

    let Some(region) = &filter.region else {
        return Ok(undrained);
    };
    let in_region: Vec<Node> = undrained
        .into_iter()
        .filter(|n| n.region.as_ref() == Some(region))
        .collect();
    if in_region.is_empty() {
        return Err(no_candidates(format!("no undrained node in region {region}")));
    }
    Ok(in_region)
}

impl Actor for PoolActor {
    type Args = PoolActorArgs;
    type Error = CoreError;

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        info!(id = %actor_ref.id(), "PoolActor starting");

        Ok(Self {
            directory: args.directory,
            distance: args.distance,
            event_tx: args.event_tx,
            seed: args.seed,
            pools: HashMap::new(),
        })
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        info!(reason = ?reason, pools = self.pools.len(), "PoolActor stopping");
        Ok(())
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<ResolveCandidates> for PoolActor {
    type Reply = Result<Vec<Node>, CoreError>;

    async fn handle(
        &mut self,
        msg: ResolveCandidates,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let state = self.refresh(&msg.target).await?;
        let candidates = filter_candidates(&msg.target, &state.nodes, &msg.filter)?;
        info!(
            deploy_target = %msg.target,
            bound = state.nodes.len(),
            candidates = candidates.len(),
            "resolved deploy candidates"
        );
        Ok(candidates)
    }
}

impl Message<SelectForTraffic> for PoolActor {
    type Reply = Result<Node, CoreError>;

    async fn handle(
        &mut self,
        msg: SelectForTraffic,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let distance = self.distance.clone();
        // health and drain may change outside this process
        let state = self.refresh(&msg.target).await?;
        let strategy = state.group.as_ref().map(|g| g.strategy).unwrap_or_default();

        let node = state.selector.select(
            strategy,
            &state.nodes,
            &msg.ctx,
            distance.as_ref(),
            &msg.target.to_string(),
        )?;
        debug!(deploy_target = %msg.target, node = node.id, strategy = %strategy, "selected node");
        Ok(node)
    }
}

impl Message<SetStrategy> for PoolActor {
    type Reply = Result<NodeGroup, CoreError>;

    async fn handle(
        &mut self,
        msg: SetStrategy,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let mut group = self
            .directory
            .node_group(&msg.target)
            .await?
            .ok_or_else(|| CoreError::SingleNodeMode(msg.target.to_string()))?;

        self.directory.set_strategy(group.id, msg.strategy).await?;
        group.strategy = msg.strategy;

        if let Some(state) = self.pools.get_mut(&msg.target) {
            state.group = Some(group.clone());
        }

        info!(deploy_target = %msg.target, group = group.id, strategy = %msg.strategy, "strategy updated");
        self.emit(DeployEvent::StrategyChanged {
            group: group.id,
            strategy: msg.strategy.to_string(),
        });
        Ok(group)
    }
}

impl Message<SetDrain> for PoolActor {
    type Reply = Result<(), CoreError>;

    async fn handle(&mut self, msg: SetDrain, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let state = self.refresh(&msg.target).await?;
        if state.group.is_none() {
            return Err(CoreError::SingleNodeMode(msg.target.to_string()));
        }
        if !state.nodes.iter().any(|n| n.id == msg.node_id) {
            return Err(CoreError::NodeNotFound {
                node: msg.node_id,
                target: msg.target.to_string(),
            });
        }

        self.directory.set_drain(msg.node_id, msg.drained).await?;
        self.update_cached_node(msg.node_id, |node| node.drained = msg.drained);

        info!(deploy_target = %msg.target, node = msg.node_id, drained = msg.drained, "drain flag updated");
        self.emit(DeployEvent::NodeDrainChanged {
            node: msg.node_id,
            drained: msg.drained,
        });
        Ok(())
    }
}

impl Message<UpdateHealth> for PoolActor {
    type Reply = Result<(), CoreError>;

    async fn handle(
        &mut self,
        msg: UpdateHealth,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.directory
            .update_node_health(msg.node_id, msg.health)
            .await?;

        let previous = self
            .pools
            .values()
            .flat_map(|state| state.nodes.iter())
            .find(|n| n.id == msg.node_id)
            .map(|n| n.health);
        self.update_cached_node(msg.node_id, |node| node.health = msg.health);

        if previous != Some(msg.health) {
            info!(node = msg.node_id, health = %msg.health, "node health changed");
            self.emit(DeployEvent::NodeHealthChanged {
                node: msg.node_id,
                from: previous.map_or_else(|| "unknown".to_string(), |h| h.to_string()),
                to: msg.health.to_string(),
            });
        }
        Ok(())
    }
}

impl Message<BindNode> for PoolActor {
    type Reply = Result<(), CoreError>;

    async fn handle(&mut self, msg: BindNode, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let node_id = msg.binding.node_id;

        if let Some(project) = msg.target.project.as_deref() {
            let groups = self.directory.list_groups(None).await?;
            if let Some(other) = groups.iter().find(|g| {
                g.environment == msg.target.environment()
                    && g.project != project
                    && g.node_ids.contains(&node_id)
            }) {
                return Err(CoreError::GroupConflict(format!(
                    "node {node_id} already belongs to group `{}` of project `{}` in environment `{}`",
                    other.name, other.project, other.environment
                )));
            }
        }

        self.directory.bind_node(&msg.target, &msg.binding).await?;
        self.pools.remove(&msg.target);

        info!(deploy_target = %msg.target, node = node_id, primary = msg.binding.primary, "node bound");
        Ok(())
    }
}

impl Message<CreateGroup> for PoolActor {
    type Reply = Result<NodeGroup, CoreError>;

    async fn handle(
        &mut self,
        msg: CreateGroup,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let spec = msg.group;
        let existing = self.directory.list_groups(Some(&spec.project)).await?;
        if let Some(group) = existing
            .iter()
            .find(|g| g.project == spec.project && g.environment == spec.environment)
        {
            return Err(CoreError::GroupConflict(format!(
                "group `{}` already serves {}/{}",
                group.name, spec.project, spec.environment
            )));
        }

        let group = self.directory.create_group(&spec).await?;
        info!(group = group.id, project = %group.project, environment = %group.environment, "node group created");
        Ok(group)
    }
}

impl Message<ListGroups> for PoolActor {
    type Reply = Result<Vec<NodeGroup>, CoreError>;

    async fn handle(
        &mut self,
        msg: ListGroups,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.directory.list_groups(msg.project.as_deref()).await?)
    }
}

impl Message<GetPoolStatus> for PoolActor {
    type Reply = Result<PoolStatusReport, CoreError>;

    async fn handle(
        &mut self,
        msg: GetPoolStatus,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let state = self.refresh(&msg.target).await?;
        let group = state.group.as_ref();

        Ok(PoolStatusReport {
            target: msg.target,
            mode: if group.is_some() {
                PoolMode::Pool
            } else {
                PoolMode::Single
            },
            strategy: group.map(|g| g.strategy),
            group_id: group.map(|g| g.id),
            group_name: group.map(|g| g.name.clone()),
            nodes: state.nodes.clone(),
        })
    }
}
