//! Traffic selection per load-balancing strategy
//!
//! Every strategy considers only routable nodes (healthy and not drained)
//! and fails with `EmptyCandidateSet` when there are none.

use std::collections::HashMap;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::error::CoreError;
use crate::model::{Node, NodeId, Strategy};

/// Distance between two regions, from external region data
pub trait RegionDistance: Send + Sync {
    /// `None` when the pair is unknown
    fn distance(&self, from: &str, to: &str) -> Option<u32>;
}

/// Symmetric lookup table; a region is at distance 0 from itself
#[derive(Debug, Clone, Default)]
pub struct StaticRegionDistance {
    table: HashMap<(String, String), u32>,
}

impl StaticRegionDistance {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the distance between `a` and `b`
    #[must_use]
    pub fn with(mut self, a: &str, b: &str, distance: u32) -> Self {
        self.table.insert((a.to_string(), b.to_string()), distance);
        self.table.insert((b.to_string(), a.to_string()), distance);
        self
    }
}

impl RegionDistance for StaticRegionDistance {
    fn distance(&self, from: &str, to: &str) -> Option<u32> {
        if from == to {
            return Some(0);
        }
        self.table.get(&(from.to_string(), to.to_string())).copied()
    }
}

/// What is known about the request being routed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Region the request originates from
    pub origin_region: Option<String>,
}

impl RequestContext {
    #[must_use]
    pub fn from_region(region: impl Into<String>) -> Self {
        Self {
            origin_region: Some(region.into()),
        }
    }
}

/// Mutable selection state for one node group
#[derive(Debug)]
pub struct Selector {
    last_pick: Option<NodeId>,
    rng: StdRng,
}

impl Selector {
    /// Seeded selector, for reproducible weighted picks
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            last_pick: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    #[must_use]
    pub fn from_entropy() -> Self {
        Self {
            last_pick: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// Pick one node for new traffic
    ///
    /// # Errors
    /// Returns `CoreError::EmptyCandidateSet` if no node is routable
    pub fn select(
        &mut self,
        strategy: Strategy,
        nodes: &[Node],
        ctx: &RequestContext,
        distance: &dyn RegionDistance,
        scope: &str,
    ) -> Result<Node, CoreError> {
        let mut eligible: Vec<&Node> = nodes.iter().filter(|n| n.is_routable()).collect();
        if eligible.is_empty() {
            return Err(CoreError::EmptyCandidateSet(scope.to_string()));
        }
        eligible.sort_by_key(|n| n.id);

        let picked = match strategy {
            Strategy::RoundRobin => round_robin(&eligible, self.last_pick),
            Strategy::Geo => geo(&eligible, ctx, distance),
            Strategy::Weighted => weighted(&eligible, &mut self.rng),
            Strategy::Failover => failover(&eligible),
        };

        self.last_pick = Some(picked.id);
        Ok(picked.clone())
    }
}

/// Next id after the previous pick, wrapping; `eligible` sorted by id
fn round_robin<'a>(eligible: &[&'a Node], last: Option<NodeId>) -> &'a Node {
    let next = last.and_then(|last| eligible.iter().find(|n| n.id > last).copied());
    next.unwrap_or(eligible[0])
}

/// Nearest region to the origin; unknown distances last, ties by id
fn geo<'a>(eligible: &[&'a Node], ctx: &RequestContext, distance: &dyn RegionDistance) -> &'a Node {
    let rank = |node: &Node| -> (u32, NodeId) {
        let d = match (ctx.origin_region.as_deref(), node.region.as_deref()) {
            (Some(origin), Some(region)) => distance.distance(origin, region),
            _ => None,
        };
        (d.unwrap_or(u32::MAX), node.id)
    };
    eligible
        .iter()
        .min_by_key(|n| rank(n))
        .copied()
        .unwrap_or(eligible[0])
}

/// Random pick with probability `weight / sum(weights)`
fn weighted<'a>(eligible: &[&'a Node], rng: &mut StdRng) -> &'a Node {
    let total: u32 = eligible.iter().map(|n| u32::from(n.weight.max(1))).sum();
    let mut roll = rng.gen_range(0..total);
    for &node in eligible {
        let weight = u32::from(node.weight.max(1));
        if roll < weight {
            return node;
        }
        roll -= weight;
    }
    eligible[eligible.len() - 1]
}

/// Primary while routable, else the lowest-id routable secondary
fn failover<'a>(eligible: &[&'a Node]) -> &'a Node {
    eligible
        .iter()
        .find(|n| n.primary)
        .copied()
        .unwrap_or(eligible[0])
}
