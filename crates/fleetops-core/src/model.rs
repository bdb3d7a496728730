//! Data model: targets, nodes, node groups and load-balancing strategies

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Directory-assigned node identifier
pub type NodeId = u64;

/// Application instance a deploy operates on: `app` or `app.project`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Application (environment) name
    pub app: String,
    /// Owning project; `None` for legacy single-app targets
    pub project: Option<String>,
}

impl Target {
    /// Target within a project
    #[must_use]
    pub fn new(app: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            project: Some(project.into()),
        }
    }

    /// Legacy single-app target
    #[must_use]
    pub fn app_only(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            project: None,
        }
    }

    /// Environment key used by node groups
    #[must_use]
    pub fn environment(&self) -> &str {
        &self.app
    }

    /// Filesystem-safe form, used for lock file names
    #[must_use]
    pub fn slug(&self) -> String {
        self.to_string()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.project {
            Some(project) => write!(f, "{}.{project}", self.app),
            None => f.write_str(&self.app),
        }
    }
}

impl FromStr for Target {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::Invalid {
            field: "target".to_string(),
            reason: format!("`{s}` {reason}"),
        };

        match s.split_once('.') {
            None if s.is_empty() => Err(invalid("is empty")),
            None => Ok(Self::app_only(s)),
            Some((app, project)) => {
                if app.is_empty() || project.is_empty() || project.contains('.') {
                    return Err(invalid("must be `app` or `app.project`"));
                }
                Ok(Self::new(app, project))
            }
        }
    }
}

/// Health state of a node as tracked by the directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeHealth {
    #[default]
    Healthy,
    Unhealthy,
    Draining,
    Offline,
}

impl fmt::Display for NodeHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Draining => "draining",
            Self::Offline => "offline",
        })
    }
}

impl FromStr for NodeHealth {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(Self::Healthy),
            "unhealthy" => Ok(Self::Unhealthy),
            "draining" => Ok(Self::Draining),
            "offline" => Ok(Self::Offline),
            other => Err(ConfigError::Invalid {
                field: "health".to_string(),
                reason: format!("unknown health state `{other}`"),
            }),
        }
    }
}

/// A registered server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub domain: String,
    pub ip: String,
    pub region: Option<String>,
    pub zone: Option<String>,
    pub hostname: Option<String>,
    /// Traffic weight, 1..=100
    pub weight: u8,
    pub primary: bool,
    pub health: NodeHealth,
    pub drained: bool,
}

impl Node {
    /// Healthy, undrained, weight 100, not primary
    #[must_use]
    pub fn new(id: NodeId, domain: impl Into<String>) -> Self {
        Self {
            id,
            domain: domain.into(),
            ip: String::new(),
            region: None,
            zone: None,
            hostname: None,
            weight: 100,
            primary: false,
            health: NodeHealth::Healthy,
            drained: false,
        }
    }

    #[must_use]
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set the weight, clamped to 1..=100
    #[must_use]
    pub fn with_weight(mut self, weight: u8) -> Self {
        self.weight = clamp_weight(weight);
        self
    }

    #[must_use]
    pub fn with_primary(mut self, primary: bool) -> Self {
        self.primary = primary;
        self
    }

    #[must_use]
    pub fn with_health(mut self, health: NodeHealth) -> Self {
        self.health = health;
        self
    }

    #[must_use]
    pub fn with_drained(mut self, drained: bool) -> Self {
        self.drained = drained;
        self
    }

    /// Eligible for new traffic
    #[must_use]
    pub fn is_routable(&self) -> bool {
        self.health == NodeHealth::Healthy && !self.drained
    }

    /// Address used to reach the node: domain, else IP
    #[must_use]
    pub fn address(&self) -> &str {
        if self.domain.is_empty() {
            &self.ip
        } else {
            &self.domain
        }
    }
}

/// Clamp a weight into the valid 1..=100 range
#[must_use]
pub fn clamp_weight(weight: u8) -> u8 {
    weight.clamp(1, 100)
}

/// Sort nodes into deploy order: primary first, then ascending id
pub fn stable_order(nodes: &mut [Node]) {
    nodes.sort_by_key(|node| (!node.primary, node.id));
}

/// Load-balancing policy of a node group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[default]
    RoundRobin,
    Geo,
    Weighted,
    Failover,
}

impl Strategy {
    /// Every accepted strategy name
    pub const NAMES: [&'static str; 4] = ["round-robin", "geo", "weighted", "failover"];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RoundRobin => "round-robin",
            Self::Geo => "geo",
            Self::Weighted => "weighted",
            Self::Failover => "failover",
        })
    }
}

impl FromStr for Strategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(Self::RoundRobin),
            "geo" => Ok(Self::Geo),
            "weighted" => Ok(Self::Weighted),
            "failover" => Ok(Self::Failover),
            other => Err(ConfigError::Invalid {
                field: "strategy".to_string(),
                reason: format!("`{other}` is not one of {}", Self::NAMES.join(", ")),
            }),
        }
    }
}

/// Nodes serving one `(environment, project)` pair under one strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGroup {
    pub id: u64,
    pub name: String,
    pub project: String,
    pub environment: String,
    pub strategy: Strategy,
    pub node_ids: Vec<NodeId>,
}

impl NodeGroup {
    /// Whether this group serves the given target
    #[must_use]
    pub fn serves(&self, target: &Target) -> bool {
        self.environment == target.environment()
            && target.project.as_deref() == Some(self.project.as_str())
    }
}

/// Request to create a node group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNodeGroup {
    pub project: String,
    pub environment: String,
    pub name: Option<String>,
    pub strategy: Strategy,
}

/// Request to bind a node to a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeBinding {
    pub node_id: NodeId,
    pub primary: bool,
    pub weight: Option<u8>,
}
