//! Core error types for fleetops-core

use fleetops_compose::ComposeError;
use fleetops_exec::ExecError;
use thiserror::Error;

use crate::model::NodeId;

/// Errors that abort a whole invocation
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Invalid or missing configuration, raised before any remote action
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The target resolved to no usable node
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Another deploy holds the lock for this target
    #[error("deploy already in progress for {0}")]
    LockContention(String),

    /// A traffic decision was requested over zero eligible nodes
    #[error("no healthy, non-drained node available for {0}")]
    EmptyCandidateSet(String),

    /// Node group membership rule violated
    #[error("node group conflict: {0}")]
    GroupConflict(String),

    /// Node is not bound to the target
    #[error("node {node} is not bound to {target}")]
    NodeNotFound {
        /// Requested node
        node: NodeId,
        /// Target it was looked up in
        target: String,
    },

    /// Pool operation on a target that has no node group
    #[error("{0} is in single-node mode; bind a second node to enable pool mode")]
    SingleNodeMode(String),

    /// Directory service call failed
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// Actor communication error
    #[error("actor communication error: {0}")]
    ActorError(String),
}

/// Target could not be resolved to a candidate set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// Nothing is bound and no interactive picker is available
    #[error("no node bound to {0}; bind one with `fleetops set --node <id>` or deploy interactively")]
    NoNodeBound(String),

    /// Nodes are bound but the filters excluded every one
    #[error("no candidate nodes for {target}: {reason}")]
    NoCandidates {
        /// Target being deployed
        target: String,
        /// Which filter emptied the set
        reason: String,
    },
}

/// Deploy descriptor and request validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Descriptor file could not be read
    #[error("cannot read {path}: {reason}")]
    Read {
        /// File path
        path: String,
        /// I/O error text
        reason: String,
    },

    /// Descriptor is not valid TOML or has unknown fields
    #[error("invalid deploy descriptor: {0}")]
    Parse(String),

    /// Required field absent
    #[error("missing required field `{0}`")]
    Missing(String),

    /// Field present but unusable
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// Field name
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// `$NAME` secret reference points at an unset variable
    #[error("environment variable {0} is not set")]
    EnvNotSet(String),

    /// `--app` names a group missing from `apps[]`
    #[error("unknown app group `{0}`")]
    UnknownAppGroup(String),

    /// `-e` override is not `KEY=VALUE`
    #[error("invalid env override `{0}`: expected KEY=VALUE")]
    InvalidEnvVar(String),
}

/// Directory service failures, flattened to strings so they stay `Clone`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// Request could not be completed
    #[error("request failed: {0}")]
    Request(String),

    /// Record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Service rejected the update
    #[error("rejected: {0}")]
    Rejected(String),

    /// Response could not be interpreted
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Why a single node's pipeline stopped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Connection, authentication or I/O failure reaching the node
    #[error("transport error: {0}")]
    Transport(String),

    /// A remote build/start command exited non-zero
    #[error("command failed: {0}")]
    Build(String),

    /// A healthcheck never succeeded within its retry budget
    #[error("healthcheck `{name}` ({url}) failed after {attempts} attempts: {reason}")]
    HealthCheck {
        /// Healthcheck name
        name: String,
        /// Probed URL
        url: String,
        /// Attempts made
        attempts: u32,
        /// Last probe failure
        reason: String,
    },

    /// Reverse-proxy or certificate step failed
    #[error("route configuration failed: {0}")]
    Route(String),

    /// Directory service call failed for this node
    #[error("directory error: {0}")]
    Directory(String),

    /// Env file or sync mapping could not be transferred
    #[error("artifact upload failed: {0}")]
    Artifact(String),
}

impl NodeError {
    /// Whether the node could not be reached at all
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<ExecError> for NodeError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Timeout { .. } => Self::Build(err.to_string()),
            ExecError::TransferFailed { .. } => Self::Artifact(err.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<ComposeError> for NodeError {
    fn from(err: ComposeError) -> Self {
        match err {
            ComposeError::Execution(exec) => exec.into(),
            other => Self::Build(other.to_string()),
        }
    }
}

impl From<DirectoryError> for NodeError {
    fn from(err: DirectoryError) -> Self {
        Self::Directory(err.to_string())
    }
}
