//! fleetops-core: Deploy orchestration and resource pool
//!
//! Decodes the deploy descriptor, drives each node through the deploy
//! pipeline, fans pipelines out across a target's nodes, and keeps pool
//! membership, drain state, health and load-balancing strategy in a kameo
//! actor.

pub mod actor;
pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod health;
pub mod lock;
pub mod message;
pub mod model;
pub mod outcome;
pub mod pipeline;
pub mod retry;
pub mod routes;
pub mod scheduler;
pub mod strategy;

pub use actor::handle::PoolHandle;
pub use actor::pool::{PoolActor, PoolActorArgs};
pub use config::{
    AppGroup, BuildSection, DeployConfig, FileMapping, Healthcheck, Registry, RegistryLogin, Route,
    SecretRef, Source,
};
pub use context::DeployContext;
pub use directory::{DeploymentRecord, DirectoryService, ExecutorFactory};
pub use error::{ConfigError, CoreError, DirectoryError, NodeError, ResolutionError};
pub use health::{HealthChecker, HealthStatus, Probe, RemoteProbe};
pub use lock::{DeployLockGuard, DeployLocks};
pub use message::{CandidateFilter, PoolMode, PoolStatusReport};
pub use model::{
    NewNodeGroup, Node, NodeBinding, NodeGroup, NodeHealth, NodeId, Strategy, Target, stable_order,
};
pub use outcome::{DeployOutcome, OutcomeStatus, PipelineStage, StageReport, StageStatus};
pub use pipeline::NodePipeline;
pub use retry::{Attempted, Backoff, RetryPolicy};
pub use routes::RouteConfigurator;
pub use scheduler::{
    DeployMode, DeployRequest, DeployScheduler, DeploySummary, NodePicker, NodeStatusReport,
    SummaryStatus,
};
pub use strategy::{RegionDistance, RequestContext, Selector, StaticRegionDistance};
