//! Deploy context
//!
//! Everything one deploy invocation needs, built once by the scheduler and
//! shared read-only by every node pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fleetops_api::events::DeployEvent;
use fleetops_compose::{ComposeProject, EnvVar, ServiceScope};
use tokio::sync::broadcast;

use crate::config::{DeployConfig, RegistryLogin};
use crate::directory::{DirectoryService, ExecutorFactory};
use crate::retry::RetryPolicy;
use crate::routes::RouteConfigurator;

/// Immutable per-invocation context
#[derive(Clone)]
pub struct DeployContext {
    /// Validated descriptor
    pub config: Arc<DeployConfig>,
    /// Compose services targeted
    pub scope: ServiceScope,
    /// `-e` overrides prefixed to compose commands
    pub env: Vec<EnvVar>,
    /// Skip sync/build, only restart
    pub restart_only: bool,
    /// Remove containers before starting
    pub force: bool,
    /// Registry credentials, resolved before any remote action
    pub registry: Option<RegistryLogin>,
    /// Local directory relative paths resolve against
    pub workdir: PathBuf,
    /// Limit for each remote command
    pub command_timeout: Duration,
    /// Retry policy for each healthcheck
    pub health_policy: RetryPolicy,
    pub directory: Arc<dyn DirectoryService>,
    pub factory: Arc<dyn ExecutorFactory>,
    pub routes: RouteConfigurator,
    /// Progress event sender
    pub events: broadcast::Sender<DeployEvent>,
}

impl DeployContext {
    /// Compose project for the deploy directory
    #[must_use]
    pub fn compose_project(&self) -> ComposeProject {
        ComposeProject::new(self.config.deploy_path.clone())
            .with_files(self.config.compose_files.clone())
            .with_env(self.env.clone())
    }

    /// Send a progress event
    pub fn emit(&self, event: DeployEvent) {
        let _ = self.events.send(event);
    }
}
