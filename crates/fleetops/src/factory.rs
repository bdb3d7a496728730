//! Executor factory: local for this machine, SSH for everything else

use std::sync::Arc;

use async_trait::async_trait;
use fleetops_core::{ExecutorFactory, Node};
use fleetops_exec::{ConnectionInfo, ExecError, LocalExecutor, RemoteExecutor, SshExecutorBuilder};

use crate::config::SshSettings;

/// Default implementation of `ExecutorFactory`
pub struct SshExecutorFactory {
    ssh: SshSettings,
}

impl SshExecutorFactory {
    #[must_use]
    pub fn new(ssh: SshSettings) -> Self {
        Self { ssh }
    }

    fn create_executor_sync(&self, node: &Node) -> Result<Arc<dyn RemoteExecutor>, ExecError> {
        let host = node.address();
        if host.is_empty() {
            return Err(ExecError::ConfigError(format!(
                "node {} has neither a domain nor an IP address",
                node.id
            )));
        }

        if ConnectionInfo::new(host, &self.ssh.user).is_local() {
            return Ok(Arc::new(LocalExecutor::new()));
        }

        let executor = SshExecutorBuilder::new(host, &self.ssh.user)
            .with_port(self.ssh.port)
            .with_key_source(self.ssh.key_source())
            .build()?;
        Ok(Arc::new(executor))
    }
}

#[async_trait]
impl ExecutorFactory for SshExecutorFactory {
    async fn create_executor(&self, node: &Node) -> Result<Arc<dyn RemoteExecutor>, ExecError> {
        self.create_executor_sync(node)
    }
}
