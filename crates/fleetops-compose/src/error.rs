//! Error types for fleetops-compose

use fleetops_exec::ExecError;
use thiserror::Error;

/// Errors that can occur while driving docker compose on a node
#[derive(Error, Debug, Clone)]
pub enum ComposeError {
    /// The command could not be delivered to the node
    #[error("execution error: {0}")]
    Execution(#[from] ExecError),

    /// The command ran and exited non-zero
    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        /// Rendered command line
        command: String,
        /// Exit status
        status: i32,
        /// Captured stderr
        stderr: String,
    },

    /// Invalid `KEY=VALUE` override or other bad input
    #[error("invalid configuration: {0}")]
    ConfigError(String),
}

impl ComposeError {
    /// Whether the failure happened in transport rather than in docker
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, ComposeError::Execution(_))
    }
}
