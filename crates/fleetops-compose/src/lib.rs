//! fleetops-compose: Docker Compose commands for a deploy directory
//!
//! [`ComposeProject`] renders the command lines, [`ComposeRunner`] executes
//! them on a node through a [`fleetops_exec::RemoteExecutor`].

pub mod error;
pub mod project;
pub mod runner;

pub use error::ComposeError;
pub use project::{ComposeProject, EnvVar, ServiceScope};
pub use runner::ComposeRunner;
