//! fleetops-exec: Remote execution abstraction
//!
//! Runs commands and transfers files on a node, either locally or over SSH.
//! The deploy engine only sees the [`RemoteExecutor`] trait.

pub mod error;
pub mod keys;
pub mod local;
pub mod result;
pub mod ssh;
pub mod traits;
pub mod transfer;

pub use error::ExecError;
pub use keys::{KeyError, KeySource, ResolvedKey};
pub use local::LocalExecutor;
pub use result::{CommandResult, ConnectionInfo};
pub use ssh::{SshExecutor, SshExecutorBuilder};
pub use traits::RemoteExecutor;
pub use transfer::{StaleEntries, TransferOptions, TransferPlan};
