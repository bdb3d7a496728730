//! Health checker: probe a URL with bounded retries

use std::sync::Arc;

use async_trait::async_trait;
use fleetops_exec::RemoteExecutor;
use fleetops_exec::transfer::shell_quote;
use tracing::{debug, info, warn};

use crate::retry::RetryPolicy;

/// Outcome of a full check (all retries)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Probe succeeded on attempt `attempts`
    Healthy { attempts: u32 },
    /// Every attempt failed; `reason` is from the last one
    Unhealthy { attempts: u32, reason: String },
}

impl HealthStatus {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy { .. })
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Healthy { attempts } | Self::Unhealthy { attempts, .. } => *attempts,
        }
    }
}

/// One probe attempt against a URL
#[async_trait]
pub trait Probe: Send + Sync {
    /// `Ok` when the endpoint answered successfully
    async fn probe(&self, url: &str) -> Result<(), String>;
}

/// Probes from the node itself with `curl -sf`, so node-local URLs work
pub struct RemoteProbe {
    executor: Arc<dyn RemoteExecutor>,
}

impl RemoteProbe {
    #[must_use]
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self { executor }
    }

    /// Command run on the node for one attempt
    #[must_use]
    pub fn command(url: &str) -> String {
        format!("curl -sf -o /dev/null {}", shell_quote(url))
    }
}

#[async_trait]
impl Probe for RemoteProbe {
    async fn probe(&self, url: &str) -> Result<(), String> {
        let result = self
            .executor
            .run(&Self::command(url))
            .await
            .map_err(|e| e.to_string())?;

        if result.success() {
            Ok(())
        } else {
            Err(format!("curl exited with status {}", result.status))
        }
    }
}

/// Retries a [`Probe`] under a [`RetryPolicy`]
#[derive(Clone)]
pub struct HealthChecker {
    policy: RetryPolicy,
    probe: Arc<dyn Probe>,
}

impl HealthChecker {
    #[must_use]
    pub fn new(policy: RetryPolicy, probe: Arc<dyn Probe>) -> Self {
        Self { policy, probe }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Probe `url` until it succeeds or the policy gives up
    pub async fn check(&self, url: &str) -> HealthStatus {
        let probe = &self.probe;
        let result = self
            .policy
            .retry(|attempt| async move {
                let outcome = probe.probe(url).await;
                if let Err(reason) = &outcome {
                    debug!(url, attempt, reason = %reason, "health probe failed");
                }
                outcome
            })
            .await;

        match result {
            Ok(done) => {
                info!(url, attempts = done.attempts, "healthcheck passed");
                HealthStatus::Healthy {
                    attempts: done.attempts,
                }
            }
            Err(failed) => {
                warn!(url, attempts = failed.attempts, reason = %failed.value, "healthcheck failed");
                HealthStatus::Unhealthy {
                    attempts: failed.attempts,
                    reason: failed.value,
                }
            }
        }
    }
}
