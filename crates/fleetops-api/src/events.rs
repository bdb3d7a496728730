//! Deploy progress events

use serde::{Deserialize, Serialize};

/// Progress and pool events broadcast while the orchestrator works
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeployEvent {
    DeployStarted {
        target: String,
        mode: String,
        nodes: Vec<u64>,
    },
    StageStarted {
        node: u64,
        stage: String,
    },
    StageFinished {
        node: u64,
        stage: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    NodeFinished {
        node: u64,
        status: String,
        stage: String,
    },
    NodeSkipped {
        node: u64,
        reason: String,
    },
    DeployFinished {
        target: String,
        succeeded: usize,
        failed: usize,
        skipped: usize,
    },
    NodeDrainChanged {
        node: u64,
        drained: bool,
    },
    NodeHealthChanged {
        node: u64,
        from: String,
        to: String,
    },
    StrategyChanged {
        group: u64,
        strategy: String,
    },
}
