//! Terminal rendering of events, summaries and reports

use fleetops_api::events::DeployEvent;
use fleetops_core::{
    DeploySummary, NodeGroup, NodeStatusReport, OutcomeStatus, PoolStatusReport,
};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::debug;

// ============================================================================
// Progress events
// ============================================================================

/// Print progress events until `DeployFinished` or the channel closes
#[must_use]
pub fn spawn_event_printer(mut rx: broadcast::Receiver<DeployEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(DeployEvent::DeployFinished { .. }) => break,
                Ok(event) => {
                    if let Some(line) = format_event(&event) {
                        println!("{line}");
                    }
                }
                Err(RecvError::Lagged(missed)) => debug!(missed, "event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// One progress line, `None` for events not worth a line
fn format_event(event: &DeployEvent) -> Option<String> {
    let line = match event {
        DeployEvent::DeployStarted {
            target,
            mode,
            nodes,
        } => format!(
            "==> deploying {target} to {} node(s) ({mode})",
            nodes.len()
        ),
        DeployEvent::StageStarted { .. } => return None,
        DeployEvent::StageFinished {
            node,
            stage,
            status,
            message,
        } => match message {
            Some(message) => format!("  [{node}] {stage}: {status} ({message})"),
            None => format!("  [{node}] {stage}: {status}"),
        },
        DeployEvent::NodeFinished {
            node,
            status,
            stage,
        } => format!("  [{node}] {status} at {stage}"),
        DeployEvent::NodeSkipped { node, reason } => format!("  [{node}] skipped: {reason}"),
        DeployEvent::DeployFinished { .. } => return None,
        DeployEvent::NodeDrainChanged { node, drained } => {
            if *drained {
                format!("node {node} drained")
            } else {
                format!("node {node} back in rotation")
            }
        }
        DeployEvent::NodeHealthChanged { node, from, to } => {
            format!("node {node} health: {from} -> {to}")
        }
        DeployEvent::StrategyChanged { group, strategy } => {
            format!("group {group} strategy: {strategy}")
        }
    };
    Some(line)
}

// ============================================================================
// Reports
// ============================================================================

pub fn print_summary(summary: &DeploySummary) {
    println!();
    println!(
        "{}: {} succeeded, {} failed, {} skipped ({})",
        summary.target,
        summary.succeeded(),
        summary.failed(),
        summary.skipped(),
        summary.status()
    );
    for outcome in &summary.outcomes {
        let detail = match outcome.status {
            OutcomeStatus::Success => String::new(),
            OutcomeStatus::Skipped => outcome.skip_reason.clone().unwrap_or_default(),
            OutcomeStatus::Failed => {
                let stage = outcome
                    .stage_reached
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                let error = outcome
                    .error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                format!("{stage}: {error}")
            }
        };
        println!(
            "  {:<6} {:<28} {:<8} {detail}",
            outcome.node_id,
            outcome.address,
            outcome.status.to_string()
        );
    }
}

pub fn print_status(reports: &[NodeStatusReport]) {
    for report in reports {
        println!(
            "==> node {} ({}) {}",
            report.node.id,
            report.node.address(),
            report.node.health
        );
        match &report.output {
            Ok(output) => println!("{}", output.trim_end()),
            Err(error) => println!("error: {error}"),
        }
    }
}

pub fn print_pool_status(report: &PoolStatusReport) {
    println!("{} ({} mode)", report.target, report.mode);
    if let (Some(id), Some(strategy)) = (report.group_id, report.strategy) {
        let name = report.group_name.as_deref().unwrap_or("-");
        println!("group {id} {name}, strategy {strategy}");
    }
    println!(
        "{}/{} node(s) healthy",
        report.healthy_count(),
        report.nodes.len()
    );
    for node in &report.nodes {
        let mut flags = Vec::new();
        if node.primary {
            flags.push("primary");
        }
        if node.drained {
            flags.push("drained");
        }
        println!(
            "  {:<6} {:<28} {:<10} weight {:<4} {:<10} {}",
            node.id,
            node.address(),
            node.health.to_string(),
            node.weight,
            node.region.as_deref().unwrap_or("-"),
            flags.join(",")
        );
    }
}

pub fn print_groups(groups: &[NodeGroup]) {
    if groups.is_empty() {
        println!("no node groups");
        return;
    }
    for group in groups {
        println!(
            "  {:<6} {:<24} {}/{} {:<12} nodes {:?}",
            group.id,
            group.name,
            group.project,
            group.environment,
            group.strategy.to_string(),
            group.node_ids
        );
    }
}
