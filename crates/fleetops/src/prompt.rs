//! Interactive node selection

use async_trait::async_trait;
use dialoguer::Select;
use dialoguer::theme::ColorfulTheme;
use fleetops_core::{CoreError, Node, NodeId, NodePicker, Target};
use tracing::warn;

/// Terminal picker shown when a target has no bound node
#[derive(Debug, Default)]
pub struct DialoguerPicker;

#[async_trait]
impl NodePicker for DialoguerPicker {
    async fn pick(&self, target: &Target, nodes: &[Node]) -> Result<Option<NodeId>, CoreError> {
        if nodes.is_empty() {
            return Ok(None);
        }

        let prompt = format!("No node bound to {target}. Deploy to");
        let mut items: Vec<String> = nodes.iter().map(describe).collect();
        items.push("Cancel".to_string());
        let ids: Vec<NodeId> = nodes.iter().map(|n| n.id).collect();

        // dialoguer blocks on the terminal
        let selection = tokio::task::spawn_blocking(move || {
            Select::with_theme(&ColorfulTheme::default())
                .with_prompt(prompt)
                .items(&items)
                .default(0)
                .interact_opt()
        })
        .await
        .map_err(|e| CoreError::ActorError(format!("prompt task failed: {e}")))?;

        match selection {
            Ok(Some(index)) => Ok(ids.get(index).copied()),
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(error = %e, "node prompt unavailable");
                Ok(None)
            }
        }
    }
}

/// One menu line: `42  42.node.ops.autos (10.0.0.42) eu-west`
fn describe(node: &Node) -> String {
    let mut line = format!("{:<4} {}", node.id, node.domain);
    if !node.ip.is_empty() {
        line.push_str(&format!(" ({})", node.ip));
    }
    if let Some(region) = &node.region {
        line.push(' ');
        line.push_str(region);
    }
    line
}
