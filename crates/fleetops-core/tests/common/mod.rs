//! Hand-written mocks shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, broadcast};

use fleetops_api::events::DeployEvent;
use fleetops_core::*;
use fleetops_exec::{CommandResult, ExecError, RemoteExecutor, TransferOptions};

// ============================================================================
// Executor
// ============================================================================

/// Pauses a command until the test lets it continue
#[derive(Default)]
pub struct Gate {
    reached: Notify,
    release: Notify,
}

impl Gate {
    /// Wait until the gated command is running
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// Records every command; replies by the first rule whose pattern the
/// command contains, success otherwise
#[derive(Default)]
pub struct MockExecutor {
    gates: Mutex<Vec<(String, Arc<Gate>)>>,
    rules: Mutex<Vec<(String, CommandResult)>>,
    commands: Mutex<Vec<String>>,
    inputs: Mutex<Vec<(String, Vec<u8>)>>,
    transfers: Mutex<Vec<(PathBuf, String)>>,
}

impl MockExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reply to commands containing `pattern` with a non-zero exit
    pub fn fail_on(&self, pattern: &str, status: i32, stderr: &str) {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), CommandResult::failed(status, stderr)));
    }

    pub fn reply_on(&self, pattern: &str, stdout: &str) {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), CommandResult::ok(stdout)));
    }

    /// Hold the first command containing `pattern` until released
    pub fn hold_on(&self, pattern: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.gates
            .lock()
            .unwrap()
            .push((pattern.to_string(), Arc::clone(&gate)));
        gate
    }

    async fn pass_gate(&self, cmd: &str) {
        let gate = {
            let mut gates = self.gates.lock().unwrap();
            let index = gates.iter().position(|(pattern, _)| cmd.contains(pattern.as_str()));
            index.map(|i| gates.remove(i).1)
        };
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.release.notified().await;
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.commands().iter().any(|cmd| cmd.contains(pattern))
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.commands()
            .iter()
            .filter(|cmd| cmd.contains(pattern))
            .count()
    }

    pub fn inputs(&self) -> Vec<(String, Vec<u8>)> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn transfers(&self) -> Vec<(PathBuf, String)> {
        self.transfers.lock().unwrap().clone()
    }

    fn reply(&self, cmd: &str) -> CommandResult {
        self.commands.lock().unwrap().push(cmd.to_string());
        self.rules
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| cmd.contains(pattern.as_str()))
            .map_or_else(|| CommandResult::ok(""), |(_, result)| result.clone())
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        self.pass_gate(cmd).await;
        Ok(self.reply(cmd))
    }

    async fn run_with_timeout(
        &self,
        cmd: &str,
        _timeout: Duration,
    ) -> Result<CommandResult, ExecError> {
        self.run(cmd).await
    }

    async fn run_with_input(&self, cmd: &str, input: &[u8]) -> Result<CommandResult, ExecError> {
        self.inputs
            .lock()
            .unwrap()
            .push((cmd.to_string(), input.to_vec()));
        Ok(self.reply(cmd))
    }

    async fn transfer(
        &self,
        local: &Path,
        remote: &str,
        _options: &TransferOptions,
    ) -> Result<(), ExecError> {
        self.transfers
            .lock()
            .unwrap()
            .push((local.to_path_buf(), remote.to_string()));
        Ok(())
    }

    fn executor_type(&self) -> &'static str {
        "mock"
    }
}

/// One `MockExecutor` per node; listed nodes refuse connections
#[derive(Default)]
pub struct MockFactory {
    executors: Mutex<HashMap<NodeId, Arc<MockExecutor>>>,
    unreachable: Mutex<HashSet<NodeId>>,
    connects: Mutex<Vec<NodeId>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Executor for `node`, created on first use
    pub fn executor(&self, node: NodeId) -> Arc<MockExecutor> {
        Arc::clone(
            self.executors
                .lock()
                .unwrap()
                .entry(node)
                .or_insert_with(MockExecutor::new),
        )
    }

    /// Nodes the engine asked to connect to, in order
    pub fn connects(&self) -> Vec<NodeId> {
        self.connects.lock().unwrap().clone()
    }

    pub fn set_unreachable(&self, node: NodeId) {
        self.unreachable.lock().unwrap().insert(node);
    }
}

#[async_trait]
impl ExecutorFactory for MockFactory {
    async fn create_executor(&self, node: &Node) -> Result<Arc<dyn RemoteExecutor>, ExecError> {
        self.connects.lock().unwrap().push(node.id);
        if self.unreachable.lock().unwrap().contains(&node.id) {
            return Err(ExecError::ConnectionFailed(format!(
                "{}: connection refused",
                node.address()
            )));
        }
        Ok(self.executor(node.id))
    }
}

// ============================================================================
// Directory
// ============================================================================

#[derive(Default)]
pub struct DirectoryState {
    pub nodes: HashMap<NodeId, Node>,
    pub bindings: HashMap<Target, Vec<NodeId>>,
    pub groups: Vec<NodeGroup>,
    pub records: Vec<(Target, DeploymentRecord)>,
    pub app_upserts: usize,
    pub fail_records: bool,
    pub fail_upserts: bool,
    pub reads: usize,
}

/// In-memory directory service
#[derive(Default)]
pub struct MockDirectory {
    pub state: Mutex<DirectoryState>,
}

impl MockDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_node(&self, node: Node) {
        self.state.lock().unwrap().nodes.insert(node.id, node);
    }

    /// Register `node` and bind it to `target`
    pub fn bind(&self, target: &Target, node: Node) {
        let mut state = self.state.lock().unwrap();
        state
            .bindings
            .entry(target.clone())
            .or_default()
            .push(node.id);
        state.nodes.insert(node.id, node);
    }

    pub fn add_group(&self, group: NodeGroup) {
        self.state.lock().unwrap().groups.push(group);
    }

    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.state.lock().unwrap().nodes.get(&id).cloned()
    }

    pub fn records(&self) -> Vec<(Target, DeploymentRecord)> {
        self.state.lock().unwrap().records.clone()
    }

    pub fn app_upserts(&self) -> usize {
        self.state.lock().unwrap().app_upserts
    }

    pub fn fail_records(&self) {
        self.state.lock().unwrap().fail_records = true;
    }

    /// Directory reads made to refresh a pool
    pub fn reads(&self) -> usize {
        self.state.lock().unwrap().reads
    }

    pub fn fail_upserts(&self) {
        self.state.lock().unwrap().fail_upserts = true;
    }

    /// Change a node as another operator would, bypassing any actor
    pub fn edit_node(&self, id: NodeId, edit: impl FnOnce(&mut Node)) {
        if let Some(node) = self.state.lock().unwrap().nodes.get_mut(&id) {
            edit(node);
        }
    }
}

#[async_trait]
impl DirectoryService for MockDirectory {
    async fn resolve_target(&self, target: &Target) -> Result<Vec<Node>, DirectoryError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .bindings
            .get(target)
            .into_iter()
            .flatten()
            .filter_map(|id| state.nodes.get(id).cloned())
            .collect())
    }

    async fn node_group(&self, target: &Target) -> Result<Option<NodeGroup>, DirectoryError> {
        let state = self.state.lock().unwrap();
        Ok(state.groups.iter().find(|g| g.serves(target)).cloned())
    }

    async fn pool_snapshot(
        &self,
        target: &Target,
    ) -> Result<(Vec<Node>, Option<NodeGroup>), DirectoryError> {
        self.state.lock().unwrap().reads += 1;
        let nodes = self.resolve_target(target).await?;
        let group = self.node_group(target).await?;
        Ok((nodes, group))
    }

    async fn upsert_app_record(&self, _config: &DeployConfig) -> Result<(), DirectoryError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_upserts {
            return Err(DirectoryError::Rejected("422: invalid route".to_string()));
        }
        state.app_upserts += 1;
        Ok(())
    }

    async fn update_node_health(
        &self,
        node_id: NodeId,
        health: NodeHealth,
    ) -> Result<(), DirectoryError> {
        let mut state = self.state.lock().unwrap();
        let node = state
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| DirectoryError::NotFound(format!("node {node_id}")))?;
        node.health = health;
        Ok(())
    }

    async fn set_drain(&self, node_id: NodeId, drained: bool) -> Result<(), DirectoryError> {
        let mut state = self.state.lock().unwrap();
        let node = state
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| DirectoryError::NotFound(format!("node {node_id}")))?;
        node.drained = drained;
        Ok(())
    }

    async fn set_strategy(&self, group_id: u64, strategy: Strategy) -> Result<(), DirectoryError> {
        let mut state = self.state.lock().unwrap();
        let group = state
            .groups
            .iter_mut()
            .find(|g| g.id == group_id)
            .ok_or_else(|| DirectoryError::NotFound(format!("group {group_id}")))?;
        group.strategy = strategy;
        Ok(())
    }

    async fn record_deployment(
        &self,
        target: &Target,
        record: &DeploymentRecord,
    ) -> Result<(), DirectoryError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_records {
            return Err(DirectoryError::Request("503 Service Unavailable".to_string()));
        }
        state.records.push((target.clone(), record.clone()));
        Ok(())
    }

    async fn available_nodes(&self) -> Result<Vec<Node>, DirectoryError> {
        let state = self.state.lock().unwrap();
        let mut nodes: Vec<Node> = state.nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        Ok(nodes)
    }

    async fn bind_node(&self, target: &Target, binding: &NodeBinding) -> Result<(), DirectoryError> {
        let mut state = self.state.lock().unwrap();
        let node = state
            .nodes
            .get_mut(&binding.node_id)
            .ok_or_else(|| DirectoryError::NotFound(format!("node {}", binding.node_id)))?;
        node.primary = binding.primary;
        if let Some(weight) = binding.weight {
            node.weight = weight;
        }
        state
            .bindings
            .entry(target.clone())
            .or_default()
            .push(binding.node_id);
        Ok(())
    }

    async fn create_group(&self, group: &NewNodeGroup) -> Result<NodeGroup, DirectoryError> {
        let mut state = self.state.lock().unwrap();
        let created = NodeGroup {
            id: state.groups.len() as u64 + 1,
            name: group
                .name
                .clone()
                .unwrap_or_else(|| format!("{}-{}", group.project, group.environment)),
            project: group.project.clone(),
            environment: group.environment.clone(),
            strategy: group.strategy,
            node_ids: Vec::new(),
        };
        state.groups.push(created.clone());
        Ok(created)
    }

    async fn list_groups(&self, project: Option<&str>) -> Result<Vec<NodeGroup>, DirectoryError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .groups
            .iter()
            .filter(|g| project.is_none_or(|p| g.project == p))
            .cloned()
            .collect())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn target() -> Target {
    Target::new("api", "my-saas")
}

/// Group of `node_ids` serving `target()`
pub fn group(node_ids: &[NodeId], strategy: Strategy) -> NodeGroup {
    NodeGroup {
        id: 7,
        name: "my-saas-api".to_string(),
        project: "my-saas".to_string(),
        environment: "api".to_string(),
        strategy,
        node_ids: node_ids.to_vec(),
    }
}

pub fn events() -> broadcast::Sender<DeployEvent> {
    broadcast::channel(1024).0
}

pub fn pool(directory: &Arc<MockDirectory>, events: &broadcast::Sender<DeployEvent>) -> PoolHandle {
    PoolHandle::spawn(PoolActorArgs::new(directory.clone(), events.clone()).with_seed(7))
}

/// Scheduler with single-attempt retries so failures resolve at once
pub fn scheduler(
    directory: &Arc<MockDirectory>,
    factory: &Arc<MockFactory>,
    events: &broadcast::Sender<DeployEvent>,
) -> DeployScheduler {
    DeployScheduler::new(
        pool(directory, events),
        directory.clone(),
        factory.clone(),
        events.clone(),
    )
    .with_health_policy(RetryPolicy::none())
    .with_record_policy(RetryPolicy::none())
}

pub fn config(raw: &str) -> Arc<DeployConfig> {
    Arc::new(raw.parse().unwrap())
}

/// `git` source, two app groups, one route and one healthcheck
pub const GIT_DESCRIPTOR: &str = r#"
project = "my-saas"
app = "api"
deploy_path = "/opt/my-saas"

[deploy]
source = "git"
branch = "main"

[deploy.git]
repo = "git@github.com:acme/my-saas.git"

[[apps]]
name = "api"
services = ["api", "worker"]

[[apps]]
name = "web"
services = ["web"]

[[routes]]
domain = "api.example.com"
port = 8080

[[healthchecks]]
name = "api"
url = "http://localhost:8080/health"
"#;
