//! Directory service adapter over the HTTP client

use async_trait::async_trait;
use fleetops_api::requests::{
    BindNodeRequest, CreateNodeGroupRequest, DeploymentRecordRequest, StageTimingDto,
    SyncAppRequest,
};
use fleetops_api::responses::{
    DeployTargetDto, DeployTargetsResponse, NodeDto, NodeGroupDto, RouteDto,
};
use fleetops_client::{ClientError, HttpClient};
use fleetops_core::{
    DeployConfig, DeploymentRecord, DirectoryError, DirectoryService, NewNodeGroup, Node,
    NodeBinding, NodeGroup, NodeHealth, NodeId, Source, Strategy, Target,
};
use tracing::debug;

/// `DirectoryService` backed by the REST API
pub struct HttpDirectory {
    client: HttpClient,
}

impl HttpDirectory {
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    /// Deploy targets, with "not found" meaning nothing is bound
    async fn targets(&self, target: &Target) -> Result<Option<DeployTargetsResponse>, DirectoryError> {
        match self
            .client
            .deploy_targets(target.project.as_deref(), &target.app)
            .await
        {
            Ok(response) => Ok(Some(response)),
            Err(e) if e.is_not_found() => {
                debug!(deploy_target = %target, "no deploy targets");
                Ok(None)
            }
            Err(e) => Err(map_error(e)),
        }
    }
}

#[async_trait]
impl DirectoryService for HttpDirectory {
    async fn resolve_target(&self, target: &Target) -> Result<Vec<Node>, DirectoryError> {
        Ok(self
            .targets(target)
            .await?
            .map(|response| response.targets.iter().map(node_from_target).collect())
            .unwrap_or_default())
    }

    async fn node_group(&self, target: &Target) -> Result<Option<NodeGroup>, DirectoryError> {
        match self.targets(target).await? {
            Some(response) => group_from_targets(target, &response),
            None => Ok(None),
        }
    }

    async fn pool_snapshot(
        &self,
        target: &Target,
    ) -> Result<(Vec<Node>, Option<NodeGroup>), DirectoryError> {
        let Some(response) = self.targets(target).await? else {
            return Ok((Vec::new(), None));
        };
        let group = group_from_targets(target, &response)?;
        let nodes = response.targets.iter().map(node_from_target).collect();
        Ok((nodes, group))
    }

    async fn upsert_app_record(&self, config: &DeployConfig) -> Result<(), DirectoryError> {
        let github_repo = match &config.source {
            Source::Git { repo, .. } => Some(repo.clone()),
            Source::Push | Source::Image { .. } => None,
        };
        let request = SyncAppRequest {
            app: config.target.app.clone(),
            project: config.target.project.clone(),
            deploy_path: config.deploy_path.clone(),
            source: config.source.kind().to_string(),
            github_repo,
            github_branch: config.branch.clone(),
            routes: config
                .routes
                .iter()
                .map(|r| RouteDto {
                    domain: r.domain.clone(),
                    port: r.port,
                    ssl: r.ssl,
                })
                .collect(),
        };
        let response = self.client.sync_app(&request).await.map_err(map_error)?;
        debug!(app_id = response.app_id, created = response.created, "app record synced");
        Ok(())
    }

    async fn update_node_health(
        &self,
        node_id: NodeId,
        health: NodeHealth,
    ) -> Result<(), DirectoryError> {
        self.client
            .set_node_health(node_id, &health.to_string())
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn set_drain(&self, node_id: NodeId, drained: bool) -> Result<(), DirectoryError> {
        self.client
            .set_node_drain(node_id, drained)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn set_strategy(&self, group_id: u64, strategy: Strategy) -> Result<(), DirectoryError> {
        self.client
            .set_group_strategy(group_id, &strategy.to_string())
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn record_deployment(
        &self,
        target: &Target,
        record: &DeploymentRecord,
    ) -> Result<(), DirectoryError> {
        let request = DeploymentRecordRequest {
            node_id: record.node_id,
            status: record.status.to_string(),
            stage: record.stage.map(|s| s.to_string()).unwrap_or_default(),
            error: record.error.clone(),
            trigger: record.trigger.clone(),
            started_at: record.started_at,
            finished_at: record.finished_at,
            stages: record
                .stages
                .iter()
                .map(|s| StageTimingDto {
                    stage: s.stage.to_string(),
                    status: s.status.to_string(),
                    duration_ms: u64::try_from(s.duration.as_millis()).unwrap_or(u64::MAX),
                })
                .collect(),
        };
        self.client
            .record_deployment(target.project.as_deref(), &target.app, &request)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn available_nodes(&self) -> Result<Vec<Node>, DirectoryError> {
        let response = self.client.list_nodes().await.map_err(map_error)?;
        Ok(response.nodes.iter().map(node_from_dto).collect())
    }

    async fn bind_node(&self, target: &Target, binding: &NodeBinding) -> Result<(), DirectoryError> {
        let request = BindNodeRequest {
            app: target.app.clone(),
            project: target.project.clone(),
            node_id: binding.node_id,
            is_primary: binding.primary,
            weight: binding.weight,
        };
        self.client
            .bind_by_name(&request)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn create_group(&self, group: &NewNodeGroup) -> Result<NodeGroup, DirectoryError> {
        let request = CreateNodeGroupRequest {
            project: group.project.clone(),
            environment: group.environment.clone(),
            name: group.name.clone(),
            lb_strategy: group.strategy.to_string(),
        };
        let created = self
            .client
            .create_node_group(&request)
            .await
            .map_err(map_error)?;
        group_from_dto(created)
    }

    async fn list_groups(&self, project: Option<&str>) -> Result<Vec<NodeGroup>, DirectoryError> {
        let response = self
            .client
            .list_node_groups(project)
            .await
            .map_err(map_error)?;
        response.node_groups.into_iter().map(group_from_dto).collect()
    }
}

fn map_error(err: ClientError) -> DirectoryError {
    match err {
        ClientError::Api { status: 404, message } => DirectoryError::NotFound(message),
        ClientError::Api { status, message } if (400..500).contains(&status) => {
            DirectoryError::Rejected(format!("{status}: {message}"))
        }
        other @ ClientError::Unauthenticated => DirectoryError::Rejected(other.to_string()),
        ClientError::Json(e) => DirectoryError::InvalidResponse(e.to_string()),
        other => DirectoryError::Request(other.to_string()),
    }
}

/// Directory status strings: our own health names, plus the service's
/// `online`/`active` for healthy nodes
fn parse_health(status: &str) -> NodeHealth {
    status.parse().unwrap_or_else(|_| match status {
        "online" | "active" | "ok" => NodeHealth::Healthy,
        _ => NodeHealth::Offline,
    })
}

fn parse_strategy(raw: &str) -> Result<Strategy, DirectoryError> {
    raw.parse()
        .map_err(|_| DirectoryError::InvalidResponse(format!("unknown lb_strategy `{raw}`")))
}

fn node_from_target(dto: &DeployTargetDto) -> Node {
    let mut node = Node::new(dto.node_id, dto.domain.clone())
        .with_ip(dto.ip_address.clone())
        .with_weight(dto.weight)
        .with_primary(dto.is_primary)
        .with_health(parse_health(&dto.status))
        .with_drained(dto.drained);
    node.region = dto.region.clone();
    node.zone = dto.zone.clone();
    node.hostname = dto.hostname.clone();
    node
}

/// Group the deploy targets belong to, if the app is pooled
fn group_from_targets(
    target: &Target,
    response: &DeployTargetsResponse,
) -> Result<Option<NodeGroup>, DirectoryError> {
    let Some(id) = response.node_group_id else {
        return Ok(None);
    };
    let strategy = match response.lb_strategy.as_deref() {
        Some(raw) => parse_strategy(raw)?,
        None => Strategy::default(),
    };
    Ok(Some(NodeGroup {
        id,
        name: response
            .node_group_name
            .clone()
            .unwrap_or_else(|| format!("group-{id}")),
        project: target.project.clone().unwrap_or_default(),
        environment: target.environment().to_string(),
        strategy,
        node_ids: response.targets.iter().map(|t| t.node_id).collect(),
    }))
}

fn node_from_dto(dto: &NodeDto) -> Node {
    let mut node = Node::new(dto.id, dto.domain.clone())
        .with_ip(dto.ip_address.clone())
        .with_health(dto.status.as_deref().map_or(NodeHealth::Healthy, parse_health));
    node.region = dto.region.clone();
    node.zone = dto.zone.clone();
    node.hostname = dto.hostname.clone();
    node
}

fn group_from_dto(dto: NodeGroupDto) -> Result<NodeGroup, DirectoryError> {
    Ok(NodeGroup {
        id: dto.id,
        name: dto.name,
        project: dto.project_name,
        environment: dto.environment,
        strategy: parse_strategy(&dto.lb_strategy)?,
        node_ids: dto.node_ids,
    })
}
