//! HTTP client for the directory service

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use fleetops_api::{
    requests::{
        BindNodeRequest, CreateNodeGroupRequest, DeploymentRecordRequest, NodeHealthRequest,
        SetDrainRequest, SetStrategyRequest, SyncAppRequest,
    },
    responses::{
        DeployTargetsResponse, ErrorResponse, MessageResponse, NodeGroupDto,
        NodeGroupListResponse, NodeListResponse, SyncAppResponse,
    },
};

use crate::error::{ClientError, Result};

/// Default directory service endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.ops.autos";

/// HTTP client for the directory service
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpClient {
    /// Create a new HTTP client
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid.
    pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new HTTP client with custom `reqwest::Client`
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid.
    pub fn with_client(base_url: impl AsRef<str>, client: Client) -> Result<Self> {
        let base_url = Url::parse(base_url.as_ref())?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase));
        }
        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    /// Attach a bearer token sent with every request
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Base URL requests are resolved against
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build a full URL by appending encoded path segments to the base
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| ClientError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> Result<RequestBuilder> {
        let token = self.token.as_deref().ok_or(ClientError::Unauthenticated)?;
        debug!(%method, %url, "directory request");
        Ok(self.client.request(method, url).bearer_auth(token))
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = builder.send().await?;
        Self::handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let text = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorResponse>(&text) {
            Ok(parsed) => parsed.error,
            Err(_) if text.is_empty() => format!("HTTP error: {status}"),
            Err(_) => text,
        };
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }

    fn app_segments<'a>(project: Option<&'a str>, app: &'a str) -> Vec<&'a str> {
        let mut segments = vec!["apps"];
        if let Some(project) = project {
            segments.push(project);
        }
        segments.push(app);
        segments
    }

    // App endpoints

    /// Nodes bound to an app, with the group strategy if pooled
    ///
    /// # Errors
    /// Returns an error if the request fails or the API returns an error.
    pub async fn deploy_targets(
        &self,
        project: Option<&str>,
        app: &str,
    ) -> Result<DeployTargetsResponse> {
        let mut segments = Self::app_segments(project, app);
        segments.push("deploy-targets");
        let url = self.endpoint(&segments)?;
        self.send(self.request(Method::GET, url)?).await
    }

    /// Create or update the application record
    ///
    /// # Errors
    /// Returns an error if the request fails or the API returns an error.
    pub async fn sync_app(&self, request: &SyncAppRequest) -> Result<SyncAppResponse> {
        let url = self.endpoint(&["apps", "sync"])?;
        self.send(self.request(Method::PUT, url)?.json(request))
            .await
    }

    /// Store one per-node deployment record
    ///
    /// # Errors
    /// Returns an error if the request fails or the API returns an error.
    pub async fn record_deployment(
        &self,
        project: Option<&str>,
        app: &str,
        request: &DeploymentRecordRequest,
    ) -> Result<MessageResponse> {
        let mut segments = Self::app_segments(project, app);
        segments.push("deployments");
        let url = self.endpoint(&segments)?;
        self.send(self.request(Method::POST, url)?.json(request))
            .await
    }

    /// Bind a node to an app by project/app name
    ///
    /// # Errors
    /// Returns an error if the request fails or the API returns an error.
    pub async fn bind_by_name(&self, request: &BindNodeRequest) -> Result<MessageResponse> {
        let url = self.endpoint(&["apps", "bind-by-name"])?;
        self.send(self.request(Method::POST, url)?.json(request))
            .await
    }

    // Node group endpoints

    /// Create a node group
    ///
    /// # Errors
    /// Returns an error if the request fails or the API returns an error.
    pub async fn create_node_group(&self, request: &CreateNodeGroupRequest) -> Result<NodeGroupDto> {
        let url = self.endpoint(&["node-groups"])?;
        self.send(self.request(Method::POST, url)?.json(request))
            .await
    }

    /// List node groups, optionally for one project
    ///
    /// # Errors
    /// Returns an error if the request fails or the API returns an error.
    pub async fn list_node_groups(&self, project: Option<&str>) -> Result<NodeGroupListResponse> {
        let mut url = self.endpoint(&["node-groups"])?;
        if let Some(project) = project {
            url.query_pairs_mut().append_pair("project", project);
        }
        self.send(self.request(Method::GET, url)?).await
    }

    /// Change a group's load-balancing strategy
    ///
    /// # Errors
    /// Returns an error if the request fails or the API returns an error.
    pub async fn set_group_strategy(&self, group_id: u64, strategy: &str) -> Result<MessageResponse> {
        let url = self.endpoint(&["node-groups", &group_id.to_string()])?;
        let body = SetStrategyRequest {
            lb_strategy: strategy.to_string(),
        };
        self.send(self.request(Method::PATCH, url)?.json(&body))
            .await
    }

    // Node endpoints

    /// All nodes visible to the caller
    ///
    /// # Errors
    /// Returns an error if the request fails or the API returns an error.
    pub async fn list_nodes(&self) -> Result<NodeListResponse> {
        let url = self.endpoint(&["nodes"])?;
        self.send(self.request(Method::GET, url)?).await
    }

    /// Set or clear a node's drain flag
    ///
    /// # Errors
    /// Returns an error if the request fails or the API returns an error.
    pub async fn set_node_drain(&self, node_id: u64, drained: bool) -> Result<MessageResponse> {
        let url = self.endpoint(&["nodes", &node_id.to_string(), "drain"])?;
        self.send(self.request(Method::PUT, url)?.json(&SetDrainRequest { drained }))
            .await
    }

    /// Report a node's health status
    ///
    /// # Errors
    /// Returns an error if the request fails or the API returns an error.
    pub async fn set_node_health(&self, node_id: u64, status: &str) -> Result<MessageResponse> {
        let url = self.endpoint(&["nodes", &node_id.to_string(), "health"])?;
        let body = NodeHealthRequest {
            status: status.to_string(),
        };
        self.send(self.request(Method::PUT, url)?.json(&body))
            .await
    }
}
