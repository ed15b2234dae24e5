//! Workflow and execution read models fetched from the backend API.
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use flow_stream::NodeStatus;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Saved workflow graph. Only the node identities matter to progress tracking.
pub struct WorkflowDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
}

impl WorkflowDefinition {
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|node| node.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStepDetail {
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_label: Option<String>,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Persisted record of one workflow run.
pub struct ExecutionDetail {
    pub id: String,
    #[serde(default)]
    pub workflow_id: String,
    /// Backend status string, kept verbatim ("running", "completed", "failed", ...).
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub steps: Vec<ExecutionStepDetail>,
}

#[async_trait]
/// Trait contract for `WorkflowStore` behavior.
pub trait WorkflowStore: Send + Sync {
    async fn fetch_workflow(&self, workflow_id: &str) -> Result<WorkflowDefinition>;

    async fn fetch_execution(&self, execution_id: &str) -> Result<ExecutionDetail>;
}

#[derive(Debug, Clone)]
/// `WorkflowStore` over `GET {api_base}/workflows/{id}` and `GET {api_base}/executions/{id}`.
pub struct HttpWorkflowStore {
    client: reqwest::Client,
    api_base: String,
}

impl HttpWorkflowStore {
    pub fn new(api_base: impl Into<String>, api_key: Option<&str>) -> Result<Self> {
        let api_base = api_base.into();
        if api_base.trim().is_empty() {
            bail!("api base URL cannot be empty");
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(api_key) = api_key.map(str::trim).filter(|key| !key.is_empty()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {api_key}"))
                    .map_err(|error| anyhow!("invalid API key header: {error}"))?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .context("failed to build workflow store HTTP client")?;
        Ok(Self { client, api_base })
    }

    fn resource_url(&self, collection: &str, id: &str) -> String {
        format!(
            "{}/{collection}/{}",
            self.api_base.trim_end_matches('/'),
            id.trim()
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T> {
        tracing::debug!(url = url.as_str(), "fetching read model");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("request to {url} failed with status {}: {body}", status.as_u16());
        }
        response
            .json::<T>()
            .await
            .with_context(|| format!("failed to decode response from {url}"))
    }
}

#[async_trait]
impl WorkflowStore for HttpWorkflowStore {
    async fn fetch_workflow(&self, workflow_id: &str) -> Result<WorkflowDefinition> {
        self.get_json(self.resource_url("workflows", workflow_id))
            .await
    }

    async fn fetch_execution(&self, execution_id: &str) -> Result<ExecutionDetail> {
        self.get_json(self.resource_url("executions", execution_id))
            .await
    }
}
