//! Nomad API client and the allocation data model.
//!
//! Only the parts of the Nomad allocation payload that log source derivation
//! needs are decoded; everything else in the response is ignored.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::{debug, error, info};

/// Allocation placed on a node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Allocation {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Namespace", default)]
    pub namespace: String,

    #[serde(rename = "JobID", default)]
    pub job_id: String,

    #[serde(rename = "TaskGroup", default)]
    pub task_group: String,

    #[serde(rename = "Name", default)]
    pub name: String,

    #[serde(rename = "NodeID", default)]
    pub node_id: String,

    /// Job definition the allocation was scheduled from.
    #[serde(rename = "Job", default)]
    pub job: Option<Job>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Job {
    #[serde(rename = "TaskGroups", default)]
    pub task_groups: Vec<TaskGroup>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskGroup {
    #[serde(rename = "Name", default)]
    pub name: String,

    #[serde(rename = "Tasks", default)]
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Task {
    #[serde(rename = "Name")]
    pub name: String,

    /// Nomad sends `null` for tasks without a meta block.
    #[serde(rename = "Meta", default, deserialize_with = "null_as_empty")]
    pub meta: HashMap<String, String>,
}

impl Task {
    /// Create a task with the given metadata.
    pub fn new(name: impl Into<String>, meta: HashMap<String, String>) -> Self {
        Self {
            name: name.into(),
            meta,
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<HashMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<HashMap<String, String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Allocation {
    /// Tasks of the group this allocation was placed for, if the job defines it.
    pub fn tasks(&self) -> Option<&[Task]> {
        self.job
            .as_ref()?
            .task_groups
            .iter()
            .find(|group| group.name == self.task_group)
            .map(|group| group.tasks.as_slice())
    }
}

/// Anything that can list the allocations of the local node.
#[async_trait]
pub trait AllocationSource: Send + Sync {
    /// List all allocations currently placed on the node.
    async fn list_allocations(&self) -> Result<Vec<Allocation>>;
}

/// Nomad HTTP API client bound to a single node.
pub struct NomadClient {
    client: reqwest::Client,
    base_url: String,
    node_id: String,
}

impl NomadClient {
    /// Create a new client. The node id can be filled in later through
    /// [`NomadClient::resolve_node_id_from_env`].
    pub fn new(address: &str, token: Option<&str>, node_id: impl Into<String>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) {
            headers.insert(
                "X-Nomad-Token",
                HeaderValue::from_str(token).context("Invalid Nomad ACL token")?,
            );
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("nomad-logger/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: address.trim_end_matches('/').to_string(),
            node_id: node_id.into(),
        })
    }

    /// Node the client lists allocations for.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Fetch a single allocation.
    pub async fn allocation(&self, alloc_id: &str, namespace: Option<&str>) -> Result<Allocation> {
        let url = format!("{}/v1/allocation/{}", self.base_url, alloc_id);
        debug!(url = %url, "Fetching allocation");

        let mut request = self.client.get(&url);
        if let Some(namespace) = namespace.filter(|ns| !ns.is_empty()) {
            request = request.query(&[("namespace", namespace)]);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Failed to fetch allocation");
            anyhow::bail!("Failed to fetch allocation {}: {} - {}", alloc_id, status, body);
        }

        Ok(response.json().await?)
    }

    /// Determine the node id from the allocation this process runs in.
    ///
    /// Nomad exposes `NOMAD_ALLOC_ID` and `NOMAD_NAMESPACE` to every task, so
    /// when the logger itself is deployed as a Nomad job its node can be
    /// looked up through its own allocation.
    pub async fn resolve_node_id_from_env(&mut self) -> Result<&str> {
        let alloc_id = std::env::var("NOMAD_ALLOC_ID")
            .context("No node id configured and NOMAD_ALLOC_ID is not set")?;
        let namespace = std::env::var("NOMAD_NAMESPACE").ok();

        let alloc = self.allocation(&alloc_id, namespace.as_deref()).await?;
        if alloc.node_id.is_empty() {
            anyhow::bail!("Allocation {} has no node id", alloc_id);
        }

        info!(node_id = %alloc.node_id, "Found node id using env vars");
        self.node_id = alloc.node_id;
        Ok(&self.node_id)
    }
}

#[async_trait]
impl AllocationSource for NomadClient {
    async fn list_allocations(&self) -> Result<Vec<Allocation>> {
        let url = format!("{}/v1/node/{}/allocations", self.base_url, self.node_id);
        debug!(url = %url, "Fetching node allocations");

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to list allocations: {} - {}", status, body);
        }

        let allocs: Vec<Allocation> = response
            .json()
            .await
            .context("Invalid allocation list payload")?;
        debug!(alloc_count = allocs.len(), "Fetched node allocations");

        Ok(allocs)
    }
}
