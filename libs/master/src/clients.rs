//! Contracts of the external collaborators the master talks to: the
//! node-local container agent and the cloud provider. Only the interfaces
//! are owned here; the agent and the provider are separate systems.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use regatta_api::model::ContainerStatus;
use regatta_api::{Error, Result};

/// Per-container status for one pod as reported by the node agent.
pub type PodInfo = BTreeMap<String, ContainerStatus>;

/// Client for the container agent running on each node.
#[async_trait]
pub trait NodeAgentClient: Send + Sync {
    /// Status of every container of `pod_id` on `host`.
    async fn pod_info(&self, host: &str, pod_id: &str) -> Result<PodInfo>;

    /// Liveness probe of the agent itself.
    async fn healthy(&self, host: &str) -> Result<bool>;
}

/// Instance lookups against the hosting cloud.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn instance_ip(&self, host: &str) -> Result<String>;
}

/// Provider used when no cloud integration is configured: every host
/// resolves to itself, which is right for bare-metal clusters whose node
/// names are reachable addresses.
pub struct StaticCloudProvider;

#[async_trait]
impl CloudProvider for StaticCloudProvider {
    async fn instance_ip(&self, host: &str) -> Result<String> {
        Ok(host.to_string())
    }
}

/// HTTP implementation of [`NodeAgentClient`] against the agent's local
/// port.
pub struct HttpNodeAgentClient {
    client: reqwest::Client,
    port: u16,
}

impl HttpNodeAgentClient {
    pub fn new(port: u16) -> Result<HttpNodeAgentClient> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Unknown(format!("failed to build http client: {e}")))?;
        Ok(HttpNodeAgentClient { client, port })
    }
}

#[async_trait]
impl NodeAgentClient for HttpNodeAgentClient {
    async fn pod_info(&self, host: &str, pod_id: &str) -> Result<PodInfo> {
        let url = format!(
            "http://{host}:{port}/podInfo?podID={pod_id}",
            port = self.port
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Unknown(format!("agent on {host} unreachable: {e}")))?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(Error::not_found("Pod", pod_id)),
            status if status.is_success() => response
                .json()
                .await
                .map_err(|e| Error::Decode(format!("bad pod info from {host}: {e}"))),
            status => Err(Error::Unknown(format!(
                "agent on {host} returned {status}"
            ))),
        }
    }

    async fn healthy(&self, host: &str) -> Result<bool> {
        let url = format!("http://{host}:{port}/healthz", port = self.port);
        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}
