//! HTTP+JSON client for the hypervisor API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::HypervisorClient;
use crate::descriptor::{Mount, NetworkInterface, ResourceConfig, ResourceDescriptor, ResourceId};
use crate::error::{ApiError, ApiResult};
use crate::state::ObservedStatus;

/// Connection settings for the hypervisor API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HypervisorSettings {
    /// Base URL, e.g. `https://pve1:8006/api`.
    pub endpoint: String,
    /// Hypervisor node that owns the resources.
    pub node: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl HypervisorSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest<'a> {
    id: ResourceId,
    hostname: &'a str,
    cores: u32,
    memory_mb: u64,
    disk_gb: u64,
    network: &'a NetworkInterface,
    mounts: &'a [Mount],
    #[serde(skip_serializing_if = "Option::is_none")]
    ssh_public_key: Option<&'a str>,
}

impl<'a> From<&'a ResourceDescriptor> for CreateRequest<'a> {
    fn from(d: &'a ResourceDescriptor) -> Self {
        Self {
            id: d.id,
            hostname: &d.hostname,
            cores: d.cores,
            memory_mb: d.memory_mb,
            disk_gb: d.disk_gb,
            network: &d.network,
            mounts: &d.mounts,
            ssh_public_key: d.ssh_public_key.as_deref(),
        }
    }
}

/// Client for the hypervisor REST API.
#[derive(Clone)]
pub struct HttpHypervisorClient {
    http: Client,
    base_url: String,
}

impl HttpHypervisorClient {
    pub fn new(settings: &HypervisorSettings) -> ApiResult<Self> {
        let http = Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| ApiError::Fatal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: format!(
                "{}/nodes/{}/resources",
                settings.endpoint.trim_end_matches('/'),
                settings.node
            ),
        })
    }

    fn url(&self, id: ResourceId, suffix: &str) -> String {
        format!("{}/{}{}", self.base_url, id, suffix)
    }

    /// Map non-success responses onto the transient/fatal split.
    async fn check(response: Response) -> ApiResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify(status, body.trim()))
    }
}

fn classify(status: StatusCode, body: &str) -> ApiError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body)
    };
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        ApiError::Transient(message)
    } else {
        ApiError::Fatal(message)
    }
}

#[async_trait]
impl HypervisorClient for HttpHypervisorClient {
    async fn query(&self, id: ResourceId) -> ApiResult<ObservedStatus> {
        debug!("Querying status of resource {}", id);
        let response = self.http.get(self.url(id, "/status")).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(ObservedStatus::Absent);
        }
        let body: StatusResponse = Self::check(response).await?.json().await?;
        Ok(body.status.parse().unwrap_or(ObservedStatus::Unknown))
    }

    async fn config(&self, id: ResourceId) -> ApiResult<Option<ResourceConfig>> {
        debug!("Fetching config of resource {}", id);
        let response = self.http.get(self.url(id, "/config")).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let config = Self::check(response).await?.json().await?;
        Ok(Some(config))
    }

    async fn create(&self, descriptor: &ResourceDescriptor) -> ApiResult<()> {
        debug!("Creating resource {} ({})", descriptor.id, descriptor.hostname);
        let response = self
            .http
            .post(&self.base_url)
            .json(&CreateRequest::from(descriptor))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn start(&self, id: ResourceId) -> ApiResult<()> {
        debug!("Starting resource {}", id);
        let response = self.http.post(self.url(id, "/start")).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn stop(&self, id: ResourceId, graceful: bool) -> ApiResult<()> {
        debug!("Stopping resource {} (graceful={})", id, graceful);
        let response = self
            .http
            .post(self.url(id, "/stop"))
            .query(&[("graceful", graceful)])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete(&self, id: ResourceId) -> ApiResult<()> {
        debug!("Deleting resource {}", id);
        let response = self.http.delete(self.url(id, "")).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::tests::make_descriptor;

    #[test]
    fn test_classify() {
        assert!(classify(StatusCode::INTERNAL_SERVER_ERROR, "").is_transient());
        assert!(classify(StatusCode::SERVICE_UNAVAILABLE, "busy").is_transient());
        assert!(classify(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(!classify(StatusCode::FORBIDDEN, "no").is_transient());
        assert!(!classify(StatusCode::CONFLICT, "exists").is_transient());
        assert_eq!(
            classify(StatusCode::UNAUTHORIZED, "bad ticket").message(),
            "401 Unauthorized: bad ticket"
        );
    }

    #[test]
    fn test_create_request_shape() {
        let d = make_descriptor(201);
        let body = serde_json::to_value(CreateRequest::from(&d)).unwrap();
        assert_eq!(body["id"], 201);
        assert_eq!(body["cores"], 2);
        assert_eq!(body["memoryMb"], 4096);
        assert_eq!(body["diskGb"], 8);
        assert_eq!(body["network"]["bridge"], "vmbr0");
        assert_eq!(body["network"]["ip"]["mode"], "static");
        assert!(body["mounts"].as_array().unwrap().is_empty());
        assert_eq!(body["sshPublicKey"], "ssh-ed25519 AAAA test@host");
    }

    #[test]
    fn test_urls() {
        let client = HttpHypervisorClient::new(&HypervisorSettings {
            endpoint: "http://pve1:8006/api/".to_string(),
            node: "pve1".to_string(),
            request_timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(
            client.url(ResourceId(201), "/status"),
            "http://pve1:8006/api/nodes/pve1/resources/201/status"
        );
        assert_eq!(client.url(ResourceId(201), ""), "http://pve1:8006/api/nodes/pve1/resources/201");
    }
}
