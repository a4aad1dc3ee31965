use async_trait::async_trait;
use reqwest::{header::CONTENT_LENGTH, Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize};
use std::collections::BTreeMap;

use crate::{
    cloud_provider::{CloudInstance, ComputeProvider, OperationHandle, PowerAction, ProviderError},
    config::Config,
};

const METADATA_URL: &str = "http://metadata.google.internal/computeMetadata/v1";

// -----------------------------------------------------------------------------
// Models
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AggregatedInstanceList {
    #[serde(default)]
    items: BTreeMap<String, InstancesScopedList>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstancesScopedList {
    #[serde(default)]
    instances: Vec<GceInstance>,
}

#[derive(Debug, Deserialize)]
struct GceInstance {
    name: String,
    zone: String,
}

#[derive(Debug, Deserialize)]
struct ZoneOperation {
    name: String,
    status: String,
    error: Option<OperationErrors>,
}

#[derive(Debug, Deserialize)]
struct OperationErrors {
    #[serde(default)]
    errors: Vec<OperationErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct OperationErrorEntry {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    access_token: String,
}

// -----------------------------------------------------------------------------
// Client
// -----------------------------------------------------------------------------

/// Compute Engine REST client scoped to one project.
pub struct GcpComputeClient {
    http: Client,
    endpoint: String,
    project: String,
    static_token: Option<String>,
    metadata_url: String,
}

impl GcpComputeClient {
    pub fn new(endpoint: &str, project: &str, static_token: Option<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            project: project.to_string(),
            static_token,
            metadata_url: METADATA_URL.to_string(),
        }
    }

    /// Points token and project lookups at another metadata server.
    pub fn with_metadata_url(mut self, metadata_url: &str) -> Self {
        self.metadata_url = metadata_url.trim_end_matches('/').to_string();
        self
    }

    pub async fn from_config(config: &Config) -> Result<Self, ProviderError> {
        Self::from_config_with_metadata(config, METADATA_URL).await
    }

    pub async fn from_config_with_metadata(
        config: &Config,
        metadata_url: &str,
    ) -> Result<Self, ProviderError> {
        let project = match &config.gcp_project {
            Some(project) => project.clone(),
            None => {
                fetch_metadata_text(&Client::new(), metadata_url, "project/project-id")
                    .await?
                    .trim()
                    .to_string()
            }
        };

        Ok(Self::new(
            &config.gcp_compute_endpoint,
            &project,
            config.gcp_access_token.clone(),
        )
        .with_metadata_url(metadata_url))
    }

    async fn access_token(&self) -> Result<String, ProviderError> {
        if let Some(token) = &self.static_token {
            return Ok(token.clone());
        }

        let body = fetch_metadata_text(
            &self.http,
            &self.metadata_url,
            "instance/service-accounts/default/token",
        )
        .await?;
        let token: AccessToken = serde_json::from_str(&body)
            .map_err(|err| ProviderError(format!("Invalid access token response: {}", err)))?;

        Ok(token.access_token)
    }

    fn zone_url(&self, zone: &str) -> String {
        format!("{}/projects/{}/zones/{}", self.endpoint, self.project, zone)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ProviderError> {
        let token = self.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| ProviderError(format!("Compute API request failed: {}", err)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError(format!("Compute API returned {}: {}", status, body)));
        }

        response
            .json::<T>()
            .await
            .map_err(|err| ProviderError(format!("Invalid Compute API response: {}", err)))
    }

    async fn power(
        &self,
        instance: &CloudInstance,
        action: PowerAction,
    ) -> Result<OperationHandle, ProviderError> {
        let url = format!(
            "{}/instances/{}/{}",
            self.zone_url(&instance.zone),
            instance.name,
            action.as_str()
        );
        log::debug!("POST {}", url);

        let operation: ZoneOperation = self
            .send_json(self.http.post(url).header(CONTENT_LENGTH, "0"))
            .await?;

        Ok(OperationHandle {
            id: operation.name,
            zone: instance.zone.clone(),
            action,
        })
    }
}

#[async_trait]
impl ComputeProvider for GcpComputeClient {
    async fn list_instances(&self, labels: &str) -> Result<Vec<CloudInstance>, ProviderError> {
        let url = format!(
            "{}/projects/{}/aggregated/instances",
            self.endpoint, self.project
        );
        let filter = label_filter(labels);
        let mut instances = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.http.get(&url).query(&[("filter", filter.as_str())]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            log::debug!("GET {} filter={}", url, filter);

            let page: AggregatedInstanceList = self.send_json(request).await?;
            instances.extend(flatten_instances(page.items));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(instances)
    }

    async fn start_instance(
        &self,
        instance: &CloudInstance,
    ) -> Result<OperationHandle, ProviderError> {
        self.power(instance, PowerAction::Start).await
    }

    async fn stop_instance(
        &self,
        instance: &CloudInstance,
    ) -> Result<OperationHandle, ProviderError> {
        self.power(instance, PowerAction::Stop).await
    }

    async fn wait_for_operation(&self, operation: &OperationHandle) -> Result<(), ProviderError> {
        let url = format!(
            "{}/operations/{}/wait",
            self.zone_url(&operation.zone),
            operation.id
        );

        // The wait call returns early (roughly every two minutes) while the operation is pending.
        loop {
            log::debug!("POST {}", url);
            let result: ZoneOperation = self
                .send_json(self.http.post(&url).header(CONTENT_LENGTH, "0"))
                .await?;

            if result.status == "DONE" {
                return operation_outcome(result);
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

pub fn label_filter(labels: &str) -> String {
    format!("labels.{}", labels)
}

/// `https://.../zones/us-central1-a` -> `us-central1-a`
pub fn zone_name(zone_url: &str) -> &str {
    zone_url.rsplit('/').next().unwrap_or(zone_url)
}

fn flatten_instances(items: BTreeMap<String, InstancesScopedList>) -> Vec<CloudInstance> {
    items
        .into_values()
        .flat_map(|scoped| scoped.instances)
        .map(|instance| CloudInstance {
            zone: zone_name(&instance.zone).to_string(),
            name: instance.name,
        })
        .collect()
}

fn operation_outcome(operation: ZoneOperation) -> Result<(), ProviderError> {
    let errors = match operation.error {
        Some(error) if !error.errors.is_empty() => error.errors,
        _ => return Ok(()),
    };

    let messages: Vec<String> = errors
        .into_iter()
        .map(|entry| match (entry.code, entry.message) {
            (Some(code), Some(message)) => format!("{}: {}", code, message),
            (None, Some(message)) => message,
            (Some(code), None) => code,
            (None, None) => "unknown error".to_string(),
        })
        .collect();

    Err(ProviderError(format!(
        "Operation {} failed: {}",
        operation.name,
        messages.join("; ")
    )))
}

async fn fetch_metadata_text(
    http: &Client,
    metadata_url: &str,
    path: &str,
) -> Result<String, ProviderError> {
    let response = http
        .get(format!("{}/{}", metadata_url, path))
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .map_err(|err| ProviderError(format!("Metadata server unreachable: {}", err)))?;

    if !response.status().is_success() {
        return Err(ProviderError(format!(
            "Metadata server returned {} for {}",
            response.status(),
            path
        )));
    }

    response
        .text()
        .await
        .map_err(|err| ProviderError(format!("Failed to read metadata response: {}", err)))
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
