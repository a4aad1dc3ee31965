use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::{aws::Ec2ComputeClient, config::Config, gcp::GcpComputeClient};

// -----------------------------------------------------------------------------
// Models
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CloudInstance {
    pub name: String,
    pub zone: String,
}

/// Awaitable handle for a start/stop call that the provider is still working on.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationHandle {
    pub id: String,
    pub zone: String,
    pub action: PowerAction,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum CloudProvider {
    AWS,
    GCP,
}

impl CloudProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudProvider::AWS => "aws",
            CloudProvider::GCP => "gcp",
        }
    }
}

impl TryFrom<&str> for CloudProvider {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "aws" => Ok(CloudProvider::AWS),
            "gcp" => Ok(CloudProvider::GCP),
            _ => Err(format!("Invalid CloudProvider: {}", value)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Start,
    Stop,
}

impl PowerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerAction::Start => "start",
            PowerAction::Stop => "stop",
        }
    }

    /// Name the handler is deployed under.
    pub fn function_name(&self) -> &'static str {
        match self {
            PowerAction::Start => "startInstance",
            PowerAction::Stop => "stopInstance",
        }
    }

    pub fn success_message(&self) -> &'static str {
        match self {
            PowerAction::Start => "Successfully started instance(s)",
            PowerAction::Stop => "Successfully stopped instance(s)",
        }
    }
}

impl TryFrom<&str> for PowerAction {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "startInstance" => Ok(PowerAction::Start),
            "stopInstance" => Ok(PowerAction::Stop),
            _ => Err(format!("Invalid function target: {}", value)),
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct ProviderError(pub String);

impl Error for ProviderError {}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// -----------------------------------------------------------------------------
// Provider
// -----------------------------------------------------------------------------

#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Every instance matched by one `labels` entry of the request.
    async fn list_instances(&self, labels: &str) -> Result<Vec<CloudInstance>, ProviderError>;

    async fn start_instance(
        &self,
        instance: &CloudInstance,
    ) -> Result<OperationHandle, ProviderError>;

    async fn stop_instance(
        &self,
        instance: &CloudInstance,
    ) -> Result<OperationHandle, ProviderError>;

    /// Resolves once the operation is finished, failing if it finished with an error.
    async fn wait_for_operation(&self, operation: &OperationHandle) -> Result<(), ProviderError>;
}

pub async fn build_provider(config: &Config) -> anyhow::Result<Arc<dyn ComputeProvider>> {
    let provider: Arc<dyn ComputeProvider> = match config.cloud_provider {
        CloudProvider::GCP => Arc::new(GcpComputeClient::from_config(config).await?),
        CloudProvider::AWS => Arc::new(Ec2ComputeClient::from_config(config)?),
    };

    log::info!("Using {} compute provider", config.cloud_provider.as_str());
    Ok(provider)
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloud_provider_from_str() {
        assert_eq!(CloudProvider::try_from("gcp"), Ok(CloudProvider::GCP));
        assert_eq!(CloudProvider::try_from("aws"), Ok(CloudProvider::AWS));
        assert!(CloudProvider::try_from("azure").is_err());
    }

    #[test]
    fn test_power_action_from_function_target() {
        assert_eq!(PowerAction::try_from("startInstance"), Ok(PowerAction::Start));
        assert_eq!(PowerAction::try_from("stopInstance"), Ok(PowerAction::Stop));
        assert_eq!(
            PowerAction::try_from("restartInstance"),
            Err("Invalid function target: restartInstance".to_string())
        );
    }

    #[test]
    fn test_function_name_round_trips() {
        for action in [PowerAction::Start, PowerAction::Stop] {
            assert_eq!(PowerAction::try_from(action.function_name()), Ok(action));
        }
    }
}
