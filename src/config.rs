use anyhow::{anyhow, Context};
use std::time::Duration;

use crate::cloud_provider::{CloudProvider, PowerAction};

pub const DEFAULT_COMPUTE_ENDPOINT: &str = "https://compute.googleapis.com/compute/v1";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    pub cloud_provider: CloudProvider,
    pub function_target: Option<PowerAction>,
    pub gcp_project: Option<String>,
    pub gcp_compute_endpoint: String,
    pub gcp_access_token: Option<String>,
    pub aws_region: String,
    pub poll_interval: Duration,
}

impl Config {
    /// Reads the process environment, after loading `.env` if there is one.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| dotenvy::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let port = match var("PORT") {
            Some(port) => port
                .parse::<u16>()
                .with_context(|| format!("Invalid PORT: {}", port))?,
            None => 8080,
        };

        let cloud_provider = match var("CLOUD_PROVIDER") {
            Some(provider) => {
                CloudProvider::try_from(provider.to_lowercase().as_str()).map_err(|e| anyhow!(e))?
            }
            None => CloudProvider::GCP,
        };

        let function_target = var("FUNCTION_TARGET")
            .map(|target| PowerAction::try_from(target.as_str()).map_err(|e| anyhow!(e)))
            .transpose()?;

        let poll_interval = match var("OPERATION_POLL_INTERVAL_SECS") {
            Some(secs) => Duration::from_secs(
                secs.parse::<u64>()
                    .with_context(|| format!("Invalid OPERATION_POLL_INTERVAL_SECS: {}", secs))?,
            ),
            None => Duration::from_secs(3),
        };

        Ok(Config {
            bind_address: var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            cloud_provider,
            function_target,
            gcp_project: var("GCP_PROJECT").or_else(|| var("GOOGLE_CLOUD_PROJECT")),
            gcp_compute_endpoint: var("GCP_COMPUTE_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_COMPUTE_ENDPOINT.to_string()),
            gcp_access_token: var("GOOGLE_OAUTH_ACCESS_TOKEN"),
            aws_region: var("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            poll_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.cloud_provider, CloudProvider::GCP);
        assert_eq!(config.function_target, None);
        assert_eq!(config.gcp_project, None);
        assert_eq!(config.gcp_compute_endpoint, DEFAULT_COMPUTE_ENDPOINT);
        assert_eq!(config.aws_region, "us-east-1");
        assert_eq!(config.poll_interval, Duration::from_secs(3));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("PORT", "9000"),
            ("CLOUD_PROVIDER", "AWS"),
            ("FUNCTION_TARGET", "stopInstance"),
            ("GOOGLE_CLOUD_PROJECT", "fallback-project"),
            ("AWS_REGION", "eu-west-1"),
            ("OPERATION_POLL_INTERVAL_SECS", "10"),
        ])
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.cloud_provider, CloudProvider::AWS);
        assert_eq!(config.function_target, Some(PowerAction::Stop));
        assert_eq!(config.gcp_project.as_deref(), Some("fallback-project"));
        assert_eq!(config.aws_region, "eu-west-1");
        assert_eq!(config.poll_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_gcp_project_takes_precedence() {
        let config = config_from(&[
            ("GCP_PROJECT", "primary"),
            ("GOOGLE_CLOUD_PROJECT", "fallback-project"),
        ])
        .unwrap();

        assert_eq!(config.gcp_project.as_deref(), Some("primary"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(config_from(&[("PORT", "http")]).is_err());
        assert!(config_from(&[("CLOUD_PROVIDER", "azure")]).is_err());
        assert!(config_from(&[("FUNCTION_TARGET", "resetInstance")]).is_err());
        assert!(config_from(&[("OPERATION_POLL_INTERVAL_SECS", "-1")]).is_err());
    }
}
