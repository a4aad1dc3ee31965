use async_trait::async_trait;
use rusoto_core::HttpClient;
use rusoto_credential::ChainProvider;
use rusoto_ec2::{
    DescribeInstancesRequest, Ec2, Ec2Client, Filter, Instance, StartInstancesRequest,
    StopInstancesRequest,
};
use rusoto_signature::Region;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::sleep;

use crate::{
    cloud_provider::{CloudInstance, ComputeProvider, OperationHandle, PowerAction, ProviderError},
    config::Config,
};

// Instances in these states can still be started or stopped.
const LIVE_STATES: [&str; 4] = ["pending", "running", "stopping", "stopped"];

pub struct Ec2ComputeClient {
    client: Ec2Client,
    poll_interval: Duration,
}

impl Ec2ComputeClient {
    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let region = Region::from_str(&config.aws_region)
            .map_err(|err| ProviderError(format!("Invalid AWS region: {:?}", err)))?;
        let http_client = HttpClient::new()
            .map_err(|err| ProviderError(format!("Failed to create HTTP client: {:?}", err)))?;

        Ok(Self {
            client: Ec2Client::new_with(http_client, ChainProvider::new(), region),
            poll_interval: config.poll_interval,
        })
    }

    async fn instance_state(&self, instance_id: &str) -> Result<String, ProviderError> {
        let describe_instances_req = DescribeInstancesRequest {
            instance_ids: Some(vec![instance_id.to_string()]),
            ..Default::default()
        };

        let result = self
            .client
            .describe_instances(describe_instances_req)
            .await
            .map_err(|err| ProviderError(format!("Error describing instance: {:?}", err)))?;

        result
            .reservations
            .unwrap_or_default()
            .into_iter()
            .flat_map(|reservation| reservation.instances.unwrap_or_default())
            .find(|instance| instance.instance_id.as_deref() == Some(instance_id))
            .and_then(|instance| instance.state.and_then(|state| state.name))
            .ok_or_else(|| ProviderError(format!("Instance {} not found", instance_id)))
    }
}

#[async_trait]
impl ComputeProvider for Ec2ComputeClient {
    async fn list_instances(&self, labels: &str) -> Result<Vec<CloudInstance>, ProviderError> {
        let filters = tag_filters(labels);
        let mut instances = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let describe_instances_req = DescribeInstancesRequest {
                filters: Some(filters.clone()),
                next_token: next_token.clone(),
                ..Default::default()
            };
            log::debug!("DescribeInstances labels={}", labels);

            let result = self
                .client
                .describe_instances(describe_instances_req)
                .await
                .map_err(|err| ProviderError(format!("Error listing instances: {:?}", err)))?;

            for reservation in result.reservations.unwrap_or_default() {
                instances.extend(
                    reservation
                        .instances
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(to_cloud_instance),
                );
            }

            match result.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        Ok(instances)
    }

    async fn start_instance(
        &self,
        instance: &CloudInstance,
    ) -> Result<OperationHandle, ProviderError> {
        let start_instances_req = StartInstancesRequest {
            instance_ids: vec![instance.name.clone()],
            ..Default::default()
        };
        log::debug!("StartInstances {}", instance.name);

        self.client
            .start_instances(start_instances_req)
            .await
            .map_err(|err| ProviderError(format!("Error starting instance: {:?}", err)))?;

        Ok(OperationHandle {
            id: instance.name.clone(),
            zone: instance.zone.clone(),
            action: PowerAction::Start,
        })
    }

    async fn stop_instance(
        &self,
        instance: &CloudInstance,
    ) -> Result<OperationHandle, ProviderError> {
        let stop_instances_req = StopInstancesRequest {
            instance_ids: vec![instance.name.clone()],
            ..Default::default()
        };
        log::debug!("StopInstances {}", instance.name);

        self.client
            .stop_instances(stop_instances_req)
            .await
            .map_err(|err| ProviderError(format!("Error stopping instance: {:?}", err)))?;

        Ok(OperationHandle {
            id: instance.name.clone(),
            zone: instance.zone.clone(),
            action: PowerAction::Stop,
        })
    }

    async fn wait_for_operation(&self, operation: &OperationHandle) -> Result<(), ProviderError> {
        let target = target_state(operation.action);

        loop {
            let state = self.instance_state(&operation.id).await?;
            if state == target {
                return Ok(());
            }
            if state == "terminated" {
                return Err(ProviderError(format!(
                    "Instance {} was terminated before reaching {}",
                    operation.id, target
                )));
            }

            sleep(self.poll_interval).await;
        }
    }
}

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

/// `env=prod` matches tag `env` with value `prod`; a bare `env` matches any instance carrying the tag.
pub fn tag_filters(labels: &str) -> Vec<Filter> {
    let tag_filter = match labels.split_once('=') {
        Some((key, value)) => Filter {
            name: Some(format!("tag:{}", key)),
            values: Some(vec![value.to_string()]),
        },
        None => Filter {
            name: Some("tag-key".to_string()),
            values: Some(vec![labels.to_string()]),
        },
    };

    vec![
        tag_filter,
        Filter {
            name: Some("instance-state-name".to_string()),
            values: Some(LIVE_STATES.iter().map(|s| s.to_string()).collect()),
        },
    ]
}

pub fn target_state(action: PowerAction) -> &'static str {
    match action {
        PowerAction::Start => "running",
        PowerAction::Stop => "stopped",
    }
}

fn to_cloud_instance(instance: Instance) -> Option<CloudInstance> {
    let zone = instance
        .placement
        .and_then(|placement| placement.availability_zone)
        .unwrap_or_default();

    instance
        .instance_id
        .map(|name| CloudInstance { name, zone })
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
