use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::cloud_provider::{
    CloudInstance, ComputeProvider, OperationHandle, PowerAction, ProviderError,
};

pub fn encode_payload(json: &str) -> String {
    general_purpose::STANDARD.encode(json)
}

#[derive(Debug, Clone, PartialEq)]
pub enum StubCall {
    List(String),
    Power(PowerAction, String),
    Wait(String),
}

/// In-memory provider that records every call made against it.
#[derive(Default)]
pub struct StubProvider {
    instances: HashMap<String, Vec<CloudInstance>>,
    list_error: Option<String>,
    power_errors: HashMap<String, String>,
    wait_errors: HashMap<String, String>,
    calls: Mutex<Vec<StubCall>>,
}

impl StubProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instances(mut self, labels: &str, instances: &[(&str, &str)]) -> Self {
        self.instances.insert(
            labels.to_string(),
            instances
                .iter()
                .map(|(name, zone)| CloudInstance {
                    name: name.to_string(),
                    zone: zone.to_string(),
                })
                .collect(),
        );
        self
    }

    pub fn failing_list(mut self, message: &str) -> Self {
        self.list_error = Some(message.to_string());
        self
    }

    pub fn failing_power(mut self, name: &str, message: &str) -> Self {
        self.power_errors.insert(name.to_string(), message.to_string());
        self
    }

    pub fn failing_wait(mut self, name: &str, message: &str) -> Self {
        self.wait_errors.insert(name.to_string(), message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<StubCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn powered(&self, action: PowerAction) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StubCall::Power(a, name) if a == action => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn waited(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StubCall::Wait(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: StubCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn power(
        &self,
        instance: &CloudInstance,
        action: PowerAction,
    ) -> Result<OperationHandle, ProviderError> {
        self.record(StubCall::Power(action, instance.name.clone()));
        if let Some(message) = self.power_errors.get(&instance.name) {
            return Err(ProviderError(message.clone()));
        }

        Ok(OperationHandle {
            id: instance.name.clone(),
            zone: instance.zone.clone(),
            action,
        })
    }
}

#[async_trait]
impl ComputeProvider for StubProvider {
    async fn list_instances(&self, labels: &str) -> Result<Vec<CloudInstance>, ProviderError> {
        self.record(StubCall::List(labels.to_string()));
        if let Some(message) = &self.list_error {
            return Err(ProviderError(message.clone()));
        }

        Ok(self.instances.get(labels).cloned().unwrap_or_default())
    }

    async fn start_instance(
        &self,
        instance: &CloudInstance,
    ) -> Result<OperationHandle, ProviderError> {
        self.power(instance, PowerAction::Start)
    }

    async fn stop_instance(
        &self,
        instance: &CloudInstance,
    ) -> Result<OperationHandle, ProviderError> {
        self.power(instance, PowerAction::Stop)
    }

    async fn wait_for_operation(&self, operation: &OperationHandle) -> Result<(), ProviderError> {
        self.record(StubCall::Wait(operation.id.clone()));
        match self.wait_errors.get(&operation.id) {
            Some(message) => Err(ProviderError(message.clone())),
            None => Ok(()),
        }
    }
}
