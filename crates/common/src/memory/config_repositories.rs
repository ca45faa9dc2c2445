use crate::domain::{
    DomainResult, EndpointConfig, EndpointConfigRepository, TimeoutPolicy,
    TimeoutPolicyRepository,
};
use async_trait::async_trait;
use tokio::sync::RwLock;

/// In-memory holder for the singleton endpoint configuration.
#[derive(Default)]
pub struct InMemoryEndpointConfigRepository {
    config: RwLock<Option<EndpointConfig>>,
}

impl InMemoryEndpointConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EndpointConfig) -> Self {
        Self {
            config: RwLock::new(Some(config)),
        }
    }
}

#[async_trait]
impl EndpointConfigRepository for InMemoryEndpointConfigRepository {
    async fn get_endpoint_config(&self) -> DomainResult<Option<EndpointConfig>> {
        Ok(self.config.read().await.clone())
    }

    async fn upsert_endpoint_config(&self, config: &EndpointConfig) -> DomainResult<()> {
        *self.config.write().await = Some(config.clone());
        Ok(())
    }
}

/// In-memory holder for the singleton timeout policy.
#[derive(Default)]
pub struct InMemoryTimeoutPolicyRepository {
    policy: RwLock<Option<TimeoutPolicy>>,
}

impl InMemoryTimeoutPolicyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: TimeoutPolicy) -> Self {
        Self {
            policy: RwLock::new(Some(policy)),
        }
    }
}

#[async_trait]
impl TimeoutPolicyRepository for InMemoryTimeoutPolicyRepository {
    async fn get_timeout_policy(&self) -> DomainResult<Option<TimeoutPolicy>> {
        Ok(self.policy.read().await.clone())
    }

    async fn upsert_timeout_policy(&self, policy: &TimeoutPolicy) -> DomainResult<()> {
        *self.policy.write().await = Some(policy.clone());
        Ok(())
    }
}
