use super::HealthChecker;
use crate::error::Result;
use crate::runtime::{ContainerRuntime, ContainerStatus, RuntimeHealth};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Trusts the container runtime's own healthcheck. Containers without one
/// count as healthy while running.
pub struct RuntimeHealthChecker {
    runtime: Arc<dyn ContainerRuntime>,
    service: String,
    timeout: Duration,
}

impl RuntimeHealthChecker {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, service: impl Into<String>, timeout: Duration) -> Self {
        Self {
            runtime,
            service: service.into(),
            timeout,
        }
    }
}

#[async_trait]
impl HealthChecker for RuntimeHealthChecker {
    async fn check(&self) -> Result<bool> {
        match self.runtime.health(&self.service).await? {
            RuntimeHealth::Healthy => Ok(true),
            RuntimeHealth::Unhealthy | RuntimeHealth::Starting => Ok(false),
            RuntimeHealth::None => {
                Ok(self.runtime.status(&self.service).await? == ContainerStatus::Running)
            }
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
