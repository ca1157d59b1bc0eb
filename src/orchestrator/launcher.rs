use crate::dependency::Node;
use crate::error::{Error, Result};
use crate::healthcheck::{HealthChecker, HealthPolicy};
use async_trait::async_trait;
use std::sync::Arc;

/// How a container node is polled for health.
#[derive(Clone)]
pub struct HealthGate {
    pub checker: Arc<dyn HealthChecker>,
    pub policy: HealthPolicy,
}

/// The side effects the orchestrator drives for each node. The stack
/// pipeline implements this over the container runtime and provisioner;
/// tests substitute scripted fakes.
#[async_trait]
pub trait NodeLauncher: Send + Sync {
    /// Resolve the node's inputs once its dependencies are healthy. For
    /// services this substitutes the environment and finalizes the
    /// composition entry.
    async fn prepare(&self, node: &Node) -> Result<()>;

    /// Create a resource node's resources. Returned errors in the `Ok`
    /// variant are warnings.
    async fn provision(&self, node: &Node) -> Result<Vec<Error>>;

    async fn start(&self, node: &Node) -> Result<()>;

    /// Whether the container already exited.
    async fn has_exited(&self, node: &Node) -> Result<bool>;

    /// `None` when the node has no health descriptor.
    fn health_gate(&self, node: &Node) -> Option<HealthGate>;

    /// Work that needs the container healthy, e.g. reading the tunnel URL.
    async fn settle(&self, _node: &Node) -> Result<()> {
        Ok(())
    }
}
