use crate::compose::{generate, CompositionInput};
use crate::dependency::{DependencyGraph, Engine, Node, NodeKind};
use crate::error::{Error, Result};
use crate::healthcheck::{HealthPolicy, HttpChecker, RuntimeHealthChecker};
use crate::orchestrator::{HealthGate, NodeLauncher};
use crate::provision::Provisioner;
use crate::resolve::{IdentityTable, OutputsTable, ResolvedEnvironment, Resolver, SecretStore};
use crate::runtime::{ContainerRuntime, ContainerStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Drives one `up` run against the container runtime and provisioner.
pub(super) struct StackLauncher<'a> {
    pub project: &'a str,
    pub graph: &'a DependencyGraph,
    pub identities: &'a IdentityTable,
    pub outputs: &'a OutputsTable,
    pub secrets: &'a dyn SecretStore,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub provisioner: Provisioner,
    pub compose_path: &'a Path,
    pub engine_health: HealthPolicy,
    pub cancel: CancellationToken,
    /// Environments resolved so far; services are added as they start.
    pub environments: Mutex<BTreeMap<String, ResolvedEnvironment>>,
    /// Serializes rewrites of the composition document.
    pub write_lock: tokio::sync::Mutex<()>,
}

impl StackLauncher<'_> {
    fn resolver(&self) -> Resolver<'_> {
        Resolver::new(self.graph, self.identities, self.outputs)
    }

    /// Regenerate the document from the current environments and write it.
    pub async fn write_composition(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let environments = self.environments.lock().clone();
        let document = generate(&CompositionInput {
            project: self.project,
            graph: self.graph,
            identities: self.identities,
            environments: &environments,
            secrets: self.secrets,
            engine_health: self.engine_health,
        });
        document.write(self.compose_path)
    }

    fn identity_of(&self, node: &Node) -> Result<crate::resolve::Identity> {
        self.identities.for_node(node).ok_or_else(|| Error::Provisioning {
            node: node.id.clone(),
            reason: "no identity assigned".to_string(),
        })
    }
}

#[async_trait]
impl NodeLauncher for StackLauncher<'_> {
    async fn prepare(&self, node: &Node) -> Result<()> {
        if !node.is_service() {
            return Ok(());
        }
        let environment = self.resolver().resolve_service(&node.id, self.secrets)?;
        self.environments.lock().insert(node.id.clone(), environment);
        self.write_composition().await
    }

    async fn provision(&self, node: &Node) -> Result<Vec<Error>> {
        let identity = self.identity_of(node)?;
        let report = self
            .provisioner
            .provision(node, &identity, &self.resolver())
            .await?;
        self.outputs.insert(&node.id, report.outputs);
        Ok(report.warnings)
    }

    async fn start(&self, node: &Node) -> Result<()> {
        Ok(self.runtime.start(&node.container_key()).await?)
    }

    async fn has_exited(&self, node: &Node) -> Result<bool> {
        Ok(self.runtime.status(&node.container_key()).await? == ContainerStatus::Exited)
    }

    fn health_gate(&self, node: &Node) -> Option<HealthGate> {
        match &node.kind {
            NodeKind::Service => {
                let health = self.graph.manifest(&node.id)?.service.health.as_ref()?;
                let identity = self.identities.get(&node.id)?;
                let checker = match HttpChecker::for_port(identity.port, &health.path, health.timeout()) {
                    Ok(checker) => checker,
                    Err(e) => {
                        tracing::warn!(node = %node.id, error = %e, "Invalid health path, skipping health check");
                        return None;
                    }
                };
                Some(HealthGate {
                    checker: Arc::new(checker),
                    policy: HealthPolicy {
                        interval: health.interval(),
                        timeout: health.timeout(),
                        retries: health.retries(),
                    },
                })
            }
            NodeKind::Engine(_) => Some(HealthGate {
                checker: Arc::new(RuntimeHealthChecker::new(
                    self.runtime.clone(),
                    node.container_key(),
                    self.engine_health.timeout,
                )),
                policy: self.engine_health,
            }),
            NodeKind::Resource(_) => None,
        }
    }

    async fn settle(&self, node: &Node) -> Result<()> {
        if node.kind != NodeKind::Engine(Engine::Tunnel) {
            return Ok(());
        }
        let identity = self.identity_of(node)?;
        let outputs = self
            .provisioner
            .provision_tunnel(&identity, &self.engine_health, &self.cancel)
            .await?;
        self.outputs.insert(&node.id, outputs);
        Ok(())
    }
}
