//! The `up`, `down`, `restart`, `reset`, `status` and `logs` pipelines.

mod launcher;

use crate::compose::generate;
use crate::compose::CompositionInput;
use crate::config::{ManifestSource, Registry};
use crate::dependency::{build_graph, BuildOptions, DependencyGraph, Engine, NodeKind};
use crate::error::{Error, Result};
use crate::healthcheck::HealthPolicy;
use crate::orchestrator::{Orchestrator, UpReport};
use crate::provision::{describe, DockerExecBackend, InfraBackend, Provisioner};
use crate::resolve::{
    assign_identities, container_name, Identity, IdentityTable, OutputsTable, PortAllocator,
    ResolvedEnvironment, Resolver, SecretStore,
};
use crate::runtime::{ContainerRuntime, LogStream, RuntimeHealth};
use launcher::StackLauncher;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpOptions {
    /// Services to bring up; empty means every registered service.
    pub services: Vec<String>,
    pub no_deps: bool,
    pub infra_only: bool,
}

impl UpOptions {
    fn build_options(&self) -> BuildOptions {
        BuildOptions {
            no_deps: self.no_deps,
            infra_only: self.infra_only,
        }
    }
}

/// Result of `up`: per-node states plus what is needed to report them.
#[derive(Debug, Clone)]
pub struct UpSummary {
    pub report: UpReport,
    pub requested: BTreeSet<String>,
    pub identities: BTreeMap<String, Identity>,
}

impl UpSummary {
    /// `Ok` when every requested service became healthy.
    pub fn outcome(&self) -> Result<()> {
        self.report.outcome(&self.requested)
    }
}

/// One line of `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub node: String,
    pub kind: &'static str,
    pub container: String,
    pub status: String,
    pub health: Option<String>,
    pub port: Option<u16>,
}

pub struct Stack {
    registry: Registry,
    runtime: Arc<dyn ContainerRuntime>,
    secrets: Arc<dyn SecretStore>,
    backend: Option<Arc<dyn InfraBackend>>,
    cancel: CancellationToken,
}

impl Stack {
    pub fn new(
        registry: Registry,
        runtime: Arc<dyn ContainerRuntime>,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            registry,
            runtime,
            secrets,
            backend: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Provision through this backend instead of exec'ing into the engines.
    pub fn with_backend(mut self, backend: Arc<dyn InfraBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn project(&self) -> &str {
        self.registry.settings.project()
    }

    pub fn compose_path(&self) -> PathBuf {
        self.registry.compose_path()
    }

    fn engine_health(&self) -> HealthPolicy {
        let settings = &self.registry.settings;
        HealthPolicy {
            interval: settings.engine_interval(),
            timeout: settings.engine_timeout(),
            retries: settings.engine_retries(),
        }
    }

    /// Graph construction and the static checks. Nothing here touches the
    /// container runtime.
    fn load(&self, options: &UpOptions) -> Result<DependencyGraph> {
        let graph = build_graph(&options.services, &self.registry, options.build_options())?;
        let identities = IdentityTable::new();
        let outputs = OutputsTable::new();
        Resolver::new(&graph, &identities, &outputs).check(self.secrets.as_ref())?;
        Ok(graph)
    }

    fn backend_for(&self, graph: &DependencyGraph, identities: &IdentityTable) -> Arc<dyn InfraBackend> {
        if let Some(backend) = &self.backend {
            return backend.clone();
        }
        let ports: BTreeMap<Engine, u16> = graph
            .nodes()
            .filter_map(|node| match node.kind {
                NodeKind::Engine(engine) => identities.get(&node.id).map(|i| (engine, i.port)),
                _ => None,
            })
            .collect();
        Arc::new(DockerExecBackend::new(self.runtime.clone(), ports))
    }

    /// Bring the graph up and health-gate it.
    pub async fn up(&self, options: &UpOptions) -> Result<UpSummary> {
        let graph = self.load(options)?;

        let published = self.runtime.published_ports().await?;
        let allocator = PortAllocator::new(self.registry.settings.port_base());
        let identities = assign_identities(&graph, self.project(), &published, &allocator)?;

        let outputs = OutputsTable::new();
        record_unmanaged_outputs(&graph, &identities, &outputs);

        let compose_path = self.compose_path();
        let launcher = StackLauncher {
            project: self.project(),
            graph: &graph,
            identities: &identities,
            outputs: &outputs,
            secrets: self.secrets.as_ref(),
            runtime: self.runtime.clone(),
            provisioner: Provisioner::new(self.backend_for(&graph, &identities)),
            compose_path: &compose_path,
            engine_health: self.engine_health(),
            cancel: self.cancel.clone(),
            environments: Mutex::new(best_effort_environments(
                &graph,
                &identities,
                &outputs,
                self.secrets.as_ref(),
            )),
            write_lock: tokio::sync::Mutex::new(()),
        };
        launcher.write_composition().await?;
        tracing::info!(path = %compose_path.display(), "Wrote composition document");

        // Containers bind the ports from here on.
        allocator.release_listeners();

        let orchestrator = Orchestrator::new(
            self.registry.settings.parallelism(),
            self.registry.settings.level_timeout(),
        )
        .with_cancellation(self.cancel.clone());
        let report = orchestrator.up(&graph, &launcher).await;

        // Pick up outputs that became available late (e.g. the tunnel URL)
        // for services that were not started.
        {
            let mut environments = launcher.environments.lock();
            for (service, env) in
                best_effort_environments(&graph, &identities, &outputs, self.secrets.as_ref())
            {
                environments.entry(service).or_insert(env);
            }
        }
        if let Err(e) = launcher.write_composition().await {
            tracing::warn!(error = %e, "Failed to rewrite composition document");
        }

        Ok(UpSummary {
            report,
            requested: graph.requested().clone(),
            identities: identities.snapshot(),
        })
    }

    /// The composition document `up` would write, without touching the
    /// container runtime.
    pub fn plan(&self, options: &UpOptions) -> Result<String> {
        let graph = self.load(options)?;
        let allocator = PortAllocator::new(self.registry.settings.port_base());
        let identities = assign_identities(&graph, self.project(), &BTreeMap::new(), &allocator)?;
        allocator.release_listeners();

        let outputs = OutputsTable::new();
        for node in graph.nodes().filter(|n| !n.has_container()) {
            if let Some(identity) = identities.for_node(node) {
                outputs.insert(&node.id, describe(node, &identity));
            }
        }
        let environments =
            best_effort_environments(&graph, &identities, &outputs, self.secrets.as_ref());
        generate(&CompositionInput {
            project: self.project(),
            graph: &graph,
            identities: &identities,
            environments: &environments,
            secrets: self.secrets.as_ref(),
            engine_health: self.engine_health(),
        })
        .to_yaml()
    }

    /// Stop every container of the project. Containers, network and volumes stay.
    pub async fn down(&self) -> Result<()> {
        self.runtime.stop_all().await?;
        tracing::info!(project = %self.project(), "Stopped all containers");
        Ok(())
    }

    /// Remove containers and the network; named volumes only with `remove_volumes`.
    pub async fn reset(&self, remove_volumes: bool) -> Result<()> {
        self.runtime.down(remove_volumes).await?;
        if remove_volumes {
            tracing::info!(project = %self.project(), "Removed containers, network and volumes");
        } else {
            tracing::info!(project = %self.project(), "Removed containers and network, kept volumes");
        }
        Ok(())
    }

    /// Stop the named services (every registered service when empty) and
    /// bring them back without restarting the services they require.
    pub async fn restart(&self, services: &[String]) -> Result<UpSummary> {
        let names: Vec<String> = if services.is_empty() {
            self.registry.service_names()
        } else {
            services.to_vec()
        };
        for name in &names {
            if self.registry.manifest_path(name).is_none() {
                return Err(Error::UnknownService {
                    name: name.clone(),
                    referenced_by: None,
                });
            }
        }

        for name in &names {
            tracing::info!(service = %name, "Stopping");
            self.runtime.stop(name).await?;
        }
        self.up(&UpOptions {
            services: names,
            no_deps: true,
            infra_only: false,
        })
        .await
    }

    /// Runtime status of every container node of the registry's graph.
    pub async fn status(&self) -> Result<Vec<StatusEntry>> {
        let graph = build_graph(&[], &self.registry, BuildOptions::default())?;
        let published = self.runtime.published_ports().await?;

        let mut entries = Vec::new();
        for node in graph.nodes().filter(|n| n.has_container()) {
            let key = node.container_key();
            let container = container_name(self.project(), node);
            let status = self.runtime.status(&key).await?;
            let health = match self.runtime.health(&key).await? {
                RuntimeHealth::None => None,
                RuntimeHealth::Healthy => Some("healthy".to_string()),
                RuntimeHealth::Unhealthy => Some("unhealthy".to_string()),
                RuntimeHealth::Starting => Some("starting".to_string()),
            };
            entries.push(StatusEntry {
                node: node.id.clone(),
                kind: if node.is_service() { "service" } else { "infrastructure" },
                port: published.get(&container).copied(),
                container,
                status: status.to_string(),
                health,
            });
        }
        Ok(entries)
    }

    /// Output of one service or engine, or of the whole project.
    pub async fn logs(&self, node: Option<&str>, follow: bool, tail: Option<usize>) -> Result<LogStream> {
        if let Some(name) = node {
            let known = self.registry.manifest_path(name).is_some()
                || Engine::ALL.iter().any(|e| e.id() == name);
            if !known {
                return Err(Error::UnknownService {
                    name: name.to_string(),
                    referenced_by: None,
                });
            }
        }
        Ok(self.runtime.logs(node, follow, tail).await?)
    }
}

/// Nodes outside the start set are assumed to exist already; their outputs
/// are derived from the declarations so references to them still resolve.
fn record_unmanaged_outputs(graph: &DependencyGraph, identities: &IdentityTable, outputs: &OutputsTable) {
    for node in graph.nodes() {
        if node.has_container() || graph.is_managed(&node.id) {
            continue;
        }
        if let Some(identity) = identities.for_node(node) {
            outputs.insert(&node.id, describe(node, &identity));
        }
    }
}

/// Environments of the services whose references already resolve.
fn best_effort_environments(
    graph: &DependencyGraph,
    identities: &IdentityTable,
    outputs: &OutputsTable,
    secrets: &dyn SecretStore,
) -> BTreeMap<String, ResolvedEnvironment> {
    let resolver = Resolver::new(graph, identities, outputs);
    graph
        .manifests()
        .filter_map(|m| {
            resolver
                .resolve_service(m.name(), secrets)
                .ok()
                .map(|env| (m.name().to_string(), env))
        })
        .collect()
}
