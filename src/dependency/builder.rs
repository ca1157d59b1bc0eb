//! Expands requested service names into the full node and edge set.

use super::graph::Graph;
use super::node::{resource_id, Engine, Node, NodeKind};
use crate::config::validation::validate_manifest;
use crate::config::{InfraKind, InfrastructureRequirement, ManifestSource, ServiceManifest};
use crate::error::{Error, Result};
use crate::resolve::template;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Which part of the graph `up` is allowed to start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Do not start required services; the requested services and their own
    /// infrastructure are still managed.
    pub no_deps: bool,
    /// Only start and provision infrastructure.
    pub infra_only: bool,
}

/// The resolved dependency graph for one invocation.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: Graph,
    nodes: BTreeMap<String, Node>,
    manifests: BTreeMap<String, ServiceManifest>,
    /// Merged configuration of singleton engines (cache, tunnel).
    singletons: BTreeMap<Engine, InfrastructureRequirement>,
    requested: BTreeSet<String>,
    managed: BTreeSet<String>,
    levels: Vec<Vec<String>>,
}

impl DependencyGraph {
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// All nodes, sorted by identifier.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn manifest(&self, service: &str) -> Option<&ServiceManifest> {
        self.manifests.get(service)
    }

    pub fn manifests(&self) -> impl Iterator<Item = &ServiceManifest> {
        self.manifests.values()
    }

    pub fn singleton(&self, engine: Engine) -> Option<&InfrastructureRequirement> {
        self.singletons.get(&engine)
    }

    /// Services named on the command line (every registered service when
    /// none were named).
    pub fn requested(&self) -> &BTreeSet<String> {
        &self.requested
    }

    /// Nodes this invocation starts or provisions. Everything else is
    /// treated as already satisfied.
    pub fn is_managed(&self, id: &str) -> bool {
        self.managed.contains(id)
    }

    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    /// Resource nodes of `kind` declared by `service`.
    pub fn declared_resources(&self, service: &str, kind: InfraKind) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|n| {
                n.declared_by.contains(service)
                    && n.requirement().is_some_and(|r| r.kind() == kind)
            })
            .collect()
    }

    /// Every resource node of `kind` in the graph.
    pub fn resources_of_kind(&self, kind: InfraKind) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|n| n.requirement().is_some_and(|r| r.kind() == kind))
            .collect()
    }

    /// Whether `service` declared any requirement of `kind`.
    pub fn declares_kind(&self, service: &str, kind: InfraKind) -> bool {
        self.manifests
            .get(service)
            .is_some_and(|m| m.infrastructure().iter().any(|r| r.kind() == kind))
    }

    /// Whether `dependency` is listed in the `requires.services` of `service`.
    pub fn requires_service(&self, service: &str, dependency: &str) -> bool {
        self.manifests
            .get(service)
            .is_some_and(|m| m.requires.services.iter().any(|s| s == dependency))
    }
}

/// Load manifests transitively, deduplicate infrastructure and compute the
/// leveling.
pub fn build_graph(
    requested: &[String],
    source: &dyn ManifestSource,
    options: BuildOptions,
) -> Result<DependencyGraph> {
    let roots: BTreeSet<String> = if requested.is_empty() {
        source.service_names().into_iter().collect()
    } else {
        requested.iter().cloned().collect()
    };

    let manifests = load_transitively(&roots, source)?;

    let mut builder = Builder::default();
    for manifest in manifests.values() {
        builder.add_service(manifest)?;
    }
    builder.link_subscriptions()?;
    builder.check_dead_letter_names()?;
    builder.check_tunnel_target(&manifests)?;

    let levels = builder.graph.levels()?;
    let managed = managed_nodes(&builder, &roots, options);

    tracing::debug!(
        nodes = builder.nodes.len(),
        levels = levels.len(),
        managed = managed.len(),
        "Built dependency graph"
    );

    Ok(DependencyGraph {
        graph: builder.graph,
        nodes: builder.nodes,
        manifests,
        singletons: builder.singletons,
        requested: roots,
        managed,
        levels,
    })
}

fn load_transitively(
    roots: &BTreeSet<String>,
    source: &dyn ManifestSource,
) -> Result<BTreeMap<String, ServiceManifest>> {
    let mut manifests = BTreeMap::new();
    let mut queue: VecDeque<(String, Option<String>)> =
        roots.iter().map(|r| (r.clone(), None)).collect();

    while let Some((name, referenced_by)) = queue.pop_front() {
        if manifests.contains_key(&name) {
            continue;
        }
        let manifest = source
            .load_manifest(&name)?
            .ok_or_else(|| Error::UnknownService {
                name: name.clone(),
                referenced_by: referenced_by.clone(),
            })?;
        if manifest.name() != name {
            return Err(Error::Config(format!(
                "Manifest registered as '{}' declares service '{}'",
                name,
                manifest.name()
            )));
        }
        validate_manifest(&manifest)?;

        for dep in &manifest.requires.services {
            if !manifests.contains_key(dep) {
                queue.push_back((dep.clone(), Some(name.clone())));
            }
        }
        manifests.insert(name, manifest);
    }

    Ok(manifests)
}

#[derive(Default)]
struct Builder {
    graph: Graph,
    nodes: BTreeMap<String, Node>,
    singletons: BTreeMap<Engine, InfrastructureRequirement>,
}

impl Builder {
    fn add_service(&mut self, manifest: &ServiceManifest) -> Result<()> {
        let name = manifest.name().to_string();
        self.insert_node(Node::new(name.clone(), NodeKind::Service));

        for dep in &manifest.requires.services {
            self.add_edge(&name, dep);
        }

        for req in manifest.infrastructure() {
            let engine = Engine::for_kind(req.kind());
            self.insert_node(Node::new(engine.id(), NodeKind::Engine(engine)));
            self.declare(engine.id(), &name);

            match req.resource_name() {
                Some(resource) => {
                    let id = resource_id(req.kind(), resource);
                    match self.nodes.get_mut(&id) {
                        Some(existing) => {
                            let NodeKind::Resource(current) = &mut existing.kind else {
                                return Err(Error::Config(format!(
                                    "Node '{}' is declared with two different kinds",
                                    id
                                )));
                            };
                            current.merge(&req).map_err(|reason| {
                                conflict(&id, &existing.declared_by, &name, &reason)
                            })?;
                        }
                        None => {
                            self.insert_node(Node::new(id.clone(), NodeKind::Resource(req)));
                        }
                    }
                    self.declare(&id, &name);
                    self.add_edge(&id, engine.id());
                    self.add_edge(&name, &id);
                }
                None => {
                    match self.singletons.get_mut(&engine) {
                        Some(current) => {
                            let declared_by = self.nodes[engine.id()].declared_by.clone();
                            current.merge(&req).map_err(|reason| {
                                conflict(engine.id(), &declared_by, &name, &reason)
                            })?;
                        }
                        None => {
                            self.singletons.insert(engine, req);
                        }
                    }
                    self.add_edge(&name, engine.id());
                }
            }
        }

        Ok(())
    }

    /// A topic depends on every queue its subscriptions point at, so the
    /// queue is provisioned (and its ARN known) before the topic.
    fn link_subscriptions(&mut self) -> Result<()> {
        let mut edges = Vec::new();

        for node in self.nodes.values() {
            let Some(InfrastructureRequirement::PubSubTopic { subscriptions, .. }) =
                node.requirement()
            else {
                continue;
            };
            let declarer = node.declared_by.iter().next().cloned().unwrap_or_default();

            for sub in subscriptions {
                let references = template::references(&sub.endpoint).map_err(|e| {
                    Error::UnresolvedReference {
                        service: declarer.clone(),
                        token: sub.endpoint.clone(),
                        reason: e.to_string(),
                    }
                })?;
                for reference in references {
                    if reference.path[0] != InfraKind::Sqs.as_str() || reference.path.len() < 2 {
                        continue;
                    }
                    let queue = resource_id(InfraKind::Sqs, &reference.path[1]);
                    if !self.nodes.contains_key(&queue) {
                        return Err(Error::UnresolvedReference {
                            service: declarer.clone(),
                            token: reference.token.clone(),
                            reason: format!(
                                "queue '{}' is not declared by any service",
                                reference.path[1]
                            ),
                        });
                    }
                    edges.push((node.id.clone(), queue));
                }
            }
        }

        for (topic, queue) in edges {
            self.add_edge(&topic, &queue);
        }
        Ok(())
    }

    /// A queue with `dlq: true` gets a `<name>-dlq` companion; no declared
    /// queue, from any service, may take that name.
    fn check_dead_letter_names(&self) -> Result<()> {
        for node in self.nodes.values() {
            let Some(InfrastructureRequirement::MessageQueue { name, dlq: true }) =
                node.requirement()
            else {
                continue;
            };
            let shadow = resource_id(InfraKind::Sqs, &format!("{}-dlq", name));
            if let Some(other) = self.nodes.get(&shadow) {
                let owner = node.declared_by.iter().next().map(String::as_str).unwrap_or("?");
                let declarer = other.declared_by.iter().next().map(String::as_str).unwrap_or("?");
                return Err(Error::Config(format!(
                    "Queue '{}-dlq' declared by '{}' collides with the dead-letter queue of '{}' declared by '{}'",
                    name, declarer, name, owner
                )));
            }
        }
        Ok(())
    }

    fn check_tunnel_target(&self, manifests: &BTreeMap<String, ServiceManifest>) -> Result<()> {
        if let Some(InfrastructureRequirement::Tunnel { target, host, .. }) =
            self.singletons.get(&Engine::Tunnel)
        {
            if host.is_none() && !manifests.contains_key(target) {
                return Err(Error::Config(format!(
                    "Tunnel target '{}' is not part of this run; add it to the request or set tunnel.host and tunnel.port",
                    target
                )));
            }
        }
        Ok(())
    }

    fn insert_node(&mut self, node: Node) {
        self.graph.add_node(node.id.clone());
        self.nodes.entry(node.id.clone()).or_insert(node);
    }

    fn declare(&mut self, id: &str, service: &str) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.declared_by.insert(service.to_string());
        }
    }

    fn add_edge(&mut self, from: &str, to: &str) {
        self.graph.add_edge(from, to);
        if let Some(node) = self.nodes.get_mut(from) {
            node.dependencies.insert(to.to_string());
        }
    }
}

fn conflict(id: &str, declared_by: &BTreeSet<String>, service: &str, reason: &str) -> Error {
    let first = declared_by
        .iter()
        .next()
        .map(String::as_str)
        .unwrap_or("another service");
    Error::Config(format!(
        "Conflicting declarations of '{}' by '{}' and '{}': {}",
        id, first, service, reason
    ))
}

fn managed_nodes(
    builder: &Builder,
    roots: &BTreeSet<String>,
    options: BuildOptions,
) -> BTreeSet<String> {
    let is_service = |id: &str| builder.nodes.get(id).is_some_and(Node::is_service);

    if !options.no_deps {
        return builder
            .nodes
            .keys()
            .filter(|id| !(options.infra_only && is_service(id)))
            .cloned()
            .collect();
    }

    // Infrastructure reachable from the roots without passing through
    // another service.
    let mut managed = BTreeSet::new();
    let mut stack: Vec<String> = Vec::new();
    for root in roots {
        if !options.infra_only {
            managed.insert(root.clone());
        }
        stack.extend(
            builder
                .graph
                .dependencies(root)
                .filter(|d| !is_service(d))
                .cloned(),
        );
    }
    while let Some(next) = stack.pop() {
        if managed.insert(next.clone()) {
            stack.extend(builder.graph.dependencies(&next).cloned());
        }
    }
    managed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn manifest(yaml: &str) -> ServiceManifest {
        let mut m: ServiceManifest = serde_yaml::from_str(yaml).unwrap();
        m.source_dir = PathBuf::from("/srv");
        m
    }

    fn source(yamls: &[&str]) -> BTreeMap<String, ServiceManifest> {
        yamls
            .iter()
            .map(|y| {
                let m = manifest(y);
                (m.name().to_string(), m)
            })
            .collect()
    }

    fn level_of(graph: &DependencyGraph, id: &str) -> usize {
        graph
            .levels()
            .iter()
            .position(|l| l.iter().any(|n| n == id))
            .unwrap()
    }

    #[test]
    fn expands_required_services_and_infra() {
        let src = source(&[
            "service:\n  name: api\nrequires:\n  services: [auth-service]\n",
            "service:\n  name: auth-service\nrequires:\n  infrastructure:\n    postgres:\n      database: auth_db\n    redis: true\n",
        ]);
        let graph = build_graph(&["api".to_string()], &src, BuildOptions::default()).unwrap();

        let ids: Vec<&str> = graph.nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["api", "auth-service", "postgres", "postgres/auth_db", "redis"]
        );
        assert!(level_of(&graph, "postgres") < level_of(&graph, "postgres/auth_db"));
        assert!(level_of(&graph, "postgres/auth_db") < level_of(&graph, "auth-service"));
        assert!(level_of(&graph, "auth-service") < level_of(&graph, "api"));
        assert_eq!(
            graph.requested().iter().collect::<Vec<_>>(),
            vec!["api"]
        );
    }

    #[test]
    fn unknown_service_names_referrer() {
        let src = source(&["service:\n  name: api\nrequires:\n  services: [ghost]\n"]);
        let err = build_graph(&["api".to_string()], &src, BuildOptions::default()).unwrap_err();
        match err {
            Error::UnknownService {
                name,
                referenced_by,
            } => {
                assert_eq!(name, "ghost");
                assert_eq!(referenced_by.as_deref(), Some("api"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn deduplicates_shared_database() {
        let src = source(&[
            "service:\n  name: orders\nrequires:\n  infrastructure:\n    postgres:\n      database: orders_db\n",
            "service:\n  name: reports\nrequires:\n  infrastructure:\n    postgres:\n      database: orders_db\n",
        ]);
        let graph = build_graph(&[], &src, BuildOptions::default()).unwrap();
        let dbs = graph.resources_of_kind(InfraKind::Postgres);
        assert_eq!(dbs.len(), 1);
        assert_eq!(
            dbs[0].declared_by.iter().collect::<Vec<_>>(),
            vec!["orders", "reports"]
        );
    }

    #[test]
    fn conflicting_queue_shapes_are_config_errors() {
        let src = source(&[
            "service:\n  name: a\nrequires:\n  infrastructure:\n    sqs:\n      queues:\n        - name: jobs\n          dlq: true\n",
            "service:\n  name: b\nrequires:\n  infrastructure:\n    sqs:\n      queues:\n        - name: jobs\n",
        ]);
        let err = build_graph(&[], &src, BuildOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("sqs/jobs")));
    }

    #[test]
    fn queue_named_like_another_services_dlq_is_rejected() {
        let src = source(&[
            "service:\n  name: a\nrequires:\n  infrastructure:\n    sqs:\n      queues:\n        - name: orders\n          dlq: true\n",
            "service:\n  name: b\nrequires:\n  infrastructure:\n    sqs:\n      queues:\n        - name: orders-dlq\n",
        ]);
        let err = build_graph(&[], &src, BuildOptions::default()).unwrap_err();
        match err {
            Error::Config(m) => {
                assert!(m.contains("orders-dlq"), "{}", m);
                assert!(m.contains("'a'") && m.contains("'b'"), "{}", m);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn queue_shadowing_own_dlq_is_rejected() {
        let src = source(&[
            "service:\n  name: a\nrequires:\n  infrastructure:\n    sqs:\n      queues:\n        - name: orders\n          dlq: true\n        - name: orders-dlq\n",
        ]);
        let err = build_graph(&[], &src, BuildOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("dead-letter")));
    }

    #[test]
    fn cycle_between_services() {
        let src = source(&[
            "service:\n  name: a\nrequires:\n  services: [b]\n",
            "service:\n  name: b\nrequires:\n  services: [a]\n",
        ]);
        let err = build_graph(&["a".to_string()], &src, BuildOptions::default()).unwrap_err();
        match err {
            Error::DependencyCycle(path) => {
                assert!(path.contains(&"a".to_string()));
                assert!(path.contains(&"b".to_string()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn topic_waits_for_subscribed_queue() {
        let src = source(&[
            r#"
service:
  name: notifier
requires:
  infrastructure:
    sns:
      topics:
        - name: order-events
          subscriptions:
            - protocol: sqs
              endpoint: ${sqs.orders.arn}
"#,
            "service:\n  name: orders\nrequires:\n  infrastructure:\n    sqs:\n      queues:\n        - name: orders\n",
        ]);
        let graph = build_graph(&[], &src, BuildOptions::default()).unwrap();
        assert!(graph
            .node("sns/order-events")
            .unwrap()
            .dependencies
            .contains("sqs/orders"));
        assert!(level_of(&graph, "sqs/orders") < level_of(&graph, "sns/order-events"));
    }

    #[test]
    fn subscription_to_undeclared_queue_is_unresolved() {
        let src = source(&[r#"
service:
  name: notifier
requires:
  infrastructure:
    sns:
      topics:
        - name: events
          subscriptions:
            - protocol: sqs
              endpoint: ${sqs.missing.arn}
"#]);
        let err = build_graph(&[], &src, BuildOptions::default()).unwrap_err();
        assert!(matches!(err, Error::UnresolvedReference { ref token, .. } if token == "${sqs.missing.arn}"));
    }

    #[test]
    fn no_deps_keeps_own_infra_managed() {
        let src = source(&[
            "service:\n  name: api\nrequires:\n  services: [auth]\n  infrastructure:\n    redis: true\n",
            "service:\n  name: auth\nrequires:\n  infrastructure:\n    postgres:\n      database: auth_db\n",
        ]);
        let options = BuildOptions {
            no_deps: true,
            infra_only: false,
        };
        let graph = build_graph(&["api".to_string()], &src, options).unwrap();
        assert!(graph.is_managed("api"));
        assert!(graph.is_managed("redis"));
        assert!(!graph.is_managed("auth"));
        assert!(!graph.is_managed("postgres/auth_db"));
    }

    #[test]
    fn infra_only_skips_services() {
        let src = source(&[
            "service:\n  name: api\nrequires:\n  infrastructure:\n    s3:\n      buckets: [uploads]\n",
        ]);
        let options = BuildOptions {
            no_deps: false,
            infra_only: true,
        };
        let graph = build_graph(&[], &src, options).unwrap();
        assert!(!graph.is_managed("api"));
        assert!(graph.is_managed("localstack"));
        assert!(graph.is_managed("s3/uploads"));
    }

    #[test]
    fn tunnel_target_must_be_known() {
        let src = source(&[
            "service:\n  name: api\nrequires:\n  infrastructure:\n    tunnel:\n      target: webhooks\n",
        ]);
        let err = build_graph(&[], &src, BuildOptions::default()).unwrap_err();
        assert!(err.to_string().contains("webhooks"));
    }
}
