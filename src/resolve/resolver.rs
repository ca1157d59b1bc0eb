use super::identity::IdentityTable;
use super::outputs::OutputsTable;
use super::secret::{check_engine_secrets, check_secrets, SecretStore};
use super::template::{self, Reference, TemplateError};
use crate::config::{InfraKind, InfrastructureRequirement};
use crate::dependency::{
    resource_id, DependencyGraph, Engine, Node, NodeKind, AWS_ACCESS_KEY_ID, AWS_ACCOUNT_ID,
    AWS_REGION, AWS_SECRET_ACCESS_KEY,
};
use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Environment variables of one service, fully substituted.
pub type ResolvedEnvironment = BTreeMap<String, String>;

const SERVICE_ATTRIBUTES: &[&str] = &["host", "port", "url"];
const ENGINE_ATTRIBUTES: &[&str] = &["host", "port", "url"];
const LOCALSTACK_ATTRIBUTES: &[&str] = &[
    "host",
    "port",
    "url",
    "endpoint",
    "region",
    "account_id",
    "access_key_id",
    "secret_access_key",
];

fn engine_attributes(engine: Engine) -> &'static [&'static str] {
    match engine {
        Engine::Localstack => LOCALSTACK_ATTRIBUTES,
        _ => ENGINE_ATTRIBUTES,
    }
}

/// Attributes a resource node exposes, beyond those of its engine.
fn resource_attributes(req: &InfrastructureRequirement) -> &'static [&'static str] {
    match req {
        InfrastructureRequirement::RelationalDatabase { .. }
        | InfrastructureRequirement::DocumentDatabase { .. } => &["database"],
        InfrastructureRequirement::MessageQueue { dlq: true, .. } => &["arn", "dlq"],
        InfrastructureRequirement::MessageQueue { dlq: false, .. }
        | InfrastructureRequirement::PubSubTopic { .. }
        | InfrastructureRequirement::ObjectBucket { .. } => &["arn"],
        InfrastructureRequirement::Cache | InfrastructureRequirement::Tunnel { .. } => &[],
    }
}

fn node_has_attribute(node: &Node, attribute: &str) -> bool {
    match &node.kind {
        NodeKind::Service => SERVICE_ATTRIBUTES.contains(&attribute),
        NodeKind::Engine(engine) => engine_attributes(*engine).contains(&attribute),
        NodeKind::Resource(req) => {
            engine_attributes(Engine::for_kind(req.kind())).contains(&attribute)
                || resource_attributes(req).contains(&attribute)
        }
    }
}

/// Who a template is evaluated for.
#[derive(Debug, Clone, Copy)]
enum Scope<'s> {
    /// A service's `env_refs`: `self` is the service and infrastructure
    /// must be declared in its manifest.
    Service(&'s str),
    /// A subscription endpoint on an infrastructure node.
    Infrastructure(&'s str),
}

impl Scope<'_> {
    fn owner(&self) -> &str {
        match self {
            Scope::Service(name) | Scope::Infrastructure(name) => name,
        }
    }
}

/// A reference bound to a node and one of its attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    node: String,
    attribute: String,
}

/// Substitution phase: binds template references to identities and
/// provisioning outputs.
pub struct Resolver<'a> {
    graph: &'a DependencyGraph,
    identities: &'a IdentityTable,
    outputs: &'a OutputsTable,
}

impl<'a> Resolver<'a> {
    pub fn new(
        graph: &'a DependencyGraph,
        identities: &'a IdentityTable,
        outputs: &'a OutputsTable,
    ) -> Self {
        Self {
            graph,
            identities,
            outputs,
        }
    }

    /// Validate every reference and secret of the managed nodes without
    /// looking at values. Runs before the container runtime is touched.
    pub fn check(&self, secrets: &dyn SecretStore) -> Result<()> {
        let mut errors = Vec::new();

        for manifest in self.graph.manifests() {
            let service = manifest.name();
            if !self.graph.is_managed(service) {
                continue;
            }
            for value in manifest.env_refs.values() {
                if let Err(e) = self.check_template(Scope::Service(service), value) {
                    errors.push(e);
                    break;
                }
            }
            if let Err(e) = check_secrets(manifest, secrets) {
                errors.push(e);
            }
        }

        for node in self.graph.nodes() {
            if !self.graph.is_managed(&node.id) {
                continue;
            }
            match &node.kind {
                NodeKind::Resource(InfrastructureRequirement::PubSubTopic {
                    subscriptions, ..
                }) => {
                    for sub in subscriptions {
                        if let Err(e) =
                            self.check_template(Scope::Infrastructure(&node.id), &sub.endpoint)
                        {
                            errors.push(e);
                        }
                    }
                }
                NodeKind::Engine(engine) => {
                    if let Err(e) = check_engine_secrets(*engine, secrets) {
                        errors.push(e);
                    }
                }
                _ => {}
            }
        }

        match Error::aggregate(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn check_template(&self, scope: Scope<'_>, value: &str) -> Result<()> {
        let references =
            template::references(value).map_err(|e| template_error(scope.owner(), e))?;
        for reference in references {
            self.target(scope, &reference)?;
        }
        Ok(())
    }

    /// Resolve the environment of one service: literal `env`, substituted
    /// `env_refs`, present secrets and `PORT`.
    pub fn resolve_service(
        &self,
        service: &str,
        secrets: &dyn SecretStore,
    ) -> Result<ResolvedEnvironment> {
        let manifest = self.graph.manifest(service).ok_or_else(|| Error::UnknownService {
            name: service.to_string(),
            referenced_by: None,
        })?;

        let mut env: ResolvedEnvironment = manifest.env.clone();
        for (key, value) in &manifest.env_refs {
            let resolved = self.substitute(Scope::Service(service), value)?;
            env.insert(key.clone(), resolved);
        }
        env.extend(check_secrets(manifest, secrets)?);

        if let Some(identity) = self.identities.get(service) {
            env.insert("PORT".to_string(), identity.port.to_string());
        }
        Ok(env)
    }

    /// Resolve every managed service, failing closed on the first error.
    pub fn resolve_all(
        &self,
        secrets: &dyn SecretStore,
    ) -> Result<BTreeMap<String, ResolvedEnvironment>> {
        let mut all = BTreeMap::new();
        for manifest in self.graph.manifests() {
            if self.graph.is_managed(manifest.name()) {
                all.insert(
                    manifest.name().to_string(),
                    self.resolve_service(manifest.name(), secrets)?,
                );
            }
        }
        Ok(all)
    }

    /// Substitute a subscription endpoint declared on `node`.
    pub fn resolve_endpoint(&self, node: &str, endpoint: &str) -> Result<String> {
        self.substitute(Scope::Infrastructure(node), endpoint)
    }

    fn substitute(&self, scope: Scope<'_>, value: &str) -> Result<String> {
        template::substitute::<ReferenceError, _>(value, |reference| {
            let target = self.target(scope, reference)?;
            let value = self
                .value(&target)
                .map_err(|reason| unresolved(scope.owner(), reference, reason))?;
            Ok(value)
        })
        .map_err(|e| match e {
            ReferenceError::Template(e) => template_error(scope.owner(), e),
            ReferenceError::Resolve(e) => e,
        })
    }

    /// Bind a reference to a node attribute, checking declarations and the
    /// attribute vocabulary.
    fn target(&self, scope: Scope<'_>, reference: &Reference) -> Result<Target> {
        let fail = |reason: String| unresolved(scope.owner(), reference, reason);
        let path = &reference.path;
        let head = path[0].as_str();
        let rest = &path[1..];

        if rest.is_empty() {
            return Err(fail(format!("'{}' needs an attribute", head)));
        }

        if head == "self" {
            let Scope::Service(service) = scope else {
                return Err(fail("'self' is only available in service env_refs".to_string()));
            };
            if rest.len() == 1 && SERVICE_ATTRIBUTES.contains(&rest[0].as_str()) {
                return Ok(Target {
                    node: service.to_string(),
                    attribute: rest[0].clone(),
                });
            }
            let kind = InfraKind::parse(&rest[0]).ok_or_else(|| {
                fail(format!(
                    "'{}' is neither a service attribute nor an infrastructure kind",
                    rest[0]
                ))
            })?;
            if !self.graph.declares_kind(service, kind) {
                return Err(fail(format!("'{}' does not declare {}", service, kind)));
            }
            let candidates = self.graph.declared_resources(service, kind);
            return self.kind_target(kind, &rest[1..], &candidates).map_err(fail);
        }

        if let Some(kind) = InfraKind::parse(head) {
            // Services see only what they declare; infrastructure
            // definitions (subscription endpoints) see the whole graph.
            let candidates = match scope {
                Scope::Service(service) => {
                    if !self.graph.declares_kind(service, kind) {
                        return Err(fail(format!(
                            "{} is not declared under requires.infrastructure",
                            kind
                        )));
                    }
                    self.graph.declared_resources(service, kind)
                }
                Scope::Infrastructure(_) => self.graph.resources_of_kind(kind),
            };
            return self.kind_target(kind, rest, &candidates).map_err(fail);
        }

        let known = match scope {
            Scope::Service(service) => self.graph.requires_service(service, head),
            Scope::Infrastructure(_) => self.graph.manifest(head).is_some(),
        };
        if !known {
            return Err(fail(match scope {
                Scope::Service(_) => format!("'{}' is not listed in requires.services", head),
                Scope::Infrastructure(_) => format!("unknown service '{}'", head),
            }));
        }
        if rest.len() != 1 || !SERVICE_ATTRIBUTES.contains(&rest[0].as_str()) {
            return Err(fail(format!(
                "unknown attribute '{}' for service '{}' (expected one of: {})",
                rest.join("."),
                head,
                SERVICE_ATTRIBUTES.join(", ")
            )));
        }
        Ok(Target {
            node: head.to_string(),
            attribute: rest[0].clone(),
        })
    }

    /// `rest` is `[attribute]` or `[resource, attribute]`.
    fn kind_target(
        &self,
        kind: InfraKind,
        rest: &[String],
        candidates: &[&Node],
    ) -> std::result::Result<Target, String> {
        let engine = Engine::for_kind(kind);
        match rest {
            [attribute] => {
                if engine_attributes(engine).contains(&attribute.as_str()) {
                    return Ok(Target {
                        node: engine.id().to_string(),
                        attribute: attribute.clone(),
                    });
                }
                let matching: Vec<&&Node> = candidates
                    .iter()
                    .filter(|n| node_has_attribute(n, attribute))
                    .collect();
                match matching.as_slice() {
                    [node] => Ok(Target {
                        node: node.id.clone(),
                        attribute: attribute.clone(),
                    }),
                    [] if candidates.is_empty() || !kind.has_resources() => {
                        Err(format!("unknown attribute '{}' for {}", attribute, kind))
                    }
                    [] => Err(format!(
                        "no {} resource exposes attribute '{}'",
                        kind, attribute
                    )),
                    _ => Err(format!(
                        "ambiguous: {} {} resources match; name one as ${{{}.<name>.{}}}",
                        matching.len(),
                        kind,
                        kind,
                        attribute
                    )),
                }
            }
            [name, attribute] => {
                if !kind.has_resources() {
                    return Err(format!("{} has no named resources", kind));
                }
                let id = resource_id(kind, name);
                let node = candidates
                    .iter()
                    .find(|n| n.id == id)
                    .ok_or_else(|| format!("{} '{}' is not declared", kind, name))?;
                if !node_has_attribute(node, attribute) {
                    return Err(format!("unknown attribute '{}' for {}", attribute, id));
                }
                Ok(Target {
                    node: id,
                    attribute: attribute.clone(),
                })
            }
            _ => Err(format!("too many segments for {}", kind)),
        }
    }

    fn value(&self, target: &Target) -> std::result::Result<String, String> {
        let node = self
            .graph
            .node(&target.node)
            .ok_or_else(|| format!("'{}' is not part of this run", target.node))?;
        let attribute = target.attribute.as_str();

        if let NodeKind::Resource(_) = node.kind {
            let outputs = self
                .outputs
                .get(&node.id)
                .ok_or_else(|| format!("'{}' has not been provisioned", node.id))?;
            return outputs
                .get(attribute)
                .map(str::to_string)
                .ok_or_else(|| format!("'{}' has no '{}' output", node.id, attribute));
        }

        let identity = self
            .identities
            .get(&node.id)
            .ok_or_else(|| format!("'{}' has no assigned identity", node.id))?;

        match (&node.kind, attribute) {
            (_, "host") => Ok(identity.host),
            (_, "port") => Ok(identity.port.to_string()),
            (NodeKind::Service, "url") => Ok(identity.http_url()),
            (NodeKind::Engine(Engine::Tunnel), "url") => self
                .outputs
                .get(&node.id)
                .and_then(|o| o.get("url").map(str::to_string))
                .ok_or_else(|| "the tunnel has no public URL yet".to_string()),
            (NodeKind::Engine(engine), "url") => Ok(engine.url(&identity.host, identity.port)),
            (NodeKind::Engine(Engine::Localstack), attribute) => match attribute {
                "endpoint" => Ok(identity.http_url()),
                "region" => Ok(AWS_REGION.to_string()),
                "account_id" => Ok(AWS_ACCOUNT_ID.to_string()),
                "access_key_id" => Ok(AWS_ACCESS_KEY_ID.to_string()),
                "secret_access_key" => Ok(AWS_SECRET_ACCESS_KEY.to_string()),
                other => Err(format!("unknown attribute '{}'", other)),
            },
            (_, other) => Err(format!("unknown attribute '{}'", other)),
        }
    }
}

/// Error type threaded through `template::substitute`.
enum ReferenceError {
    Template(TemplateError),
    Resolve(Error),
}

impl From<TemplateError> for ReferenceError {
    fn from(e: TemplateError) -> Self {
        ReferenceError::Template(e)
    }
}

impl From<Error> for ReferenceError {
    fn from(e: Error) -> Self {
        ReferenceError::Resolve(e)
    }
}

fn unresolved(owner: &str, reference: &Reference, reason: String) -> Error {
    Error::UnresolvedReference {
        service: owner.to_string(),
        token: reference.token.clone(),
        reason,
    }
}

fn template_error(owner: &str, e: TemplateError) -> Error {
    Error::UnresolvedReference {
        service: owner.to_string(),
        token: e.token().to_string(),
        reason: e.to_string(),
    }
}
