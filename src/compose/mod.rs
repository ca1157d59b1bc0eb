//! Composition document generation.
//!
//! The document is a plain `docker compose` file. Every map is ordered, so
//! the same inputs always serialize to the same bytes.

use crate::config::{format_compose_duration, InfrastructureRequirement};
use crate::dependency::{DependencyGraph, Engine, Node, NodeKind, POSTGRES_PASSWORD, POSTGRES_USER};
use crate::error::Result;
use crate::healthcheck::HealthPolicy;
use crate::resolve::{IdentityTable, ResolvedEnvironment, SecretStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Name of the shared network every container joins.
pub const NETWORK: &str = "devup";

/// Label carrying the graph node identifier of a container.
pub const NODE_LABEL: &str = "dev.devup.node";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionDocument {
    pub name: String,
    pub services: BTreeMap<String, ContainerSpec>,
    pub networks: BTreeMap<String, NetworkSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, VolumeSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildRef>,
    pub container_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    pub networks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<Healthcheck>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRef {
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Healthcheck {
    pub test: Vec<String>,
    pub interval: String,
    pub timeout: String,
    pub retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub driver: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {}

/// Everything the generator reads. Nothing here is mutated.
pub struct CompositionInput<'a> {
    pub project: &'a str,
    pub graph: &'a DependencyGraph,
    pub identities: &'a IdentityTable,
    /// Resolved environments of the services that have one so far.
    pub environments: &'a BTreeMap<String, ResolvedEnvironment>,
    /// Source of engine secrets such as the tunnel auth token.
    pub secrets: &'a dyn SecretStore,
    /// Health polling of infrastructure engines.
    pub engine_health: HealthPolicy,
}

impl CompositionDocument {
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Write the document, creating the parent directory.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }
}

/// Map the graph onto one container per service and engine node.
pub fn generate(input: &CompositionInput<'_>) -> CompositionDocument {
    let mut services = BTreeMap::new();
    let mut volumes = BTreeMap::new();

    for node in input.graph.nodes().filter(|n| n.has_container()) {
        let Some(identity) = input.identities.get(&node.id) else {
            continue;
        };
        let mut spec = ContainerSpec {
            container_name: identity.container_name.clone(),
            ports: vec![format!("{}:{}", identity.port, identity.port)],
            networks: vec![NETWORK.to_string()],
            labels: BTreeMap::from([(NODE_LABEL.to_string(), node.id.clone())]),
            ..Default::default()
        };

        match &node.kind {
            NodeKind::Service => service_container(input, node, identity.port, &mut spec),
            NodeKind::Engine(engine) => {
                engine_container(input, *engine, identity.port, &mut spec);
                if let Some(data_dir) = engine.data_dir() {
                    let volume = node.container_key();
                    spec.volumes.push(format!("{}:{}", volume, data_dir));
                    volumes.insert(volume, VolumeSpec::default());
                }
            }
            NodeKind::Resource(_) => continue,
        }
        services.insert(node.container_key(), spec);
    }

    CompositionDocument {
        name: input.project.to_string(),
        services,
        networks: BTreeMap::from([(
            NETWORK.to_string(),
            NetworkSpec {
                driver: "bridge".to_string(),
            },
        )]),
        volumes,
    }
}

fn service_container(input: &CompositionInput<'_>, node: &Node, port: u16, spec: &mut ContainerSpec) {
    let Some(manifest) = input.graph.manifest(&node.id) else {
        return;
    };
    let build = &manifest.service.build;

    match (&build.image, &build.context) {
        (Some(image), None) => spec.image = Some(image.clone()),
        (image, _) => {
            spec.image = image.clone();
            spec.build = Some(BuildRef {
                context: manifest.build_context().to_string_lossy().into_owned(),
                dockerfile: build.dockerfile.clone(),
                args: build.args.clone(),
            });
        }
    }

    spec.environment = match input.environments.get(&node.id) {
        Some(env) => env.clone(),
        None => {
            let mut env = manifest.env.clone();
            env.insert("PORT".to_string(), port.to_string());
            env
        }
    };

    if let Some(health) = &manifest.service.health {
        spec.healthcheck = Some(Healthcheck {
            test: vec![
                "CMD-SHELL".to_string(),
                format!("curl -fs http://localhost:{}{} || exit 1", port, health.path),
            ],
            interval: format_compose_duration(health.interval()),
            timeout: format_compose_duration(health.timeout()),
            retries: health.retries(),
        });
    }
}

fn engine_container(input: &CompositionInput<'_>, engine: Engine, port: u16, spec: &mut ContainerSpec) {
    spec.image = Some(engine.image().to_string());
    let p = port.to_string();

    let (command, environment, test): (Vec<String>, Vec<(&str, String)>, Option<Vec<String>>) =
        match engine {
            Engine::Postgres => (
                vec!["postgres".into(), "-p".into(), p.clone()],
                vec![
                    ("POSTGRES_USER", POSTGRES_USER.to_string()),
                    ("POSTGRES_PASSWORD", POSTGRES_PASSWORD.to_string()),
                    ("PGPORT", p.clone()),
                ],
                Some(vec![
                    "CMD".into(),
                    "pg_isready".into(),
                    "-U".into(),
                    POSTGRES_USER.into(),
                    "-p".into(),
                    p.clone(),
                ]),
            ),
            Engine::Mongodb => (
                vec!["mongod".into(), "--bind_ip_all".into(), "--port".into(), p.clone()],
                vec![],
                Some(vec![
                    "CMD".into(),
                    "mongosh".into(),
                    "--quiet".into(),
                    "--port".into(),
                    p.clone(),
                    "--eval".into(),
                    "db.adminCommand('ping')".into(),
                ]),
            ),
            Engine::Redis => (
                vec!["redis-server".into(), "--port".into(), p.clone()],
                vec![],
                Some(vec![
                    "CMD".into(),
                    "redis-cli".into(),
                    "-p".into(),
                    p.clone(),
                    "ping".into(),
                ]),
            ),
            Engine::Localstack => (
                vec![],
                vec![
                    ("SERVICES", "sqs,sns,s3".to_string()),
                    ("GATEWAY_LISTEN", format!("0.0.0.0:{}", p)),
                    ("LOCALSTACK_HOST", format!("localhost:{}", p)),
                    ("AWS_ENDPOINT_URL", format!("http://localhost:{}", p)),
                    ("AWS_DEFAULT_REGION", crate::dependency::AWS_REGION.to_string()),
                ],
                Some(vec![
                    "CMD-SHELL".into(),
                    format!("curl -fs http://localhost:{}/_localstack/health || exit 1", p),
                ]),
            ),
            Engine::Tunnel => (
                tunnel_command(input, port),
                engine
                    .required_secrets()
                    .iter()
                    .filter_map(|name| input.secrets.lookup(name).map(|v| (*name, v)))
                    .collect(),
                None,
            ),
        };

    spec.command = command;
    spec.environment = environment
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    spec.healthcheck = test.map(|test| Healthcheck {
        test,
        interval: format_compose_duration(input.engine_health.interval),
        timeout: format_compose_duration(input.engine_health.timeout),
        retries: input.engine_health.retries,
    });
}

/// `http <target> --web-addr 0.0.0.0:<port>`. Without an explicit host the
/// tunnel points at the target service on the shared network.
fn tunnel_command(input: &CompositionInput<'_>, port: u16) -> Vec<String> {
    let Some(InfrastructureRequirement::Tunnel {
        target,
        host,
        port: target_port,
        ..
    }) = input.graph.singleton(Engine::Tunnel)
    else {
        return Vec::new();
    };

    let identity = input.identities.get(target);
    let address = match (host, identity) {
        (Some(host), identity) => {
            let port = target_port.or(identity.map(|i| i.port)).unwrap_or(80);
            format!("{}:{}", host, port)
        }
        (None, Some(identity)) => {
            format!("{}:{}", identity.host, target_port.unwrap_or(identity.port))
        }
        (None, None) => target.clone(),
    };

    vec![
        "http".to_string(),
        address,
        "--web-addr".to_string(),
        format!("0.0.0.0:{}", port),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceManifest;
    use crate::dependency::{build_graph, BuildOptions};
    use crate::resolve::Identity;
    use std::path::PathBuf;
    use std::time::Duration;

    fn graph(yamls: &[&str]) -> DependencyGraph {
        let source: BTreeMap<String, ServiceManifest> = yamls
            .iter()
            .map(|y| {
                let mut m: ServiceManifest = serde_yaml::from_str(y).unwrap();
                m.source_dir = PathBuf::from("/srv").join(m.name());
                (m.name().to_string(), m)
            })
            .collect();
        build_graph(&[], &source, BuildOptions::default()).unwrap()
    }

    fn identities(g: &DependencyGraph) -> IdentityTable {
        let table = IdentityTable::new();
        for (i, node) in g.nodes().filter(|n| n.has_container()).enumerate() {
            let name = format!("shop-{}", node.container_key());
            table.insert(
                &node.id,
                Identity {
                    container_name: name.clone(),
                    host: name,
                    port: 25000 + i as u16,
                },
            );
        }
        table
    }

    fn policy() -> HealthPolicy {
        HealthPolicy {
            interval: Duration::from_secs(1),
            timeout: Duration::from_millis(500),
            retries: 60,
        }
    }

    const ORDERS: &str = r#"
service:
  name: orders
  port: 3000
  build:
    dockerfile: Dockerfile.dev
  health:
    path: /health
    interval: 2s
requires:
  infrastructure:
    postgres:
      database: orders_db
    redis: true
    sqs:
      queues:
        - name: orders
env:
  LOG_LEVEL: debug
"#;

    #[test]
    fn one_container_per_service_and_engine() {
        let g = graph(&[ORDERS]);
        let ids = identities(&g);
        let secrets = BTreeMap::<String, String>::new();
        let envs = BTreeMap::new();
        let doc = generate(&CompositionInput {
            project: "shop",
            graph: &g,
            identities: &ids,
            environments: &envs,
            secrets: &secrets,
            engine_health: policy(),
        });

        assert_eq!(
            doc.services.keys().collect::<Vec<_>>(),
            vec!["localstack", "orders", "postgres", "redis"]
        );
        assert_eq!(
            doc.volumes.keys().collect::<Vec<_>>(),
            vec!["localstack", "postgres"]
        );

        let orders = &doc.services["orders"];
        assert_eq!(orders.container_name, "shop-orders");
        let build = orders.build.as_ref().unwrap();
        assert_eq!(build.context, "/srv/orders");
        assert_eq!(build.dockerfile.as_deref(), Some("Dockerfile.dev"));
        assert_eq!(orders.environment["LOG_LEVEL"], "debug");
        let port = ids.get("orders").unwrap().port;
        assert_eq!(orders.environment["PORT"], port.to_string());
        assert_eq!(orders.ports, vec![format!("{}:{}", port, port)]);
        let health = orders.healthcheck.as_ref().unwrap();
        assert_eq!(health.interval, "2s");
        assert!(health.test[1].contains(&format!("localhost:{}/health", port)));

        let pg = &doc.services["postgres"];
        let pg_port = ids.get("postgres").unwrap().port.to_string();
        assert_eq!(pg.command, vec!["postgres", "-p", pg_port.as_str()]);
        assert_eq!(pg.volumes, vec!["postgres:/var/lib/postgresql/data"]);
        assert_eq!(pg.labels[NODE_LABEL], "postgres");
        assert!(doc.services["redis"].volumes.is_empty());
        assert!(doc.services.values().all(|c| c.networks == vec![NETWORK]));
    }

    #[test]
    fn generation_is_byte_stable() {
        let g = graph(&[ORDERS]);
        let ids = identities(&g);
        let secrets = BTreeMap::<String, String>::new();
        let envs = BTreeMap::from([(
            "orders".to_string(),
            BTreeMap::from([
                ("Z".to_string(), "1".to_string()),
                ("A".to_string(), "2".to_string()),
            ]),
        )]);
        let input = CompositionInput {
            project: "shop",
            graph: &g,
            identities: &ids,
            environments: &envs,
            secrets: &secrets,
            engine_health: policy(),
        };
        let a = generate(&input).to_yaml().unwrap();
        let b = generate(&input).to_yaml().unwrap();
        assert_eq!(a, b);
        assert!(a.find("A: '2'").unwrap() < a.find("Z: '1'").unwrap());
    }

    #[test]
    fn prebuilt_image_has_no_build_section() {
        let g = graph(&["service:\n  name: web\n  build:\n    image: nginx:1.27\n"]);
        let ids = identities(&g);
        let secrets = BTreeMap::<String, String>::new();
        let envs = BTreeMap::new();
        let doc = generate(&CompositionInput {
            project: "shop",
            graph: &g,
            identities: &ids,
            environments: &envs,
            secrets: &secrets,
            engine_health: policy(),
        });
        let web = &doc.services["web"];
        assert_eq!(web.image.as_deref(), Some("nginx:1.27"));
        assert!(web.build.is_none());
        assert!(web.healthcheck.is_none());
    }

    #[test]
    fn tunnel_points_at_target_service() {
        let g = graph(&[
            "service:\n  name: webhooks\n  port: 8080\n",
            "service:\n  name: gateway\nrequires:\n  services: [webhooks]\n  infrastructure:\n    tunnel:\n      target: webhooks\n",
        ]);
        let ids = identities(&g);
        let secrets = BTreeMap::from([("NGROK_AUTHTOKEN".to_string(), "tok".to_string())]);
        let envs = BTreeMap::new();
        let doc = generate(&CompositionInput {
            project: "shop",
            graph: &g,
            identities: &ids,
            environments: &envs,
            secrets: &secrets,
            engine_health: policy(),
        });

        let tunnel = &doc.services["tunnel"];
        let target = ids.get("webhooks").unwrap();
        let own = ids.get("tunnel").unwrap();
        assert_eq!(
            tunnel.command,
            vec![
                "http".to_string(),
                format!("shop-webhooks:{}", target.port),
                "--web-addr".to_string(),
                format!("0.0.0.0:{}", own.port),
            ]
        );
        assert_eq!(tunnel.environment["NGROK_AUTHTOKEN"], "tok");
        assert!(tunnel.volumes.is_empty());
    }
}
