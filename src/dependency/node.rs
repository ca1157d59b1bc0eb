use crate::config::{InfraKind, InfrastructureRequirement};
use std::collections::BTreeSet;
use std::fmt;

/// Container-owning infrastructure engines. Resource nodes (databases,
/// queues, topics, buckets) are hosted inside one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Engine {
    Postgres,
    Mongodb,
    Redis,
    Localstack,
    Tunnel,
}

pub const AWS_REGION: &str = "us-east-1";
pub const AWS_ACCOUNT_ID: &str = "000000000000";
pub const AWS_ACCESS_KEY_ID: &str = "test";
pub const AWS_SECRET_ACCESS_KEY: &str = "test";
pub const POSTGRES_USER: &str = "postgres";
pub const POSTGRES_PASSWORD: &str = "postgres";

impl Engine {
    pub const ALL: [Engine; 5] = [
        Engine::Postgres,
        Engine::Mongodb,
        Engine::Redis,
        Engine::Localstack,
        Engine::Tunnel,
    ];

    pub fn for_kind(kind: InfraKind) -> Engine {
        match kind {
            InfraKind::Postgres => Engine::Postgres,
            InfraKind::Mongodb => Engine::Mongodb,
            InfraKind::Redis => Engine::Redis,
            InfraKind::Sqs | InfraKind::Sns | InfraKind::S3 => Engine::Localstack,
            InfraKind::Tunnel => Engine::Tunnel,
        }
    }

    /// Node identifier of the engine; engines are singletons per graph.
    pub fn id(&self) -> &'static str {
        match self {
            Engine::Postgres => "postgres",
            Engine::Mongodb => "mongodb",
            Engine::Redis => "redis",
            Engine::Localstack => "localstack",
            Engine::Tunnel => "tunnel",
        }
    }

    pub fn image(&self) -> &'static str {
        match self {
            Engine::Postgres => "postgres:16-alpine",
            Engine::Mongodb => "mongo:7",
            Engine::Redis => "redis:7-alpine",
            Engine::Localstack => "localstack/localstack:3",
            Engine::Tunnel => "ngrok/ngrok:3",
        }
    }

    /// Port the engine is preferably published on.
    pub fn native_port(&self) -> u16 {
        match self {
            Engine::Postgres => 5432,
            Engine::Mongodb => 27017,
            Engine::Redis => 6379,
            Engine::Localstack => 4566,
            Engine::Tunnel => 4040,
        }
    }

    /// Engines whose data lives in a named volume.
    pub fn is_stateful(&self) -> bool {
        matches!(self, Engine::Postgres | Engine::Mongodb | Engine::Localstack)
    }

    /// Container path of the data volume for stateful engines.
    pub fn data_dir(&self) -> Option<&'static str> {
        match self {
            Engine::Postgres => Some("/var/lib/postgresql/data"),
            Engine::Mongodb => Some("/data/db"),
            Engine::Localstack => Some("/var/lib/localstack"),
            Engine::Redis | Engine::Tunnel => None,
        }
    }

    /// Secrets the engine container cannot start without.
    pub fn required_secrets(&self) -> &'static [&'static str] {
        match self {
            Engine::Tunnel => &["NGROK_AUTHTOKEN"],
            _ => &[],
        }
    }

    /// Scheme-qualified base URL for clients of this engine.
    pub fn url(&self, host: &str, port: u16) -> String {
        match self {
            Engine::Postgres => format!(
                "postgres://{}:{}@{}:{}",
                POSTGRES_USER, POSTGRES_PASSWORD, host, port
            ),
            Engine::Mongodb => format!("mongodb://{}:{}", host, port),
            Engine::Redis => format!("redis://{}:{}", host, port),
            Engine::Localstack | Engine::Tunnel => format!("http://{}:{}", host, port),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Node identifier of a resource hosted on an engine, e.g. `sqs/orders`.
pub fn resource_id(kind: InfraKind, name: &str) -> String {
    format!("{}/{}", kind, name)
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Service,
    Engine(Engine),
    Resource(InfrastructureRequirement),
}

/// A vertex of the dependency graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    /// Nodes that must be healthy before this one may start.
    pub dependencies: BTreeSet<String>,
    /// Services whose manifests declared this node.
    pub declared_by: BTreeSet<String>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            dependencies: BTreeSet::new(),
            declared_by: BTreeSet::new(),
        }
    }

    pub fn is_service(&self) -> bool {
        matches!(self.kind, NodeKind::Service)
    }

    /// Services and engines own a container; resources live inside their engine.
    pub fn has_container(&self) -> bool {
        !matches!(self.kind, NodeKind::Resource(_))
    }

    pub fn engine(&self) -> Option<Engine> {
        match &self.kind {
            NodeKind::Engine(engine) => Some(*engine),
            NodeKind::Resource(req) => Some(Engine::for_kind(req.kind())),
            NodeKind::Service => None,
        }
    }

    pub fn requirement(&self) -> Option<&InfrastructureRequirement> {
        match &self.kind {
            NodeKind::Resource(req) => Some(req),
            _ => None,
        }
    }

    /// Compose service name, which is also the suffix of the container name.
    pub fn container_key(&self) -> String {
        self.id.replace('/', "-")
    }
}
