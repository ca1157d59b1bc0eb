//! Infrastructure requirements declared under `requires.infrastructure`.
//!
//! The YAML shape is a map keyed by kind:
//!
//! ```yaml
//! requires:
//!   infrastructure:
//!     postgres:
//!       database: orders_db
//!       migrations: ./migrations
//!       seed: ./seed.sql
//!     redis: true
//!     sqs:
//!       queues:
//!         - name: orders
//!           dlq: true
//!     sns:
//!       topics:
//!         - name: order-events
//!           subscriptions:
//!             - protocol: sqs
//!               endpoint: ${sqs.orders.arn}
//!               attributes:
//!                 FilterPolicy: '{"type": ["created"]}'
//!     s3:
//!       buckets: [invoices]
//!     tunnel:
//!       target: webhooks
//! ```
//!
//! After loading, the map is flattened into [`InfrastructureRequirement`]
//! values, which is what the rest of the engine works with.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Reference kinds usable as the first segment of a template token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InfraKind {
    Postgres,
    Mongodb,
    Redis,
    Sqs,
    Sns,
    S3,
    Tunnel,
}

impl InfraKind {
    pub const ALL: [InfraKind; 7] = [
        InfraKind::Postgres,
        InfraKind::Mongodb,
        InfraKind::Redis,
        InfraKind::Sqs,
        InfraKind::Sns,
        InfraKind::S3,
        InfraKind::Tunnel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InfraKind::Postgres => "postgres",
            InfraKind::Mongodb => "mongodb",
            InfraKind::Redis => "redis",
            InfraKind::Sqs => "sqs",
            InfraKind::Sns => "sns",
            InfraKind::S3 => "s3",
            InfraKind::Tunnel => "tunnel",
        }
    }

    pub fn parse(s: &str) -> Option<InfraKind> {
        InfraKind::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Kinds whose declarations name individual resources hosted on a shared engine.
    pub fn has_resources(&self) -> bool {
        !matches!(self, InfraKind::Redis | InfraKind::Tunnel)
    }
}

impl fmt::Display for InfraKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A topic subscription. `endpoint` may contain template tokens such as
/// `${sqs.orders.arn}`; they are resolved when the topic is provisioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Subscription {
    pub protocol: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Subscription {
    pub fn filter_policy(&self) -> Option<&str> {
        self.attributes.get("FilterPolicy").map(String::as_str)
    }
}

/// One infrastructure requirement, checked structurally at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfrastructureRequirement {
    RelationalDatabase {
        name: String,
        migrations: Option<PathBuf>,
        seed: Option<PathBuf>,
    },
    DocumentDatabase {
        name: String,
        seed: Option<PathBuf>,
    },
    Cache,
    MessageQueue {
        name: String,
        dlq: bool,
    },
    PubSubTopic {
        name: String,
        subscriptions: Vec<Subscription>,
    },
    ObjectBucket {
        name: String,
    },
    Tunnel {
        target: String,
        host: Option<String>,
        port: Option<u16>,
        provider: String,
    },
}

impl InfrastructureRequirement {
    pub fn kind(&self) -> InfraKind {
        match self {
            InfrastructureRequirement::RelationalDatabase { .. } => InfraKind::Postgres,
            InfrastructureRequirement::DocumentDatabase { .. } => InfraKind::Mongodb,
            InfrastructureRequirement::Cache => InfraKind::Redis,
            InfrastructureRequirement::MessageQueue { .. } => InfraKind::Sqs,
            InfrastructureRequirement::PubSubTopic { .. } => InfraKind::Sns,
            InfrastructureRequirement::ObjectBucket { .. } => InfraKind::S3,
            InfrastructureRequirement::Tunnel { .. } => InfraKind::Tunnel,
        }
    }

    /// Identifying name for deduplication; `None` for singleton kinds.
    pub fn resource_name(&self) -> Option<&str> {
        match self {
            InfrastructureRequirement::RelationalDatabase { name, .. }
            | InfrastructureRequirement::DocumentDatabase { name, .. }
            | InfrastructureRequirement::MessageQueue { name, .. }
            | InfrastructureRequirement::PubSubTopic { name, .. }
            | InfrastructureRequirement::ObjectBucket { name } => Some(name),
            InfrastructureRequirement::Cache | InfrastructureRequirement::Tunnel { .. } => None,
        }
    }

    /// Merge a second declaration of the same resource into this one.
    ///
    /// Optional paths declared by only one side are kept. Any other
    /// difference is a conflict and is returned as a description.
    pub fn merge(&mut self, other: &InfrastructureRequirement) -> Result<(), String> {
        use InfrastructureRequirement as R;
        match (self, other) {
            (
                R::RelationalDatabase {
                    migrations, seed, ..
                },
                R::RelationalDatabase {
                    migrations: other_migrations,
                    seed: other_seed,
                    ..
                },
            ) => {
                merge_path("migrations", migrations, other_migrations)?;
                merge_path("seed", seed, other_seed)
            }
            (R::DocumentDatabase { seed, .. }, R::DocumentDatabase { seed: other_seed, .. }) => {
                merge_path("seed", seed, other_seed)
            }
            (R::Cache, R::Cache) => Ok(()),
            (R::MessageQueue { dlq, .. }, R::MessageQueue { dlq: other_dlq, .. }) => {
                if dlq != other_dlq {
                    return Err(format!(
                        "dead-letter queue declared as {} and {}",
                        dlq, other_dlq
                    ));
                }
                Ok(())
            }
            (
                R::PubSubTopic { subscriptions, .. },
                R::PubSubTopic {
                    subscriptions: other_subscriptions,
                    ..
                },
            ) => {
                if subscriptions.is_empty() {
                    *subscriptions = other_subscriptions.clone();
                    Ok(())
                } else if other_subscriptions.is_empty() || subscriptions == other_subscriptions {
                    Ok(())
                } else {
                    Err("subscriptions differ between declarations".to_string())
                }
            }
            (R::ObjectBucket { .. }, R::ObjectBucket { .. }) => Ok(()),
            (
                R::Tunnel {
                    target,
                    host,
                    port,
                    provider,
                },
                R::Tunnel {
                    target: other_target,
                    host: other_host,
                    port: other_port,
                    provider: other_provider,
                },
            ) => {
                if target != other_target || provider != other_provider {
                    return Err(format!(
                        "tunnel declared for '{}' ({}) and '{}' ({})",
                        target, provider, other_target, other_provider
                    ));
                }
                if host.is_none() {
                    *host = other_host.clone();
                }
                if port.is_none() {
                    *port = *other_port;
                }
                Ok(())
            }
            (this, other) => Err(format!(
                "declared as {} and {}",
                this.kind(),
                other.kind()
            )),
        }
    }
}

fn merge_path(
    field: &str,
    mine: &mut Option<PathBuf>,
    theirs: &Option<PathBuf>,
) -> Result<(), String> {
    match (mine.as_ref(), theirs.as_ref()) {
        (Some(a), Some(b)) if a != b => Err(format!(
            "{} declared as '{}' and '{}'",
            field,
            a.display(),
            b.display()
        )),
        (None, Some(b)) => {
            *mine = Some(b.clone());
            Ok(())
        }
        _ => Ok(()),
    }
}

// ============================================================================
// YAML shape
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InfrastructureSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres: Option<DatabaseSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mongodb: Option<DocumentDatabaseSpec>,
    #[serde(default)]
    pub redis: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqs: Option<QueuesSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sns: Option<TopicsSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<BucketsSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<TunnelSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSpec {
    pub database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrations: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentDatabaseSpec {
    pub database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueuesSpec {
    pub queues: Vec<QueueSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueSpec {
    pub name: String,
    #[serde(default)]
    pub dlq: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopicsSpec {
    pub topics: Vec<TopicSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopicSpec {
    pub name: String,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BucketsSpec {
    pub buckets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TunnelSpec {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default = "default_tunnel_provider")]
    pub provider: String,
}

fn default_tunnel_provider() -> String {
    "ngrok".to_string()
}

impl InfrastructureSpec {
    /// Flatten the map into requirements. Relative paths are left as
    /// declared; the manifest loader anchors them to the manifest directory.
    pub fn requirements(&self) -> Vec<InfrastructureRequirement> {
        let mut out = Vec::new();

        if let Some(pg) = &self.postgres {
            out.push(InfrastructureRequirement::RelationalDatabase {
                name: pg.database.clone(),
                migrations: pg.migrations.clone(),
                seed: pg.seed.clone(),
            });
        }
        if let Some(mongo) = &self.mongodb {
            out.push(InfrastructureRequirement::DocumentDatabase {
                name: mongo.database.clone(),
                seed: mongo.seed.clone(),
            });
        }
        if self.redis {
            out.push(InfrastructureRequirement::Cache);
        }
        if let Some(sqs) = &self.sqs {
            out.extend(sqs.queues.iter().map(|q| InfrastructureRequirement::MessageQueue {
                name: q.name.clone(),
                dlq: q.dlq,
            }));
        }
        if let Some(sns) = &self.sns {
            out.extend(sns.topics.iter().map(|t| InfrastructureRequirement::PubSubTopic {
                name: t.name.clone(),
                subscriptions: t.subscriptions.clone(),
            }));
        }
        if let Some(s3) = &self.s3 {
            out.extend(
                s3.buckets
                    .iter()
                    .map(|b| InfrastructureRequirement::ObjectBucket { name: b.clone() }),
            );
        }
        if let Some(tunnel) = &self.tunnel {
            out.push(InfrastructureRequirement::Tunnel {
                target: tunnel.target.clone(),
                host: tunnel.host.clone(),
                port: tunnel.port,
                provider: tunnel.provider.clone(),
            });
        }

        out
    }
}
