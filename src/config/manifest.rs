use super::infra::{InfrastructureRequirement, InfrastructureSpec};
use super::parse_duration_string;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_HEALTH_RETRIES: u32 = 30;

/// A service manifest, one per service, loaded by path from the registry.
///
/// ```yaml
/// service:
///   name: orders
///   type: node
///   port: 3000
///   build:
///     context: .
///   health:
///     path: /health
///     interval: 2s
///     retries: 20
/// requires:
///   services: [auth-service]
///   infrastructure:
///     postgres:
///       database: orders_db
/// env:
///   LOG_LEVEL: debug
/// env_refs:
///   DATABASE_URL: postgres://postgres:postgres@${postgres.host}:${postgres.port}/${self.postgres.database}
/// secrets:
///   STRIPE_KEY:
///     description: Stripe test key
///     required: true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceManifest {
    pub service: ServiceSection,
    #[serde(default)]
    pub requires: Requires,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub env_refs: BTreeMap<String, String>,
    #[serde(default)]
    pub secrets: BTreeMap<String, SecretSpec>,

    /// Directory of the manifest file; relative paths are anchored here.
    #[serde(skip)]
    pub source_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSection {
    pub name: String,
    /// Runtime type tag (node, go, python, ...). Informational.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default)]
    pub build: BuildSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthSpec>,
}

/// How the service image is obtained: a prebuilt `image`, or a build
/// `context` (default `.`) with optional `dockerfile` and build `args`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
}

/// HTTP health descriptor. Durations are kept as strings the way they are
/// written and parsed on access; validation rejects unparseable values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthSpec {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

impl HealthSpec {
    pub fn interval(&self) -> Duration {
        self.interval
            .as_deref()
            .and_then(parse_duration_string)
            .unwrap_or(DEFAULT_HEALTH_INTERVAL)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
            .as_deref()
            .and_then(parse_duration_string)
            .unwrap_or(DEFAULT_HEALTH_TIMEOUT)
    }

    pub fn retries(&self) -> u32 {
        self.retries.unwrap_or(DEFAULT_HEALTH_RETRIES)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Requires {
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub infrastructure: InfrastructureSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

impl ServiceManifest {
    pub fn name(&self) -> &str {
        &self.service.name
    }

    /// Infrastructure requirements with migration and seed paths anchored
    /// to the manifest directory.
    pub fn infrastructure(&self) -> Vec<InfrastructureRequirement> {
        self.requires
            .infrastructure
            .requirements()
            .into_iter()
            .map(|req| match req {
                InfrastructureRequirement::RelationalDatabase {
                    name,
                    migrations,
                    seed,
                } => InfrastructureRequirement::RelationalDatabase {
                    name,
                    migrations: migrations.map(|p| self.anchor(&p)),
                    seed: seed.map(|p| self.anchor(&p)),
                },
                InfrastructureRequirement::DocumentDatabase { name, seed } => {
                    InfrastructureRequirement::DocumentDatabase {
                        name,
                        seed: seed.map(|p| self.anchor(&p)),
                    }
                }
                other => other,
            })
            .collect()
    }

    /// Build context anchored to the manifest directory.
    pub fn build_context(&self) -> PathBuf {
        match &self.service.build.context {
            Some(ctx) => self.anchor(ctx),
            None => self.source_dir.clone(),
        }
    }

    fn anchor(&self, path: &Path) -> PathBuf {
        let expanded = super::expand_tilde(path);
        if expanded.is_absolute() {
            expanded
        } else {
            self.source_dir.join(expanded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDERS: &str = r#"
service:
  name: orders
  type: node
  port: 3000
  health:
    path: /health
    interval: 500ms
    retries: 5
requires:
  services: [auth-service]
  infrastructure:
    postgres:
      database: orders_db
      migrations: db/migrations
env:
  LOG_LEVEL: debug
env_refs:
  DATABASE_URL: postgres://${postgres.host}:${postgres.port}/${self.postgres.database}
secrets:
  STRIPE_KEY:
    description: Stripe test key
"#;

    #[test]
    fn parses_full_manifest() {
        let mut manifest: ServiceManifest = serde_yaml::from_str(ORDERS).unwrap();
        manifest.source_dir = PathBuf::from("/srv/orders");

        assert_eq!(manifest.name(), "orders");
        assert_eq!(manifest.service.port, Some(3000));
        assert_eq!(manifest.requires.services, vec!["auth-service"]);
        assert!(manifest.secrets["STRIPE_KEY"].required);

        let health = manifest.service.health.as_ref().unwrap();
        assert_eq!(health.interval(), Duration::from_millis(500));
        assert_eq!(health.timeout(), DEFAULT_HEALTH_TIMEOUT);
        assert_eq!(health.retries(), 5);

        let infra = manifest.infrastructure();
        assert_eq!(
            infra,
            vec![InfrastructureRequirement::RelationalDatabase {
                name: "orders_db".into(),
                migrations: Some(PathBuf::from("/srv/orders/db/migrations")),
                seed: None,
            }]
        );
        assert_eq!(manifest.build_context(), PathBuf::from("/srv/orders"));
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let yaml = "service:\n  name: a\nrequirez: {}\n";
        assert!(serde_yaml::from_str::<ServiceManifest>(yaml).is_err());
    }
}
