use crate::config::ServiceManifest;
use crate::dependency::Engine;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Files read by `EnvSecretStore`, lowest priority first.
const ENV_FILES: &[&str] = &[".env", ".env.local"];

/// Lookup of secret values by name.
pub trait SecretStore: Send + Sync {
    fn lookup(&self, name: &str) -> Option<String>;
}

/// Process environment layered over `.env` files next to the registry.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretStore {
    file_values: BTreeMap<String, String>,
}

impl EnvSecretStore {
    pub fn load(dir: &Path) -> Self {
        let mut file_values = BTreeMap::new();
        for name in ENV_FILES {
            file_values.extend(load_env_file(&dir.join(name)));
        }
        Self { file_values }
    }
}

impl SecretStore for EnvSecretStore {
    fn lookup(&self, name: &str) -> Option<String> {
        std::env::var(name)
            .ok()
            .or_else(|| self.file_values.get(name).cloned())
    }
}

impl SecretStore for BTreeMap<String, String> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

fn load_env_file(path: &Path) -> BTreeMap<String, String> {
    if !path.exists() {
        return BTreeMap::new();
    }
    match dotenvy::from_path_iter(path) {
        Ok(iter) => iter.filter_map(|r| r.ok()).collect(),
        Err(e) => {
            tracing::warn!("Ignoring unreadable env file {}: {}", path.display(), e);
            BTreeMap::new()
        }
    }
}

/// Collect the secrets a service declares.
///
/// Present secrets (required or optional) are returned; every missing
/// required secret is reported in one `MissingSecrets` error.
pub fn check_secrets(
    manifest: &ServiceManifest,
    store: &dyn SecretStore,
) -> Result<BTreeMap<String, String>> {
    let mut present = BTreeMap::new();
    let mut missing = Vec::new();

    for (name, spec) in &manifest.secrets {
        match store.lookup(name) {
            Some(value) => {
                present.insert(name.clone(), value);
            }
            None if spec.required => missing.push((name.clone(), spec.description.clone())),
            None => {}
        }
    }

    if missing.is_empty() {
        Ok(present)
    } else {
        Err(Error::MissingSecrets {
            service: manifest.name().to_string(),
            missing,
        })
    }
}

/// Secrets an engine container needs, e.g. the tunnel agent's auth token.
pub fn check_engine_secrets(
    engine: Engine,
    store: &dyn SecretStore,
) -> Result<BTreeMap<String, String>> {
    let mut present = BTreeMap::new();
    let mut missing = Vec::new();
    for name in engine.required_secrets() {
        match store.lookup(name) {
            Some(value) => {
                present.insert(name.to_string(), value);
            }
            None => missing.push((
                name.to_string(),
                Some(format!("required by the {} container", engine)),
            )),
        }
    }
    if missing.is_empty() {
        Ok(present)
    } else {
        Err(Error::MissingSecrets {
            service: engine.id().to_string(),
            missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn manifest(yaml: &str) -> ServiceManifest {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn aggregates_every_missing_required_secret() {
        let m = manifest(
            r#"
service:
  name: billing
secrets:
  STRIPE_KEY:
    description: Stripe test key
  SMTP_PASSWORD: {}
  SENTRY_DSN:
    required: false
"#,
        );
        let store = BTreeMap::new();
        match check_secrets(&m, &store).unwrap_err() {
            Error::MissingSecrets { service, missing } => {
                assert_eq!(service, "billing");
                let names: Vec<&str> = missing.iter().map(|(n, _)| n.as_str()).collect();
                assert_eq!(names, vec!["SMTP_PASSWORD", "STRIPE_KEY"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn returns_present_secrets() {
        let m = manifest(
            "service:\n  name: a\nsecrets:\n  TOKEN: {}\n  OPTIONAL:\n    required: false\n",
        );
        let store = BTreeMap::from([("TOKEN".to_string(), "t0k".to_string())]);
        let present = check_secrets(&m, &store).unwrap();
        assert_eq!(present.len(), 1);
        assert_eq!(present["TOKEN"], "t0k");
    }

    #[test]
    fn env_files_are_layered() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".env"), "DEVUP_TEST_A=base\nDEVUP_TEST_B=base\n").unwrap();
        fs::write(dir.path().join(".env.local"), "DEVUP_TEST_B=local\n").unwrap();

        let store = EnvSecretStore::load(dir.path());
        assert_eq!(store.lookup("DEVUP_TEST_A").as_deref(), Some("base"));
        assert_eq!(store.lookup("DEVUP_TEST_B").as_deref(), Some("local"));
        assert!(store.lookup("DEVUP_TEST_MISSING_SECRET").is_none());
    }

    #[test]
    fn tunnel_needs_auth_token() {
        let err = check_engine_secrets(Engine::Tunnel, &BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains("NGROK_AUTHTOKEN"));
        assert!(check_engine_secrets(Engine::Redis, &BTreeMap::new())
            .unwrap()
            .is_empty());
    }
}
