use super::{expand_tilde, Parser, ServiceManifest, Settings};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The central service registry (`devup.yaml`): service name to manifest path.
///
/// ```yaml
/// services:
///   orders: ./orders/service.yaml
///   auth-service: ../auth/service.yaml
/// settings:
///   project: shop
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Registry {
    #[serde(default)]
    pub services: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub settings: Settings,

    /// Directory containing the registry file.
    #[serde(skip)]
    pub root_dir: PathBuf,
}

impl Registry {
    /// Absolute manifest path for a registered service.
    pub fn manifest_path(&self, name: &str) -> Option<PathBuf> {
        self.services.get(name).map(|p| {
            let expanded = expand_tilde(p);
            if expanded.is_absolute() {
                expanded
            } else {
                self.root_dir.join(expanded)
            }
        })
    }

    /// Where the generated composition document lives.
    pub fn compose_path(&self) -> PathBuf {
        self.root_dir.join(".devup").join("compose.yaml")
    }
}

/// Anything that can hand out manifests by service name.
pub trait ManifestSource {
    /// Every registered service name, sorted.
    fn service_names(&self) -> Vec<String>;

    /// Load a manifest. `Ok(None)` means the name is not registered.
    fn load_manifest(&self, name: &str) -> Result<Option<ServiceManifest>>;
}

impl ManifestSource for Registry {
    fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    fn load_manifest(&self, name: &str) -> Result<Option<ServiceManifest>> {
        let Some(path) = self.manifest_path(name) else {
            return Ok(None);
        };
        let manifest = Parser::new().load_manifest(&path)?;
        check_name(name, &manifest, &path)?;
        Ok(Some(manifest))
    }
}

/// In-memory registry keyed by service name.
impl ManifestSource for BTreeMap<String, ServiceManifest> {
    fn service_names(&self) -> Vec<String> {
        self.keys().cloned().collect()
    }

    fn load_manifest(&self, name: &str) -> Result<Option<ServiceManifest>> {
        Ok(self.get(name).cloned())
    }
}

fn check_name(registered: &str, manifest: &ServiceManifest, path: &Path) -> Result<()> {
    if manifest.name() != registered {
        return Err(Error::Config(format!(
            "Manifest '{}' declares service '{}' but is registered as '{}'",
            path.display(),
            manifest.name(),
            registered
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn loads_manifest_relative_to_registry() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("orders")).unwrap();
        fs::write(
            dir.path().join("orders/service.yaml"),
            "service:\n  name: orders\n  port: 3000\n",
        )
        .unwrap();

        let registry = Registry {
            services: [("orders".to_string(), PathBuf::from("orders/service.yaml"))]
                .into_iter()
                .collect(),
            root_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let manifest = registry.load_manifest("orders").unwrap().unwrap();
        assert_eq!(manifest.service.port, Some(3000));
        assert_eq!(manifest.source_dir, dir.path().join("orders"));
        assert!(registry.load_manifest("billing").unwrap().is_none());
    }

    #[test]
    fn registered_name_must_match_manifest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("svc.yaml"), "service:\n  name: billing\n").unwrap();
        let registry = Registry {
            services: [("orders".to_string(), PathBuf::from("svc.yaml"))]
                .into_iter()
                .collect(),
            root_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let err = registry.load_manifest("orders").unwrap_err();
        assert!(err.to_string().contains("registered as 'orders'"));
    }
}
