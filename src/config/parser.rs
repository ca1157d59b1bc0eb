use super::{validation, Registry, ServiceManifest};
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

const REGISTRY_FILE: &str = "devup.yaml";
const REGISTRY_FILE_ALT: &str = "devup.yml";

pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Find the registry file starting from the current directory
    pub fn find_registry_file(&self) -> Result<PathBuf> {
        let current_dir = std::env::current_dir()?;
        Self::find_registry_in_dir(&current_dir)
    }

    pub fn find_registry_in_dir(dir: &Path) -> Result<PathBuf> {
        let registry_path = dir.join(REGISTRY_FILE);
        if registry_path.exists() {
            return Ok(registry_path);
        }

        let alt_path = dir.join(REGISTRY_FILE_ALT);
        if alt_path.exists() {
            return Ok(alt_path);
        }

        if let Some(parent) = dir.parent() {
            return Self::find_registry_in_dir(parent);
        }

        Err(Error::Config(format!(
            "Could not find {} in current directory or any parent",
            REGISTRY_FILE
        )))
    }

    /// Load the registry and apply `DEVUP_*` overrides to its settings.
    pub fn load_registry<P: AsRef<Path>>(&self, path: P) -> Result<Registry> {
        let path = path.as_ref();
        let content = read(path, "registry")?;
        let root_dir = parent_dir(path)?;
        let mut registry = self.parse_registry(&content, root_dir)?;
        registry.settings.apply_env_overrides()?;
        registry.settings.validate()?;
        Ok(registry)
    }

    pub fn parse_registry(&self, content: &str, root_dir: PathBuf) -> Result<Registry> {
        let mut registry: Registry = serde_yaml::from_str(content)
            .map_err(|e| Error::Parse(format!("Failed to parse registry: {}", e)))?;
        registry.root_dir = root_dir;

        for name in registry.services.keys() {
            validation::validate_service_name(name)?;
        }
        Ok(registry)
    }

    /// Load and validate a service manifest.
    pub fn load_manifest<P: AsRef<Path>>(&self, path: P) -> Result<ServiceManifest> {
        let path = path.as_ref();
        let content = read(path, "manifest")?;
        let source_dir = parent_dir(path)?;
        self.parse_manifest(&content, source_dir).map_err(|e| match e {
            Error::Parse(msg) => Error::Parse(format!("{}: {}", path.display(), msg)),
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    pub fn parse_manifest(&self, content: &str, source_dir: PathBuf) -> Result<ServiceManifest> {
        let mut manifest: ServiceManifest = serde_yaml::from_str(content)
            .map_err(|e| Error::Parse(format!("Failed to parse service manifest: {}", e)))?;
        manifest.source_dir = source_dir;
        validation::validate_manifest(&manifest)?;
        Ok(manifest)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

fn read(path: &Path, what: &str) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read {} file '{}': {}",
            what,
            path.display(),
            e
        ))
    })
}

fn parent_dir(path: &Path) -> Result<PathBuf> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Config(format!("Invalid path '{}'", path.display())))?;
    if parent.as_os_str().is_empty() {
        Ok(std::env::current_dir()?)
    } else {
        Ok(parent.to_path_buf())
    }
}
