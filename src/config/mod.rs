//! Manifest model and registry configuration.
//!
//! - `manifest` - per-service manifest (`ServiceManifest`)
//! - `infra` - infrastructure requirements (`InfrastructureRequirement`)
//! - `registry` - service registry and the `ManifestSource` seam
//! - `settings` - registry settings with `DEVUP_*` overrides
//! - `parser` - YAML loading
//! - `validation` - structural checks at load time

pub mod infra;
pub mod manifest;
pub mod registry;
pub mod settings;
pub mod validation;

mod duration;
mod parser;

pub use duration::*;
pub use infra::{InfraKind, InfrastructureRequirement, Subscription};
pub use manifest::{BuildSpec, HealthSpec, Requires, SecretSpec, ServiceManifest, ServiceSection};
pub use parser::Parser;
pub use registry::{ManifestSource, Registry};
pub use settings::Settings;

use std::path::{Path, PathBuf};

/// Expand a leading `~` to the home directory.
pub(crate) fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if s == "~" {
        return dirs::home_dir().unwrap_or_else(|| path.to_path_buf());
    }
    match (s.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_home_prefix() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde(Path::new("~")), home);
        assert_eq!(expand_tilde(Path::new("~/svc/a.yaml")), home.join("svc/a.yaml"));
        assert_eq!(expand_tilde(Path::new("./a.yaml")), PathBuf::from("./a.yaml"));
    }
}
