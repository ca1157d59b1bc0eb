// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings on fields that are only
// read by the Display impl.
#![allow(unused_assignments)]

use crate::runtime::RuntimeError;
use miette::Diagnostic;
use std::io;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(devup::config::invalid),
        help("Check the registry file and the service manifests it points to")
    )]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unknown service '{name}'{}",
        .referenced_by.as_ref().map(|by| format!(" (required by '{}')", by)).unwrap_or_default()
    )]
    #[diagnostic(
        code(devup::service::unknown),
        help("Add '{name}' to the services map of the registry file")
    )]
    UnknownService {
        name: String,
        referenced_by: Option<String>,
    },

    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    #[diagnostic(
        code(devup::dependency::cycle),
        help("Services cannot require each other in a cycle. Review the requires.services lists")
    )]
    DependencyCycle(Vec<String>),

    #[error("Provisioning conflict for '{node}': {reason}")]
    #[diagnostic(
        code(devup::provision::conflict),
        help("The resource already exists with a different shape. Remove it with `devup reset -v` or align the manifests")
    )]
    ProvisioningConflict { node: String, reason: String },

    #[error("Provisioning failed for '{node}': {reason}")]
    #[diagnostic(code(devup::provision::failed))]
    Provisioning { node: String, reason: String },

    #[error("Migration '{migration}' failed for database '{database}': {reason}")]
    #[diagnostic(
        code(devup::provision::migration),
        help("Earlier migrations stay applied. Fix the file and run `devup up` again")
    )]
    Migration {
        database: String,
        migration: String,
        reason: String,
    },

    #[error("Seed failed for database '{database}': {reason}")]
    #[diagnostic(code(devup::provision::seed))]
    Seed { database: String, reason: String },

    #[error("Unresolved reference '{token}' in service '{service}': {reason}")]
    #[diagnostic(
        code(devup::reference::unresolved),
        help("References must name a declared dependency and a known attribute, e.g. ${{postgres.host}}")
    )]
    UnresolvedReference {
        service: String,
        token: String,
        reason: String,
    },

    #[error("Service '{service}' is missing required secrets: {}",
        .missing.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>().join(", ")
    )]
    #[diagnostic(
        code(devup::secret::missing),
        help("Export the secrets or add them to a .env file next to the registry")
    )]
    MissingSecrets {
        service: String,
        missing: Vec<(String, Option<String>)>,
    },

    #[error("Port allocation failed: {0}")]
    #[diagnostic(code(devup::port::allocation_failed))]
    PortAllocation(String),

    #[error(transparent)]
    #[diagnostic(code(devup::runtime::error))]
    Runtime(#[from] RuntimeError),

    #[error("{} requested service(s) did not become healthy:\n{}",
        .0.len(),
        .0.iter().map(|f| format!("  - {}", f)).collect::<Vec<_>>().join("\n")
    )]
    #[diagnostic(
        code(devup::orchestrator::not_healthy),
        help("Inspect the failing node with `devup logs <name>`")
    )]
    NotHealthy(Vec<NodeFailure>),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Multiple errors occurred:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Multiple(Vec<Error>),
}

/// A requested service that did not reach `Healthy`, with the node that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    pub service: String,
    pub state: String,
    pub root_cause: String,
    pub detail: String,
}

impl std::fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.root_cause == self.service {
            write!(f, "{} is {}: {}", self.service, self.state, self.detail)
        } else {
            write!(
                f,
                "{} was {} because '{}' {}",
                self.service, self.state, self.root_cause, self.detail
            )
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Collapses a list of errors into one, keeping a single error unwrapped.
    pub fn aggregate(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Multiple(errors)),
        }
    }

    /// True for errors detected while loading and resolving configuration,
    /// before the container runtime was touched.
    pub fn is_config_time(&self) -> bool {
        match self {
            Error::Config(_)
            | Error::Parse(_)
            | Error::Yaml(_)
            | Error::UnknownService { .. }
            | Error::DependencyCycle(_)
            | Error::UnresolvedReference { .. }
            | Error::MissingSecrets { .. } => true,
            Error::Multiple(errors) => errors.iter().all(Error::is_config_time),
            _ => false,
        }
    }

    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::UnknownService { name, .. } => Some(format!(
                "Register the service in devup.yaml:\n\nservices:\n  {}: path/to/{}/service.yaml",
                name, name
            )),
            Error::DependencyCycle(path) => Some(format!(
                "Break the cycle between: {}",
                path.join(", ")
            )),
            Error::MissingSecrets { missing, .. } => {
                let lines: Vec<String> = missing
                    .iter()
                    .map(|(name, description)| match description {
                        Some(d) => format!("  {}=...   # {}", name, d),
                        None => format!("  {}=...", name),
                    })
                    .collect();
                Some(format!("Add to .env:\n{}", lines.join("\n")))
            }
            Error::UnresolvedReference { service, .. } => Some(format!(
                "Declare the referenced service or infrastructure under requires: in the manifest of '{}'",
                service
            )),
            Error::ProvisioningConflict { .. } => Some(
                "To drop existing data and recreate resources run:\n\n    devup reset -v".to_string(),
            ),
            Error::NotHealthy(failures) => failures.first().map(|f| {
                format!("Check the logs of the failing node with: devup logs {}", f.root_cause)
            }),
            Error::Config(msg) if msg.contains("Could not find") => Some(
                "Create a devup.yaml registry in the project root or pass --registry".to_string(),
            ),
            Error::Runtime(e) => Some(e.hint().to_string()),
            Error::PortAllocation(_) => Some(
                "Raise settings.port_base in devup.yaml or free some ports".to_string(),
            ),
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_names_every_node() {
        let err = Error::DependencyCycle(vec![
            "api".to_string(),
            "auth".to_string(),
            "api".to_string(),
        ]);
        assert_eq!(err.to_string(), "Dependency cycle detected: api -> auth -> api");
    }

    #[test]
    fn missing_secrets_lists_all_names() {
        let err = Error::MissingSecrets {
            service: "billing".to_string(),
            missing: vec![
                ("STRIPE_KEY".to_string(), Some("Stripe API key".to_string())),
                ("SMTP_PASSWORD".to_string(), None),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("billing"));
        assert!(msg.contains("STRIPE_KEY, SMTP_PASSWORD"));

        let hint = err.suggestion().unwrap();
        assert!(hint.contains("STRIPE_KEY=...   # Stripe API key"));
        assert!(hint.contains("SMTP_PASSWORD=..."));
    }

    #[test]
    fn not_healthy_names_root_cause() {
        let err = Error::NotHealthy(vec![NodeFailure {
            service: "api".to_string(),
            state: "skipped".to_string(),
            root_cause: "auth-service".to_string(),
            detail: "is unhealthy".to_string(),
        }]);
        let msg = err.to_string();
        assert!(msg.contains("api was skipped because 'auth-service' is unhealthy"));
        assert!(err.with_suggestion().contains("devup logs auth-service"));
    }

    #[test]
    fn aggregate_unwraps_single_error() {
        assert!(Error::aggregate(vec![]).is_none());
        let one = Error::aggregate(vec![Error::Config("x".into())]).unwrap();
        assert!(matches!(one, Error::Config(_)));
        let many =
            Error::aggregate(vec![Error::Config("a".into()), Error::Parse("b".into())]).unwrap();
        assert!(matches!(many, Error::Multiple(ref v) if v.len() == 2));
    }

    #[test]
    fn config_time_classification() {
        assert!(Error::DependencyCycle(vec![]).is_config_time());
        assert!(Error::Multiple(vec![
            Error::Config("a".into()),
            Error::UnresolvedReference {
                service: "s".into(),
                token: "${x.y}".into(),
                reason: "r".into()
            }
        ])
        .is_config_time());
        assert!(!Error::Cancelled("up".into()).is_config_time());
    }
}
