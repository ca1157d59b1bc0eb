//! Structural checks run when a manifest is loaded.

use super::infra::{InfraKind, InfrastructureRequirement};
use super::{parse_duration_string, ServiceManifest};
use crate::error::{Error, Result};
use std::collections::BTreeSet;

/// Names that cannot be used for services because template tokens would be
/// ambiguous with them.
const RESERVED_NAMES: &[&str] = &["self", "localstack"];

const SUPPORTED_TUNNEL_PROVIDERS: &[&str] = &["ngrok"];

/// True when `s` matches the template identifier grammar `[A-Za-z0-9_-]+`.
pub fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn validate_service_name(name: &str) -> Result<()> {
    if !is_identifier(name) {
        return Err(Error::Config(format!(
            "Invalid service name '{}': use letters, digits, '-' and '_'",
            name
        )));
    }
    if RESERVED_NAMES.contains(&name) || InfraKind::parse(name).is_some() {
        return Err(Error::Config(format!(
            "Service name '{}' is reserved for infrastructure references",
            name
        )));
    }
    Ok(())
}

/// Validate a POSIX environment variable name.
pub fn validate_env_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(Error::Config(
            "Environment variable name cannot be empty".to_string(),
        ));
    };
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(Error::Config(format!(
            "Invalid environment variable name '{}': must start with a letter or underscore",
            name
        )));
    }
    if let Some(bad) = chars.find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(Error::Config(format!(
            "Invalid environment variable name '{}': character '{}' is not allowed",
            name, bad
        )));
    }
    Ok(())
}

pub fn validate_manifest(manifest: &ServiceManifest) -> Result<()> {
    let name = manifest.name();
    validate_service_name(name)?;

    let section = &manifest.service;
    if section.port == Some(0) {
        return Err(Error::Config(format!("Service '{}': port 0 is not allowed", name)));
    }

    if let Some(health) = &section.health {
        if !health.path.starts_with('/') {
            return Err(Error::Config(format!(
                "Service '{}': health path '{}' must start with '/'",
                name, health.path
            )));
        }
        if health.retries == Some(0) {
            return Err(Error::Config(format!(
                "Service '{}': health retries must be at least 1",
                name
            )));
        }
        for (field, value) in [("interval", &health.interval), ("timeout", &health.timeout)] {
            if let Some(v) = value {
                if parse_duration_string(v).is_none() {
                    return Err(Error::Config(format!(
                        "Service '{}': invalid health {} '{}'",
                        name, field, v
                    )));
                }
            }
        }
    }

    for required in &manifest.requires.services {
        if required == name {
            return Err(Error::DependencyCycle(vec![name.to_string(), name.to_string()]));
        }
    }

    for key in manifest.env.keys().chain(manifest.env_refs.keys()) {
        validate_env_name(key)?;
    }
    for key in manifest.secrets.keys() {
        validate_env_name(key)?;
    }
    for key in manifest.env.keys() {
        if manifest.env_refs.contains_key(key) {
            return Err(Error::Config(format!(
                "Service '{}': '{}' is declared in both env and env_refs",
                name, key
            )));
        }
    }
    for key in manifest.secrets.keys() {
        if manifest.env.contains_key(key) || manifest.env_refs.contains_key(key) {
            return Err(Error::Config(format!(
                "Service '{}': secret '{}' collides with an environment variable",
                name, key
            )));
        }
    }
    if manifest.env.contains_key("PORT") || manifest.env_refs.contains_key("PORT") {
        return Err(Error::Config(format!(
            "Service '{}': PORT is assigned by devup; use service.port instead",
            name
        )));
    }

    validate_infrastructure(name, &manifest.infrastructure())
}

fn validate_infrastructure(service: &str, reqs: &[InfrastructureRequirement]) -> Result<()> {
    let mut seen: BTreeSet<(InfraKind, &str)> = BTreeSet::new();

    for req in reqs {
        if let Some(resource) = req.resource_name() {
            if !is_identifier(resource) {
                return Err(Error::Config(format!(
                    "Service '{}': invalid {} name '{}': use letters, digits, '-' and '_'",
                    service,
                    req.kind(),
                    resource
                )));
            }
            if !seen.insert((req.kind(), resource)) {
                return Err(Error::Config(format!(
                    "Service '{}': {} '{}' is declared twice",
                    service,
                    req.kind(),
                    resource
                )));
            }
        }

        match req {
            InfrastructureRequirement::PubSubTopic {
                name,
                subscriptions,
            } => {
                for sub in subscriptions {
                    if sub.protocol.trim().is_empty() || sub.endpoint.trim().is_empty() {
                        return Err(Error::Config(format!(
                            "Service '{}': subscription on topic '{}' needs a protocol and an endpoint",
                            service, name
                        )));
                    }
                }
            }
            InfrastructureRequirement::Tunnel {
                target,
                port,
                provider,
                ..
            } => {
                if !SUPPORTED_TUNNEL_PROVIDERS.contains(&provider.as_str()) {
                    return Err(Error::Config(format!(
                        "Service '{}': unsupported tunnel provider '{}' (supported: {})",
                        service,
                        provider,
                        SUPPORTED_TUNNEL_PROVIDERS.join(", ")
                    )));
                }
                if target.is_empty() {
                    return Err(Error::Config(format!(
                        "Service '{}': tunnel target cannot be empty",
                        service
                    )));
                }
                if *port == Some(0) {
                    return Err(Error::Config(format!(
                        "Service '{}': tunnel port 0 is not allowed",
                        service
                    )));
                }
            }
            _ => {}
        }
    }

    Ok(())
}
