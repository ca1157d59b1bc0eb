//! Registry-level settings (`settings:` block of `devup.yaml`).

use super::parse_duration_string;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_PROJECT: &str = "devup";
const DEFAULT_PORT_BASE: u16 = 20000;
const DEFAULT_PARALLELISM: usize = 4;
const DEFAULT_LEVEL_TIMEOUT: Duration = Duration::from_secs(300);

const DEFAULT_ENGINE_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_ENGINE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_ENGINE_RETRIES: u32 = 60;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Compose project name and container-name prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Ports are allocated above this base when a declared port is taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_base: Option<u16>,
    /// Maximum number of nodes started concurrently within one level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<usize>,
    /// Deadline for a whole level to settle (e.g. "5m").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level_timeout: Option<String>,
    /// Health polling for infrastructure engines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_health: Option<EngineHealth>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineHealth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

impl Settings {
    pub fn project(&self) -> &str {
        self.project.as_deref().unwrap_or(DEFAULT_PROJECT)
    }

    pub fn port_base(&self) -> u16 {
        self.port_base.unwrap_or(DEFAULT_PORT_BASE)
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism.unwrap_or(DEFAULT_PARALLELISM).max(1)
    }

    pub fn level_timeout(&self) -> Duration {
        self.level_timeout
            .as_deref()
            .and_then(parse_duration_string)
            .unwrap_or(DEFAULT_LEVEL_TIMEOUT)
    }

    pub fn engine_interval(&self) -> Duration {
        self.engine_health
            .as_ref()
            .and_then(|h| h.interval.as_deref())
            .and_then(parse_duration_string)
            .unwrap_or(DEFAULT_ENGINE_INTERVAL)
    }

    pub fn engine_timeout(&self) -> Duration {
        self.engine_health
            .as_ref()
            .and_then(|h| h.timeout.as_deref())
            .and_then(parse_duration_string)
            .unwrap_or(DEFAULT_ENGINE_TIMEOUT)
    }

    pub fn engine_retries(&self) -> u32 {
        self.engine_health
            .as_ref()
            .and_then(|h| h.retries)
            .unwrap_or(DEFAULT_ENGINE_RETRIES)
    }

    /// Apply `DEVUP_PROJECT`, `DEVUP_PORT_BASE` and `DEVUP_PARALLELISM`.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(project) = lookup("DEVUP_PROJECT") {
            self.project = Some(project);
        }
        if let Some(base) = lookup("DEVUP_PORT_BASE") {
            let parsed = base.parse::<u16>().map_err(|_| {
                Error::Config(format!("DEVUP_PORT_BASE must be a port number, got '{}'", base))
            })?;
            self.port_base = Some(parsed);
        }
        if let Some(parallelism) = lookup("DEVUP_PARALLELISM") {
            let parsed = parallelism.parse::<usize>().map_err(|_| {
                Error::Config(format!(
                    "DEVUP_PARALLELISM must be a positive integer, got '{}'",
                    parallelism
                ))
            })?;
            self.parallelism = Some(parsed);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let project = self.project();
        let valid = !project.is_empty()
            && project
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
            && project
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        if !valid {
            return Err(Error::Config(format!(
                "Invalid project name '{}': use lowercase letters, digits, '-' and '_'",
                project
            )));
        }

        if self.parallelism == Some(0) {
            return Err(Error::Config("settings.parallelism must be at least 1".to_string()));
        }

        for (field, value) in [
            ("settings.level_timeout", self.level_timeout.as_deref()),
            (
                "settings.engine_health.interval",
                self.engine_health.as_ref().and_then(|h| h.interval.as_deref()),
            ),
            (
                "settings.engine_health.timeout",
                self.engine_health.as_ref().and_then(|h| h.timeout.as_deref()),
            ),
        ] {
            if let Some(v) = value {
                if parse_duration_string(v).is_none() {
                    return Err(Error::Config(format!(
                        "Invalid duration '{}' for {}",
                        v, field
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let s = Settings::default();
        assert_eq!(s.project(), "devup");
        assert_eq!(s.port_base(), 20000);
        assert_eq!(s.parallelism(), 4);
        assert_eq!(s.level_timeout(), Duration::from_secs(300));
        assert_eq!(s.engine_retries(), 60);
        s.validate().unwrap();
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = [("DEVUP_PROJECT", "shop"), ("DEVUP_PORT_BASE", "31000")]
            .into_iter()
            .collect();
        let mut s = Settings {
            project: Some("other".into()),
            ..Default::default()
        };
        s.apply_overrides(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(s.project(), "shop");
        assert_eq!(s.port_base(), 31000);
    }

    #[test]
    fn bad_override_is_config_error() {
        let mut s = Settings::default();
        let err = s
            .apply_overrides(|k| (k == "DEVUP_PORT_BASE").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("DEVUP_PORT_BASE"));
    }

    #[test]
    fn rejects_bad_project_and_duration() {
        let s = Settings {
            project: Some("My Project".into()),
            ..Default::default()
        };
        assert!(s.validate().is_err());

        let s = Settings {
            level_timeout: Some("forever".into()),
            ..Default::default()
        };
        assert!(s.validate().unwrap_err().to_string().contains("level_timeout"));
    }
}
