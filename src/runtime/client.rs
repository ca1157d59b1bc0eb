//! Thin wrapper over the `docker` CLI for queries compose does not cover.

use super::error::Invocation;
use super::RuntimeError;
use std::collections::BTreeMap;
use std::process::Output;
use std::time::Duration;

const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default)]
pub struct DockerClient;

impl DockerClient {
    pub fn new() -> Self {
        DockerClient
    }

    /// Run a docker command with a timeout, returning raw Output.
    async fn run(&self, args: &[&str], timeout: Duration) -> Result<Output, RuntimeError> {
        let result = tokio::time::timeout(
            timeout,
            tokio::process::Command::new("docker").args(args).output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(source)) => Err(RuntimeError::Spawn {
                program: "docker".to_string(),
                source,
            }),
            Err(_) => Err(RuntimeError::TimedOut {
                invocation: query(args),
                timeout,
            }),
        }
    }

    /// Run a docker command with a timeout, returning Output only if exit 0.
    async fn run_success(&self, args: &[&str], timeout: Duration) -> Result<Output, RuntimeError> {
        let output = self.run(args, timeout).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(RuntimeError::from_output(query(args), &output))
        }
    }

    pub async fn daemon_healthy(&self, timeout: Duration) -> bool {
        match self
            .run(&["info", "--format", "{{.ServerVersion}}"], timeout)
            .await
        {
            Ok(o) => o.status.success(),
            Err(_) => false,
        }
    }

    /// Host ports published by the running containers of a compose project,
    /// keyed by container name.
    pub async fn project_ports(&self, project: &str) -> Result<BTreeMap<String, u16>, RuntimeError> {
        let filter = format!("label=com.docker.compose.project={}", project);
        let output = self
            .run_success(
                &["ps", "--filter", &filter, "--format", "{{.Names}}\t{{.Ports}}"],
                QUERY_TIMEOUT,
            )
            .await?;

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| {
                let (name, ports) = line.split_once('\t')?;
                Some((name.trim().to_string(), parse_published_port(ports)?))
            })
            .collect())
    }
}

/// A docker query is project-wide; its action is the docker subcommand.
fn query(args: &[&str]) -> Invocation {
    Invocation::new(
        format!("docker {}", args.first().copied().unwrap_or_default()),
        None,
    )
}

/// First host port in a `docker ps` ports column, e.g.
/// `0.0.0.0:20001->20001/tcp, :::20001->20001/tcp` gives 20001.
pub fn parse_published_port(ports: &str) -> Option<u16> {
    ports.split(',').find_map(|mapping| {
        let (host, _) = mapping.trim().split_once("->")?;
        host.rsplit(':').next()?.parse().ok()
    })
}
