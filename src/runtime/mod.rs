//! Container runtime seam.
//!
//! Every container is addressed by its compose service key (the node
//! identifier with `/` replaced by `-`).

pub mod client;
pub mod compose;
pub mod error;

pub use client::DockerClient;
pub use compose::ComposeRuntime;
pub use error::RuntimeError;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::fmt;

/// Lines of container output.
pub type LogStream = BoxStream<'static, Result<String, RuntimeError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Running,
    Exited,
    Unknown,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Exited => write!(f, "exited"),
            ContainerStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Health reported by the runtime's own healthcheck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeHealth {
    Healthy,
    Unhealthy,
    Starting,
    /// No healthcheck configured.
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create or start one container from the current composition document.
    async fn start(&self, service: &str) -> Result<(), RuntimeError>;

    async fn stop(&self, service: &str) -> Result<(), RuntimeError>;

    async fn status(&self, service: &str) -> Result<ContainerStatus, RuntimeError>;

    async fn health(&self, service: &str) -> Result<RuntimeHealth, RuntimeError>;

    /// Output of one container, or of the whole project when `service` is `None`.
    async fn logs(
        &self,
        service: Option<&str>,
        follow: bool,
        tail: Option<usize>,
    ) -> Result<LogStream, RuntimeError>;

    /// Run a command inside a running container, optionally feeding `stdin`.
    async fn exec(
        &self,
        service: &str,
        args: &[String],
        stdin: Option<String>,
    ) -> Result<ExecOutput, RuntimeError>;

    /// Host ports published by this project's running containers, keyed by
    /// container name.
    async fn published_ports(&self) -> Result<BTreeMap<String, u16>, RuntimeError>;

    /// Stop every container of the project, keeping them and their volumes.
    async fn stop_all(&self) -> Result<(), RuntimeError>;

    /// Remove containers and the network; named volumes only when asked.
    async fn down(&self, remove_volumes: bool) -> Result<(), RuntimeError>;
}
