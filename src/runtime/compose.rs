use super::client::DockerClient;
use super::error::Invocation;
use super::{ContainerRuntime, ContainerStatus, ExecOutput, LogStream, RuntimeError, RuntimeHealth};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::OnceCell;

/// `up` may pull or build images.
const START_TIMEOUT: Duration = Duration::from_secs(600);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);
const EXEC_TIMEOUT: Duration = Duration::from_secs(300);

/// Docker Compose command type (v1 or v2)
#[derive(Debug, Clone, Copy)]
enum ComposeCommand {
    V2, // docker compose
    V1, // docker-compose
}

static COMPOSE_COMMAND: OnceCell<ComposeCommand> = OnceCell::const_new();

impl ComposeCommand {
    async fn detect() -> Result<ComposeCommand, RuntimeError> {
        let v2_check = tokio::process::Command::new("docker")
            .args(["compose", "version"])
            .output()
            .await;
        if let Ok(output) = v2_check {
            if output.status.success() {
                return Ok(ComposeCommand::V2);
            }
        }

        let v1_check = tokio::process::Command::new("docker-compose")
            .args(["--version"])
            .output()
            .await;
        if let Ok(output) = v1_check {
            if output.status.success() {
                return Ok(ComposeCommand::V1);
            }
        }

        Err(RuntimeError::ComposeUnavailable)
    }

    async fn get() -> Result<ComposeCommand, RuntimeError> {
        COMPOSE_COMMAND
            .get_or_try_init(|| async { Self::detect().await })
            .await
            .copied()
    }

    fn command_and_args(&self) -> (&'static str, Vec<&'static str>) {
        match self {
            ComposeCommand::V2 => ("docker", vec!["compose"]),
            ComposeCommand::V1 => ("docker-compose", vec![]),
        }
    }
}

/// Container runtime backed by the generated compose file.
#[derive(Debug, Clone)]
pub struct ComposeRuntime {
    project: String,
    compose_file: PathBuf,
    client: DockerClient,
}

impl ComposeRuntime {
    pub fn new(project: impl Into<String>, compose_file: impl Into<PathBuf>) -> Self {
        Self {
            project: project.into(),
            compose_file: compose_file.into(),
            client: DockerClient::new(),
        }
    }

    /// `<compose> [-f file] -p project <args...>`. Without a compose file
    /// (e.g. `down` after it was deleted) the project name alone identifies
    /// the containers.
    async fn command(&self, args: &[&str]) -> Result<(tokio::process::Command, &'static str), RuntimeError> {
        let compose = ComposeCommand::get().await?;
        let (program, base_args) = compose.command_and_args();

        let mut all: Vec<String> = base_args.iter().map(|s| s.to_string()).collect();
        if self.compose_file.exists() {
            all.push("-f".to_string());
            all.push(self.compose_file.to_string_lossy().into_owned());
        }
        all.push("-p".to_string());
        all.push(self.project.clone());
        all.extend(args.iter().map(|s| s.to_string()));

        tracing::debug!(command = %format!("{} {}", program, all.join(" ")), "Running compose");
        let mut command = tokio::process::Command::new(program);
        command.args(&all).kill_on_drop(true);
        Ok((command, program))
    }

    /// Run one compose subcommand (`args[0]`) addressed at `service`.
    async fn run(
        &self,
        service: Option<&str>,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Output, RuntimeError> {
        let invocation = Invocation::new(args.first().copied().unwrap_or_default(), service);
        let (mut command, program) = self.command(args).await?;
        match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) if output.status.success() => Ok(output),
            Ok(Ok(output)) => Err(RuntimeError::from_output(invocation, &output)),
            Ok(Err(source)) => Err(spawn_error(program, source)),
            Err(_) => Err(RuntimeError::TimedOut { invocation, timeout }),
        }
    }

    /// The `compose ps` entry of one service, if its container exists.
    async fn ps_entry(&self, service: &str) -> Result<Option<serde_json::Value>, RuntimeError> {
        let output = self
            .run(Some(service), &["ps", "-a", "--format", "json", service], COMMAND_TIMEOUT)
            .await?;
        Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)).into_iter().next())
    }
}

fn spawn_error(program: &str, source: std::io::Error) -> RuntimeError {
    RuntimeError::Spawn {
        program: program.to_string(),
        source,
    }
}

/// Compose v2 prints a JSON array in older releases and newline-delimited
/// objects in newer ones.
fn parse_ps_output(stdout: &str) -> Vec<serde_json::Value> {
    if let Ok(containers) = serde_json::from_str::<Vec<serde_json::Value>>(stdout) {
        return containers;
    }
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect()
}

fn status_from_entry(entry: &serde_json::Value) -> ContainerStatus {
    let state = entry
        .get("State")
        .and_then(|s| s.as_str())
        .unwrap_or_default()
        .to_lowercase();
    if state == "running" || state.starts_with("up") {
        ContainerStatus::Running
    } else if state == "exited" || state == "dead" || state.starts_with("exit") {
        ContainerStatus::Exited
    } else {
        ContainerStatus::Unknown
    }
}

fn health_from_entry(entry: &serde_json::Value) -> RuntimeHealth {
    match entry.get("Health").and_then(|h| h.as_str()).unwrap_or_default() {
        "healthy" => RuntimeHealth::Healthy,
        "unhealthy" => RuntimeHealth::Unhealthy,
        "starting" => RuntimeHealth::Starting,
        _ => RuntimeHealth::None,
    }
}

#[async_trait]
impl ContainerRuntime for ComposeRuntime {
    async fn start(&self, service: &str) -> Result<(), RuntimeError> {
        self.run(Some(service), &["up", "-d", "--no-deps", service], START_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn stop(&self, service: &str) -> Result<(), RuntimeError> {
        self.run(Some(service), &["stop", service], COMMAND_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn status(&self, service: &str) -> Result<ContainerStatus, RuntimeError> {
        Ok(self
            .ps_entry(service)
            .await?
            .map(|e| status_from_entry(&e))
            .unwrap_or(ContainerStatus::Unknown))
    }

    async fn health(&self, service: &str) -> Result<RuntimeHealth, RuntimeError> {
        Ok(self
            .ps_entry(service)
            .await?
            .map(|e| health_from_entry(&e))
            .unwrap_or(RuntimeHealth::None))
    }

    async fn logs(
        &self,
        service: Option<&str>,
        follow: bool,
        tail: Option<usize>,
    ) -> Result<LogStream, RuntimeError> {
        let tail = tail.map(|n| n.to_string());
        let mut args = vec!["logs", "--no-color"];
        if follow {
            args.push("--follow");
        }
        if let Some(tail) = &tail {
            args.extend(["--tail", tail.as_str()]);
        }
        if let Some(service) = service {
            args.push(service);
        }

        let invocation = Invocation::new("logs", service);
        let (mut command, program) = self.command(&args).await?;
        let mut child = command
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| spawn_error(program, e))?;
        let stdout = child.stdout.take().ok_or_else(|| RuntimeError::ComposeFailed {
            invocation: invocation.clone(),
            exit_code: None,
            detail: "no stdout".to_string(),
        })?;

        // The child is carried in the stream state so it lives (and is killed
        // on drop) together with the stream.
        let lines = BufReader::new(stdout).lines();
        let stream = futures::stream::unfold(
            (lines, child, invocation),
            |(mut lines, child, invocation)| async move {
                match lines.next_line().await {
                    Ok(Some(line)) => Some((Ok(line), (lines, child, invocation))),
                    Ok(None) => None,
                    Err(source) => Some((
                        Err(RuntimeError::LogStream {
                            invocation: invocation.clone(),
                            source,
                        }),
                        (lines, child, invocation),
                    )),
                }
            },
        );
        Ok(stream.boxed())
    }

    async fn exec(
        &self,
        service: &str,
        args: &[String],
        stdin: Option<String>,
    ) -> Result<ExecOutput, RuntimeError> {
        let mut compose_args = vec!["exec", "-T", service];
        compose_args.extend(args.iter().map(String::as_str));
        let invocation = Invocation::new("exec", Some(service));
        let (mut command, program) = self.command(&compose_args).await?;

        command
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = command.spawn().map_err(|e| spawn_error(program, e))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| spawn_error(program, e))?;
            // Close stdin so the command sees EOF.
            drop(pipe);
        }

        let output = match tokio::time::timeout(EXEC_TIMEOUT, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(spawn_error(program, e)),
            Err(_) => {
                return Err(RuntimeError::TimedOut {
                    invocation,
                    timeout: EXEC_TIMEOUT,
                })
            }
        };
        Ok(ExecOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn published_ports(&self) -> Result<BTreeMap<String, u16>, RuntimeError> {
        if !self.client.daemon_healthy(Duration::from_secs(5)).await {
            return Err(RuntimeError::DaemonUnavailable);
        }
        self.client.project_ports(&self.project).await
    }

    async fn stop_all(&self) -> Result<(), RuntimeError> {
        self.run(None, &["stop"], COMMAND_TIMEOUT).await.map(|_| ())
    }

    async fn down(&self, remove_volumes: bool) -> Result<(), RuntimeError> {
        let mut args = vec!["down", "--remove-orphans"];
        if remove_volumes {
            args.push("-v");
        }
        self.run(None, &args, COMMAND_TIMEOUT).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_array_and_ndjson_ps_output() {
        let array = r#"[{"Service":"api","State":"running","Health":"healthy"}]"#;
        let entries = parse_ps_output(array);
        assert_eq!(entries.len(), 1);
        assert_eq!(status_from_entry(&entries[0]), ContainerStatus::Running);
        assert_eq!(health_from_entry(&entries[0]), RuntimeHealth::Healthy);

        let ndjson = "{\"Service\":\"db\",\"State\":\"exited\",\"Health\":\"\"}\n";
        let entries = parse_ps_output(ndjson);
        assert_eq!(status_from_entry(&entries[0]), ContainerStatus::Exited);
        assert_eq!(health_from_entry(&entries[0]), RuntimeHealth::None);

        assert!(parse_ps_output("").is_empty());
    }

    #[test]
    fn unknown_state_is_unknown() {
        let entry = serde_json::json!({"State": "created"});
        assert_eq!(status_from_entry(&entry), ContainerStatus::Unknown);
    }
}
