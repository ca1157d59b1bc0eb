use std::process::Output;
use std::time::Duration;

/// What the runtime was asked to do when a call failed: the compose
/// subcommand (or docker query) and the service it addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub action: String,
    /// Compose service key, or `None` for project-wide calls.
    pub service: Option<String>,
}

impl Invocation {
    pub fn new(action: impl Into<String>, service: Option<&str>) -> Self {
        Self {
            action: action.into(),
            service: service.map(str::to_string),
        }
    }

    fn target(&self) -> String {
        match &self.service {
            Some(service) => format!("'{}'", service),
            None => "the project".to_string(),
        }
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "`{}` on {}", self.action, self.target())
    }
}

/// Failure of a container runtime call.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("{invocation} did not finish within {}s", .timeout.as_secs())]
    TimedOut {
        invocation: Invocation,
        timeout: Duration,
    },

    #[error("{invocation} failed{}: {detail}", .exit_code.map(|c| format!(" (exit {})", c)).unwrap_or_default())]
    ComposeFailed {
        invocation: Invocation,
        exit_code: Option<i32>,
        detail: String,
    },

    /// The image could not be pulled or built.
    #[error("{invocation} failed: image unavailable: {detail}")]
    ImageUnavailable { invocation: Invocation, detail: String },

    /// A published host port is held by something outside the project.
    #[error("{invocation} failed: host port already in use: {detail}")]
    PortInUse { invocation: Invocation, detail: String },

    #[error("could not run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("log stream of {target} broke: {source}", target = .invocation.target())]
    LogStream {
        invocation: Invocation,
        #[source]
        source: std::io::Error,
    },

    #[error("the Docker daemon is not reachable")]
    DaemonUnavailable,

    #[error("neither `docker compose` nor `docker-compose` is installed")]
    ComposeUnavailable,
}

impl RuntimeError {
    /// Classify a non-zero exit by what compose printed on stderr.
    pub fn from_output(invocation: Invocation, output: &Output) -> Self {
        let detail = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let lower = detail.to_lowercase();
        if lower.contains("cannot connect to the docker daemon")
            || lower.contains("is the docker daemon running")
        {
            RuntimeError::DaemonUnavailable
        } else if lower.contains("pull access denied")
            || lower.contains("manifest unknown")
            || lower.contains("no such image")
        {
            RuntimeError::ImageUnavailable { invocation, detail }
        } else if lower.contains("port is already allocated")
            || lower.contains("address already in use")
        {
            RuntimeError::PortInUse { invocation, detail }
        } else {
            RuntimeError::ComposeFailed {
                invocation,
                exit_code: output.status.code(),
                detail,
            }
        }
    }

    /// Hint for the user, specific to the failure mode.
    pub fn hint(&self) -> &'static str {
        match self {
            RuntimeError::DaemonUnavailable => "Start Docker and check it with `docker info`",
            RuntimeError::ComposeUnavailable => "Install the Docker Compose plugin (`docker compose version`)",
            RuntimeError::ImageUnavailable { .. } => {
                "Check service.build.image in the manifest, or run `docker login` for private registries"
            }
            RuntimeError::PortInUse { .. } => {
                "Stop whatever holds the port, or raise settings.port_base in devup.yaml"
            }
            RuntimeError::TimedOut { .. } => "Inspect the container with `devup logs <name>`",
            _ => "Check that Docker is running: docker ps",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    fn output(code: i32, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn failure_names_action_and_service() {
        let err = RuntimeError::from_output(
            Invocation::new("up", Some("api")),
            &output(1, "container exited\n"),
        );
        assert_eq!(err.to_string(), "`up` on 'api' failed (exit 1): container exited");

        let err = RuntimeError::TimedOut {
            invocation: Invocation::new("down", None),
            timeout: Duration::from_secs(120),
        };
        assert_eq!(err.to_string(), "`down` on the project did not finish within 120s");
    }

    #[test]
    fn stderr_is_classified() {
        let up = || Invocation::new("up", Some("postgres"));
        assert!(matches!(
            RuntimeError::from_output(
                up(),
                &output(1, "Cannot connect to the Docker daemon at unix:///var/run/docker.sock")
            ),
            RuntimeError::DaemonUnavailable
        ));
        assert!(matches!(
            RuntimeError::from_output(up(), &output(18, "pull access denied for shop/api")),
            RuntimeError::ImageUnavailable { .. }
        ));
        let err = RuntimeError::from_output(
            up(),
            &output(1, "Bind for 0.0.0.0:36001 failed: port is already allocated"),
        );
        assert!(matches!(err, RuntimeError::PortInUse { .. }));
        assert!(err.hint().contains("port_base"));
    }
}
