//! Shared fixtures: an on-disk registry in a temp dir and a scripted
//! container runtime.

#![allow(dead_code)]

use async_trait::async_trait;
use devup::provision::MemoryBackend;
use devup::runtime::{ContainerStatus, ExecOutput, LogStream, RuntimeError, RuntimeHealth};
use devup::{ContainerRuntime, Parser, Stack};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Fast engine polling so tests never wait on defaults.
pub const SETTINGS: &str = r#"
settings:
  project: shop
  port_base: 36000
  level_timeout: 20s
  engine_health:
    interval: 10ms
    timeout: 200ms
    retries: 3
"#;

/// A registry on disk: `devup.yaml` plus one directory per service.
pub struct Workspace {
    pub dir: TempDir,
    services: Vec<String>,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
            services: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write `<name>/service.yaml` and register it.
    pub fn service(mut self, name: &str, manifest: &str) -> Self {
        let dir = self.root().join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("service.yaml"), manifest).unwrap();
        self.services.push(name.to_string());
        self
    }

    /// Write an extra file relative to a service directory.
    pub fn file(self, path: &str, content: &str) -> Self {
        let path = self.root().join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
        self
    }

    pub fn registry_path(&self) -> PathBuf {
        let mut content = String::from("services:\n");
        for name in &self.services {
            content.push_str(&format!("  {}: ./{}/service.yaml\n", name, name));
        }
        content.push_str(SETTINGS);
        let path = self.root().join("devup.yaml");
        fs::write(&path, content).unwrap();
        path
    }

    /// A stack over the fake runtime and an in-memory backend.
    pub fn stack(&self, runtime: Arc<FakeRuntime>, backend: Arc<MemoryBackend>) -> Stack {
        let registry = Parser::new().load_registry(self.registry_path()).unwrap();
        Stack::new(registry, runtime, Arc::new(BTreeMap::<String, String>::new())).with_backend(backend)
    }

    pub fn compose_path(&self) -> PathBuf {
        self.root().join(".devup").join("compose.yaml")
    }

    /// The written composition document as YAML.
    pub fn compose(&self) -> serde_yaml::Value {
        let content = fs::read_to_string(self.compose_path()).expect("compose file written");
        serde_yaml::from_str(&content).unwrap()
    }

    /// `services.<key>.environment.<var>` of the written document.
    pub fn env_var(&self, key: &str, var: &str) -> Option<String> {
        self.compose()["services"][key]["environment"][var]
            .as_str()
            .map(str::to_string)
    }
}

#[derive(Debug, Default)]
struct FakeState {
    running: BTreeSet<String>,
    created: BTreeSet<String>,
    volumes: BTreeSet<String>,
    calls: Vec<String>,
}

/// Container runtime that records calls. Containers report healthy unless
/// listed in `unhealthy`; named volumes appear when a container declaring
/// them is started and disappear on `down(true)`.
pub struct FakeRuntime {
    compose_path: PathBuf,
    unhealthy: BTreeSet<String>,
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new(compose_path: PathBuf) -> Self {
        Self {
            compose_path,
            unhealthy: BTreeSet::new(),
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn unhealthy(mut self, key: &str) -> Self {
        self.unhealthy.insert(key.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.strip_prefix("start ").map(str::to_string))
            .collect()
    }

    pub fn running(&self) -> BTreeSet<String> {
        self.state.lock().running.clone()
    }

    pub fn volumes(&self) -> BTreeSet<String> {
        self.state.lock().volumes.clone()
    }

    fn declared_volumes(&self, key: &str) -> Vec<String> {
        let Ok(content) = fs::read_to_string(&self.compose_path) else {
            return Vec::new();
        };
        let Ok(doc) = serde_yaml::from_str::<serde_yaml::Value>(&content) else {
            return Vec::new();
        };
        doc["services"][key]["volumes"]
            .as_sequence()
            .map(|mounts| {
                mounts
                    .iter()
                    .filter_map(|m| m.as_str())
                    .filter_map(|m| m.split(':').next())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn start(&self, service: &str) -> Result<(), RuntimeError> {
        let volumes = self.declared_volumes(service);
        let mut state = self.state.lock();
        state.calls.push(format!("start {}", service));
        state.running.insert(service.to_string());
        state.created.insert(service.to_string());
        state.volumes.extend(volumes);
        Ok(())
    }

    async fn stop(&self, service: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        state.calls.push(format!("stop {}", service));
        state.running.remove(service);
        Ok(())
    }

    async fn status(&self, service: &str) -> Result<ContainerStatus, RuntimeError> {
        let state = self.state.lock();
        Ok(if state.running.contains(service) {
            ContainerStatus::Running
        } else if state.created.contains(service) {
            ContainerStatus::Exited
        } else {
            ContainerStatus::Unknown
        })
    }

    async fn health(&self, service: &str) -> Result<RuntimeHealth, RuntimeError> {
        if !self.state.lock().running.contains(service) {
            return Ok(RuntimeHealth::None);
        }
        Ok(if self.unhealthy.contains(service) {
            RuntimeHealth::Unhealthy
        } else {
            RuntimeHealth::Healthy
        })
    }

    async fn logs(
        &self,
        service: Option<&str>,
        _follow: bool,
        _tail: Option<usize>,
    ) -> Result<LogStream, RuntimeError> {
        let target = service.unwrap_or("all").to_string();
        let lines = vec![Ok(format!("{} | ready", target))];
        Ok(Box::pin(futures::stream::iter(lines)))
    }

    async fn exec(
        &self,
        service: &str,
        args: &[String],
        _stdin: Option<String>,
    ) -> Result<ExecOutput, RuntimeError> {
        self.state
            .lock()
            .calls
            .push(format!("exec {} {}", service, args.join(" ")));
        Ok(ExecOutput {
            exit_code: Some(0),
            ..Default::default()
        })
    }

    async fn published_ports(&self) -> Result<BTreeMap<String, u16>, RuntimeError> {
        Ok(BTreeMap::new())
    }

    async fn stop_all(&self) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        state.calls.push("stop_all".to_string());
        state.running.clear();
        Ok(())
    }

    async fn down(&self, remove_volumes: bool) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        state.calls.push(format!("down volumes={}", remove_volumes));
        state.running.clear();
        state.created.clear();
        if remove_volumes {
            state.volumes.clear();
        }
        Ok(())
    }
}
