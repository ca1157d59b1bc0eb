use super::launcher::NodeLauncher;
use super::state::{NodeRecord, NodeState, StateBoard};
use crate::dependency::{DependencyGraph, Node};
use crate::error::{Error, NodeFailure, Result};
use crate::healthcheck::{poll_until_healthy, HealthOutcome};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Terminal (or, after cancellation, last reached) state of every node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpReport {
    pub nodes: BTreeMap<String, NodeRecord>,
    pub cancelled: bool,
}

impl UpReport {
    pub fn state(&self, node: &str) -> Option<NodeState> {
        self.nodes.get(node).map(|r| r.state)
    }

    /// Requested services that did not come up, each with the node that caused it.
    pub fn failures(&self, requested: &BTreeSet<String>) -> Vec<NodeFailure> {
        requested
            .iter()
            .filter_map(|service| {
                let record = self.nodes.get(service)?;
                if record.state.satisfies_dependents() {
                    return None;
                }
                Some(NodeFailure {
                    service: service.clone(),
                    state: record.state.to_string(),
                    root_cause: record.root_cause.clone().unwrap_or_else(|| service.clone()),
                    detail: record
                        .detail
                        .clone()
                        .unwrap_or_else(|| format!("is {}", record.state)),
                })
            })
            .collect()
    }

    /// `Ok` when every requested service is healthy.
    pub fn outcome(&self, requested: &BTreeSet<String>) -> Result<()> {
        if self.cancelled {
            return Err(Error::Cancelled("up".to_string()));
        }
        let failures = self.failures(requested);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::NotHealthy(failures))
        }
    }
}

/// Walks the leveling: levels run one after another, nodes within a level
/// concurrently up to `parallelism`.
pub struct Orchestrator {
    parallelism: usize,
    level_timeout: Duration,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(parallelism: usize, level_timeout: Duration) -> Self {
        Self {
            parallelism: parallelism.max(1),
            level_timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn up(&self, graph: &DependencyGraph, launcher: &dyn NodeLauncher) -> UpReport {
        let board = StateBoard::new(graph.nodes().map(|n| n.id.as_str()));
        for node in graph.nodes() {
            if !graph.is_managed(&node.id) {
                board.transition(&node.id, NodeState::Unmanaged);
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        for (index, level) in graph.levels().iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }
            let nodes: Vec<&Node> = level
                .iter()
                .filter(|id| graph.is_managed(id))
                .filter_map(|id| graph.node(id))
                .collect();
            if nodes.is_empty() {
                continue;
            }
            tracing::debug!(level = index, nodes = nodes.len(), "Starting level");

            let deadline = Instant::now() + self.level_timeout;
            let tasks = nodes.iter().map(|node| {
                let semaphore = semaphore.clone();
                let board = &board;
                async move {
                    // The semaphore is never closed.
                    let Ok(_permit) = semaphore.acquire().await else {
                        return;
                    };
                    if self.cancel.is_cancelled() {
                        return;
                    }
                    self.run_node(node, launcher, board)
                        .instrument(tracing::info_span!("node", node.id = %node.id))
                        .await;
                }
            });

            let finished =
                tokio::time::timeout_at(deadline, futures::future::join_all(tasks)).await;
            if finished.is_err() {
                tracing::warn!(level = index, timeout = ?self.level_timeout, "Level deadline exceeded");
                for node in &nodes {
                    match board.state(&node.id) {
                        Some(NodeState::HealthChecking) => board.fail(
                            &node.id,
                            NodeState::Unhealthy,
                            "did not become healthy before the level deadline",
                        ),
                        Some(state) if !state.is_terminal() => {
                            board.fail(&node.id, NodeState::Failed, "level deadline exceeded")
                        }
                        _ => {}
                    }
                }
            }
        }

        UpReport {
            nodes: board.snapshot(),
            cancelled: self.cancel.is_cancelled(),
        }
    }

    async fn run_node(&self, node: &Node, launcher: &dyn NodeLauncher, board: &StateBoard) {
        let id = node.id.as_str();

        if let Some((blocker, state)) = blocking_dependency(node, board) {
            let record = board.record(&blocker);
            let root = record
                .as_ref()
                .and_then(|r| r.root_cause.clone())
                .unwrap_or_else(|| blocker.clone());
            let root_state = board.state(&root).unwrap_or(state);
            tracing::warn!(node = id, dependency = %blocker, "Skipped: dependency is {}", state);
            board.skip(id, &root, blocked_because(root_state));
            return;
        }

        if let Err(e) = launcher.prepare(node).await {
            tracing::error!(node = id, error = %e, "Preparation failed");
            board.fail(id, NodeState::Failed, e.to_string());
            return;
        }
        board.transition(id, NodeState::Provisioned);

        if !node.has_container() {
            board.transition(id, NodeState::Provisioning);
            match launcher.provision(node).await {
                Ok(warnings) => {
                    for warning in warnings {
                        tracing::warn!(node = id, "{}", warning);
                        board.warn(id, warning.to_string());
                    }
                    board.transition(id, NodeState::Healthy);
                }
                Err(e) => {
                    tracing::error!(node = id, error = %e, "Provisioning failed");
                    board.fail(id, NodeState::Failed, e.to_string());
                }
            }
            return;
        }

        board.transition(id, NodeState::Starting);
        tracing::info!(node = id, "Starting");
        if let Err(e) = launcher.start(node).await {
            tracing::error!(node = id, error = %e, "Start failed");
            board.fail(id, NodeState::Failed, e.to_string());
            return;
        }

        if let Some(gate) = launcher.health_gate(node) {
            board.transition(id, NodeState::HealthChecking);
            if let Ok(true) = launcher.has_exited(node).await {
                board.fail(id, NodeState::Failed, "exited before the first health check");
                return;
            }
            match poll_until_healthy(gate.checker.as_ref(), &gate.policy, &self.cancel).await {
                HealthOutcome::Healthy { attempts } => {
                    tracing::debug!(node = id, attempts, "Health check passed");
                }
                HealthOutcome::Unhealthy {
                    attempts,
                    last_error,
                } => {
                    // A container that died while being polled failed rather
                    // than stayed unhealthy.
                    if let Ok(true) = launcher.has_exited(node).await {
                        board.fail(id, NodeState::Failed, "exited during health checks");
                    } else {
                        board.fail(
                            id,
                            NodeState::Unhealthy,
                            format!(
                                "did not pass its health check after {} attempts{}",
                                attempts,
                                last_error.map(|e| format!(" ({})", e)).unwrap_or_default()
                            ),
                        );
                    }
                    tracing::error!(node = id, "Unhealthy");
                    return;
                }
                HealthOutcome::Cancelled => return,
            }
        }

        if let Err(e) = launcher.settle(node).await {
            board.fail(id, NodeState::Failed, e.to_string());
            return;
        }
        board.transition(id, NodeState::Healthy);
        tracing::info!(node = id, "Healthy");
    }
}

fn blocked_because(state: NodeState) -> String {
    match state {
        NodeState::Failed => "failed".to_string(),
        NodeState::Pending => "never started".to_string(),
        other => format!("is {}", other),
    }
}

/// The first dependency (in identifier order) that does not let `node` start.
fn blocking_dependency(node: &Node, board: &StateBoard) -> Option<(String, NodeState)> {
    node.dependencies.iter().find_map(|dep| match board.state(dep) {
        Some(state) if state.satisfies_dependents() => None,
        Some(state) => Some((dep.clone(), state)),
        None => Some((dep.clone(), NodeState::Pending)),
    })
}
