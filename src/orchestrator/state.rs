use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle of one node during `up`.
///
/// Containers: Pending → Provisioned → Starting → HealthChecking → Healthy |
/// Unhealthy | Failed. Resources: Pending → Provisioned → Provisioning →
/// Healthy | Failed. `Skipped` marks nodes whose dependencies did not become
/// healthy; `Unmanaged` marks nodes outside the start set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeState {
    Pending,
    /// Dependencies are healthy and the node's inputs are resolved.
    Provisioned,
    Provisioning,
    Starting,
    HealthChecking,
    Healthy,
    /// Ran but never passed its health check.
    Unhealthy,
    /// Could not be started, exited early, or failed to provision.
    Failed,
    Skipped,
    Unmanaged,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeState::Healthy
                | NodeState::Unhealthy
                | NodeState::Failed
                | NodeState::Skipped
                | NodeState::Unmanaged
        )
    }

    /// Dependents may start once a dependency is in one of these states.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, NodeState::Healthy | NodeState::Unmanaged)
    }

    pub fn can_transition_to(&self, next: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, next),
            (Pending, Provisioned | Failed | Skipped | Unmanaged)
                | (Provisioned, Provisioning | Starting | Failed)
                | (Provisioning, Healthy | Failed)
                | (Starting, HealthChecking | Healthy | Failed)
                | (HealthChecking, Healthy | Unhealthy | Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Pending => "pending",
            NodeState::Provisioned => "provisioned",
            NodeState::Provisioning => "provisioning",
            NodeState::Starting => "starting",
            NodeState::HealthChecking => "health-checking",
            NodeState::Healthy => "healthy",
            NodeState::Unhealthy => "unhealthy",
            NodeState::Failed => "failed",
            NodeState::Skipped => "skipped",
            NodeState::Unmanaged => "unmanaged",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub state: NodeState,
    /// Why the node ended up in a failure state.
    pub detail: Option<String>,
    /// For skipped nodes, the node whose failure blocked this one.
    pub root_cause: Option<String>,
    /// Non-fatal problems (migrations, seeds).
    pub warnings: Vec<String>,
}

impl NodeRecord {
    fn new() -> Self {
        Self {
            state: NodeState::Pending,
            detail: None,
            root_cause: None,
            warnings: Vec::new(),
        }
    }
}

/// Per-run state of every node. Shared by the level workers.
#[derive(Debug, Default)]
pub struct StateBoard {
    records: Mutex<BTreeMap<String, NodeRecord>>,
}

impl StateBoard {
    pub fn new<'a>(nodes: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            records: Mutex::new(
                nodes
                    .into_iter()
                    .map(|id| (id.to_string(), NodeRecord::new()))
                    .collect(),
            ),
        }
    }

    pub fn state(&self, node: &str) -> Option<NodeState> {
        self.records.lock().get(node).map(|r| r.state)
    }

    pub fn record(&self, node: &str) -> Option<NodeRecord> {
        self.records.lock().get(node).cloned()
    }

    /// Move a node to `next`.
    ///
    /// # Panics
    ///
    /// Panics on a transition the lifecycle does not allow.
    pub fn transition(&self, node: &str, next: NodeState) {
        let mut records = self.records.lock();
        let record = records.entry(node.to_string()).or_insert_with(NodeRecord::new);
        assert!(
            record.state.can_transition_to(next),
            "invalid transition for '{}': {} -> {}",
            node,
            record.state,
            next
        );
        tracing::debug!(node, from = %record.state, to = %next, "State transition");
        record.state = next;
    }

    /// Move a node into a failure state, recording why.
    pub fn fail(&self, node: &str, state: NodeState, detail: impl Into<String>) {
        self.transition(node, state);
        if let Some(record) = self.records.lock().get_mut(node) {
            record.detail = Some(detail.into());
        }
    }

    pub fn skip(&self, node: &str, root_cause: &str, detail: impl Into<String>) {
        self.transition(node, NodeState::Skipped);
        if let Some(record) = self.records.lock().get_mut(node) {
            record.root_cause = Some(root_cause.to_string());
            record.detail = Some(detail.into());
        }
    }

    pub fn warn(&self, node: &str, warning: impl Into<String>) {
        if let Some(record) = self.records.lock().get_mut(node) {
            record.warnings.push(warning.into());
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, NodeRecord> {
        self.records.lock().clone()
    }
}
