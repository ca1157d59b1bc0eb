//! Identity phase: container names, hosts and ports for every container node.

use crate::dependency::{DependencyGraph, Engine, Node, NodeKind};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::net::TcpListener;

/// Where a node can be reached: by container name on the shared network, or
/// on the host through the published port (the same number on both sides).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub container_name: String,
    pub host: String,
    pub port: u16,
}

impl Identity {
    pub fn http_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Per-run identity table. Each node is assigned exactly once.
#[derive(Debug, Default)]
pub struct IdentityTable {
    entries: Mutex<BTreeMap<String, Identity>>,
}

impl IdentityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the identity of a node.
    ///
    /// # Panics
    ///
    /// Panics if the node already has an identity.
    pub fn insert(&self, node: &str, identity: Identity) {
        let mut entries = self.entries.lock();
        if entries.contains_key(node) {
            panic!("identity for '{}' assigned twice", node);
        }
        entries.insert(node.to_string(), identity);
    }

    pub fn get(&self, node: &str) -> Option<Identity> {
        self.entries.lock().get(node).cloned()
    }

    /// Identity of a node, falling back to its engine for resource nodes.
    pub fn for_node(&self, node: &Node) -> Option<Identity> {
        match &node.kind {
            NodeKind::Resource(_) => node.engine().and_then(|e| self.get(e.id())),
            _ => self.get(&node.id),
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, Identity> {
        self.entries.lock().clone()
    }
}

/// Hands out host ports, holding a listener on every port it returns until
/// `release_listeners` so nothing else grabs it before the containers start.
pub struct PortAllocator {
    base: u16,
    allocated: Mutex<BTreeSet<u16>>,
    listeners: Mutex<Vec<TcpListener>>,
}

impl PortAllocator {
    pub fn new(base: u16) -> Self {
        Self {
            base,
            allocated: Mutex::new(BTreeSet::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Claim a port that one of our own containers already publishes.
    /// It is occupied by us, so no bind check.
    pub fn mark_allocated(&self, port: u16) {
        self.allocated.lock().insert(port);
    }

    /// Try to bind a specific port on 127.0.0.1 and 0.0.0.0.
    pub fn try_allocate(&self, port: u16) -> Result<u16> {
        if port == 0 || self.allocated.lock().contains(&port) {
            return Err(Error::PortAllocation(format!("Port {} is already assigned", port)));
        }
        let listener_v4 = TcpListener::bind(("127.0.0.1", port)).map_err(|e| {
            Error::PortAllocation(format!("Port {} not available (127.0.0.1): {}", port, e))
        })?;
        // Linux may refuse the wildcard bind once 127.0.0.1 is held; the
        // loopback listener already reserves the port there.
        let listener_any = TcpListener::bind(("0.0.0.0", port)).ok();

        let mut listeners = self.listeners.lock();
        listeners.push(listener_v4);
        if let Some(l) = listener_any {
            listeners.push(l);
        }
        self.allocated.lock().insert(port);
        Ok(port)
    }

    /// The preferred port if free, else the next free port above the base.
    pub fn allocate(&self, preferred: Option<u16>) -> Result<u16> {
        if let Some(port) = preferred {
            if let Ok(port) = self.try_allocate(port) {
                return Ok(port);
            }
            tracing::debug!(port, "Preferred port unavailable, scanning from base");
        }

        let start = self.base.saturating_add(1);
        for port in start..=u16::MAX {
            if let Ok(port) = self.try_allocate(port) {
                return Ok(port);
            }
        }
        Err(Error::PortAllocation(format!(
            "No free port above {}",
            self.base
        )))
    }

    /// Drop held listeners; ports stay marked as allocated.
    pub fn release_listeners(&self) {
        self.listeners.lock().clear();
    }

    pub fn allocated_ports(&self) -> Vec<u16> {
        self.allocated.lock().iter().copied().collect()
    }
}

/// Container name of a node: `<project>-<id with '/' replaced by '-'>`.
pub fn container_name(project: &str, node: &Node) -> String {
    format!("{}-{}", project, node.container_key())
}

fn preferred_port(graph: &DependencyGraph, node: &Node) -> Option<u16> {
    match &node.kind {
        NodeKind::Service => graph.manifest(&node.id).and_then(|m| m.service.port),
        NodeKind::Engine(engine) => Some(engine.native_port()),
        NodeKind::Resource(_) => None,
    }
}

/// Assign identities to every service and engine node, in identifier order.
///
/// `published` maps container names to the host port our own running
/// containers already publish; those ports are reused.
pub fn assign_identities(
    graph: &DependencyGraph,
    project: &str,
    published: &BTreeMap<String, u16>,
    allocator: &PortAllocator,
) -> Result<IdentityTable> {
    let table = IdentityTable::new();

    for (name, port) in published {
        if graph
            .nodes()
            .any(|n| n.has_container() && container_name(project, n) == *name)
        {
            allocator.mark_allocated(*port);
        }
    }

    for node in graph.nodes().filter(|n| n.has_container()) {
        let name = container_name(project, node);
        let port = match published.get(&name) {
            Some(port) => *port,
            None => allocator.allocate(preferred_port(graph, node))?,
        };
        tracing::debug!(node = %node.id, container = %name, port, "Assigned identity");
        table.insert(
            &node.id,
            Identity {
                host: name.clone(),
                container_name: name,
                port,
            },
        );
    }

    Ok(table)
}

/// The tunnel agent exposes its API on its assigned port; the engine's
/// native port is only a preference.
pub fn tunnel_api_url(identity: &Identity) -> String {
    format!("http://127.0.0.1:{}/api/tunnels", identity.port)
}
