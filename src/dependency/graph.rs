use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Directed dependency graph over node identifiers.
///
/// Ordered collections keep every traversal deterministic, so leveling and
/// cycle reports do not depend on insertion order.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: BTreeSet<String>,
    /// `edges[A] = {B, C}` means A depends on B and C
    edges: BTreeMap<String, BTreeSet<String>>,
    /// `reverse[A] = {B, C}` means B and C depend on A
    reverse: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.edges.entry(name.clone()).or_default();
        self.reverse.entry(name.clone()).or_default();
        self.nodes.insert(name);
    }

    /// Add a dependency edge (`from` depends on `to`)
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) {
        let from = from.into();
        let to = to.into();
        self.add_node(from.clone());
        self.add_node(to.clone());

        self.edges.entry(from.clone()).or_default().insert(to.clone());
        self.reverse.entry(to).or_default().insert(from);
    }

    pub fn contains(&self, node: &str) -> bool {
        self.nodes.contains(node)
    }

    pub fn nodes(&self) -> &BTreeSet<String> {
        &self.nodes
    }

    /// Direct dependencies of a node
    pub fn dependencies(&self, node: &str) -> impl Iterator<Item = &String> {
        self.edges.get(node).into_iter().flatten()
    }

    /// Nodes that directly depend on the given node
    pub fn dependents(&self, node: &str) -> impl Iterator<Item = &String> {
        self.reverse.get(node).into_iter().flatten()
    }

    /// All transitive dependencies of a node, excluding the node itself.
    pub fn transitive_dependencies(&self, node: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&String> = self.dependencies(node).collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next.clone()) {
                stack.extend(self.dependencies(next));
            }
        }
        seen
    }

    /// Find a cycle with a three-color depth-first search.
    ///
    /// Returns the path with the first node repeated at the end, e.g.
    /// `[a, b, c, a]`.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut colors: BTreeMap<&str, Color> =
            self.nodes.iter().map(|n| (n.as_str(), Color::White)).collect();
        let mut path: Vec<&str> = Vec::new();

        for node in &self.nodes {
            if colors[node.as_str()] == Color::White {
                if let Some(cycle) = self.visit(node, &mut colors, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        colors: &mut BTreeMap<&'a str, Color>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        colors.insert(node, Color::Gray);
        path.push(node);

        for dep in self.dependencies(node) {
            match colors.get(dep.as_str()).copied().unwrap_or(Color::White) {
                Color::White => {
                    if let Some(cycle) = self.visit(dep, colors, path) {
                        return Some(cycle);
                    }
                }
                Color::Gray => {
                    let start = path.iter().position(|n| *n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|n| n.to_string()).collect();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                Color::Black => {}
            }
        }

        path.pop();
        colors.insert(node, Color::Black);
        None
    }

    /// Group nodes into levels: level 0 holds nodes without dependencies,
    /// level k holds nodes whose dependencies all lie in levels below k.
    /// Nodes within a level are sorted.
    pub fn levels(&self) -> Result<Vec<Vec<String>>> {
        if let Some(cycle) = self.find_cycle() {
            return Err(Error::DependencyCycle(cycle));
        }

        let mut remaining: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.as_str(), self.edges.get(n).map_or(0, BTreeSet::len)))
            .collect();
        let mut levels = Vec::new();

        while !remaining.is_empty() {
            let level: Vec<String> = remaining
                .iter()
                .filter(|(_, degree)| **degree == 0)
                .map(|(node, _)| node.to_string())
                .collect();

            if level.is_empty() {
                // Unreachable after the cycle check; kept as a guard.
                return Err(Error::DependencyCycle(
                    remaining.keys().map(|n| n.to_string()).collect(),
                ));
            }

            for node in &level {
                remaining.remove(node.as_str());
                for dependent in self.dependents(node) {
                    if let Some(degree) = remaining.get_mut(dependent.as_str()) {
                        *degree = degree.saturating_sub(1);
                    }
                }
            }
            levels.push(level);
        }

        Ok(levels)
    }
}
