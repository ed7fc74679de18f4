//! Dependency graph - validation, cycle detection and ordering
//!
//! A [`DependencyGraph`] is built up node by node and then consumed by
//! [`DependencyGraph::validate`], which returns an immutable
//! [`ValidatedGraph`]. Only validated graphs can be provisioned, so a run
//! can never start on a graph with unknown dependencies or cycles.

use crate::error::{Error, Result};
use crate::node::ResourceNode;
use crate::state::StateStore;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt::Write as _;

/// A mutable set of resource nodes and their dependency edges
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    id: String,
    nodes: Vec<ResourceNode>,
    index: HashMap<String, usize>,
}

impl DependencyGraph {
    /// Create an empty graph
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Graph identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Add a node. Its declared dependencies may reference nodes added later.
    pub fn add_node(&mut self, node: ResourceNode) -> Result<()> {
        if self.index.contains_key(node.id()) {
            return Err(Error::DuplicateId {
                id: node.id().to_string(),
            });
        }
        self.index.insert(node.id().to_string(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Declare that `to` depends on `from`
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<()> {
        if !self.index.contains_key(from) {
            return Err(Error::UnknownNode {
                id: from.to_string(),
            });
        }
        let Some(&to_idx) = self.index.get(to) else {
            return Err(Error::UnknownNode { id: to.to_string() });
        };
        self.nodes[to_idx].add_dependency(from.to_string());
        Ok(())
    }

    /// Look up a node
    pub fn node(&self, id: &str) -> Option<&ResourceNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Check if a node id is present
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check every dependency and detect cycles, then freeze the graph.
    pub fn validate(self) -> Result<ValidatedGraph> {
        let mut deps: Vec<Vec<usize>> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let mut node_deps = Vec::with_capacity(node.dependencies().len());
            for dep in node.dependencies() {
                let Some(&dep_idx) = self.index.get(dep) else {
                    return Err(Error::UnknownNode { id: dep.clone() });
                };
                node_deps.push(dep_idx);
            }
            deps.push(node_deps);
        }

        if let Some(path) = find_cycle(&deps) {
            return Err(Error::CyclicDependency {
                path: path
                    .into_iter()
                    .map(|i| self.nodes[i].id().to_string())
                    .collect(),
            });
        }

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (idx, node_deps) in deps.iter().enumerate() {
            for &dep in node_deps {
                dependents[dep].push(idx);
            }
        }

        let order = kahn_order(&deps, &dependents);
        log::debug!(
            "Validated graph {} ({} nodes, {} edges)",
            self.id,
            self.nodes.len(),
            deps.iter().map(Vec::len).sum::<usize>()
        );

        Ok(ValidatedGraph {
            id: self.id,
            nodes: self.nodes,
            index: self.index,
            deps,
            dependents,
            order,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Depth-first search with recursion-stack marking.
///
/// Returns the cycle as node indices with the first index repeated at the end.
fn find_cycle(deps: &[Vec<usize>]) -> Option<Vec<usize>> {
    fn visit(
        node: usize,
        deps: &[Vec<usize>],
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        marks[node] = Mark::OnStack;
        stack.push(node);
        for &dep in &deps[node] {
            match marks[dep] {
                Mark::OnStack => {
                    let start = stack.iter().position(|&n| n == dep).unwrap_or(0);
                    let mut path = stack[start..].to_vec();
                    path.push(dep);
                    return Some(path);
                }
                Mark::Unvisited => {
                    if let Some(path) = visit(dep, deps, marks, stack) {
                        return Some(path);
                    }
                }
                Mark::Done => {}
            }
        }
        stack.pop();
        marks[node] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::Unvisited; deps.len()];
    let mut stack = Vec::new();
    for node in 0..deps.len() {
        if marks[node] == Mark::Unvisited
            && let Some(path) = visit(node, deps, &mut marks, &mut stack)
        {
            return Some(path);
        }
    }
    None
}

/// Kahn's algorithm; among ready nodes the earliest inserted goes first.
fn kahn_order(deps: &[Vec<usize>], dependents: &[Vec<usize>]) -> Vec<usize> {
    let mut remaining: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut ready: BinaryHeap<Reverse<usize>> = remaining
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(idx, _)| Reverse(idx))
        .collect();

    let mut order = Vec::with_capacity(deps.len());
    while let Some(Reverse(idx)) = ready.pop() {
        order.push(idx);
        for &dependent in &dependents[idx] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }
    order
}

/// An immutable, cycle-free graph with a fixed apply order
#[derive(Debug, Clone)]
pub struct ValidatedGraph {
    id: String,
    nodes: Vec<ResourceNode>,
    index: HashMap<String, usize>,
    deps: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl ValidatedGraph {
    /// Graph identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Look up a node
    pub fn node(&self, id: &str) -> Option<&ResourceNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Check if a node id is present
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every node after all of its dependencies; ties by insertion order
    pub fn topological_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.nodes[i].id()).collect()
    }

    /// Exact reverse of [`ValidatedGraph::topological_order`]
    pub fn reverse_order(&self) -> Vec<&str> {
        self.order.iter().rev().map(|&i| self.nodes[i].id()).collect()
    }

    /// Direct dependencies of a node
    pub fn dependencies(&self, id: &str) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&i| self.deps[i].iter().map(|&d| self.nodes[d].id()).collect())
            .unwrap_or_default()
    }

    /// Nodes that depend directly on a node
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&i| self.dependents[i].iter().map(|&d| self.nodes[d].id()).collect())
            .unwrap_or_default()
    }

    /// Apply order grouped into levels that may run concurrently.
    ///
    /// A node's level is one more than the deepest of its dependencies.
    pub fn waves(&self) -> Vec<Vec<&ResourceNode>> {
        let mut level = vec![0usize; self.nodes.len()];
        for &idx in &self.order {
            level[idx] = self.deps[idx]
                .iter()
                .map(|&d| level[d] + 1)
                .max()
                .unwrap_or(0);
        }
        self.group_levels(&level, self.order.iter().copied())
    }

    /// Teardown order grouped into levels that may run concurrently.
    ///
    /// A node's level is one more than the deepest of its dependents.
    pub fn reverse_waves(&self) -> Vec<Vec<&ResourceNode>> {
        let mut level = vec![0usize; self.nodes.len()];
        for &idx in self.order.iter().rev() {
            level[idx] = self.dependents[idx]
                .iter()
                .map(|&d| level[d] + 1)
                .max()
                .unwrap_or(0);
        }
        self.group_levels(&level, self.order.iter().rev().copied())
    }

    fn group_levels(
        &self,
        level: &[usize],
        sequence: impl Iterator<Item = usize>,
    ) -> Vec<Vec<&ResourceNode>> {
        let depth = level.iter().max().map_or(0, |max| max + 1);
        let mut waves: Vec<Vec<&ResourceNode>> = vec![Vec::new(); depth];
        for idx in sequence {
            waves[level[idx]].push(&self.nodes[idx]);
        }
        waves.retain(|wave| !wave.is_empty());
        waves
    }

    /// Nodes with their lifecycle fields filled in from a state store
    pub fn snapshot(&self, store: &dyn StateStore) -> Result<Vec<ResourceNode>> {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for &idx in &self.order {
            let mut node = self.nodes[idx].clone();
            if let Some(entry) = store.get(&self.id, node.id())? {
                node.observe(&entry);
            }
            nodes.push(node);
        }
        Ok(nodes)
    }

    /// Graphviz rendering, edges pointing from dependency to dependent
    pub fn dot(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{}\" {{", self.id);
        let _ = writeln!(out, "  rankdir=LR;");
        for &idx in &self.order {
            let node = &self.nodes[idx];
            let _ = writeln!(
                out,
                "  \"{}\" [label=\"{}\\n({})\"];",
                node.id(),
                node.id(),
                node.kind()
            );
        }
        for &idx in &self.order {
            for &dep in &self.deps[idx] {
                let _ = writeln!(
                    out,
                    "  \"{}\" -> \"{}\";",
                    self.nodes[dep].id(),
                    self.nodes[idx].id()
                );
            }
        }
        out.push_str("}\n");
        out
    }
}
