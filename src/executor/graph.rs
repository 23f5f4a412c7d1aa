use crate::errors::{RatchetError, RatchetResult};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

/// Lifecycle of one graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    Pending,
    Ready,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

/// One tool invocation in a dependency graph. Edges are id-based in both
/// directions; `add_dependency` is the single place that links them, keeping
/// `b ∈ dependencies(a) ⇔ a ∈ dependents(b)`.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub tool_name: String,
    pub parameters: Value,
    pub dependencies: HashSet<String>,
    pub dependents: HashSet<String>,
    pub status: NodeStatus,
}

/// Aggregate counts over a graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub per_status: HashMap<String, usize>,
    pub max_in_degree: usize,
    pub max_out_degree: usize,
}

/// A DAG of tool invocations keyed by id.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: HashMap<String, GraphNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(
        &mut self,
        id: impl Into<String>,
        tool_name: impl Into<String>,
        parameters: Value,
    ) -> RatchetResult<()> {
        let id = id.into();
        if self.nodes.contains_key(&id) {
            return Err(RatchetError::Validation(format!(
                "duplicate node id '{}'",
                id
            )));
        }
        self.nodes.insert(
            id.clone(),
            GraphNode {
                id,
                tool_name: tool_name.into(),
                parameters,
                dependencies: HashSet::new(),
                dependents: HashSet::new(),
                status: NodeStatus::Pending,
            },
        );
        Ok(())
    }

    /// Declare that `node` depends on `on`. Rejects unknown nodes and edges
    /// that would close a cycle.
    pub fn add_dependency(&mut self, node: &str, on: &str) -> RatchetResult<()> {
        if !self.nodes.contains_key(node) {
            return Err(RatchetError::Validation(format!("unknown node '{}'", node)));
        }
        if !self.nodes.contains_key(on) {
            return Err(RatchetError::Validation(format!("unknown node '{}'", on)));
        }
        if node == on || self.depends_on(on, node) {
            return Err(RatchetError::Cycle(format!("{} -> {}", node, on)));
        }
        if let Some(entry) = self.nodes.get_mut(node) {
            entry.dependencies.insert(on.to_string());
        }
        if let Some(entry) = self.nodes.get_mut(on) {
            entry.dependents.insert(node.to_string());
        }
        Ok(())
    }

    /// Whether `from` transitively depends on `target`.
    fn depends_on(&self, from: &str, target: &str) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !seen.insert(current.to_string()) {
                continue;
            }
            if let Some(node) = self.nodes.get(current) {
                stack.extend(node.dependencies.iter().map(String::as_str));
            }
        }
        false
    }

    /// Kahn's algorithm: every dependency precedes its dependents. Sibling
    /// order is unspecified. Errors when the graph is inconsistent.
    pub fn topological_sort(&self) -> RatchetResult<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .values()
            .map(|node| (node.id.as_str(), node.dependencies.len()))
            .collect();
        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            if let Some(node) = self.nodes.get(id) {
                for dependent in &node.dependents {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(dependent.as_str());
                        }
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let stuck: Vec<&str> = in_degree
                .iter()
                .filter(|(_, degree)| **degree > 0)
                .map(|(id, _)| *id)
                .collect();
            return Err(RatchetError::Cycle(stuck.join(", ")));
        }
        Ok(order)
    }

    /// Every pending node whose declared dependencies are all completed.
    pub fn get_executable_nodes(&self) -> Vec<&GraphNode> {
        self.nodes
            .values()
            .filter(|node| {
                node.status == NodeStatus::Pending
                    && node.dependencies.iter().all(|dep| {
                        self.nodes
                            .get(dep)
                            .is_some_and(|dep| dep.status == NodeStatus::Completed)
                    })
            })
            .collect()
    }

    pub fn mark_status(&mut self, id: &str, status: NodeStatus) -> RatchetResult<()> {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.status = status;
                Ok(())
            }
            None => Err(RatchetError::Validation(format!("unknown node '{}'", id))),
        }
    }

    /// Referential integrity: every edge endpoint exists and the two edge
    /// sets mirror each other.
    pub fn validate(&self) -> RatchetResult<()> {
        for node in self.nodes.values() {
            for dep in &node.dependencies {
                let mirrored = self
                    .nodes
                    .get(dep)
                    .is_some_and(|target| target.dependents.contains(&node.id));
                if !mirrored {
                    return Err(RatchetError::Validation(format!(
                        "dangling dependency {} -> {}",
                        node.id, dep
                    )));
                }
            }
            for dependent in &node.dependents {
                let mirrored = self
                    .nodes
                    .get(dependent)
                    .is_some_and(|target| target.dependencies.contains(&node.id));
                if !mirrored {
                    return Err(RatchetError::Validation(format!(
                        "dangling dependent {} -> {}",
                        node.id, dependent
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn stats(&self) -> GraphStats {
        let mut per_status: HashMap<String, usize> = HashMap::new();
        let mut max_in = 0;
        let mut max_out = 0;
        for node in self.nodes.values() {
            *per_status.entry(format!("{:?}", node.status)).or_insert(0) += 1;
            max_in = max_in.max(node.dependencies.len());
            max_out = max_out.max(node.dependents.len());
        }
        GraphStats {
            total_nodes: self.nodes.len(),
            per_status,
            max_in_degree: max_in,
            max_out_degree: max_out,
        }
    }
}
