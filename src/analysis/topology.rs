//! Static analysis of declared variable dependencies.
//!
//! Edges point from a dependency to its consumer, so a topological order lists
//! every variable after everything it reads. Self-references are left out:
//! a variable reading itself at another period (a lag) is not a cycle.

use crate::compute::ComputationError;
use crate::store::{VariableId, VariableRegistry};
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashSet, VecDeque};

pub struct DependencyGraph {
    graph: DiGraph<VariableId, ()>,
}

impl DependencyGraph {
    /// Builds the graph, failing on a declared dependency that is not registered.
    pub fn build(registry: &VariableRegistry) -> Result<Self, ComputationError> {
        let mut graph = DiGraph::with_capacity(registry.count(), 0);
        for (id, _) in registry.iter() {
            graph.add_node(id);
        }
        for (id, def) in registry.iter() {
            for dep in &def.dependencies {
                let dep_id = registry.id(dep).map_err(|_| ComputationError::InvalidDefinition {
                    name: def.name().to_string(),
                    reason: format!("declares unknown dependency '{dep}'"),
                })?;
                if dep_id != id {
                    graph.update_edge(node(dep_id), node(id), ());
                }
            }
        }
        Ok(Self { graph })
    }

    fn walk(&self, start: &[VariableId], direction: Direction) -> HashSet<VariableId> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<VariableId> = start.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if visited.insert(id) {
                queue.extend(self.graph.neighbors_directed(node(id), direction).map(|n| self.graph[n]));
            }
        }
        visited
    }

    /// Every variable that reads, directly or transitively, one of `start`.
    pub fn downstream_from(&self, start: &[VariableId]) -> HashSet<VariableId> {
        self.walk(start, Direction::Outgoing)
    }

    /// Every variable that `start` reads, directly or transitively.
    pub fn upstream_from(&self, start: &[VariableId]) -> HashSet<VariableId> {
        self.walk(start, Direction::Incoming)
    }
}

#[inline]
fn node(id: VariableId) -> NodeIndex {
    NodeIndex::new(id.index())
}

/// Returns the variables in dependency order, or the first declared cycle.
pub fn sort(registry: &VariableRegistry) -> Result<Vec<VariableId>, ComputationError> {
    let deps = DependencyGraph::build(registry)?;
    match toposort(&deps.graph, None) {
        Ok(order) => Ok(order.into_iter().map(|n| deps.graph[n]).collect()),
        Err(_) => {
            let cycle = find_cycle(&deps.graph)
                .into_iter()
                .map(|n| registry.name(deps.graph[n]).to_string())
                .collect();
            Err(ComputationError::CircularDependency { cycle })
        }
    }
}

/// A concrete loop inside a strongly connected component, listed in request
/// order (each variable followed by one it reads) and closed on its first entry.
fn find_cycle(graph: &DiGraph<VariableId, ()>) -> Vec<NodeIndex> {
    let Some(component) = tarjan_scc(graph).into_iter().find(|c| c.len() > 1) else {
        return Vec::new();
    };
    let members: HashSet<NodeIndex> = component.iter().copied().collect();
    let mut path = vec![component[0]];
    loop {
        let current = path[path.len() - 1];
        let Some(next) = graph
            .neighbors_directed(current, Direction::Incoming)
            .find(|n| members.contains(n))
        else {
            return path;
        };
        if let Some(pos) = path.iter().position(|&n| n == next) {
            let mut cycle = path.split_off(pos);
            cycle.push(next);
            return cycle;
        }
        path.push(next);
    }
}
