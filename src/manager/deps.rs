//! Dependency resolution for groups
//!
//! Builds a directed graph from group requirements, rejects cycles with a
//! topological sort, and expands a group into the units it pulls in.

use std::collections::{HashSet, VecDeque};

/// Requirement graph over unit indices
#[derive(Debug, Default)]
pub struct DepGraph {
    /// Edges: node -> nodes it requires, in declaration order
    edges: Vec<Vec<usize>>,
}

impl DepGraph {
    pub fn new(nodes: usize) -> Self {
        Self {
            edges: vec![Vec::new(); nodes],
        }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Add a directed edge: `from` requires `to`
    pub fn add_edge(&mut self, from: usize, to: usize) {
        if !self.edges[from].contains(&to) {
            self.edges[from].push(to);
        }
    }

    /// Direct requirements of a node
    pub fn dependencies(&self, node: usize) -> &[usize] {
        &self.edges[node]
    }

    /// Topological sort using Kahn's algorithm
    ///
    /// Requirements come before the nodes that require them.
    pub fn toposort(&self) -> Result<Vec<usize>, CycleError> {
        // in_degree[x] = number of requirements x still waits for
        let mut in_degree: Vec<usize> = self.edges.iter().map(Vec::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.edges.len()];
        for (from, deps) in self.edges.iter().enumerate() {
            for &to in deps {
                dependents[to].push(from);
            }
        }

        let mut queue: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg == 0)
            .map(|(n, _)| n)
            .collect();

        let mut result = Vec::with_capacity(self.edges.len());
        while let Some(node) = queue.pop_front() {
            result.push(node);
            for &dependent in &dependents[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if result.len() != self.edges.len() {
            let nodes = (0..self.edges.len())
                .filter(|n| in_degree[*n] > 0)
                .collect();
            return Err(CycleError { nodes });
        }

        Ok(result)
    }

    /// Every node reachable from `root`, depth first in declaration order
    ///
    /// Each node appears once, at its first visit. `root` is excluded.
    pub fn expand(&self, root: usize) -> Vec<usize> {
        let mut seen: HashSet<usize> = HashSet::from([root]);
        let mut order = Vec::new();
        let mut stack: Vec<usize> = self.edges[root].iter().rev().copied().collect();

        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            order.push(node);
            stack.extend(self.edges[node].iter().rev());
        }

        order
    }
}

/// Error when a dependency cycle is detected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    /// Nodes on or behind the cycle
    pub nodes: Vec<usize>,
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Dependency cycle detected involving {} units", self.nodes.len())
    }
}

impl std::error::Error for CycleError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: usize, edges: &[(usize, usize)]) -> DepGraph {
        let mut g = DepGraph::new(nodes);
        for &(from, to) in edges {
            g.add_edge(from, to);
        }
        g
    }

    fn pos(order: &[usize], node: usize) -> usize {
        order.iter().position(|n| *n == node).unwrap()
    }

    #[test]
    fn test_empty_graph() {
        assert_eq!(DepGraph::new(0).toposort().unwrap(), Vec::<usize>::new());
    }

    #[test]
    fn test_linear_chain() {
        // 2 requires 1, 1 requires 0
        let order = graph(3, &[(2, 1), (1, 0)]).toposort().unwrap();
        assert!(pos(&order, 0) < pos(&order, 1));
        assert!(pos(&order, 1) < pos(&order, 2));
    }

    #[test]
    fn test_diamond() {
        let order = graph(4, &[(3, 1), (3, 2), (1, 0), (2, 0)]).toposort().unwrap();
        assert!(pos(&order, 0) < pos(&order, 1));
        assert!(pos(&order, 0) < pos(&order, 2));
        assert!(pos(&order, 1) < pos(&order, 3));
        assert!(pos(&order, 2) < pos(&order, 3));
    }

    #[test]
    fn test_cycle_detection() {
        // 0 -> 1 -> 2 -> 0, and 3 requires the cycle
        let err = graph(4, &[(0, 1), (1, 2), (2, 0), (3, 0)]).toposort().unwrap_err();
        assert_eq!(err.nodes, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_duplicate_edge_ignored() {
        let g = graph(2, &[(1, 0), (1, 0)]);
        assert_eq!(g.dependencies(1), &[0]);
        assert!(g.toposort().is_ok());
    }

    #[test]
    fn test_expand_declared_order() {
        // 0 requires [1, 2]; 2 requires [3, 4]
        let g = graph(5, &[(0, 1), (0, 2), (2, 3), (2, 4)]);
        assert_eq!(g.expand(0), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_expand_dedups_shared_requirements() {
        // 0 requires [1, 2]; 1 and 2 both require 3
        let g = graph(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        assert_eq!(g.expand(0), vec![1, 3, 2]);
        assert!(g.expand(3).is_empty());
    }
}
