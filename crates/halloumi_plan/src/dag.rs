//! Directed dependency graph with deterministic topological ordering.
//!
//! Used twice per compilation: over resource declarations (to decide the
//! order in which instance counts are computed) and over the flattened
//! instances (to reject cycles before anything is emitted).

use indexmap::{IndexMap, IndexSet};
use std::collections::BTreeSet;
use std::fmt::Display;
use std::hash::Hash;

/// A directed graph where each node lists the nodes it depends on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph<K: Hash + Eq> {
    /// Node -> its dependencies, in insertion order
    nodes: IndexMap<K, IndexSet<K>>,
}

impl<K: Hash + Eq + Clone + Display> DependencyGraph<K> {
    /// Create a new empty graph
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
        }
    }

    /// Add a node; adding an existing node is a no-op
    pub fn add_node(&mut self, node: K) {
        self.nodes.entry(node).or_default();
    }

    /// Record that `node` depends on `on`. Both are added if missing.
    pub fn add_dependency(&mut self, node: K, on: K) {
        self.add_node(on.clone());
        self.nodes.entry(node).or_default().insert(on);
    }

    /// Nodes that the given node depends on
    #[must_use]
    pub fn dependencies(&self, node: &K) -> Vec<&K> {
        self.nodes
            .get(node)
            .map(|deps| deps.iter().collect())
            .unwrap_or_default()
    }

    /// Nodes that depend on the given node
    #[must_use]
    pub fn dependents(&self, node: &K) -> Vec<&K> {
        self.nodes
            .iter()
            .filter(|(_, deps)| deps.contains(node))
            .map(|(n, _)| n)
            .collect()
    }

    /// Check if a node exists
    #[must_use]
    pub fn contains(&self, node: &K) -> bool {
        self.nodes.contains_key(node)
    }

    /// Get total node count
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get total edge count
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(IndexSet::len).sum()
    }

    /// Check if graph is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Order nodes so every node comes after its dependencies.
    ///
    /// Ties are broken by insertion order, so the result is stable for a
    /// given graph.
    ///
    /// # Errors
    ///
    /// Returns the offending chain (first node repeated at the end) if the
    /// graph contains a cycle
    pub fn topological_order(&self) -> Result<Vec<K>, Vec<K>> {
        let mut remaining: Vec<usize> = self.nodes.values().map(IndexSet::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (idx, deps) in self.nodes.values().enumerate() {
            for dep in deps {
                if let Some(dep_idx) = self.nodes.get_index_of(dep) {
                    dependents[dep_idx].push(idx);
                }
            }
        }

        let mut ready: BTreeSet<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(idx, _)| idx)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(idx) = ready.pop_first() {
            order.push(idx);
            for &dependent in &dependents[idx] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() == self.nodes.len() {
            Ok(order
                .into_iter()
                .filter_map(|idx| self.nodes.get_index(idx).map(|(k, _)| k.clone()))
                .collect())
        } else {
            Err(self.find_cycle().unwrap_or_default())
        }
    }

    /// Find one cycle, if any, as a chain ending where it started
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<K>> {
        let mut visited = IndexSet::new();
        let mut stack = IndexSet::new();

        for node in self.nodes.keys() {
            if let Some(cycle) = self.dfs_cycle(node, &mut visited, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a K,
        visited: &mut IndexSet<&'a K>,
        stack: &mut IndexSet<&'a K>,
    ) -> Option<Vec<K>> {
        if let Some(pos) = stack.get_index_of(&node) {
            let mut chain: Vec<K> = stack.iter().skip(pos).map(|k| (*k).clone()).collect();
            chain.push(node.clone());
            return Some(chain);
        }
        if !visited.insert(node) {
            return None;
        }

        stack.insert(node);
        if let Some(deps) = self.nodes.get(node) {
            for dep in deps {
                if let Some(cycle) = self.dfs_cycle(dep, visited, stack) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        None
    }

    /// Render a cycle chain for error messages
    #[must_use]
    pub fn describe_chain(chain: &[K]) -> Vec<String> {
        chain.iter().map(ToString::to_string).collect()
    }
}

impl<K: Hash + Eq + Clone + Display> Default for DependencyGraph<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&'static str, &'static str)]) -> DependencyGraph<&'static str> {
        let mut g = DependencyGraph::new();
        for (node, on) in edges {
            g.add_dependency(*node, *on);
        }
        g
    }

    #[test]
    fn test_graph_new() {
        let g: DependencyGraph<String> = DependencyGraph::new();
        assert!(g.is_empty());
        assert_eq!(g.node_count(), 0);
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn test_add_dependency_adds_nodes() {
        let g = graph(&[("associations", "public_subnets")]);
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.dependencies(&"associations"), vec![&"public_subnets"]);
        assert_eq!(g.dependents(&"public_subnets"), vec![&"associations"]);
    }

    #[test]
    fn test_topological_order_respects_dependencies() {
        let mut g = DependencyGraph::new();
        g.add_node("associations");
        g.add_node("vpcs");
        g.add_node("public_subnets");
        g.add_dependency("associations", "public_subnets");

        let order = g.topological_order().unwrap();
        assert_eq!(order, vec!["vpcs", "public_subnets", "associations"]);
    }

    #[test]
    fn test_topological_order_keeps_insertion_order_for_ties() {
        let mut g = DependencyGraph::new();
        for name in ["c", "a", "b"] {
            g.add_node(name);
        }
        assert_eq!(g.topological_order().unwrap(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_cycle_detected() {
        let g = graph(&[("a", "b"), ("b", "c"), ("c", "a")]);
        let cycle = g.topological_order().unwrap_err();
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
    }

    #[test]
    fn test_self_cycle_detected() {
        let g = graph(&[("a", "a")]);
        assert_eq!(g.find_cycle(), Some(vec!["a", "a"]));
    }

    #[test]
    fn test_no_cycle_in_diamond() {
        let g = graph(&[("d", "b"), ("d", "c"), ("b", "a"), ("c", "a")]);
        assert!(g.find_cycle().is_none());
        let order = g.topological_order().unwrap();
        assert_eq!(order.first(), Some(&"a"));
        assert_eq!(order.last(), Some(&"d"));
    }
}
