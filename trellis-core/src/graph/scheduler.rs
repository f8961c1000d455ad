//! Update Scheduler
//!
//! The scheduler determines the order in which affected nodes are
//! recomputed. It ensures that dependencies are always settled before their
//! dependents.
//!
//! # Algorithm
//!
//! The graph is fixed once built, so the topological order is computed a
//! single time with Kahn's algorithm and kept as a rank per node. A cycle
//! shows up as nodes Kahn never reaches, and fails the build.
//!
//! For each transaction:
//!
//! 1. Walk the reverse edges from every changed source (BFS) to collect the
//!    transitive closure of dependents
//! 2. Sort that closure by rank
//!
//! Every node of the closure appears exactly once, after all of its
//! dependencies that are also in the closure.

use std::collections::VecDeque;

use super::node::{Node, NodeId};

/// Topological ordering of a built graph.
#[derive(Debug, Clone)]
pub(crate) struct UpdateScheduler {
    /// Position of each node in the topological order.
    rank: Vec<usize>,
}

impl UpdateScheduler {
    /// Order the given nodes.
    ///
    /// On a cycle, returns a node that lies on it.
    pub(crate) fn new(nodes: &[Node]) -> Result<Self, NodeId> {
        let mut in_degree = vec![0usize; nodes.len()];
        for node in nodes {
            for dependent in node.dependents() {
                in_degree[dependent.index()] += 1;
            }
        }

        let mut queue: VecDeque<NodeId> = nodes
            .iter()
            .filter(|node| in_degree[node.id().index()] == 0)
            .map(Node::id)
            .collect();

        // Kahn's algorithm
        let mut rank = vec![usize::MAX; nodes.len()];
        let mut next = 0;
        while let Some(node_id) = queue.pop_front() {
            rank[node_id.index()] = next;
            next += 1;

            for dependent in nodes[node_id.index()].dependents() {
                let degree = &mut in_degree[dependent.index()];
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*dependent);
                }
            }
        }

        if next < nodes.len() {
            return Err(Self::cycle_witness(nodes, &in_degree));
        }

        Ok(Self { rank })
    }

    /// Find a node on a cycle among the nodes Kahn could not order.
    fn cycle_witness(nodes: &[Node], in_degree: &[usize]) -> NodeId {
        let stuck = |id: &NodeId| in_degree[id.index()] > 0;

        // Every stuck node has a stuck dependency, so walking upstream
        // through stuck nodes must eventually revisit one.
        let mut seen = vec![false; nodes.len()];
        let mut current = nodes
            .iter()
            .map(Node::id)
            .find(|id| stuck(id))
            .unwrap_or(NodeId::new(0));
        loop {
            if seen[current.index()] {
                return current;
            }
            seen[current.index()] = true;
            match nodes[current.index()].dependencies().iter().find(|d| stuck(d)) {
                Some(dependency) => current = *dependency,
                None => return current,
            }
        }
    }

    /// Position of a node in the topological order.
    pub(crate) fn rank(&self, node_id: NodeId) -> usize {
        self.rank[node_id.index()]
    }

    /// Transitive dependents of `changed`, in topological order.
    ///
    /// The changed nodes themselves are not included.
    pub(crate) fn affected<I>(&self, nodes: &[Node], changed: I) -> Vec<NodeId>
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut visited = vec![false; nodes.len()];
        let mut queue = VecDeque::new();
        let mut affected = Vec::new();

        for source in changed {
            queue.extend(nodes[source.index()].dependents().iter().copied());
        }

        // BFS over reverse edges
        while let Some(node_id) = queue.pop_front() {
            if visited[node_id.index()] {
                continue;
            }
            visited[node_id.index()] = true;
            affected.push(node_id);
            queue.extend(nodes[node_id.index()].dependents().iter().copied());
        }

        affected.sort_by_key(|id| self.rank(*id));
        affected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::{DerivedKind, NodeKind, SourceKind};

    /// Build raw nodes from `(name, dependencies)` pairs.
    fn nodes(layout: &[(&str, Vec<usize>)]) -> Vec<Node> {
        let mut nodes: Vec<Node> = layout
            .iter()
            .enumerate()
            .map(|(i, (name, deps))| {
                let kind = if deps.is_empty() {
                    NodeKind::Source(SourceKind::Local)
                } else {
                    NodeKind::Derived(DerivedKind::Logical)
                };
                Node::new(NodeId::new(i), name.to_string(), name.to_string(), kind)
            })
            .collect();
        for (i, (_, deps)) in layout.iter().enumerate() {
            for dep in deps {
                nodes[i].add_dependency(NodeId::new(*dep));
                nodes[*dep].add_dependent(NodeId::new(i));
            }
        }
        nodes
    }

    #[test]
    fn chain_is_ordered() {
        // d2 -> d1 -> source, declared out of order
        let nodes = nodes(&[("d2", vec![2]), ("source", vec![]), ("d1", vec![1])]);
        let scheduler = UpdateScheduler::new(&nodes).unwrap();

        let affected = scheduler.affected(&nodes, [NodeId::new(1)]);
        assert_eq!(affected, vec![NodeId::new(2), NodeId::new(0)]);
    }

    #[test]
    fn diamond_visits_each_node_once() {
        // A -> B, A -> C, (A, B, C) -> D
        let nodes = nodes(&[("A", vec![]), ("B", vec![0]), ("C", vec![0]), ("D", vec![0, 1, 2])]);
        let scheduler = UpdateScheduler::new(&nodes).unwrap();

        let affected = scheduler.affected(&nodes, [NodeId::new(0)]);
        assert_eq!(affected.len(), 3);
        assert_eq!(affected.last(), Some(&NodeId::new(3)));
    }

    #[test]
    fn unrelated_nodes_are_not_affected() {
        let nodes = nodes(&[("A", vec![]), ("B", vec![]), ("C", vec![0]), ("D", vec![1])]);
        let scheduler = UpdateScheduler::new(&nodes).unwrap();

        let affected = scheduler.affected(&nodes, [NodeId::new(0)]);
        assert_eq!(affected, vec![NodeId::new(2)]);
    }

    #[test]
    fn duplicate_bindings_do_not_look_cyclic() {
        let nodes = nodes(&[("A", vec![]), ("B", vec![0, 0])]);
        assert!(UpdateScheduler::new(&nodes).is_ok());
    }

    #[test]
    fn cycle_is_detected() {
        // source -> X -> Y -> X, plus Z downstream of the cycle
        let nodes = nodes(&[("source", vec![]), ("X", vec![0, 2]), ("Y", vec![1]), ("Z", vec![2])]);
        let witness = UpdateScheduler::new(&nodes).unwrap_err();
        assert!(witness == NodeId::new(1) || witness == NodeId::new(2));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let nodes = nodes(&[("A", vec![0])]);
        assert_eq!(UpdateScheduler::new(&nodes).unwrap_err(), NodeId::new(0));
    }
}
