//! The Graph
//!
//! A `Graph` owns every node of a device, the rule of each derived node,
//! the precomputed topological ranks and the registered sinks. Nodes live in
//! a dense table addressed by [`NodeId`]; names are resolved once, through
//! an index kept in declaration order.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;

use super::node::{Node, NodeId, NodeState};
use super::scheduler::UpdateScheduler;
use crate::clock::Clock;
use crate::reactive::{QualityPolicy, Rule, SinkEntry};

/// Unique identifier of a graph instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphId(u64);

impl GraphId {
    /// Generate a new unique graph ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for GraphId {
    fn default() -> Self {
        Self::new()
    }
}

/// A built, acyclic dependency graph.
pub struct Graph {
    pub(crate) id: GraphId,
    pub(crate) nodes: Vec<Node>,
    pub(crate) index: IndexMap<String, NodeId>,
    /// Rule of each derived node, `None` for sources.
    pub(crate) rules: Vec<Option<Rule>>,
    pub(crate) scheduler: UpdateScheduler,
    pub(crate) sinks: Vec<SinkEntry>,
    pub(crate) policy: QualityPolicy,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Graph {
    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn id_of(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.id_of(name).map(|id| &self.nodes[id.index()])
    }

    pub fn node_by_id(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Current state of a node.
    pub fn read(&self, name: &str) -> Option<&NodeState> {
        self.node(name).map(Node::read)
    }

    /// All nodes, in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Dependencies of a node, in declaration order.
    pub fn subnodes(&self, name: &str) -> Vec<&Node> {
        self.node(name)
            .map(|node| {
                node.dependencies()
                    .iter()
                    .map(|id| &self.nodes[id.index()])
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn quality_policy(&self) -> QualityPolicy {
        self.policy
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn shared_clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("nodes", &self.nodes)
            .field("policy", &self.policy)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
