//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.
//!
//! A node holds exactly one of three states:
//!
//! - `Empty`: never produced anything
//! - `Result(triplet)`: produced a reading (possibly an invalid one)
//! - `Failure(failure)`: its computation or its transport raised an error
//!
//! Both `Empty` and an invalid result mean "nothing useful" to a reader,
//! but they are different states and propagate differently.

use serde::Serialize;
use smallvec::SmallVec;

use crate::failure::Failure;
use crate::triplet::Triplet;

/// Dense index of a node in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// Position of the node in the graph's node table.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// How a source node is fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Written locally (client writes, commands, defaults).
    Local,
    /// Fed by events from a remote attribute.
    Proxy,
}

/// What a derived node computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedKind {
    /// Computed from other nodes of the device.
    Logical,
    /// Computed from a list of remote attributes.
    Combined,
    /// Computes the device state (and possibly its status).
    State,
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A source node. These are the roots of the graph: no dependencies,
    /// written only by transactions.
    Source(SourceKind),

    /// A derived node, recomputed from its dependencies during propagation.
    Derived(DerivedKind),
}

impl NodeKind {
    pub fn is_source(&self) -> bool {
        matches!(self, NodeKind::Source(_))
    }
}

/// Current state of a node.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum NodeState {
    #[default]
    Empty,
    Result(Triplet),
    Failure(Failure),
}

impl NodeState {
    pub fn is_empty(&self) -> bool {
        matches!(self, NodeState::Empty)
    }

    pub fn triplet(&self) -> Option<&Triplet> {
        match self {
            NodeState::Result(triplet) => Some(triplet),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            NodeState::Failure(failure) => Some(failure),
            _ => None,
        }
    }

    /// Whether moving from `previous` to `self` is a change.
    ///
    /// Timestamp-only differences are not changes; failures differ by
    /// identity.
    pub fn differs_from(&self, previous: &NodeState) -> bool {
        match (self, previous) {
            (NodeState::Empty, NodeState::Empty) => false,
            (NodeState::Result(a), NodeState::Result(b)) => !a.same_reading(b),
            (NodeState::Failure(a), NodeState::Failure(b)) => !a.same_as(b),
            _ => true,
        }
    }
}

impl From<Option<Triplet>> for NodeState {
    fn from(result: Option<Triplet>) -> Self {
        result.map_or(NodeState::Empty, NodeState::Result)
    }
}

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    name: String,
    description: String,
    kind: NodeKind,
    state: NodeState,

    /// Nodes this node reads from, in declaration order.
    dependencies: SmallVec<[NodeId; 4]>,

    /// Nodes that read from this node.
    dependents: SmallVec<[NodeId; 4]>,
}

impl Node {
    pub(crate) fn new(id: NodeId, name: String, description: String, kind: NodeKind) -> Self {
        Self {
            id,
            name,
            description,
            kind,
            state: NodeState::Empty,
            dependencies: SmallVec::new(),
            dependents: SmallVec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Current state, without side effects.
    pub fn read(&self) -> &NodeState {
        &self.state
    }

    /// Store a result, or go back to `Empty` with `None`.
    ///
    /// Returns the previous state.
    pub(crate) fn set_result(&mut self, result: Option<Triplet>) -> NodeState {
        std::mem::replace(&mut self.state, result.into())
    }

    /// Store a failure. Returns the previous state.
    pub(crate) fn set_failure(&mut self, failure: Failure) -> NodeState {
        std::mem::replace(&mut self.state, NodeState::Failure(failure))
    }

    /// The stored triplet, `None` if empty.
    ///
    /// A stored failure is returned as the error to every reader.
    pub fn result(&self) -> Result<Option<&Triplet>, Failure> {
        match &self.state {
            NodeState::Empty => Ok(None),
            NodeState::Result(triplet) => Ok(Some(triplet)),
            NodeState::Failure(failure) => Err(failure.clone()),
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.state.failure()
    }

    pub fn dependencies(&self) -> &[NodeId] {
        &self.dependencies
    }

    pub fn dependents(&self) -> &[NodeId] {
        &self.dependents
    }

    pub(crate) fn add_dependency(&mut self, node_id: NodeId) {
        self.dependencies.push(node_id);
    }

    pub(crate) fn add_dependent(&mut self, node_id: NodeId) {
        if !self.dependents.contains(&node_id) {
            self.dependents.push(node_id);
        }
    }
}
