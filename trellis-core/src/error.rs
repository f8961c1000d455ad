//! Error types for graph construction, transactions and sinks.
//!
//! Node failures are not listed here: they are node states
//! (see [`crate::failure::Failure`]), not errors of the engine.

/// Errors raised while building a graph.
///
/// These are fatal: a graph that fails to build never runs a transaction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Two nodes were declared with the same name.
    #[error("a node called {0} already exists")]
    DuplicateNode(String),

    /// A derived node references a name that is not declared.
    #[error("node {node} depends on unknown node {dependency}")]
    UnknownDependency { node: String, dependency: String },

    /// The declared dependencies form a cycle.
    #[error("{node} is involved in a cyclic dependency")]
    Cycle { node: String },

    /// A sink or a description names a node that is not declared.
    #[error("unknown node {0}")]
    UnknownNode(String),

    /// A derived node was declared without dependencies.
    #[error("no binding defined for {0}")]
    NoBinding(String),
}

/// Errors rejecting a transaction before it touches the graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    #[error("unknown node {0}")]
    UnknownNode(String),

    /// Derived nodes are only written by propagation.
    #[error("node {0} is derived and cannot be written")]
    NotASource(String),

    /// A write was attempted while a transaction on the same graph is open.
    #[error("a transaction is already running on this graph")]
    Reentrant,
}

/// Error reported by a sink while observing a settled node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct SinkError(pub String);

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
