//! Sinks
//!
//! A sink observes nodes once a transaction has settled: attribute event
//! pushers, state exporters, user callbacks. Each sink sees each changed
//! node at most once per transaction, with its final state.

use std::fmt;

use crate::error::SinkError;
use crate::graph::{Graph, Node, NodeId, NodeState};

/// A settled change of one node.
#[derive(Debug)]
pub struct Change<'a> {
    pub node: &'a Node,
    pub previous: &'a NodeState,
}

impl Change<'_> {
    pub fn name(&self) -> &str {
        self.node.name()
    }

    pub fn current(&self) -> &NodeState {
        self.node.read()
    }
}

/// An external consumer of settled node states.
pub trait Sink: Send {
    /// Called once per changed node, after the transaction settled.
    ///
    /// The graph is read-only here. An error is logged and reported but
    /// does not undo the transaction.
    fn notify(&mut self, graph: &Graph, change: &Change<'_>) -> Result<(), SinkError>;
}

/// Adapter turning a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F> Sink for FnSink<F>
where
    F: FnMut(&Graph, &Change<'_>) -> Result<(), SinkError> + Send,
{
    fn notify(&mut self, graph: &Graph, change: &Change<'_>) -> Result<(), SinkError> {
        (self.0)(graph, change)
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn notify(&mut self, graph: &Graph, change: &Change<'_>) -> Result<(), SinkError> {
        (**self).notify(graph, change)
    }
}

/// A registered sink, optionally restricted to one node.
pub(crate) struct SinkEntry {
    pub(crate) filter: Option<NodeId>,
    pub(crate) sink: Box<dyn Sink>,
}

impl SinkEntry {
    pub(crate) fn accepts(&self, node_id: NodeId) -> bool {
        self.filter.map_or(true, |filter| filter == node_id)
    }
}

impl fmt::Debug for SinkEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkEntry")
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

/// A sink error, with the node being notified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkFailure {
    pub node: String,
    pub error: SinkError,
}
