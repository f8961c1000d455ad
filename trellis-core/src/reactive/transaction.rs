//! Update Transactions
//!
//! A transaction is the only way node states change. It runs in four steps:
//!
//! 1. Apply every write to its source node, in order, and keep the sources
//!    whose final state differs from their state before the transaction
//! 2. Collect the transitive dependents of those sources
//! 3. Recompute that closure in topological order, each node exactly once,
//!    noting which ones changed
//! 4. Notify the sinks once per changed node, with its settled state
//!
//! Every write is validated before the first one is applied, so a rejected
//! transaction leaves the graph untouched. A failing computation does not
//! abort anything: it becomes the failure state of its node.

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use super::aggregate::Aggregator;
use super::context::TransactionContext;
use super::sink::{Change, SinkFailure};
use crate::error::TransactionError;
use crate::failure::Failure;
use crate::graph::{Graph, Node, NodeId, NodeState};
use crate::triplet::Triplet;

/// A new state for a source node.
#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    node: String,
    state: NodeState,
}

impl Write {
    pub fn new(node: impl Into<String>, state: NodeState) -> Self {
        Self {
            node: node.into(),
            state,
        }
    }

    /// Store a result.
    pub fn result(node: impl Into<String>, triplet: Triplet) -> Self {
        Self::new(node, NodeState::Result(triplet))
    }

    /// Store a failure.
    pub fn failure(node: impl Into<String>, failure: Failure) -> Self {
        Self::new(node, NodeState::Failure(failure))
    }

    /// Reset the node to `Empty`.
    pub fn clear(node: impl Into<String>) -> Self {
        Self::new(node, NodeState::Empty)
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }
}

/// What a transaction did.
#[derive(Debug, Default)]
pub struct TransactionReport {
    /// Nodes whose state changed: written sources first, in write order,
    /// then derived nodes in topological order.
    pub changed: Vec<NodeId>,

    /// Derived nodes recomputed, in order.
    pub recomputed: Vec<NodeId>,

    /// Failures raised by rule functions, in recomputation order.
    /// Failures forwarded from a dependency are not repeated here.
    pub raised: Vec<Failure>,

    /// Errors raised by sinks during notification.
    pub sink_errors: Vec<SinkFailure>,
}

impl TransactionReport {
    pub fn has_changed(&self, node_id: NodeId) -> bool {
        self.changed.contains(&node_id)
    }

    pub fn was_recomputed(&self, node_id: NodeId) -> bool {
        self.recomputed.contains(&node_id)
    }

    /// Whether the transaction changed nothing.
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty()
    }
}

impl Graph {
    /// Apply writes and propagate them through the graph.
    pub fn apply<I>(&mut self, writes: I) -> Result<TransactionReport, TransactionError>
    where
        I: IntoIterator<Item = Write>,
    {
        if TransactionContext::is_open(self.id) {
            return Err(TransactionError::Reentrant);
        }
        let writes = self.resolve(writes)?;
        let _ctx = TransactionContext::enter(self.id);
        debug!(graph = ?self.id, writes = writes.len(), "applying transaction");

        let mut report = TransactionReport::default();

        // Step 1: write sources, remembering the state each had before
        let mut previous: IndexMap<NodeId, NodeState> = IndexMap::new();
        for (node_id, state) in writes {
            let before = store(&mut self.nodes[node_id.index()], state);
            previous.entry(node_id).or_insert(before);
        }
        let mut changed: Vec<(NodeId, NodeState)> = previous
            .into_iter()
            .filter(|(node_id, before)| self.nodes[node_id.index()].read().differs_from(before))
            .collect();

        // Step 2 & 3: recompute the closure in order
        let order = self
            .scheduler
            .affected(&self.nodes, changed.iter().map(|(node_id, _)| *node_id));
        for node_id in order {
            let Some(outcome) = self.recompute(node_id) else {
                continue;
            };
            report.recomputed.push(node_id);
            let state = outcome.unwrap_or_else(|failure| {
                report.raised.push(failure.clone());
                NodeState::Failure(failure)
            });

            let node = &mut self.nodes[node_id.index()];
            let before = store(node, state);
            if node.read().differs_from(&before) {
                trace!(node = node.name(), "node changed");
                changed.push((node_id, before));
            }
        }

        // Step 4: notify
        report.changed = changed.iter().map(|(node_id, _)| *node_id).collect();
        report.sink_errors = self.notify(&changed);

        debug!(
            graph = ?self.id,
            changed = report.changed.len(),
            recomputed = report.recomputed.len(),
            raised = report.raised.len(),
            "transaction settled"
        );
        Ok(report)
    }

    /// Check every write before touching anything.
    fn resolve<I>(&self, writes: I) -> Result<Vec<(NodeId, NodeState)>, TransactionError>
    where
        I: IntoIterator<Item = Write>,
    {
        writes
            .into_iter()
            .map(|write| {
                let node = self
                    .node(&write.node)
                    .ok_or_else(|| TransactionError::UnknownNode(write.node.clone()))?;
                if !node.kind().is_source() {
                    return Err(TransactionError::NotASource(write.node));
                }
                Ok((node.id(), write.state))
            })
            .collect()
    }

    /// New state of a derived node from the current states of its
    /// dependencies. `None` for sources.
    fn recompute(&self, node_id: NodeId) -> Option<Result<NodeState, Failure>> {
        let node = &self.nodes[node_id.index()];
        let rule = self.rules[node_id.index()].as_ref()?;
        let dependencies: Vec<&NodeState> = node
            .dependencies()
            .iter()
            .map(|dep| self.nodes[dep.index()].read())
            .collect();

        trace!(node = node.name(), "recomputing");
        let aggregator = Aggregator::new(self.policy, self.clock.as_ref());
        Some(aggregator.compute(node.name(), rule, &dependencies))
    }

    fn notify(&mut self, changed: &[(NodeId, NodeState)]) -> Vec<SinkFailure> {
        let mut failures = Vec::new();
        if changed.is_empty() || self.sinks.is_empty() {
            return failures;
        }

        // Sinks get a read-only view of the whole graph while they run.
        let mut sinks = std::mem::take(&mut self.sinks);
        for (node_id, before) in changed {
            let change = Change {
                node: &self.nodes[node_id.index()],
                previous: before,
            };
            for entry in sinks.iter_mut().filter(|entry| entry.accepts(*node_id)) {
                if let Err(error) = entry.sink.notify(self, &change) {
                    warn!(node = change.name(), %error, "sink failed");
                    failures.push(SinkFailure {
                        node: change.name().to_string(),
                        error,
                    });
                }
            }
        }
        self.sinks = sinks;
        failures
    }
}

/// Store `state` through the node's write operations. Returns the previous
/// state.
fn store(node: &mut Node, state: NodeState) -> NodeState {
    match state {
        NodeState::Empty => node.set_result(None),
        NodeState::Result(triplet) => node.set_result(Some(triplet)),
        NodeState::Failure(failure) => node.set_failure(failure),
    }
}
