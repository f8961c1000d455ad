//! Propagation
//!
//! This module turns writes into settled node states: the rules attached to
//! derived nodes, the transactions that run them and the sinks that observe
//! the outcome.
//!
//! # Concepts
//!
//! ## Rules
//!
//! A [`Rule`] computes a derived node from the states of its dependencies.
//! Standard and state rules apply a fixed precedence (empty, failure,
//! degraded quality) before user code runs. Custom rules see raw states.
//!
//! ## Transactions
//!
//! [`Graph::apply`](crate::graph::Graph::apply) writes a batch of source
//! states, recomputes every transitive dependent once in topological order,
//! then notifies sinks. Readers never observe a half-propagated graph.
//!
//! ## Sinks
//!
//! A [`Sink`] receives each changed node once per transaction, after
//! everything settled. Sinks cannot write back into the graph they observe;
//! a transaction context per thread enforces it.

mod aggregate;
mod context;
mod sink;
mod transaction;

pub use aggregate::{Computed, CustomFn, QualityPolicy, Rule, StateFn, StateReport, ValueFn};
pub use context::TransactionContext;
pub use sink::{Change, FnSink, Sink, SinkFailure};
pub use transaction::{TransactionReport, Write};

pub(crate) use sink::SinkEntry;
