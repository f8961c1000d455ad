//! Transaction Context
//!
//! The transaction context tracks which graphs have a transaction open on
//! the current thread. This is how a write issued from inside a sink (or a
//! computation) is recognised as re-entrant.
//!
//! # Implementation
//!
//! We use a thread-local stack of graph IDs. Applying a transaction pushes
//! the graph's ID for its whole duration, notifications included, and the
//! guard pops it on drop. Transactions on *different* graphs may nest: a
//! sink of one device can feed another device synchronously.

use std::cell::RefCell;

use crate::graph::GraphId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<GraphId>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the context when dropped.
///
/// This keeps the stack consistent even if a computation panics.
pub struct TransactionContext {
    graph_id: GraphId,
}

impl TransactionContext {
    /// Mark a transaction on `graph_id` as open on this thread.
    pub fn enter(graph_id: GraphId) -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(graph_id));
        Self { graph_id }
    }

    /// Whether any transaction is open on this thread.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// Whether a transaction on `graph_id` is open on this thread.
    pub fn is_open(graph_id: GraphId) -> bool {
        CONTEXT_STACK.with(|stack| stack.borrow().contains(&graph_id))
    }

    /// The innermost open transaction, if any.
    pub fn current() -> Option<GraphId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().copied())
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(graph_id) = popped {
                debug_assert_eq!(
                    graph_id, self.graph_id,
                    "TransactionContext mismatch: expected {:?}, got {:?}",
                    self.graph_id, graph_id
                );
            }
        });
    }
}
