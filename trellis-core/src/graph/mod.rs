//! Dependency Graph
//!
//! This module holds the static structure of a device: named nodes, their
//! dependency edges and the topological order used to update them.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph where:
//!
//! - Source nodes hold values written from outside (local writes, remote
//!   readings)
//! - Derived nodes are computed from the states of their dependencies
//! - Edges point from a dependency to its dependents
//!
//! The shape is fixed once [`GraphBuilder::build`] succeeds. Only node states
//! change afterwards, and only through transactions
//! (see [`crate::reactive`]).
//!
//! # Design Decisions
//!
//! 1. Nodes are stored in a dense table indexed by [`NodeId`]; names are
//!    resolved through an index kept in declaration order.
//!
//! 2. Both forward (dependencies) and reverse (dependents) edges are kept.
//!    Dependencies give the argument order of a rule, dependents drive
//!    propagation.
//!
//! 3. Topological ranks are computed once at build time, which is also where
//!    cycles are rejected.

mod builder;
mod node;
mod scheduler;
mod store;

pub use builder::GraphBuilder;
pub use node::{DerivedKind, Node, NodeId, NodeKind, NodeState, SourceKind};
pub use store::{Graph, GraphId};
