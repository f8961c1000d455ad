//! Trellis Core
//!
//! This crate provides the propagation engine behind Trellis facade devices.
//! A facade describes the observable state of a device (attributes, state and
//! status) as a graph of values derived from local inputs and from remote
//! attributes. Any update to a source value propagates synchronously to
//! everything that depends on it.
//!
//! It implements:
//!
//! - Timestamped, qualified readings ([`Triplet`])
//! - Node states that are empty, a result or a failure ([`NodeState`])
//! - A validated, acyclic dependency graph ([`Graph`])
//! - Deterministic aggregation of dependency states ([`Rule`])
//! - Atomic update transactions with settled notifications ([`Write`], [`Sink`])
//! - The facade device runtime around it ([`device::Facade`])
//!
//! # Architecture
//!
//! - `triplet`, `value`, `failure`: the data a node holds
//! - `graph`: nodes, edges and the topological order
//! - `reactive`: rules, transactions and sinks
//! - `device`: configuration, diagnostics, state export and event intake
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{DerivedKind, GraphBuilder, Rule, SourceKind, Triplet, Write};
//!
//! let mut graph = GraphBuilder::new()
//!     .source("A", SourceKind::Local)
//!     .source("B", SourceKind::Local)
//!     .derived("C", DerivedKind::Logical, ["A", "B"], Rule::standard(|v| {
//!         Ok((v[0].as_f64().unwrap_or_default() / v[1].as_f64().unwrap_or_default()).into())
//!     }))
//!     .build()?;
//!
//! graph.apply([
//!     Write::result("A", Triplet::now(1.0)),
//!     Write::result("B", Triplet::now(4.0)),
//! ])?;
//! // C now holds 0.25
//! ```

pub mod clock;
pub mod device;
pub mod error;
pub mod failure;
pub mod graph;
pub mod reactive;
pub mod triplet;
pub mod value;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{GraphError, SinkError, TransactionError};
pub use failure::Failure;
pub use graph::{
    DerivedKind, Graph, GraphBuilder, GraphId, Node, NodeId, NodeKind, NodeState, SourceKind,
};
pub use reactive::{
    Change, Computed, FnSink, QualityPolicy, Rule, Sink, StateReport, TransactionReport, Write,
};
pub use triplet::{Quality, Timestamp, Triplet};
pub use value::{DeviceState, Value};
