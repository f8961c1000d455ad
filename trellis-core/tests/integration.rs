//! Integration Tests for Propagation
//!
//! These tests verify that graphs, rules, transactions and sinks work
//! together the way a device relies on.

use std::sync::{Arc, Mutex};

use trellis_core::reactive::TransactionContext;
use trellis_core::{
    Computed, DerivedKind, DeviceState, Failure, Graph, GraphBuilder, GraphError, ManualClock,
    NodeState, Quality, Rule, SourceKind, StateReport, Timestamp, Triplet, Value, Write,
};

fn t(secs: f64) -> Timestamp {
    Timestamp::from_secs(secs)
}

fn divide() -> Rule {
    Rule::standard(|values| {
        let a = values[0].as_f64().unwrap_or_default();
        let b = values[1].as_f64().unwrap_or_default();
        if b == 0.0 {
            Err(Failure::msg("division by zero"))
        } else {
            Ok((a / b).into())
        }
    })
}

fn negate() -> Rule {
    Rule::standard(|values| Ok((-values[0].as_f64().unwrap_or_default()).into()))
}

/// A, B -> C = A / B, and A -> D = -A.
fn division() -> Graph {
    GraphBuilder::new()
        .clock(Arc::new(ManualClock::new(100.0)))
        .source("A", SourceKind::Local)
        .source("B", SourceKind::Local)
        .derived("C", DerivedKind::Logical, ["A", "B"], divide())
        .derived("D", DerivedKind::Logical, ["A"], negate())
        .build()
        .unwrap()
}

/// Test the numeric example: C = A / B, then B drops to zero.
#[test]
fn division_then_division_by_zero() {
    let mut graph = division();

    graph
        .apply([
            Write::result("A", Triplet::at(1.0, t(1.0))),
            Write::result("B", Triplet::at(4.0, t(2.0))),
        ])
        .unwrap();
    assert_eq!(graph.read("C"), Some(&NodeState::Result(Triplet::at(0.25, t(2.0)))));

    graph.apply([Write::result("B", Triplet::at(0.0, t(3.0)))]).unwrap();
    let failure = graph.read("C").unwrap().failure().unwrap();
    assert_eq!(failure.to_string(), "division by zero");
    assert_eq!(failure.origin(), Some("C"));
    assert!(graph.read("A").unwrap().triplet().is_some());

    // A dependent of A alone still recomputes correctly.
    graph.apply([Write::result("A", Triplet::at(2.0, t(4.0)))]).unwrap();
    assert_eq!(graph.read("D"), Some(&NodeState::Result(Triplet::at(-2.0, t(4.0)))));
    assert!(graph.read("C").unwrap().failure().is_some());
}

/// Test that a failure in one branch does not stop another from settling.
#[test]
fn failure_does_not_abort_transaction() {
    let mut graph = division();

    let report = graph
        .apply([
            Write::result("A", Triplet::at(3.0, t(1.0))),
            Write::result("B", Triplet::at(0.0, t(1.0))),
        ])
        .unwrap();

    assert!(graph.read("C").unwrap().failure().is_some());
    assert_eq!(graph.read("D"), Some(&NodeState::Result(Triplet::at(-3.0, t(1.0)))));
    assert_eq!(report.changed.len(), 4);
}

/// Test that Empty dominates Failure, and a failure otherwise wins.
#[test]
fn empty_then_failure_precedence() {
    let mut graph = division();
    let error = Failure::msg("read error");

    graph.apply([Write::failure("B", error.clone())]).unwrap();
    assert_eq!(graph.read("C"), Some(&NodeState::Empty));

    graph.apply([Write::result("A", Triplet::at(1.0, t(1.0)))]).unwrap();
    let forwarded = graph.read("C").unwrap().failure().unwrap();
    assert!(forwarded.same_as(&error));
    assert_eq!(forwarded.origin(), None);
}

/// Test that a degraded quality invalidates dependents.
#[test]
fn alarm_quality_invalidates_result() {
    let mut graph = division();

    graph
        .apply([
            Write::result("A", Triplet::new(Some(Value::Float(1.0)), t(5.0), Quality::Alarm)),
            Write::result("B", Triplet::at(4.0, t(2.0))),
        ])
        .unwrap();

    let c = graph.read("C").unwrap().triplet().unwrap();
    assert_eq!(c.value(), None);
    assert_eq!(c.quality(), Quality::Invalid);
    assert_eq!(c.timestamp(), t(5.0));
}

/// Test that applying the same write twice changes nothing the second time.
#[test]
fn identical_write_is_idempotent() {
    let notified = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&notified);
    let mut graph = GraphBuilder::new()
        .source("A", SourceKind::Local)
        .derived("B", DerivedKind::Logical, ["A"], negate())
        .on_change(move |_, _| {
            *counter.lock().unwrap() += 1;
            Ok(())
        })
        .build()
        .unwrap();

    let write = Write::result("A", Triplet::at(1.0, t(1.0)));
    graph.apply([write.clone()]).unwrap();
    assert_eq!(*notified.lock().unwrap(), 2);

    let report = graph.apply([write]).unwrap();
    assert!(report.is_noop());
    assert!(report.recomputed.is_empty());
    assert_eq!(*notified.lock().unwrap(), 2);
}

/// Test that propagation covers the dependent closure, once per node.
#[test]
fn diamond_is_recomputed_once_per_node() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let counting = |name: &'static str| {
        let calls = Arc::clone(&calls);
        Rule::standard(move |values| {
            calls.lock().unwrap().push(name);
            Ok(Value::Float(values.iter().filter_map(Value::as_f64).sum()).into())
        })
    };

    let mut graph = GraphBuilder::new()
        .source("S", SourceKind::Local)
        .source("Other", SourceKind::Local)
        .derived("Left", DerivedKind::Logical, ["S"], counting("Left"))
        .derived("Right", DerivedKind::Logical, ["S"], counting("Right"))
        .derived("Join", DerivedKind::Logical, ["Left", "Right"], counting("Join"))
        .derived("Unrelated", DerivedKind::Logical, ["Other"], counting("Unrelated"))
        .build()
        .unwrap();

    graph.apply([Write::result("S", Triplet::at(1.0, t(1.0)))]).unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls.last(), Some(&"Join"));
    assert!(!calls.contains(&"Unrelated"));
    assert_eq!(graph.read("Join"), Some(&NodeState::Result(Triplet::at(2.0, t(1.0)))));
}

/// Test the two-state counter: state and status follow the count in the
/// same transaction.
#[test]
fn counter_state_and_status() {
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&statuses);

    let mut graph = GraphBuilder::new()
        .clock(Arc::new(ManualClock::new(100.0)))
        .source("count", SourceKind::Local)
        .derived(
            "State",
            DerivedKind::State,
            ["count"],
            Rule::state(|values| {
                let count = values[0].as_i64().unwrap_or_default();
                let state = if count > 0 { DeviceState::On } else { DeviceState::Off };
                Ok((state, format!("The count is {count}")).into())
            }),
        )
        .watch("State", move |_, change| {
            let report = change
                .current()
                .triplet()
                .and_then(|t| t.value())
                .and_then(StateReport::from_value);
            log.lock().unwrap().push(report);
            Ok(())
        })
        .build()
        .unwrap();

    graph.apply([Write::result("count", Triplet::at(0, t(1.0)))]).unwrap();
    graph.apply([Write::result("count", Triplet::at(1, t(2.0)))]).unwrap();

    assert_eq!(
        *statuses.lock().unwrap(),
        [
            Some(StateReport::with_status(DeviceState::Off, "The count is 0")),
            Some(StateReport::with_status(DeviceState::On, "The count is 1")),
        ]
    );
    assert_eq!(graph.read("State").unwrap().triplet().unwrap().timestamp(), t(100.0));
}

/// Test that a cyclic declaration fails construction.
#[test]
fn cycle_is_rejected_at_construction() {
    let result = GraphBuilder::new()
        .derived("X", DerivedKind::Logical, ["Y"], negate())
        .derived("Y", DerivedKind::Logical, ["X"], negate())
        .build();

    assert!(matches!(result, Err(GraphError::Cycle { .. })));
}

/// Test that a custom rule counts ready inputs regardless of their state.
#[test]
fn custom_rule_sees_raw_states() {
    let mut graph = GraphBuilder::new()
        .clock(Arc::new(ManualClock::new(100.0)))
        .source("A", SourceKind::Local)
        .source("B", SourceKind::Local)
        .derived(
            "Ready",
            DerivedKind::Logical,
            ["A", "B"],
            Rule::custom(|states| {
                let ready = states.iter().filter(|state| !state.is_empty()).count();
                Ok(Computed::from(ready as i64))
            }),
        )
        .build()
        .unwrap();

    graph.apply([Write::failure("B", Failure::msg("offline"))]).unwrap();
    assert_eq!(graph.read("Ready"), Some(&NodeState::Result(Triplet::at(1, t(100.0)))));
}

/// Test that a transaction cannot be opened on a graph already in one.
#[test]
fn reentrant_transaction_is_rejected() {
    let mut graph = division();

    let _open = TransactionContext::enter(graph.id());
    assert!(graph.apply([Write::clear("A")]).is_err());
}
