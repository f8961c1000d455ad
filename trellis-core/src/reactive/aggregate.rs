//! Aggregation
//!
//! A derived node is computed from the states of its dependencies by a
//! [`Rule`]. Standard and state rules go through a fixed precedence before
//! any user code runs:
//!
//! 1. any dependency `Empty` -> the node is `Empty`
//! 2. any dependency `Failure` -> the node carries the first such failure,
//!    in declaration order, as is
//! 3. any dependency with a degraded quality -> the node is an invalid
//!    result stamped with the latest dependency timestamp
//! 4. otherwise the user function runs on the dependency values
//!
//! What counts as degraded in rule 3 depends on the [`QualityPolicy`].
//!
//! Custom rules skip the precedence and see the raw dependency states.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::failure::Failure;
use crate::graph::NodeState;
use crate::triplet::{Quality, Timestamp, Triplet};
use crate::value::{DeviceState, Value};

/// How dependency qualities affect a derived result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityPolicy {
    /// Any quality other than `Valid` invalidates the result; computed
    /// results are `Valid`.
    #[default]
    Strict,

    /// Only `Invalid` invalidates the result; computed results take the
    /// worst quality of their dependencies.
    Worst,
}

impl QualityPolicy {
    fn degrades(self, quality: Quality) -> bool {
        match self {
            QualityPolicy::Strict => quality != Quality::Valid,
            QualityPolicy::Worst => quality == Quality::Invalid,
        }
    }
}

/// Output of a user computation.
#[derive(Debug, Clone, PartialEq)]
pub enum Computed {
    /// A bare value. Stamped and qualified by the engine.
    Value(Value),

    /// An explicit reading. Value and quality are used verbatim; a missing
    /// timestamp falls back to the engine's stamp.
    Triplet {
        value: Option<Value>,
        quality: Quality,
        timestamp: Option<Timestamp>,
    },
}

impl Computed {
    pub fn triplet(value: Option<Value>, quality: Quality) -> Self {
        Computed::Triplet {
            value,
            quality,
            timestamp: None,
        }
    }

    pub fn stamped(value: Option<Value>, quality: Quality, timestamp: Timestamp) -> Self {
        Computed::Triplet {
            value,
            quality,
            timestamp: Some(timestamp),
        }
    }

    /// Reading for a value produced outside propagation: a bare value is
    /// stamped now and valid.
    pub fn into_triplet(self, clock: &dyn Clock) -> Triplet {
        match self {
            Computed::Value(value) => Triplet::stamped(Some(value), None, Quality::Valid, clock),
            Computed::Triplet {
                value,
                quality,
                timestamp,
            } => Triplet::stamped(value, timestamp, quality, clock),
        }
    }
}

macro_rules! computed_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Computed {
                fn from(value: $ty) -> Self {
                    Computed::Value(value.into())
                }
            }
        )*
    };
}

computed_from!(Value, bool, i64, i32, f64, &str, String, DeviceState, Vec<Value>, StateReport);

impl From<Triplet> for Computed {
    fn from(triplet: Triplet) -> Self {
        let (value, timestamp, quality) = triplet.into_parts();
        Computed::stamped(value, quality, timestamp)
    }
}

/// Result of a state computation: a state, optionally with a status text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateReport {
    pub state: DeviceState,
    pub status: Option<String>,
}

impl StateReport {
    pub fn new(state: DeviceState) -> Self {
        Self {
            state,
            status: None,
        }
    }

    pub fn with_status(state: DeviceState, status: impl Into<String>) -> Self {
        Self {
            state,
            status: Some(status.into()),
        }
    }

    /// Decode a state node value.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::State(state) => Some(Self::new(*state)),
            Value::Array(items) => match items.as_slice() {
                [Value::State(state), Value::Text(status)] => {
                    Some(Self::with_status(*state, status.clone()))
                }
                _ => None,
            },
            _ => None,
        }
    }
}

impl From<DeviceState> for StateReport {
    fn from(state: DeviceState) -> Self {
        Self::new(state)
    }
}

impl<S: Into<String>> From<(DeviceState, S)> for StateReport {
    fn from((state, status): (DeviceState, S)) -> Self {
        Self::with_status(state, status)
    }
}

impl From<StateReport> for Value {
    fn from(report: StateReport) -> Self {
        match report.status {
            None => Value::State(report.state),
            Some(status) => Value::Array(vec![Value::State(report.state), Value::Text(status)]),
        }
    }
}

pub type ValueFn = dyn Fn(&[Value]) -> Result<Computed, Failure> + Send + Sync;
pub type StateFn = dyn Fn(&[Value]) -> Result<StateReport, Failure> + Send + Sync;
pub type CustomFn = dyn Fn(&[&NodeState]) -> Result<Computed, Failure> + Send + Sync;

/// Computation attached to a derived node.
pub enum Rule {
    /// Standard precedence, then a function of the dependency values.
    Standard(Box<ValueFn>),
    /// Standard precedence, then a state (and status) function, stamped
    /// with the current time.
    State(Box<StateFn>),
    /// A function of the raw dependency states.
    Custom(Box<CustomFn>),
}

impl Rule {
    pub fn standard<F>(func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Computed, Failure> + Send + Sync + 'static,
    {
        Rule::Standard(Box::new(func))
    }

    pub fn state<F>(func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<StateReport, Failure> + Send + Sync + 'static,
    {
        Rule::State(Box::new(func))
    }

    pub fn custom<F>(func: F) -> Self
    where
        F: Fn(&[&NodeState]) -> Result<Computed, Failure> + Send + Sync + 'static,
    {
        Rule::Custom(Box::new(func))
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rule::Standard(_) => "Rule::Standard",
            Rule::State(_) => "Rule::State",
            Rule::Custom(_) => "Rule::Custom",
        };
        f.write_str(name)
    }
}

/// Values of the dependencies once rules 1 to 3 let them through.
struct Inputs {
    values: Vec<Value>,
    latest: Option<Timestamp>,
    quality: Quality,
}

/// Applies rules to dependency states.
pub(crate) struct Aggregator<'a> {
    policy: QualityPolicy,
    clock: &'a dyn Clock,
}

impl<'a> Aggregator<'a> {
    pub(crate) fn new(policy: QualityPolicy, clock: &'a dyn Clock) -> Self {
        Self { policy, clock }
    }

    /// New state of `node` given the current states of its dependencies.
    ///
    /// `Err` holds a failure raised by the rule itself, located at `node`.
    /// Failures forwarded from a dependency are part of `Ok`.
    pub(crate) fn compute(
        &self,
        node: &str,
        rule: &Rule,
        dependencies: &[&NodeState],
    ) -> Result<NodeState, Failure> {
        let raised = |failure: Failure| failure.located(node);
        match rule {
            Rule::Custom(func) => {
                let computed = func(dependencies).map_err(raised)?;
                Ok(NodeState::Result(self.finish(computed, None, Quality::Valid)))
            }
            Rule::Standard(func) => match self.inputs(dependencies) {
                Err(state) => Ok(state),
                Ok(inputs) => {
                    let computed = func(&inputs.values).map_err(raised)?;
                    Ok(NodeState::Result(self.finish(computed, inputs.latest, inputs.quality)))
                }
            },
            Rule::State(func) => match self.inputs(dependencies) {
                Err(state) => Ok(state),
                Ok(inputs) => {
                    let report = func(&inputs.values).map_err(raised)?;
                    Ok(NodeState::Result(Triplet::new(
                        Some(report.into()),
                        self.clock.now(),
                        inputs.quality,
                    )))
                }
            },
        }
    }

    /// Rules 1 to 3. `Err` holds the short-circuited state.
    fn inputs(&self, dependencies: &[&NodeState]) -> Result<Inputs, NodeState> {
        if dependencies.iter().any(|state| state.is_empty()) {
            return Err(NodeState::Empty);
        }
        if let Some(failure) = dependencies.iter().find_map(|state| state.failure()) {
            return Err(NodeState::Failure(failure.clone()));
        }

        let triplets: Vec<&Triplet> = dependencies
            .iter()
            .filter_map(|state| state.triplet())
            .collect();
        let latest = Timestamp::latest(triplets.iter().map(|t| t.timestamp()));

        if triplets.iter().any(|t| self.policy.degrades(t.quality())) {
            let stamp = latest.unwrap_or_else(|| self.clock.now());
            return Err(NodeState::Result(Triplet::invalid(stamp)));
        }

        let quality = match self.policy {
            QualityPolicy::Strict => Quality::Valid,
            QualityPolicy::Worst => Quality::worst(triplets.iter().map(|t| t.quality())),
        };
        let values = triplets
            .iter()
            .filter_map(|t| t.value().cloned())
            .collect();

        Ok(Inputs {
            values,
            latest,
            quality,
        })
    }

    fn finish(&self, computed: Computed, latest: Option<Timestamp>, quality: Quality) -> Triplet {
        match computed {
            Computed::Value(value) => Triplet::stamped(Some(value), latest, quality, self.clock),
            Computed::Triplet {
                value,
                quality,
                timestamp,
            } => Triplet::stamped(value, timestamp.or(latest), quality, self.clock),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn t(secs: f64) -> Timestamp {
        Timestamp::from_secs(secs)
    }

    fn result(value: impl Into<Value>, secs: f64, quality: Quality) -> NodeState {
        NodeState::Result(Triplet::new(Some(value.into()), t(secs), quality))
    }

    fn divide() -> Rule {
        Rule::standard(|values| match values {
            [a, b] => {
                let (a, b) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
                if b == 0.0 {
                    Err(Failure::msg("division by zero"))
                } else {
                    Ok((a / b).into())
                }
            }
            _ => Err(Failure::msg("expected two values")),
        })
    }

    fn negate() -> Rule {
        Rule::standard(|values| Ok((-values[0].as_f64().unwrap_or_default()).into()))
    }

    #[test]
    fn empty_dominates_failure() {
        let clock = ManualClock::new(10.0);
        let aggregator = Aggregator::new(QualityPolicy::Strict, &clock);
        let failure = NodeState::Failure(Failure::msg("e"));

        let state = aggregator
            .compute("C", &divide(), &[&NodeState::Empty, &failure])
            .unwrap();
        assert_eq!(state, NodeState::Empty);
    }

    #[test]
    fn first_failure_is_forwarded_as_is() {
        let clock = ManualClock::new(10.0);
        let aggregator = Aggregator::new(QualityPolicy::Strict, &clock);
        let first = Failure::msg("first");
        let second = Failure::msg("second");

        let state = aggregator
            .compute(
                "C",
                &divide(),
                &[
                    &result(1.0, 1.0, Quality::Valid),
                    &NodeState::Failure(first.clone()),
                    &NodeState::Failure(second),
                ],
            )
            .unwrap();
        let forwarded = state.failure().unwrap();
        assert!(forwarded.same_as(&first));
        assert_eq!(forwarded.origin(), None);
    }

    #[test]
    fn forwarded_failure_is_not_raised_again() {
        let clock = ManualClock::new(10.0);
        let aggregator = Aggregator::new(QualityPolicy::Strict, &clock);
        let root = Failure::msg("root");

        let state = aggregator
            .compute("D", &negate(), &[&NodeState::Failure(root.clone())])
            .unwrap();
        assert!(state.failure().unwrap().same_as(&root));
    }

    #[test]
    fn degraded_quality_invalidates_with_latest_stamp() {
        let clock = ManualClock::new(10.0);
        let aggregator = Aggregator::new(QualityPolicy::Strict, &clock);

        let state = aggregator
            .compute(
                "C",
                &divide(),
                &[&result(1.0, 3.0, Quality::Alarm), &result(4.0, 2.0, Quality::Valid)],
            )
            .unwrap();
        assert_eq!(state, NodeState::Result(Triplet::invalid(t(3.0))));
    }

    #[test]
    fn worst_policy_keeps_computing_on_alarm() {
        let clock = ManualClock::new(10.0);
        let aggregator = Aggregator::new(QualityPolicy::Worst, &clock);

        let state = aggregator
            .compute(
                "C",
                &divide(),
                &[&result(1.0, 1.0, Quality::Alarm), &result(4.0, 2.0, Quality::Changing)],
            )
            .unwrap();
        assert_eq!(
            state,
            NodeState::Result(Triplet::new(Some(Value::Float(0.25)), t(2.0), Quality::Alarm))
        );

        let state = aggregator
            .compute(
                "C",
                &divide(),
                &[&result(1.0, 1.0, Quality::Invalid), &result(4.0, 2.0, Quality::Valid)],
            )
            .unwrap();
        assert_eq!(state, NodeState::Result(Triplet::invalid(t(2.0))));
    }

    #[test]
    fn bare_value_takes_latest_stamp() {
        let clock = ManualClock::new(10.0);
        let aggregator = Aggregator::new(QualityPolicy::Strict, &clock);

        let state = aggregator
            .compute(
                "C",
                &divide(),
                &[&result(1.0, 1.0, Quality::Valid), &result(4.0, 2.0, Quality::Valid)],
            )
            .unwrap();
        assert_eq!(state, NodeState::Result(Triplet::at(0.25, t(2.0))));
    }

    #[test]
    fn computation_failure_is_raised_and_located() {
        let clock = ManualClock::new(10.0);
        let aggregator = Aggregator::new(QualityPolicy::Strict, &clock);

        let failure = aggregator
            .compute(
                "C",
                &divide(),
                &[&result(1.0, 1.0, Quality::Valid), &result(0.0, 2.0, Quality::Valid)],
            )
            .unwrap_err();
        assert_eq!(failure.to_string(), "division by zero");
        assert_eq!(failure.origin(), Some("C"));
    }

    #[test]
    fn explicit_triplet_is_used_verbatim() {
        let clock = ManualClock::new(10.0);
        let aggregator = Aggregator::new(QualityPolicy::Strict, &clock);
        let input = result(1, 5.0, Quality::Valid);

        let rule =
            Rule::standard(|_| Ok(Computed::triplet(Some(Value::Int(3)), Quality::Changing)));
        let state = aggregator.compute("C", &rule, &[&input]).unwrap();
        assert_eq!(
            state,
            NodeState::Result(Triplet::new(Some(Value::Int(3)), t(5.0), Quality::Changing))
        );

        let rule = Rule::standard(|_| {
            Ok(Computed::stamped(Some(Value::Int(3)), Quality::Valid, t(2.0)))
        });
        let state = aggregator.compute("C", &rule, &[&input]).unwrap();
        assert_eq!(state, NodeState::Result(Triplet::at(3, t(2.0))));
    }

    #[test]
    fn state_rule_is_stamped_now() {
        let clock = ManualClock::new(10.0);
        let aggregator = Aggregator::new(QualityPolicy::Strict, &clock);
        let rule = Rule::state(|values| {
            let count = values[0].as_i64().unwrap_or_default();
            Ok((DeviceState::On, format!("The count is {count}")).into())
        });

        let state = aggregator
            .compute("State", &rule, &[&result(1, 1.0, Quality::Valid)])
            .unwrap();
        let triplet = state.triplet().unwrap();
        assert_eq!(triplet.timestamp(), t(10.0));
        assert_eq!(
            StateReport::from_value(triplet.value().unwrap()),
            Some(StateReport::with_status(DeviceState::On, "The count is 1"))
        );
    }

    #[test]
    fn custom_rule_sees_raw_states() {
        let clock = ManualClock::new(10.0);
        let aggregator = Aggregator::new(QualityPolicy::Strict, &clock);
        let rule = Rule::custom(|states| {
            let ready = states.iter().filter(|s| !s.is_empty()).count();
            Ok(Value::Int(ready as i64).into())
        });

        let state = aggregator
            .compute("Ready", &rule, &[&NodeState::Empty, &NodeState::Failure(Failure::msg("x"))])
            .unwrap();
        assert_eq!(state, NodeState::Result(Triplet::at(1, t(10.0))));
    }

    #[test]
    fn state_report_round_trip_through_value() {
        let report = StateReport::new(DeviceState::Fault);
        assert_eq!(StateReport::from_value(&report.clone().into()), Some(report));
        assert_eq!(StateReport::from_value(&Value::Int(1)), None);
    }
}
