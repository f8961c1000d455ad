//! State and status export.
//!
//! The state node of a facade is translated into the device state and
//! status text after every transaction that changes it.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::error;

use super::diagnostics::Diagnostics;
use crate::clock::Clock;
use crate::error::SinkError;
use crate::graph::{Graph, NodeState};
use crate::reactive::{Change, Sink, StateReport};
use crate::triplet::{Quality, Timestamp};
use crate::value::DeviceState;

pub const STATUS_UNAVAILABLE: &str = "The state is currently not available.";
pub const STATUS_INVALID: &str = "The state cannot be computed. Some values are invalid.";

/// Device state and status as exposed to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub state: DeviceState,
    pub status: String,
    pub timestamp: Timestamp,
    pub quality: Quality,
}

impl DeviceStatus {
    pub fn new(state: DeviceState, status: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            state,
            status: status.into(),
            timestamp,
            quality: Quality::Valid,
        }
    }

    /// Status of a device still initializing.
    pub fn init(timestamp: Timestamp) -> Self {
        Self::new(DeviceState::Init, "", timestamp)
    }

    /// Translate the state of a state node. Timestamp and quality follow
    /// the node result when there is one.
    pub fn from_node(state: &NodeState, now: Timestamp) -> Self {
        match state {
            NodeState::Empty => Self::new(DeviceState::Unknown, STATUS_UNAVAILABLE, now),
            NodeState::Failure(failure) => Self::new(DeviceState::Fault, failure.describe(), now),
            NodeState::Result(triplet) => {
                let report = match triplet.value() {
                    None => StateReport::with_status(DeviceState::Fault, STATUS_INVALID),
                    Some(value) => match StateReport::from_value(value) {
                        Some(report) => report,
                        None => StateReport::with_status(
                            DeviceState::Fault,
                            format!("The state node holds a non-state value: {value}"),
                        ),
                    },
                };
                let status = report
                    .status
                    .unwrap_or_else(|| format!("The device is in {} state.", report.state));
                Self {
                    state: report.state,
                    status,
                    timestamp: triplet.timestamp(),
                    quality: triplet.quality(),
                }
            }
        }
    }
}

/// Sink keeping the device status in sync with the state node.
pub(crate) struct StateSink {
    pub(crate) status: Arc<Mutex<DeviceStatus>>,
    pub(crate) diagnostics: Arc<Diagnostics>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Sink for StateSink {
    fn notify(&mut self, _graph: &Graph, change: &Change<'_>) -> Result<(), SinkError> {
        let current = change.current();
        let status = DeviceStatus::from_node(current, self.clock.now());
        if current.failure().is_some() {
            error!(node = change.name(), status = %status.status, "state node failed");
            self.diagnostics.record_error(status.status.clone());
        }
        *self.status.lock() = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::Failure;
    use crate::triplet::Triplet;
    use crate::value::Value;

    fn t(secs: f64) -> Timestamp {
        Timestamp::from_secs(secs)
    }

    #[test]
    fn empty_is_unknown() {
        let status = DeviceStatus::from_node(&NodeState::Empty, t(3.0));
        assert_eq!(status, DeviceStatus::new(DeviceState::Unknown, STATUS_UNAVAILABLE, t(3.0)));
    }

    #[test]
    fn failure_is_fault_with_description() {
        let failure = Failure::msg("division by zero").located("C");
        let status = DeviceStatus::from_node(&NodeState::Failure(failure), t(3.0));

        assert_eq!(status.state, DeviceState::Fault);
        assert_eq!(status.status, "Exception while updating C:\n  division by zero");
    }

    #[test]
    fn invalid_result_is_fault() {
        let status = DeviceStatus::from_node(&NodeState::Result(Triplet::invalid(t(2.0))), t(3.0));

        assert_eq!(status.state, DeviceState::Fault);
        assert_eq!(status.status, STATUS_INVALID);
        assert_eq!(status.timestamp, t(2.0));
        assert_eq!(status.quality, Quality::Invalid);
    }

    #[test]
    fn bare_state_gets_default_status() {
        let state = NodeState::Result(Triplet::at(DeviceState::On, t(2.0)));
        let status = DeviceStatus::from_node(&state, t(3.0));

        assert_eq!(
            status,
            DeviceStatus::new(DeviceState::On, "The device is in ON state.", t(2.0))
        );
    }

    #[test]
    fn state_and_status_pair_is_verbatim() {
        let report = StateReport::with_status(DeviceState::Off, "The count is 0");
        let state = NodeState::Result(Triplet::at(Value::from(report), t(2.0)));
        let status = DeviceStatus::from_node(&state, t(3.0));

        assert_eq!(status.state, DeviceState::Off);
        assert_eq!(status.status, "The count is 0");
    }
}
