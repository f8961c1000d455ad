//! Attribute Values
//!
//! Node values are dynamically typed, the same way device attributes are:
//! a facade mixes floats read from a motor, booleans from an interlock and
//! the device state itself in one graph. `Value` is the closed set of shapes
//! a node can hold.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Operational state of a device, as exported by the state sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceState {
    On,
    Off,
    Close,
    Open,
    Insert,
    Extract,
    Moving,
    Standby,
    Fault,
    Init,
    Running,
    Alarm,
    Disable,
    Unknown,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceState::On => "ON",
            DeviceState::Off => "OFF",
            DeviceState::Close => "CLOSE",
            DeviceState::Open => "OPEN",
            DeviceState::Insert => "INSERT",
            DeviceState::Extract => "EXTRACT",
            DeviceState::Moving => "MOVING",
            DeviceState::Standby => "STANDBY",
            DeviceState::Fault => "FAULT",
            DeviceState::Init => "INIT",
            DeviceState::Running => "RUNNING",
            DeviceState::Alarm => "ALARM",
            DeviceState::Disable => "DISABLE",
            DeviceState::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// A value carried by a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    State(DeviceState),
    Array(Vec<Value>),
}

impl Value {
    /// Numeric view of the value. Integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_state(&self) -> Option<DeviceState> {
        match self {
            Value::State(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Convert a JSON literal into a value.
    ///
    /// Used for literal defaults found in device properties. `null` and
    /// objects have no attribute representation.
    pub fn from_json(json: &serde_json::Value) -> Option<Value> {
        match json {
            serde_json::Value::Bool(v) => Some(Value::Bool(*v)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float)),
            serde_json::Value::String(s) => Some(Value::Text(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(Value::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            serde_json::Value::Null | serde_json::Value::Object(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
            Value::State(v) => write!(f, "{v}"),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DeviceState> for Value {
    fn from(v: DeviceState) -> Self {
        Value::State(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_view_widens_integers() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Float(0.5).as_f64(), Some(0.5));
        assert_eq!(Value::Bool(true).as_f64(), None);
    }

    #[test]
    fn json_literals_convert() {
        let json: serde_json::Value = serde_json::from_str("[1, 2.5, true, \"x\"]").unwrap();
        assert_eq!(
            Value::from_json(&json),
            Some(Value::Array(vec![
                Value::Int(1),
                Value::Float(2.5),
                Value::Bool(true),
                Value::Text("x".into()),
            ]))
        );
        assert_eq!(Value::from_json(&serde_json::Value::Null), None);
    }

    #[test]
    fn state_display_is_uppercase() {
        assert_eq!(DeviceState::Moving.to_string(), "MOVING");
        assert_eq!(Value::State(DeviceState::On).to_string(), "ON");
    }
}
