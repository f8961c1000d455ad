//! Device Configuration
//!
//! A facade reads its remote attribute names and literal defaults from
//! device properties. Properties are loaded from JSON:
//!
//! ```json
//! {
//!     "properties": {
//!         "CurrentAttribute": "sys/tg_test/1/double_scalar",
//!         "Voltages": ["sys/psu/*/voltage"],
//!         "Threshold": "2.5"
//!     },
//!     "reasons_to_ignore": ["API_PollThreadOutOfSync"],
//!     "quality_policy": "strict",
//!     "time_period_ms": 1000
//! }
//! ```
//!
//! A property value containing `/` names a remote attribute; anything else
//! is a JSON literal used as a constant default.

use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::reactive::QualityPolicy;
use crate::value::Value;

/// Errors raised while resolving the configuration of a facade.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing property: {0}")]
    MissingProperty(String),

    #[error("property {0:?} is empty")]
    EmptyProperty(String),

    #[error("property {0:?} expects a single value")]
    NotSingle(String),

    #[error("property {name:?} holds an invalid default value {literal:?}")]
    InvalidDefault { name: String, literal: String },

    #[error("no attributes matching {0} wildcard")]
    NoMatch(String),

    #[error("wildcard {0} cannot be expanded without an attribute directory")]
    NoDirectory(String),

    #[error("unknown remote attribute {0}")]
    UnknownAttribute(String),

    #[error("invalid wildcard: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// A device property: a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Property {
    One(String),
    Many(Vec<String>),
}

impl Property {
    /// The property as one string, list entries joined by newlines.
    fn joined(&self) -> String {
        match self {
            Property::One(text) => text.clone(),
            Property::Many(items) => items.join("\n"),
        }
    }
}

impl From<&str> for Property {
    fn from(text: &str) -> Self {
        Property::One(text.to_string())
    }
}

impl From<String> for Property {
    fn from(text: String) -> Self {
        Property::One(text)
    }
}

impl From<Vec<String>> for Property {
    fn from(items: Vec<String>) -> Self {
        Property::Many(items)
    }
}

impl From<Vec<&str>> for Property {
    fn from(items: Vec<&str>) -> Self {
        Property::Many(items.into_iter().map(str::to_string).collect())
    }
}

fn default_reasons_to_ignore() -> Vec<String> {
    vec!["API_PollThreadOutOfSync".to_string()]
}

fn default_time_period_ms() -> u64 {
    1000
}

/// Configuration of a facade device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacadeConfig {
    #[serde(default)]
    pub properties: IndexMap<String, Property>,

    /// Remote error reasons that are recorded but never written to a node.
    #[serde(default = "default_reasons_to_ignore")]
    pub reasons_to_ignore: Vec<String>,

    #[serde(default)]
    pub quality_policy: QualityPolicy,

    /// Tick period of the `Time` attribute of a timed facade.
    #[serde(default = "default_time_period_ms")]
    pub time_period_ms: u64,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            properties: IndexMap::new(),
            reasons_to_ignore: default_reasons_to_ignore(),
            quality_policy: QualityPolicy::default(),
            time_period_ms: default_time_period_ms(),
        }
    }
}

/// Where a proxy attribute gets its value.
#[derive(Debug, Clone, PartialEq)]
pub enum ProxySource {
    /// A remote attribute, lower-cased.
    Remote(String),
    /// A constant written once at start-up.
    Default(Value),
}

/// What a proxy command runs.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandSource {
    /// A remote command, or a remote attribute for write commands,
    /// lower-cased.
    Remote(String),
    /// An emulated command returning a constant. `None` (a `null` literal)
    /// disables the command.
    Emulated(Option<Value>),
}

/// Where a combined attribute gets its values.
#[derive(Debug, Clone, PartialEq)]
pub enum CombinedSource {
    /// Remote attributes, in binding order.
    Remote(Vec<String>),
    /// A constant written once at start-up.
    Default(Value),
}

/// Lookup of the remote attributes reachable from this device.
pub trait AttributeDirectory: Send + Sync {
    /// Full names of every known attribute (`domain/family/member/attribute`).
    fn attributes(&self) -> Vec<String>;

    fn contains(&self, name: &str) -> bool {
        self.attributes()
            .iter()
            .any(|attribute| attribute.eq_ignore_ascii_case(name))
    }
}

/// A fixed list of attributes.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    attributes: Vec<String>,
}

impl StaticDirectory {
    pub fn new<I, S>(attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            attributes: attributes.into_iter().map(Into::into).collect(),
        }
    }
}

impl AttributeDirectory for StaticDirectory {
    fn attributes(&self) -> Vec<String> {
        self.attributes.clone()
    }
}

impl FacadeConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Property>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn time_period(&self) -> Duration {
        Duration::from_millis(self.time_period_ms)
    }

    pub fn ignores(&self, reason: &str) -> bool {
        self.reasons_to_ignore.iter().any(|ignored| ignored == reason)
    }

    fn require(&self, name: &str) -> Result<&Property, ConfigError> {
        self.property(name)
            .ok_or_else(|| ConfigError::MissingProperty(name.to_string()))
    }

    /// The trimmed, non-empty single value of a property.
    fn single(&self, name: &str) -> Result<String, ConfigError> {
        let text = match self.require(name)? {
            Property::One(text) => text.trim().to_string(),
            Property::Many(items) => match items.as_slice() {
                [text] => text.trim().to_string(),
                [] => String::new(),
                _ => return Err(ConfigError::NotSingle(name.to_string())),
            },
        };
        if text.is_empty() {
            return Err(ConfigError::EmptyProperty(name.to_string()));
        }
        Ok(text)
    }

    /// Resolve the property of a proxy attribute.
    pub fn proxy_source(
        &self,
        name: &str,
        directory: Option<&dyn AttributeDirectory>,
    ) -> Result<ProxySource, ConfigError> {
        let text = self.single(name)?;
        if !text.contains('/') {
            return parse_default(name, &text).map(ProxySource::Default);
        }

        let attribute = text.to_lowercase();
        check_attribute(&attribute, directory)?;
        Ok(ProxySource::Remote(attribute))
    }

    /// Resolve the property of a proxy command.
    ///
    /// A command writing a remote attribute checks it against the directory.
    /// Remote commands are not listed there and are taken as is.
    pub fn command_source(
        &self,
        name: &str,
        writes_attribute: bool,
        directory: Option<&dyn AttributeDirectory>,
    ) -> Result<CommandSource, ConfigError> {
        let text = self.single(name)?;
        if !text.contains('/') {
            if text == "null" {
                return Ok(CommandSource::Emulated(None));
            }
            return parse_default(name, &text).map(|value| CommandSource::Emulated(Some(value)));
        }

        let target = text.to_lowercase();
        if writes_attribute {
            check_attribute(&target, directory)?;
        }
        Ok(CommandSource::Remote(target))
    }

    /// Resolve the property of a combined attribute.
    ///
    /// A single entry with `*` or `?` is a wildcard, expanded against the
    /// directory and filtered by the optional exclude property.
    pub fn combined_source(
        &self,
        name: &str,
        exclude: Option<&str>,
        directory: Option<&dyn AttributeDirectory>,
    ) -> Result<CombinedSource, ConfigError> {
        let text = self.require(name)?.joined();
        let text = text.trim();
        if text.is_empty() {
            return Err(ConfigError::EmptyProperty(name.to_string()));
        }
        if !text.contains('/') {
            return parse_default(name, text).map(CombinedSource::Default);
        }

        let entries: Vec<String> = text
            .to_lowercase()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        match entries.as_slice() {
            [wildcard] if is_wildcard(wildcard) => {
                let exclude = match exclude.and_then(|name| self.property(name)) {
                    Some(Property::One(pattern)) if !pattern.trim().is_empty() => {
                        Some(pattern.trim().to_lowercase())
                    }
                    Some(Property::Many(patterns)) if patterns.len() == 1 => {
                        Some(patterns[0].trim().to_lowercase())
                    }
                    _ => None,
                };
                let directory =
                    directory.ok_or_else(|| ConfigError::NoDirectory(wildcard.clone()))?;
                let attributes = expand_wildcard(wildcard, exclude.as_deref(), directory)?;
                if attributes.is_empty() {
                    return Err(ConfigError::NoMatch(wildcard.clone()));
                }
                Ok(CombinedSource::Remote(attributes))
            }
            _ => {
                for attribute in &entries {
                    check_attribute(attribute, directory)?;
                }
                Ok(CombinedSource::Remote(entries))
            }
        }
    }
}

fn is_wildcard(entry: &str) -> bool {
    entry.contains('*') || entry.contains('?')
}

fn parse_default(name: &str, literal: &str) -> Result<Value, ConfigError> {
    serde_json::from_str::<serde_json::Value>(literal)
        .ok()
        .as_ref()
        .and_then(Value::from_json)
        .ok_or_else(|| ConfigError::InvalidDefault {
            name: name.to_string(),
            literal: literal.to_string(),
        })
}

fn check_attribute(
    attribute: &str,
    directory: Option<&dyn AttributeDirectory>,
) -> Result<(), ConfigError> {
    match directory {
        Some(directory) if !directory.contains(attribute) => {
            Err(ConfigError::UnknownAttribute(attribute.to_string()))
        }
        _ => Ok(()),
    }
}

/// Sorted attributes of `directory` matching `wildcard` but not `exclude`.
fn expand_wildcard(
    wildcard: &str,
    exclude: Option<&str>,
    directory: &dyn AttributeDirectory,
) -> Result<Vec<String>, ConfigError> {
    let pattern = glob::Pattern::new(wildcard)?;
    let exclude = exclude.map(glob::Pattern::new).transpose()?;

    let mut attributes: Vec<String> = directory
        .attributes()
        .into_iter()
        .map(|attribute| attribute.to_lowercase())
        .filter(|attribute| pattern.matches(attribute))
        .filter(|attribute| !exclude.as_ref().is_some_and(|ex| ex.matches(attribute)))
        .collect();
    attributes.sort();
    attributes.dedup();
    Ok(attributes)
}
