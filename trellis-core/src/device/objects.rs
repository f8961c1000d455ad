//! Facade Declarations
//!
//! A facade is declared attribute by attribute on a [`FacadeBuilder`]. Each
//! declaration becomes one or more graph nodes once the configuration is
//! resolved:
//!
//! | declaration          | nodes                                           |
//! |----------------------|-------------------------------------------------|
//! | local attribute      | one local source                                |
//! | logical attribute    | one derived node                                |
//! | proxy attribute      | one remote source, or a hidden `name[0]` remote |
//! |                      | source plus a derived node when a rule is given |
//! | combined attribute   | hidden `name[i]` remote sources plus a derived  |
//! |                      | node                                            |
//! | state attribute      | a derived state node, or a local source when    |
//! |                      | unbound                                         |
//!
//! A proxy or combined property holding a literal instead of attribute
//! names turns the attribute into a local source set to that literal.
//!
//! Proxy commands and writable proxy attributes add no node. They are
//! resolved into forwarding entries run by the facade against its
//! [`RemoteTarget`].

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::info;

use super::config::{
    AttributeDirectory, CombinedSource, CommandSource, FacadeConfig, ProxySource,
};
use super::diagnostics::Diagnostics;
use super::runtime::{subnode, EventSink, Facade, Forward, RemoteTarget, TIME};
use super::state::{DeviceStatus, StateSink, STATUS_UNAVAILABLE};
use super::FacadeError;
use crate::clock::{Clock, SystemClock};
use crate::error::SinkError;
use crate::failure::Failure;
use crate::graph::{DerivedKind, Graph, GraphBuilder, SourceKind};
use crate::reactive::{Change, Computed, FnSink, Rule, Sink, Write};
use crate::triplet::{Quality, Triplet};
use crate::value::{DeviceState, Value};

const EVENT_CAPACITY: usize = 1024;

type DefaultFn = dyn FnOnce() -> Result<Computed, Failure> + Send;

enum Declaration {
    Local {
        name: String,
        default: Option<Box<DefaultFn>>,
    },
    Logical {
        name: String,
        bind: Vec<String>,
        rule: Rule,
    },
    Proxy {
        name: String,
        property: String,
        rule: Option<Rule>,
        writable: bool,
    },
    Command {
        name: String,
        property: String,
        writes_attribute: bool,
    },
    Combined {
        name: String,
        property: String,
        exclude: Option<String>,
        rule: Rule,
    },
    State {
        name: String,
        binding: Option<(Vec<String>, Rule)>,
    },
}

/// Declares the attributes of a facade device.
///
/// # Example
///
/// ```rust,ignore
/// let facade = FacadeBuilder::new(config)
///     .local_attribute("count")
///     .state_attribute("State", ["count"], Rule::state(|values| {
///         let count = values[0].as_i64().unwrap_or_default();
///         let state = if count > 0 { DeviceState::On } else { DeviceState::Off };
///         Ok((state, format!("The count is {count}")).into())
///     }))
///     .build()?;
/// ```
pub struct FacadeBuilder {
    config: FacadeConfig,
    clock: Arc<dyn Clock>,
    directory: Option<Arc<dyn AttributeDirectory>>,
    target: Option<Arc<dyn RemoteTarget>>,
    declarations: Vec<Declaration>,
    descriptions: Vec<(String, String)>,
    sinks: Vec<(Option<String>, Box<dyn Sink>)>,
    timed: bool,
}

impl FacadeBuilder {
    pub fn new(config: FacadeConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            directory: None,
            target: None,
            declarations: Vec::new(),
            descriptions: Vec::new(),
            sinks: Vec::new(),
            timed: false,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Directory used to check remote attributes and expand wildcards.
    pub fn directory<D: AttributeDirectory + 'static>(mut self, directory: D) -> Self {
        self.directory = Some(Arc::new(directory));
        self
    }

    /// Where writable proxy attributes and proxy commands are forwarded.
    pub fn remote_target<T: RemoteTarget + 'static>(mut self, target: T) -> Self {
        self.target = Some(Arc::new(target));
        self
    }

    /// Add the `Time` attribute, ticked by [`Facade::spawn_clock`].
    pub fn timed(mut self) -> Self {
        self.timed = true;
        self
    }

    /// An attribute written by the device itself.
    pub fn local_attribute(self, name: impl Into<String>) -> Self {
        self.push(Declaration::Local {
            name: name.into(),
            default: None,
        })
    }

    /// A local attribute whose initial value comes from `default`, run once
    /// at start-up. A failure becomes the initial state.
    pub fn local_attribute_with<F>(self, name: impl Into<String>, default: F) -> Self
    where
        F: FnOnce() -> Result<Computed, Failure> + Send + 'static,
    {
        self.push(Declaration::Local {
            name: name.into(),
            default: Some(Box::new(default)),
        })
    }

    /// An attribute computed from other nodes.
    pub fn logical_attribute<I, S>(self, name: impl Into<String>, bind: I, rule: Rule) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(Declaration::Logical {
            name: name.into(),
            bind: bind.into_iter().map(Into::into).collect(),
            rule,
        })
    }

    /// An attribute forwarding the remote attribute named by `property`.
    pub fn proxy_attribute(self, name: impl Into<String>, property: impl Into<String>) -> Self {
        self.push(Declaration::Proxy {
            name: name.into(),
            property: property.into(),
            rule: None,
            writable: false,
        })
    }

    /// A proxy attribute whose client writes go to the remote attribute.
    ///
    /// With a literal property the attribute is local and writes land on
    /// it directly.
    pub fn writable_proxy_attribute(
        self,
        name: impl Into<String>,
        property: impl Into<String>,
    ) -> Self {
        self.push(Declaration::Proxy {
            name: name.into(),
            property: property.into(),
            rule: None,
            writable: true,
        })
    }

    /// A proxy attribute converted by `rule`.
    pub fn proxy_attribute_with(
        self,
        name: impl Into<String>,
        property: impl Into<String>,
        rule: Rule,
    ) -> Self {
        self.push(Declaration::Proxy {
            name: name.into(),
            property: property.into(),
            rule: Some(rule),
            writable: false,
        })
    }

    /// A command forwarding to the remote command named by `property`.
    ///
    /// A literal property makes an emulated command returning that literal;
    /// `null` disables it.
    pub fn proxy_command(self, name: impl Into<String>, property: impl Into<String>) -> Self {
        self.push(Declaration::Command {
            name: name.into(),
            property: property.into(),
            writes_attribute: false,
        })
    }

    /// A command writing its argument to the remote attribute named by
    /// `property`.
    pub fn proxy_write_command(
        self,
        name: impl Into<String>,
        property: impl Into<String>,
    ) -> Self {
        self.push(Declaration::Command {
            name: name.into(),
            property: property.into(),
            writes_attribute: true,
        })
    }

    /// An attribute computed from the remote attributes listed in
    /// `property`.
    pub fn combined_attribute(
        self,
        name: impl Into<String>,
        property: impl Into<String>,
        rule: Rule,
    ) -> Self {
        self.push(Declaration::Combined {
            name: name.into(),
            property: property.into(),
            exclude: None,
            rule,
        })
    }

    /// A combined attribute whose wildcard skips the attributes matching
    /// the pattern in `exclude`.
    pub fn combined_attribute_excluding(
        self,
        name: impl Into<String>,
        property: impl Into<String>,
        exclude: impl Into<String>,
        rule: Rule,
    ) -> Self {
        self.push(Declaration::Combined {
            name: name.into(),
            property: property.into(),
            exclude: Some(exclude.into()),
            rule,
        })
    }

    /// The device state, computed from `bind`.
    pub fn state_attribute<I, S>(self, name: impl Into<String>, bind: I, rule: Rule) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(Declaration::State {
            name: name.into(),
            binding: Some((bind.into_iter().map(Into::into).collect(), rule)),
        })
    }

    /// The device state, set through [`Facade::set_state`].
    pub fn local_state_attribute(self, name: impl Into<String>) -> Self {
        self.push(Declaration::State {
            name: name.into(),
            binding: None,
        })
    }

    pub fn describe(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.descriptions.push((name.into(), description.into()));
        self
    }

    /// Run `func` after every transaction that changes `name`.
    pub fn watch<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: FnMut(&Graph, &Change<'_>) -> Result<(), SinkError> + Send + 'static,
    {
        self.sinks.push((Some(name.into()), Box::new(FnSink(func))));
        self
    }

    /// Register a sink observing every node.
    pub fn sink<S: Sink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push((None, Box::new(sink)));
        self
    }

    fn push(mut self, declaration: Declaration) -> Self {
        self.declarations.push(declaration);
        self
    }

    /// Resolve the configuration, build the graph and run the start-up
    /// writes (defaults, first tick).
    pub fn build(self) -> Result<Facade, FacadeError> {
        let clock = Arc::clone(&self.clock);
        let now = clock.now();
        let diagnostics = Arc::new(Diagnostics::new(now));
        let status = Arc::new(Mutex::new(DeviceStatus::init(now)));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let directory = self.directory.as_deref();

        let mut graph = GraphBuilder::new()
            .quality_policy(self.config.quality_policy)
            .clock(Arc::clone(&clock));
        let mut startup = Vec::new();
        let mut remotes = IndexMap::new();
        let mut hidden = HashSet::new();
        let mut writes = IndexMap::new();
        let mut commands = IndexMap::new();
        let mut state_node: Option<String> = None;

        if self.timed {
            graph = graph.source(TIME, SourceKind::Local);
        }

        let constant = |name: String, value: Value| {
            Write::result(name, Triplet::stamped(Some(value), None, Quality::Valid, clock.as_ref()))
        };

        for declaration in self.declarations {
            match declaration {
                Declaration::Local { name, default } => {
                    graph = graph.source(name.clone(), SourceKind::Local);
                    if let Some(default) = default {
                        startup.push(match default() {
                            Ok(computed) => {
                                Write::result(name, computed.into_triplet(clock.as_ref()))
                            }
                            Err(failure) => {
                                Write::failure(name.clone(), failure.located(&name))
                            }
                        });
                    }
                }
                Declaration::Logical { name, bind, rule } => {
                    graph = graph.derived(name, DerivedKind::Logical, bind, rule);
                }
                Declaration::Proxy {
                    name,
                    property,
                    rule,
                    writable,
                } => match self.config.proxy_source(&property, directory)? {
                    ProxySource::Default(value) => {
                        if writable {
                            writes.insert(name.clone(), Forward::WriteNode(name.clone()));
                        }
                        graph = graph.source(name.clone(), SourceKind::Local);
                        startup.push(constant(name, value));
                    }
                    ProxySource::Remote(remote) => {
                        if writable {
                            writes.insert(name.clone(), Forward::WriteRemote(remote.clone()));
                        }
                        match rule {
                            None => {
                                graph = graph.source(name.clone(), SourceKind::Proxy);
                                remotes.insert(name, remote);
                            }
                            Some(rule) => {
                                let input = subnode(&name, 0);
                                graph = graph.source(input.clone(), SourceKind::Proxy).derived(
                                    name,
                                    DerivedKind::Logical,
                                    [input.clone()],
                                    rule,
                                );
                                hidden.insert(input.clone());
                                remotes.insert(input, remote);
                            }
                        }
                    }
                },
                Declaration::Command {
                    name,
                    property,
                    writes_attribute,
                } => {
                    let forward = match self
                        .config
                        .command_source(&property, writes_attribute, directory)?
                    {
                        CommandSource::Emulated(result) => Forward::Emulated(result),
                        CommandSource::Remote(remote) if writes_attribute => {
                            Forward::WriteRemote(remote)
                        }
                        CommandSource::Remote(remote) => Forward::RunRemote(remote),
                    };
                    if commands.contains_key(&name) {
                        return Err(FacadeError::DuplicateCommand(name));
                    }
                    commands.insert(name, forward);
                }
                Declaration::Combined {
                    name,
                    property,
                    exclude,
                    rule,
                } => match self
                    .config
                    .combined_source(&property, exclude.as_deref(), directory)?
                {
                    CombinedSource::Default(value) => {
                        graph = graph.source(name.clone(), SourceKind::Local);
                        startup.push(constant(name, value));
                    }
                    CombinedSource::Remote(attributes) => {
                        let bind: Vec<String> =
                            (0..attributes.len()).map(|i| subnode(&name, i)).collect();
                        for (input, remote) in bind.iter().zip(attributes) {
                            graph = graph.source(input.clone(), SourceKind::Proxy);
                            hidden.insert(input.clone());
                            remotes.insert(input.clone(), remote);
                        }
                        graph = graph.derived(name, DerivedKind::Combined, bind, rule);
                    }
                },
                Declaration::State { name, binding } => {
                    if let Some(existing) = &state_node {
                        return Err(FacadeError::DuplicateState(existing.clone()));
                    }
                    graph = match binding {
                        Some((bind, rule)) => {
                            graph.derived(name.clone(), DerivedKind::State, bind, rule)
                        }
                        None => graph.source(name.clone(), SourceKind::Local),
                    };
                    graph = graph.node_sink(
                        name.clone(),
                        StateSink {
                            status: Arc::clone(&status),
                            diagnostics: Arc::clone(&diagnostics),
                            clock: Arc::clone(&clock),
                        },
                    );
                    state_node = Some(name);
                }
            }
        }

        if self.target.is_none() {
            let remote = writes.iter().chain(&commands).find(|(_, forward)| forward.is_remote());
            if let Some((name, _)) = remote {
                return Err(FacadeError::NoRemoteTarget(name.clone()));
            }
        }

        for (name, description) in self.descriptions {
            graph = graph.describe(name, description);
        }
        graph = graph.sink(EventSink {
            events: events.clone(),
            hidden,
        });
        for (filter, sink) in self.sinks {
            graph = match filter {
                Some(name) => graph.node_sink(name, sink),
                None => graph.sink(sink),
            };
        }
        let graph = graph.build()?;

        let facade = Facade {
            graph_id: graph.id(),
            kinds: graph
                .nodes()
                .map(|node| (node.name().to_string(), node.kind()))
                .collect(),
            clock: graph.shared_clock(),
            graph: Mutex::new(graph),
            remotes,
            writes,
            commands,
            target: self.target,
            connected: AtomicBool::new(true),
            pending: Mutex::new(VecDeque::new()),
            config: self.config,
            diagnostics,
            status,
            events,
            state_node,
            timed: self.timed,
        };

        facade.submit(startup)?;
        if facade.timed {
            facade.update_time()?;
        }
        {
            let mut status = facade.status.lock();
            if status.state == DeviceState::Init {
                let now = facade.clock.now();
                *status = DeviceStatus::new(DeviceState::Unknown, STATUS_UNAVAILABLE, now);
            }
        }

        info!(
            graph = ?facade.graph_id,
            nodes = facade.kinds.len(),
            remotes = facade.remotes.len(),
            commands = facade.commands.len(),
            "facade initialized"
        );
        Ok(facade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::device::config::StaticDirectory;
    use crate::error::GraphError;
    use crate::graph::{NodeKind, NodeState};
    use crate::triplet::Timestamp;

    fn sum() -> Rule {
        Rule::standard(|values| Ok(values.iter().filter_map(Value::as_f64).sum::<f64>().into()))
    }

    fn config() -> FacadeConfig {
        FacadeConfig::default()
            .with_property("Remote", "sys/psu/1/Voltage")
            .with_property("Literal", "3")
            .with_property("Voltages", "sys/psu/*/voltage")
    }

    fn directory() -> StaticDirectory {
        StaticDirectory::new(["sys/psu/1/voltage", "sys/psu/2/voltage", "sys/psu/1/current"])
    }

    #[test]
    fn declarations_become_nodes() {
        let facade = FacadeBuilder::new(config())
            .directory(directory())
            .local_attribute("A")
            .proxy_attribute("Plain", "Remote")
            .proxy_attribute_with("Scaled", "Remote", sum())
            .combined_attribute("Total", "Voltages", sum())
            .build()
            .unwrap();

        let names: Vec<_> = facade.node_names().collect();
        assert_eq!(
            names,
            ["A", "Plain", "Scaled[0]", "Scaled", "Total[0]", "Total[1]", "Total"]
        );
        let remotes: Vec<_> = facade.remote_attributes().collect();
        assert_eq!(
            remotes,
            [
                ("Plain", "sys/psu/1/voltage"),
                ("Scaled[0]", "sys/psu/1/voltage"),
                ("Total[0]", "sys/psu/1/voltage"),
                ("Total[1]", "sys/psu/2/voltage"),
            ]
        );
    }

    #[test]
    fn literal_property_becomes_constant() {
        let facade = FacadeBuilder::new(config())
            .clock(Arc::new(ManualClock::new(5.0)))
            .proxy_attribute_with("Threshold", "Literal", sum())
            .build()
            .unwrap();

        assert_eq!(
            facade.read("Threshold").unwrap(),
            NodeState::Result(Triplet::at(3, Timestamp::from_secs(5.0)))
        );
        assert_eq!(facade.kinds["Threshold"], NodeKind::Source(SourceKind::Local));
    }

    #[test]
    fn default_provider_runs_at_start_up() {
        let facade = FacadeBuilder::new(FacadeConfig::default())
            .clock(Arc::new(ManualClock::new(5.0)))
            .local_attribute_with("A", || Ok(Computed::from(2i64)))
            .local_attribute_with("B", || Err(Failure::msg("no default")))
            .build()
            .unwrap();

        assert_eq!(
            facade.read_attribute("A").unwrap(),
            Some(Triplet::at(2, Timestamp::from_secs(5.0)))
        );
        match facade.read_attribute("B") {
            Err(FacadeError::Failure(failure)) => assert_eq!(failure.origin(), Some("B")),
            other => panic!("unexpected read: {other:?}"),
        }
    }

    #[test]
    fn configuration_errors_fail_the_build() {
        let err = FacadeBuilder::new(FacadeConfig::default())
            .proxy_attribute("P", "Missing")
            .build()
            .unwrap_err();
        assert!(matches!(err, FacadeError::Config(_)));

        let err = FacadeBuilder::new(FacadeConfig::default())
            .logical_attribute("L", ["Nowhere"], sum())
            .build()
            .unwrap_err();
        assert!(matches!(err, FacadeError::Graph(_)));
    }

    #[test]
    fn descriptions_must_name_an_attribute() {
        let facade = FacadeBuilder::new(FacadeConfig::default())
            .describe("A", "first input")
            .local_attribute("A")
            .build()
            .unwrap();
        let description =
            facade.with_graph(|graph| graph.node("A").map(|node| node.description().to_string()));
        assert_eq!(description.as_deref(), Some("first input"));

        let err = FacadeBuilder::new(FacadeConfig::default())
            .local_attribute("A")
            .describe("Missing", "nothing here")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            FacadeError::Graph(GraphError::UnknownNode(name)) if name == "Missing"
        ));
    }

    #[test]
    fn command_names_are_unique() {
        let err = FacadeBuilder::new(FacadeConfig::default().with_property("Version", "\"1.0\""))
            .proxy_command("Version", "Version")
            .proxy_command("Version", "Version")
            .build()
            .unwrap_err();
        assert!(matches!(err, FacadeError::DuplicateCommand(name) if name == "Version"));
    }

    #[test]
    fn only_one_state_attribute() {
        let err = FacadeBuilder::new(FacadeConfig::default())
            .local_state_attribute("State")
            .local_state_attribute("Other")
            .build()
            .unwrap_err();
        assert!(matches!(err, FacadeError::DuplicateState(name) if name == "State"));
    }

    #[test]
    fn status_is_unknown_until_state_computed() {
        let facade = FacadeBuilder::new(FacadeConfig::default())
            .local_attribute("A")
            .state_attribute("State", ["A"], Rule::state(|_| Ok(DeviceState::On.into())))
            .build()
            .unwrap();

        let status = facade.device_status();
        assert_eq!(status.state, DeviceState::Unknown);
        assert_eq!(status.status, STATUS_UNAVAILABLE);
    }
}
