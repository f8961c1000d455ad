//! Facade Runtime
//!
//! The `Facade` owns the graph of one device and is the only way external
//! events reach it. Events may come from any thread: writes are validated
//! on the spot, queued, and the queue is drained one transaction at a time
//! under the graph lock.
//!
//! # Re-entrancy
//!
//! A write submitted while a transaction of the same facade is open on the
//! current thread (from a sink, typically) is queued and applied by the
//! running drain loop right after the current transaction settles. It
//! never interleaves with it.
//!
//! Sinks receive the graph read-only; calling the facade's read methods
//! from a sink would wait on the lock the transaction holds.
//!
//! # Forwarding
//!
//! Writes to writable proxy attributes and proxy commands never touch the
//! graph directly: they go to the [`RemoteTarget`], and the new value comes
//! back as a remote event. A literal property stands in for the remote
//! side: the attribute becomes a local node written in place, and the
//! command returns the literal.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::config::FacadeConfig;
use super::diagnostics::{Diagnostics, FeedKind};
use super::objects::FacadeBuilder;
use super::state::DeviceStatus;
use super::FacadeError;
use crate::clock::Clock;
use crate::error::{SinkError, TransactionError};
use crate::failure::Failure;
use crate::graph::{DerivedKind, Graph, GraphId, NodeKind, NodeState, SourceKind};
use crate::reactive::{Change, Sink, StateReport, TransactionContext, Write};
use crate::triplet::{Quality, Timestamp, Triplet};
use crate::value::{DeviceState, Value};

/// Name of the local attribute ticked by a timed facade.
pub const TIME: &str = "Time";

/// An error reported by a remote device.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{description}")]
pub struct RemoteError {
    pub reason: String,
    pub description: String,
}

impl RemoteError {
    pub fn new(reason: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            description: description.into(),
        }
    }
}

/// A write from the device itself (client write, command, default).
#[derive(Debug, Clone, PartialEq)]
pub enum LocalWrite {
    /// Stamped now, valid.
    Value(Value),
    Triplet(Triplet),
    Failure(Failure),
    Clear,
}

impl LocalWrite {
    fn into_state(self, clock: &dyn Clock) -> NodeState {
        match self {
            LocalWrite::Value(value) => {
                NodeState::Result(Triplet::stamped(Some(value), None, Quality::Valid, clock))
            }
            LocalWrite::Triplet(triplet) => NodeState::Result(triplet),
            LocalWrite::Failure(failure) => NodeState::Failure(failure),
            LocalWrite::Clear => NodeState::Empty,
        }
    }
}

macro_rules! local_write_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for LocalWrite {
                fn from(value: $ty) -> Self {
                    LocalWrite::Value(value.into())
                }
            }
        )*
    };
}

local_write_from_value!(Value, bool, i64, i32, f64, &str, String, DeviceState, StateReport);

impl From<Triplet> for LocalWrite {
    fn from(triplet: Triplet) -> Self {
        LocalWrite::Triplet(triplet)
    }
}

impl From<Failure> for LocalWrite {
    fn from(failure: Failure) -> Self {
        LocalWrite::Failure(failure)
    }
}

/// An external event, as carried by [`Facade::event_channel`].
#[derive(Debug, Clone)]
pub enum Event {
    LocalWrite {
        node: String,
        write: LocalWrite,
    },
    RemoteUpdate {
        node: String,
        value: Option<Value>,
        timestamp: Timestamp,
        quality: Quality,
    },
    RemoteFailure {
        node: String,
        error: RemoteError,
    },
}

/// The subscription layer feeding remote attributes.
pub trait EventSource {
    /// Start delivering `remote` through the given feed.
    fn subscribe(&mut self, remote: &str, feed: FeedKind) -> Result<(), RemoteError>;
}

/// The remote side of writable proxy attributes and proxy commands.
pub trait RemoteTarget: Send + Sync {
    fn write_attribute(&self, attribute: &str, value: &Value) -> Result<(), RemoteError>;

    fn run_command(
        &self,
        command: &str,
        argument: Option<&Value>,
    ) -> Result<Option<Value>, RemoteError>;
}

/// Where a client write or a command goes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Forward {
    /// Write a remote attribute.
    WriteRemote(String),
    /// Run a remote command.
    RunRemote(String),
    /// Write the local node standing in for a literal proxy attribute.
    WriteNode(String),
    /// Return a literal without argument. `None` is a disabled command.
    Emulated(Option<Value>),
}

impl Forward {
    pub(crate) fn is_remote(&self) -> bool {
        matches!(self, Forward::WriteRemote(_) | Forward::RunRemote(_))
    }
}

/// Settled state of a visible attribute, pushed after each transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeEvent {
    pub name: String,
    pub state: NodeState,
}

/// Pushes attribute events for visible nodes that hold a result or a
/// failure.
pub(crate) struct EventSink {
    pub(crate) events: broadcast::Sender<AttributeEvent>,
    /// Remote inputs of proxy and combined attributes.
    pub(crate) hidden: HashSet<String>,
}

impl Sink for EventSink {
    fn notify(&mut self, _graph: &Graph, change: &Change<'_>) -> Result<(), SinkError> {
        if self.hidden.contains(change.name()) || change.current().is_empty() {
            return Ok(());
        }
        // Nobody listening is fine.
        let _ = self.events.send(AttributeEvent {
            name: change.name().to_string(),
            state: change.current().clone(),
        });
        Ok(())
    }
}

pub(crate) fn subnode(name: &str, index: usize) -> String {
    format!("{name}[{index}]")
}

/// Every node state of a facade, in declaration order.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub status: DeviceStatus,
    pub nodes: IndexMap<String, NodeSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub kind: NodeKind,
    pub state: NodeState,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }
}

/// A running facade device.
pub struct Facade {
    pub(crate) graph: Mutex<Graph>,
    pub(crate) graph_id: GraphId,
    pub(crate) kinds: IndexMap<String, NodeKind>,
    pub(crate) remotes: IndexMap<String, String>,
    pub(crate) writes: IndexMap<String, Forward>,
    pub(crate) commands: IndexMap<String, Forward>,
    pub(crate) target: Option<Arc<dyn RemoteTarget>>,
    pub(crate) connected: AtomicBool,
    pub(crate) pending: Mutex<VecDeque<Vec<Write>>>,
    pub(crate) config: FacadeConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) diagnostics: Arc<Diagnostics>,
    pub(crate) status: Arc<Mutex<DeviceStatus>>,
    pub(crate) events: broadcast::Sender<AttributeEvent>,
    pub(crate) state_node: Option<String>,
    pub(crate) timed: bool,
}

impl Facade {
    pub fn builder(config: FacadeConfig) -> FacadeBuilder {
        FacadeBuilder::new(config)
    }

    pub fn graph_id(&self) -> GraphId {
        self.graph_id
    }

    pub fn config(&self) -> &FacadeConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Whether the last [`Facade::connect`] succeeded. A facade starts
    /// connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connection status, subscriptions and error history.
    pub fn info(&self) -> String {
        let connection = if self.is_connected() {
            "The device is currently connected.".to_string()
        } else {
            format!("The device is currently stopped because of:\n{}", self.status.lock().status)
        };
        format!("{connection}\n{}", self.diagnostics.report())
    }

    pub fn device_status(&self) -> DeviceStatus {
        self.status.lock().clone()
    }

    /// Attribute events pushed after each transaction.
    pub fn subscribe(&self) -> broadcast::Receiver<AttributeEvent> {
        self.events.subscribe()
    }

    /// Names of all nodes, in declaration order.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    /// Remote-fed source nodes with their remote attribute.
    pub fn remote_attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.remotes
            .iter()
            .map(|(node, remote)| (node.as_str(), remote.as_str()))
    }

    /// Run `f` on the settled graph.
    pub fn with_graph<R>(&self, f: impl FnOnce(&Graph) -> R) -> R {
        f(&self.graph.lock())
    }

    pub fn read(&self, name: &str) -> Result<NodeState, FacadeError> {
        self.graph
            .lock()
            .read(name)
            .cloned()
            .ok_or_else(|| TransactionError::UnknownNode(name.to_string()).into())
    }

    /// Read a node the way a client reads an attribute: a stored failure is
    /// returned as an error, every time.
    pub fn read_attribute(&self, name: &str) -> Result<Option<Triplet>, FacadeError> {
        match self.read(name)? {
            NodeState::Empty => Ok(None),
            NodeState::Result(triplet) => Ok(Some(triplet)),
            NodeState::Failure(failure) => Err(FacadeError::Failure(failure)),
        }
    }

    /// States of the inputs of a combined attribute, by remote attribute.
    pub fn combined_results(&self, name: &str) -> Result<IndexMap<String, NodeState>, FacadeError> {
        match self.kinds.get(name) {
            None => return Err(TransactionError::UnknownNode(name.to_string()).into()),
            Some(NodeKind::Derived(DerivedKind::Combined)) => {}
            Some(_) => return Err(FacadeError::NotCombined(name.to_string())),
        }

        let graph = self.graph.lock();
        Ok(graph
            .subnodes(name)
            .into_iter()
            .map(|node| {
                let remote = self
                    .remotes
                    .get(node.name())
                    .cloned()
                    .unwrap_or_else(|| node.name().to_string());
                (remote, node.read().clone())
            })
            .collect())
    }

    pub fn snapshot(&self) -> Snapshot {
        let graph = self.graph.lock();
        let nodes = graph
            .nodes()
            .map(|node| {
                let snapshot = NodeSnapshot {
                    kind: node.kind(),
                    state: node.read().clone(),
                };
                (node.name().to_string(), snapshot)
            })
            .collect();
        Snapshot {
            status: self.device_status(),
            nodes,
        }
    }

    /// Names of the proxy commands, in declaration order.
    pub fn command_names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    /// Subscribe every remote attribute, preferring change events and
    /// falling back to periodic ones.
    ///
    /// A failure stops the device: it goes to FAULT with the error as
    /// status, and commands are refused until a later `connect` succeeds.
    pub fn connect(&self, source: &mut dyn EventSource) -> Result<(), FacadeError> {
        for (node, remote) in &self.remotes {
            let feed = match source.subscribe(remote, FeedKind::Push) {
                Ok(()) => FeedKind::Push,
                Err(push_error) => {
                    debug!(
                        remote = remote.as_str(),
                        error = %push_error,
                        "change events unavailable"
                    );
                    match source.subscribe(remote, FeedKind::Polling) {
                        Ok(()) => FeedKind::Polling,
                        Err(error) => {
                            info!(remote = remote.as_str(), "can't subscribe to event");
                            self.stop(format!("Exception while connecting {node}:\n  {error}"));
                            return Err(FacadeError::Subscription {
                                remote: remote.clone(),
                                error,
                            });
                        }
                    }
                }
            };
            info!(remote = remote.as_str(), feed = %feed, "subscribed");
            self.diagnostics.subscribe(node.as_str(), remote.as_str(), feed);
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Record `message`, put the device in FAULT and mark it stopped.
    fn stop(&self, message: String) {
        error!(status = message.as_str(), "device stopped");
        self.diagnostics.record_error(message.clone());
        self.connected.store(false, Ordering::SeqCst);
        *self.status.lock() = DeviceStatus::new(DeviceState::Fault, message, self.clock.now());
    }

    /// Queue a transaction and drain the queue.
    ///
    /// Returns once the writes are applied, unless called from inside a
    /// transaction of this facade, in which case they are applied right
    /// after it.
    pub fn submit(&self, writes: Vec<Write>) -> Result<(), FacadeError> {
        for write in &writes {
            self.validate(write.node())?;
        }
        if writes.is_empty() {
            return Ok(());
        }
        self.pending.lock().push_back(writes);
        self.drain();
        Ok(())
    }

    pub fn submit_local_write(
        &self,
        name: &str,
        write: impl Into<LocalWrite>,
    ) -> Result<(), FacadeError> {
        let state = write.into().into_state(self.clock.as_ref());
        self.submit(vec![Write::new(name, state)])
    }

    pub fn submit_remote_update(
        &self,
        name: &str,
        value: Option<Value>,
        timestamp: Timestamp,
        quality: Quality,
    ) -> Result<(), FacadeError> {
        let remote = self.validate_remote(name)?;
        info!(node = name, remote, "received a valid event");
        let triplet = Triplet::new(value, timestamp, quality);
        self.submit(vec![Write::result(name, triplet)])
    }

    /// Deliver a remote error. Reasons listed in `reasons_to_ignore` are
    /// recorded but leave the node untouched.
    pub fn submit_remote_failure(
        &self,
        name: &str,
        remote_error: RemoteError,
    ) -> Result<(), FacadeError> {
        let remote = self.validate_remote(name)?;
        let description = remote_error
            .description
            .lines()
            .map(|line| format!("  {line}"))
            .collect::<Vec<_>>()
            .join("\n");
        self.diagnostics.record_error(format!(
            "Received an event from {remote} that contains errors:\n{description}"
        ));

        if self.config.ignores(&remote_error.reason) {
            warn!(
                node = name,
                remote,
                reason = remote_error.reason.as_str(),
                "ignoring remote error"
            );
            return Ok(());
        }
        error!(node = name, remote, error = %remote_error, "remote error");
        self.submit(vec![Write::failure(name, Failure::from_error(remote_error))])
    }

    /// Set the state of an unbound state attribute.
    pub fn set_state(&self, report: impl Into<StateReport>) -> Result<(), FacadeError> {
        let node = self.state_node.as_deref().ok_or(FacadeError::NoStateAttribute)?;
        self.submit_local_write(node, Value::from(report.into()))
    }

    /// Write the current time to the `Time` attribute.
    pub fn update_time(&self) -> Result<(), FacadeError> {
        if !self.timed {
            return Err(FacadeError::NotTimed);
        }
        let now = self.clock.now();
        self.submit_local_write(TIME, Triplet::at(now.as_secs(), now))
    }

    /// Write an attribute the way a client does.
    ///
    /// Local attributes are written in a transaction. Writable proxy
    /// attributes forward the value to the remote attribute. Every other
    /// attribute is read-only.
    pub fn write_attribute(&self, name: &str, value: impl Into<Value>) -> Result<(), FacadeError> {
        let value = value.into();
        if let Some(forward) = self.writes.get(name) {
            return self.forward(name, forward, Some(value)).map(drop);
        }
        match self.kinds.get(name) {
            None => Err(TransactionError::UnknownNode(name.to_string()).into()),
            Some(NodeKind::Source(SourceKind::Local)) => self.submit_local_write(name, value),
            Some(_) => Err(FacadeError::NotWritable(name.to_string())),
        }
    }

    /// Run a proxy command. Refused while the device is stopped.
    pub fn run_command(
        &self,
        name: &str,
        argument: Option<Value>,
    ) -> Result<Option<Value>, FacadeError> {
        let forward = self
            .commands
            .get(name)
            .ok_or_else(|| FacadeError::UnknownCommand(name.to_string()))?;
        if !self.is_connected() {
            return Err(FacadeError::NotConnected(name.to_string()));
        }
        self.forward(name, forward, argument)
    }

    fn forward(
        &self,
        name: &str,
        forward: &Forward,
        argument: Option<Value>,
    ) -> Result<Option<Value>, FacadeError> {
        let remote_error = |error: RemoteError| {
            warn!(call = name, %error, "remote call failed");
            FacadeError::Remote {
                name: name.to_string(),
                error,
            }
        };
        let require = |argument: Option<Value>| {
            argument.ok_or_else(|| FacadeError::MissingArgument(name.to_string()))
        };

        match forward {
            Forward::WriteRemote(attribute) => {
                let value = require(argument)?;
                debug!(call = name, attribute = attribute.as_str(), "forwarding write");
                self.target(name)?
                    .write_attribute(attribute, &value)
                    .map_err(remote_error)?;
                Ok(None)
            }
            Forward::RunRemote(command) => {
                debug!(call = name, command = command.as_str(), "forwarding command");
                self.target(name)?
                    .run_command(command, argument.as_ref())
                    .map_err(remote_error)
            }
            Forward::WriteNode(node) => {
                self.submit_local_write(node, require(argument)?)?;
                Ok(None)
            }
            Forward::Emulated(result) => match (result, argument) {
                (Some(value), None) => Ok(Some(value.clone())),
                _ => Err(FacadeError::CommandDisabled(name.to_string())),
            },
        }
    }

    fn target(&self, name: &str) -> Result<&dyn RemoteTarget, FacadeError> {
        self.target
            .as_deref()
            .ok_or_else(|| FacadeError::NoRemoteTarget(name.to_string()))
    }

    pub fn handle(&self, event: Event) -> Result<(), FacadeError> {
        match event {
            Event::LocalWrite { node, write } => self.submit_local_write(&node, write),
            Event::RemoteUpdate {
                node,
                value,
                timestamp,
                quality,
            } => self.submit_remote_update(&node, value, timestamp, quality),
            Event::RemoteFailure { node, error } => self.submit_remote_failure(&node, error),
        }
    }

    /// Serialize events from concurrent producers through a channel.
    ///
    /// The task ends once every sender is dropped.
    pub fn event_channel(
        self: &Arc<Self>,
        capacity: usize,
    ) -> (mpsc::Sender<Event>, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel(capacity);
        let facade = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if let Err(error) = facade.handle(event) {
                    warn!(%error, "dropping event");
                }
            }
            debug!(graph = ?facade.graph_id, "event channel closed");
        });
        (sender, handle)
    }

    /// Tick the `Time` attribute every `time_period_ms`.
    ///
    /// The task holds the facade until it is aborted.
    pub fn spawn_clock(self: &Arc<Self>) -> Result<JoinHandle<()>, FacadeError> {
        if !self.timed {
            return Err(FacadeError::NotTimed);
        }
        let period = self.config.time_period().max(Duration::from_millis(1));
        let facade = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(error) = facade.update_time() {
                    warn!(%error, "clock stopped");
                    break;
                }
            }
        }))
    }

    fn validate(&self, name: &str) -> Result<(), FacadeError> {
        match self.kinds.get(name) {
            None => Err(TransactionError::UnknownNode(name.to_string()).into()),
            Some(kind) if !kind.is_source() => {
                Err(TransactionError::NotASource(name.to_string()).into())
            }
            Some(_) => Ok(()),
        }
    }

    /// Remote events only reach remote-fed sources. Returns the remote
    /// attribute.
    fn validate_remote(&self, name: &str) -> Result<&str, FacadeError> {
        self.validate(name)?;
        self.remotes
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| FacadeError::NotRemote(name.to_string()))
    }

    fn drain(&self) {
        if TransactionContext::is_open(self.graph_id) {
            trace!(graph = ?self.graph_id, "write deferred to the next transaction");
            return;
        }

        let mut graph = self.graph.lock();
        loop {
            let next = self.pending.lock().pop_front();
            let Some(writes) = next else {
                break;
            };
            match graph.apply(writes) {
                Ok(report) => {
                    for failure in &report.raised {
                        self.diagnostics.record_error(failure.describe());
                    }
                    for failure in report.sink_errors {
                        self.diagnostics.record_error(format!(
                            "Exception while notifying {}:\n  {}",
                            failure.node, failure.error
                        ));
                    }
                }
                Err(error) => warn!(%error, "transaction rejected"),
            }
        }
    }
}

impl std::fmt::Debug for Facade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Facade")
            .field("graph", &self.graph_id)
            .field("nodes", &self.kinds.len())
            .field("remotes", &self.remotes)
            .field("commands", &self.commands.len())
            .field("connected", &self.is_connected())
            .field("state_node", &self.state_node)
            .field("timed", &self.timed)
            .finish_non_exhaustive()
    }
}
