//! Facade Devices
//!
//! The device layer wraps a graph into a running device: attributes are
//! declared on a [`FacadeBuilder`], resolved against a [`FacadeConfig`],
//! and the resulting [`Facade`] serializes local writes and remote events
//! into transactions.
//!
//! Everything here sits around the graph, not inside it. The state sink,
//! the attribute event pusher and the diagnostics only ever observe settled
//! node states.

mod config;
mod diagnostics;
mod objects;
mod runtime;
mod state;

pub use config::{
    AttributeDirectory, CombinedSource, CommandSource, ConfigError, FacadeConfig, Property,
    ProxySource, StaticDirectory,
};
pub use diagnostics::{Diagnostics, FeedKind, Subscription};
pub use objects::FacadeBuilder;
pub use runtime::{
    AttributeEvent, Event, EventSource, Facade, LocalWrite, NodeSnapshot, RemoteError,
    RemoteTarget, Snapshot, TIME,
};
pub use state::{DeviceStatus, STATUS_INVALID, STATUS_UNAVAILABLE};

use crate::error::{GraphError, TransactionError};
use crate::failure::Failure;

/// Errors raised by a facade.
#[derive(Debug, thiserror::Error)]
pub enum FacadeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// A read hit a node holding a failure.
    #[error(transparent)]
    Failure(#[from] Failure),

    #[error("{0} is not a combined attribute")]
    NotCombined(String),

    #[error("the device has no state attribute")]
    NoStateAttribute,

    #[error("a state attribute is already declared: {0}")]
    DuplicateState(String),

    #[error("the device has no Time attribute")]
    NotTimed,

    #[error("cannot subscribe to {remote}: {error}")]
    Subscription {
        remote: String,
        #[source]
        error: RemoteError,
    },

    /// A remote event named a node that is not fed by a remote attribute.
    #[error("{0} is not a remote attribute")]
    NotRemote(String),

    #[error("attribute {0} is read-only")]
    NotWritable(String),

    #[error("unknown command {0}")]
    UnknownCommand(String),

    #[error("a command called {0} already exists")]
    DuplicateCommand(String),

    /// Commands are refused while the device is stopped.
    #[error("command {0} is not allowed while the device is stopped")]
    NotConnected(String),

    /// An emulated command was given an argument, or its property is `null`.
    #[error("This proxy command is disabled: {0}")]
    CommandDisabled(String),

    #[error("{0} expects a value")]
    MissingArgument(String),

    #[error("{0} forwards to a remote device but no remote target is set")]
    NoRemoteTarget(String),

    /// The remote target refused a forwarded write or command.
    #[error("{name} failed on the remote device: {error}")]
    Remote {
        name: String,
        #[source]
        error: RemoteError,
    },
}
