//! Node Failures
//!
//! A `Failure` is what a node holds when its computation, or the transport
//! feeding it, raised an error. It is shared, never re-wrapped, and compared
//! by identity: the failure a dependent carries is the very allocation the
//! root cause produced, so consumers can tell root causes apart.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

type BoxError = Box<dyn Error + Send + Sync + 'static>;

#[derive(Debug)]
struct FailureInner {
    error: BoxError,
    origin: Option<String>,
}

/// A shared error stored in a node.
#[derive(Clone)]
pub struct Failure(Arc<FailureInner>);

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for Message {}

impl Failure {
    /// A failure from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::from_error(Message(message.into()))
    }

    /// A failure wrapping any error.
    pub fn from_error<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self(Arc::new(FailureInner {
            error: Box::new(error),
            origin: None,
        }))
    }

    /// Stamp the node that raised this failure.
    ///
    /// Only a fresh, unshared failure without an origin is stamped; a
    /// failure that is already shared keeps its identity untouched.
    pub(crate) fn located(mut self, node: &str) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.0) {
            if inner.origin.is_none() {
                inner.origin = Some(node.to_string());
            }
        }
        self
    }

    /// Name of the node whose computation raised the failure, if any.
    pub fn origin(&self) -> Option<&str> {
        self.0.origin.as_deref()
    }

    /// The underlying error.
    pub fn error(&self) -> &(dyn Error + Send + Sync + 'static) {
        self.0.error.as_ref()
    }

    /// Try to view the underlying error as a concrete type.
    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.0.error.downcast_ref::<E>()
    }

    /// Whether both handles refer to the same failure.
    pub fn same_as(&self, other: &Failure) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Human-readable description, with the origin as context.
    pub fn describe(&self) -> String {
        let base = self.0.error.to_string();
        match self.origin() {
            None => base,
            Some(origin) => {
                let indented = base
                    .lines()
                    .map(|line| format!("  {line}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("Exception while updating {origin}:\n{indented}")
            }
        }
    }
}

impl PartialEq for Failure {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("error", &self.0.error.to_string())
            .field("origin", &self.0.origin)
            .finish()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.error, f)
    }
}

impl Error for Failure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.0.error.as_ref())
    }
}

impl Serialize for Failure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.describe())
    }
}
