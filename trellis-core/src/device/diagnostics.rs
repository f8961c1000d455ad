//! Diagnostics
//!
//! Metadata kept next to the graph, never inside it: how each remote-fed
//! node is being fed, and every error the device ran into since start-up.
//! Both tables are written from event producers concurrently with
//! transactions, hence the concurrent maps.

use std::fmt;

use dashmap::DashMap;
use serde::Serialize;

use crate::triplet::Timestamp;

/// How a remote attribute reaches its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    /// Change events pushed by the remote device.
    Push,
    /// Periodic events, the fallback when change events are unavailable.
    Polling,
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedKind::Push => f.write_str("change event"),
            FeedKind::Polling => f.write_str("periodic event"),
        }
    }
}

/// An active subscription for a source node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub node: String,
    pub remote: String,
    pub feed: FeedKind,
}

#[derive(Debug)]
pub struct Diagnostics {
    started: Timestamp,
    subscriptions: DashMap<String, Subscription>,
    errors: DashMap<String, u64>,
}

impl Diagnostics {
    pub fn new(started: Timestamp) -> Self {
        Self {
            started,
            subscriptions: DashMap::new(),
            errors: DashMap::new(),
        }
    }

    pub fn started(&self) -> Timestamp {
        self.started
    }

    pub fn subscribe(&self, node: impl Into<String>, remote: impl Into<String>, feed: FeedKind) {
        let node = node.into();
        let subscription = Subscription {
            node: node.clone(),
            remote: remote.into(),
            feed,
        };
        self.subscriptions.insert(node, subscription);
    }

    pub fn subscription(&self, node: &str) -> Option<Subscription> {
        self.subscriptions.get(node).map(|entry| entry.value().clone())
    }

    /// Every subscription, sorted by remote attribute.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let mut subscriptions: Vec<_> = self
            .subscriptions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        subscriptions.sort_by(|a, b| a.remote.cmp(&b.remote).then_with(|| a.node.cmp(&b.node)));
        subscriptions
    }

    /// Count one more occurrence of `message`, returning the new count.
    pub fn record_error(&self, message: impl Into<String>) -> u64 {
        let mut count = self.errors.entry(message.into()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn error_count(&self, message: &str) -> u64 {
        self.errors.get(message).map_or(0, |count| *count)
    }

    /// Every recorded error with its count, sorted by message.
    pub fn errors(&self) -> Vec<(String, u64)> {
        let mut errors: Vec<_> = self
            .errors
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        errors.sort();
        errors
    }

    /// Human-readable summary of subscriptions and error history.
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        let subscriptions = self.subscriptions();
        if subscriptions.is_empty() {
            lines.push("It didn't subscribe to any event.".to_string());
        } else {
            lines.push("It subscribed to event channel of the following attribute(s):".to_string());
            for subscription in &subscriptions {
                lines.push(format!("- {} ({})", subscription.remote, subscription.feed));
            }
        }

        lines.push("-----".to_string());
        let since = format!("{:.3}", self.started.as_secs());
        let errors = self.errors();
        if errors.is_empty() {
            lines.push(format!("No errors in history since {since} (last initialization)."));
        } else {
            lines.push(format!("Error history since {since} (last initialization):"));
            for (message, count) in errors {
                let times = if count == 1 {
                    "once".to_string()
                } else {
                    format!("{count} times")
                };
                lines.push(format!(" - Raised {times}:"));
                lines.extend(message.lines().map(|line| format!("    {line}")));
            }
        }

        lines.join("\n")
    }
}
