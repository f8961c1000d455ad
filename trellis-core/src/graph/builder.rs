//! Graph Construction
//!
//! Nodes are declared on a [`GraphBuilder`], then validated all at once by
//! [`GraphBuilder::build`]: unique names, resolvable dependencies, at least
//! one binding per derived node, no cycle. Nothing can be written to a graph
//! that failed these checks.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use super::node::{DerivedKind, Node, NodeId, NodeKind, SourceKind};
use super::scheduler::UpdateScheduler;
use super::store::{Graph, GraphId};
use crate::clock::{Clock, SystemClock};
use crate::error::{GraphError, SinkError};
use crate::reactive::{Change, FnSink, QualityPolicy, Rule, Sink, SinkEntry};

struct Declaration {
    kind: NodeKind,
    description: Option<String>,
    bind: Vec<String>,
    rule: Option<Rule>,
}

struct PendingSink {
    node: Option<String>,
    sink: Box<dyn Sink>,
}

/// Declares the nodes of a graph.
///
/// # Example
///
/// ```rust,ignore
/// let graph = GraphBuilder::new()
///     .source("A", SourceKind::Local)
///     .source("B", SourceKind::Local)
///     .derived("C", DerivedKind::Logical, ["A", "B"], Rule::standard(divide))
///     .build()?;
/// ```
pub struct GraphBuilder {
    declarations: IndexMap<String, Declaration>,
    descriptions: Vec<(String, String)>,
    sinks: Vec<PendingSink>,
    policy: QualityPolicy,
    clock: Arc<dyn Clock>,
    duplicate: Option<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            declarations: IndexMap::new(),
            descriptions: Vec::new(),
            sinks: Vec::new(),
            policy: QualityPolicy::default(),
            clock: Arc::new(SystemClock),
            duplicate: None,
        }
    }

    pub fn quality_policy(mut self, policy: QualityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Declare a source node.
    pub fn source(self, name: impl Into<String>, kind: SourceKind) -> Self {
        self.declare(
            name.into(),
            Declaration {
                kind: NodeKind::Source(kind),
                description: None,
                bind: Vec::new(),
                rule: None,
            },
        )
    }

    /// Declare a derived node computed by `rule` from `bind`.
    pub fn derived<I, S>(
        self,
        name: impl Into<String>,
        kind: DerivedKind,
        bind: I,
        rule: Rule,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declare(
            name.into(),
            Declaration {
                kind: NodeKind::Derived(kind),
                description: None,
                bind: bind.into_iter().map(Into::into).collect(),
                rule: Some(rule),
            },
        )
    }

    /// Attach a description to a node. The node may be declared later;
    /// [`GraphBuilder::build`] fails if it never is.
    pub fn describe(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.descriptions.push((name.into(), description.into()));
        self
    }

    /// Register a sink observing every node.
    pub fn sink<S: Sink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(PendingSink {
            node: None,
            sink: Box::new(sink),
        });
        self
    }

    /// Register a sink observing a single node.
    pub fn node_sink<S: Sink + 'static>(mut self, name: impl Into<String>, sink: S) -> Self {
        self.sinks.push(PendingSink {
            node: Some(name.into()),
            sink: Box::new(sink),
        });
        self
    }

    /// Register a closure observing every node.
    pub fn on_change<F>(self, func: F) -> Self
    where
        F: FnMut(&Graph, &Change<'_>) -> Result<(), SinkError> + Send + 'static,
    {
        self.sink(FnSink(func))
    }

    /// Register a closure observing a single node.
    pub fn watch<F>(self, name: impl Into<String>, func: F) -> Self
    where
        F: FnMut(&Graph, &Change<'_>) -> Result<(), SinkError> + Send + 'static,
    {
        self.node_sink(name, FnSink(func))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.declarations.contains_key(name)
    }

    fn declare(mut self, name: String, declaration: Declaration) -> Self {
        if self.declarations.contains_key(&name) {
            self.duplicate.get_or_insert(name);
        } else {
            self.declarations.insert(name, declaration);
        }
        self
    }

    /// Validate the declarations and build the graph.
    pub fn build(self) -> Result<Graph, GraphError> {
        if let Some(name) = self.duplicate {
            return Err(GraphError::DuplicateNode(name));
        }

        let mut declarations = self.declarations;
        for (name, description) in self.descriptions {
            let declaration = declarations
                .get_mut(&name)
                .ok_or(GraphError::UnknownNode(name))?;
            declaration.description = Some(description);
        }

        let index: IndexMap<String, NodeId> = declarations
            .keys()
            .enumerate()
            .map(|(i, name)| (name.clone(), NodeId::new(i)))
            .collect();

        let mut nodes = Vec::with_capacity(declarations.len());
        let mut rules = Vec::with_capacity(declarations.len());
        let mut edges = Vec::new();

        for (i, (name, declaration)) in declarations.into_iter().enumerate() {
            let id = NodeId::new(i);
            if !declaration.kind.is_source() && declaration.bind.is_empty() {
                return Err(GraphError::NoBinding(name));
            }

            let mut node = Node::new(
                id,
                name.clone(),
                declaration.description.unwrap_or_else(|| name.clone()),
                declaration.kind,
            );
            for dependency in &declaration.bind {
                let dep_id = index.get(dependency).copied().ok_or_else(|| {
                    GraphError::UnknownDependency {
                        node: name.clone(),
                        dependency: dependency.clone(),
                    }
                })?;
                node.add_dependency(dep_id);
                edges.push((dep_id, id));
            }

            nodes.push(node);
            rules.push(declaration.rule);
        }

        for (dependency, dependent) in edges {
            nodes[dependency.index()].add_dependent(dependent);
        }

        let scheduler = UpdateScheduler::new(&nodes).map_err(|witness| GraphError::Cycle {
            node: nodes[witness.index()].name().to_string(),
        })?;

        let mut sinks = Vec::with_capacity(self.sinks.len());
        for pending in self.sinks {
            let filter = match pending.node {
                None => None,
                Some(name) => Some(
                    index
                        .get(&name)
                        .copied()
                        .ok_or(GraphError::UnknownNode(name))?,
                ),
            };
            sinks.push(SinkEntry {
                filter,
                sink: pending.sink,
            });
        }

        let graph = Graph {
            id: GraphId::new(),
            nodes,
            index,
            rules,
            scheduler,
            sinks,
            policy: self.policy,
            clock: self.clock,
        };
        debug!(graph = ?graph.id, nodes = graph.len(), "graph built");
        Ok(graph)
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Computed;

    fn identity() -> Rule {
        Rule::standard(|values| Ok(Computed::Value(values[0].clone())))
    }

    #[test]
    fn builds_in_declaration_order() {
        let graph = GraphBuilder::new()
            .derived("C", DerivedKind::Logical, ["A"], identity())
            .source("A", SourceKind::Local)
            .build()
            .unwrap();

        let names: Vec<_> = graph.nodes().map(|n| n.name().to_string()).collect();
        assert_eq!(names, ["C", "A"]);
        assert_eq!(graph.subnodes("C")[0].name(), "A");
        assert_eq!(graph.node("A").unwrap().dependents(), &[graph.id_of("C").unwrap()]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = GraphBuilder::new()
            .source("A", SourceKind::Local)
            .source("A", SourceKind::Proxy)
            .build()
            .unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode("A".into()));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = GraphBuilder::new()
            .derived("C", DerivedKind::Logical, ["A", "B"], identity())
            .source("A", SourceKind::Local)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDependency {
                node: "C".into(),
                dependency: "B".into()
            }
        );
    }

    #[test]
    fn derived_node_needs_a_binding() {
        let err = GraphBuilder::new()
            .derived("C", DerivedKind::Logical, Vec::<String>::new(), identity())
            .build()
            .unwrap_err();
        assert_eq!(err, GraphError::NoBinding("C".into()));
    }

    #[test]
    fn cycle_fails_construction() {
        let err = GraphBuilder::new()
            .source("S", SourceKind::Local)
            .derived("X", DerivedKind::Logical, ["S", "Y"], identity())
            .derived("Y", DerivedKind::Logical, ["X"], identity())
            .build()
            .unwrap_err();
        match err {
            GraphError::Cycle { node } => assert!(node == "X" || node == "Y"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn watch_on_unknown_node_is_rejected() {
        let err = GraphBuilder::new()
            .source("A", SourceKind::Local)
            .watch("B", |_, _| Ok(()))
            .build()
            .unwrap_err();
        assert_eq!(err, GraphError::UnknownNode("B".into()));
    }

    #[test]
    fn description_defaults_to_name() {
        let graph = GraphBuilder::new()
            .source("A", SourceKind::Local)
            .source("B", SourceKind::Local)
            .describe("B", "second input")
            .build()
            .unwrap();
        assert_eq!(graph.node("A").unwrap().description(), "A");
        assert_eq!(graph.node("B").unwrap().description(), "second input");
    }

    #[test]
    fn description_of_unknown_node_is_rejected() {
        let err = GraphBuilder::new()
            .source("A", SourceKind::Local)
            .describe("Missing", "nothing here")
            .build()
            .unwrap_err();
        assert_eq!(err, GraphError::UnknownNode("Missing".into()));
    }
}
