//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexSet;
use serde::Serialize;

use crate::error::Result;

/// Unique identifier for a node in the dependency graph.
///
/// Ids come from a process-wide counter, so an id minted by one session is
/// never valid in another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A value cell. Cells are the sources of the graph: they have
    /// dependents but never dependencies.
    Cell,

    /// A computed node. Has dependencies and dependents, caches its result.
    Computed,

    /// An observer. A sink: dependencies only, run for its side effects.
    Observer,
}

/// Evaluation state of a computed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputedState {
    /// The cached result is authoritative.
    Valid,

    /// The cache was discarded; the next read recomputes.
    Invalid,

    /// The thunk is running on the current call stack.
    Computing,
}

/// Scheduling state of an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObserverState {
    /// Settled after its last run.
    Idle,

    /// Invalidated and waiting in the flush queue.
    Pending,

    /// The thunk is running.
    Running,
}

/// Externally visible status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "state", rename_all = "lowercase")]
pub enum NodeStatus {
    Cell,
    Computed(ComputedState),
    Observer(ObserverState),
}

pub(crate) type ObserverThunk = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Type-erased `Arc<Result<T, ReactiveError>>` of a computed node.
pub(crate) type CachedResult = Box<dyn Any + Send + Sync>;

pub(crate) enum NodeBody {
    Cell,
    Computed {
        state: ComputedState,
        cache: Option<CachedResult>,
        /// An input changed while computing; the result is already stale.
        stale: bool,
    },
    Observer {
        state: ObserverState,
        priority: i32,
        runs: u64,
        /// Invalidated while running; queue again once the run ends.
        rerun: bool,
        thunk: ObserverThunk,
    },
}

/// A node in the dependency graph.
pub(crate) struct Node {
    id: NodeId,

    /// Optional human-readable name, shown in diagnostics.
    pub(crate) label: Option<String>,

    pub(crate) body: NodeBody,

    /// Producers read during the last evaluation.
    pub(crate) dependencies: IndexSet<NodeId>,

    /// Consumers that read this node during their last evaluation.
    pub(crate) dependents: IndexSet<NodeId>,
}

impl Node {
    fn with_body(id: NodeId, body: NodeBody) -> Self {
        Self {
            id,
            label: None,
            body,
            dependencies: IndexSet::new(),
            dependents: IndexSet::new(),
        }
    }

    /// Create a cell node.
    pub(crate) fn cell(id: NodeId) -> Self {
        Self::with_body(id, NodeBody::Cell)
    }

    /// Create a computed node. It starts invalid so the first read computes.
    pub(crate) fn computed(id: NodeId) -> Self {
        Self::with_body(
            id,
            NodeBody::Computed {
                state: ComputedState::Invalid,
                cache: None,
                stale: false,
            },
        )
    }

    /// Create an observer node. It starts pending; the caller queues it.
    pub(crate) fn observer(id: NodeId, priority: i32, thunk: ObserverThunk) -> Self {
        Self::with_body(
            id,
            NodeBody::Observer {
                state: ObserverState::Pending,
                priority,
                runs: 0,
                rerun: false,
                thunk,
            },
        )
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn kind(&self) -> NodeKind {
        match self.body {
            NodeBody::Cell => NodeKind::Cell,
            NodeBody::Computed { .. } => NodeKind::Computed,
            NodeBody::Observer { .. } => NodeKind::Observer,
        }
    }

    pub(crate) fn status(&self) -> NodeStatus {
        match &self.body {
            NodeBody::Cell => NodeStatus::Cell,
            NodeBody::Computed { state, .. } => NodeStatus::Computed(*state),
            NodeBody::Observer { state, .. } => NodeStatus::Observer(*state),
        }
    }

    /// Whether the node is currently running its thunk.
    pub(crate) fn is_evaluating(&self) -> bool {
        matches!(
            self.body,
            NodeBody::Computed { state: ComputedState::Computing, .. }
                | NodeBody::Observer { state: ObserverState::Running, .. }
        )
    }

    /// Swap the dependent set with an empty one and return the old set.
    pub(crate) fn take_dependents(&mut self) -> IndexSet<NodeId> {
        std::mem::take(&mut self.dependents)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("status", &self.status())
            .field("dependencies", &self.dependencies)
            .field("dependents", &self.dependents)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> ObserverThunk {
        Arc::new(|| -> Result<()> { Ok(()) })
    }

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
        assert!(id1 < id2);
    }

    #[test]
    fn computed_node_starts_invalid() {
        let node = Node::computed(NodeId::new());
        assert_eq!(node.kind(), NodeKind::Computed);
        assert_eq!(node.status(), NodeStatus::Computed(ComputedState::Invalid));
        assert!(!node.is_evaluating());
    }

    #[test]
    fn observer_node_starts_pending() {
        let node = Node::observer(NodeId::new(), 3, noop());
        assert_eq!(node.kind(), NodeKind::Observer);
        assert_eq!(node.status(), NodeStatus::Observer(ObserverState::Pending));
    }

    #[test]
    fn take_dependents_leaves_empty_set() {
        let mut node = Node::cell(NodeId::new());
        let a = NodeId::new();
        let b = NodeId::new();
        node.dependents.insert(a);
        node.dependents.insert(b);

        let old = node.take_dependents();
        assert_eq!(old.into_iter().collect::<Vec<_>>(), vec![a, b]);
        assert!(node.dependents.is_empty());
    }

    #[test]
    fn status_serializes_with_kind_tag() {
        let json = serde_json::to_string(&NodeStatus::Computed(ComputedState::Valid)).unwrap();
        assert_eq!(json, r#"{"kind":"computed","state":"valid"}"#);
        assert_eq!(serde_json::to_string(&NodeId::from(4)).unwrap(), "4");
    }
}
