//! Diagnostic Event Log
//!
//! An optional record of node transitions, meant for external tools that
//! visualize the reactive graph. Recording never influences scheduling.
//!
//! Cell writes are logged with the observer (if any) that performed them,
//! which makes imperative couplings between observers and unrelated cells
//! visible even though they leave no edge in the graph.

use std::collections::VecDeque;

use serde::Serialize;

use crate::graph::NodeId;

/// What happened to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// The node's cached result was discarded or the observer was queued.
    Invalidated,
    /// The node's thunk started.
    Recomputing,
    /// The thunk finished successfully.
    Valid,
    /// The thunk finished with an error.
    Error { message: String },
    /// A cell was written and its dependents were invalidated.
    Changed {
        revision: u64,
        writer: Option<NodeId>,
    },
    /// The node was removed from the session.
    Destroyed,
}

/// One entry of the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphEvent {
    /// Monotonic sequence number within the session.
    pub seq: u64,
    pub node: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug)]
pub(crate) struct EventLog {
    enabled: bool,
    capacity: usize,
    next_seq: u64,
    events: VecDeque<GraphEvent>,
}

impl EventLog {
    pub(crate) fn new(enabled: bool, capacity: usize) -> Self {
        Self {
            enabled,
            capacity: capacity.max(1),
            next_seq: 0,
            events: VecDeque::new(),
        }
    }

    pub(crate) fn record(&mut self, node: NodeId, label: Option<&str>, kind: EventKind) {
        tracing::trace!(node = %node, label, event = ?kind, "graph transition");

        if !self.enabled {
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(GraphEvent {
            seq: self.next_seq,
            node,
            label: label.map(str::to_owned),
            kind,
        });
        self.next_seq += 1;
    }

    pub(crate) fn snapshot(&self) -> Vec<GraphEvent> {
        self.events.iter().cloned().collect()
    }

    pub(crate) fn drain(&mut self) -> Vec<GraphEvent> {
        self.events.drain(..).collect()
    }
}

/// Serialize events as a JSON array.
pub fn events_to_json(events: &[GraphEvent]) -> serde_json::Result<String> {
    serde_json::to_string(events)
}
