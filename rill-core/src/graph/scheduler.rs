//! Update Scheduler
//!
//! Bookkeeping for the flush cycle: the queue of invalidated observers and
//! the `Idle -> Flushing -> Idle` state machine.
//!
//! # Ordering
//!
//! Observers pop in descending priority. Observers with equal priority pop
//! in the order they were queued. Applications should treat this as a hint;
//! independent observers carry no ordering guarantee beyond it.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use super::node::NodeId;
use crate::error::ReactiveError;

/// Scheduler state for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    #[default]
    Idle,
    Flushing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct PendingKey {
    priority: Reverse<i32>,
    seq: u64,
}

/// Deduplicated queue of observers waiting to run.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    order: BTreeMap<PendingKey, NodeId>,
    index: HashMap<NodeId, PendingKey>,
    next_seq: u64,
}

impl PendingQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue an observer. Returns false if it was already queued.
    pub(crate) fn push(&mut self, id: NodeId, priority: i32) -> bool {
        if self.index.contains_key(&id) {
            return false;
        }
        let key = PendingKey {
            priority: Reverse(priority),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.order.insert(key, id);
        self.index.insert(id, key);
        true
    }

    /// Remove and return the next observer to run.
    pub(crate) fn pop(&mut self) -> Option<NodeId> {
        let (_, id) = self.order.pop_first()?;
        self.index.remove(&id);
        Some(id)
    }

    pub(crate) fn remove(&mut self, id: NodeId) -> bool {
        match self.index.remove(&id) {
            Some(key) => {
                self.order.remove(&key);
                true
            }
            None => false,
        }
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.order.clear();
        self.index.clear();
    }

    /// Queued observers in the order they would run.
    pub(crate) fn ids(&self) -> Vec<NodeId> {
        self.order.values().copied().collect()
    }
}

/// An observer error caught at the observer boundary.
#[derive(Debug, Clone)]
pub struct ObserverFailure {
    pub observer: NodeId,
    pub label: Option<String>,
    pub error: ReactiveError,
}

/// Summary of one flush.
#[derive(Debug, Clone, Default)]
pub struct FlushReport {
    /// Observer thunks executed.
    pub observers_run: usize,

    /// Observer errors caught during this flush.
    pub failures: Vec<ObserverFailure>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.observers_run == 0 && self.failures.is_empty()
    }
}
