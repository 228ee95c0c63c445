//! Session Arena
//!
//! The [`Graph`] owns every node of one session together with the flush
//! queue and the event log. All of it sits behind a single lock in the
//! runtime, so a transition and the bookkeeping it implies happen together.
//!
//! User values (cached results, observer thunks, removed nodes) are never
//! dropped while the lock is held: they are moved to a garbage list which
//! the runtime empties after releasing the lock. Dropping a user value can
//! run arbitrary code, including code that re-enters the runtime.

use std::any::Any;
use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::node::{
    CachedResult, ComputedState, Node, NodeBody, NodeId, NodeKind, NodeStatus, ObserverState,
    ObserverThunk,
};
use super::scheduler::{PendingQueue, SchedulerState};
use crate::diagnostics::{EventKind, EventLog};
use crate::error::{ReactiveError, Result};

pub(crate) type Garbage = Box<dyn Any + Send + Sync>;

/// Outcome of looking up a computed node for a read.
pub(crate) enum ComputedRead<T> {
    /// The node was valid; this shares its cached result.
    Cached(Arc<Result<T>>),
    /// The node was invalid and is now `Computing`; the caller runs the thunk.
    Recompute,
    /// The node is already computing on this call stack.
    Cycle,
    /// The node no longer exists.
    Missing,
}

/// Outcome of storing a computed result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ComputeOutcome {
    /// Cached; the node is valid.
    Stored,
    /// An input changed while the thunk ran; the node stays invalid.
    Stale,
    /// The node was destroyed while computing.
    Gone,
}

pub(crate) struct Graph {
    nodes: IndexMap<NodeId, Node>,
    pub(crate) queue: PendingQueue,
    pub(crate) state: SchedulerState,
    pub(crate) batch_depth: usize,
    pub(crate) events: EventLog,
    garbage: Vec<Garbage>,
}

impl Graph {
    pub(crate) fn new(events: EventLog) -> Self {
        Self {
            nodes: IndexMap::new(),
            queue: PendingQueue::new(),
            state: SchedulerState::Idle,
            batch_depth: 0,
            events,
            garbage: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Insert an observer and queue its first run.
    pub(crate) fn insert_observer(&mut self, node: Node, priority: i32) -> NodeId {
        let id = self.insert(node);
        self.queue.push(id, priority);
        id
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.nodes.get(&id).map(Node::kind)
    }

    pub(crate) fn status(&self, id: NodeId) -> Option<NodeStatus> {
        self.nodes.get(&id).map(Node::status)
    }

    pub(crate) fn set_label(&mut self, id: NodeId, label: String) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) => {
                node.label = Some(label);
                true
            }
            None => false,
        }
    }

    pub(crate) fn dependents_of(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&id)
            .map(|node| node.dependents.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn dependencies_of(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&id)
            .map(|node| node.dependencies.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn observer_runs(&self, id: NodeId) -> Option<u64> {
        match self.nodes.get(&id).map(|node| &node.body) {
            Some(NodeBody::Observer { runs, .. }) => Some(*runs),
            _ => None,
        }
    }

    pub(crate) fn has_cached_value(&self, id: NodeId) -> bool {
        matches!(
            self.nodes.get(&id).map(|node| &node.body),
            Some(NodeBody::Computed { cache: Some(_), .. })
        )
    }

    /// Append an event for `id`, labelled with the node's name.
    pub(crate) fn record(&mut self, id: NodeId, kind: EventKind) {
        let label = self.nodes.get(&id).and_then(|node| node.label.as_deref());
        self.events.record(id, label, kind);
    }

    pub(crate) fn take_garbage(&mut self) -> Vec<Garbage> {
        std::mem::take(&mut self.garbage)
    }

    /// Record an edge `producer -> consumer`.
    ///
    /// Only a consumer that is currently evaluating can gain edges; self
    /// edges are ignored.
    pub(crate) fn add_edge(&mut self, producer: NodeId, consumer: Option<NodeId>) {
        let Some(consumer) = consumer else {
            return;
        };
        if producer == consumer || !self.nodes.contains_key(&producer) {
            return;
        }
        match self.nodes.get_mut(&consumer) {
            Some(node) if node.is_evaluating() => {
                node.dependencies.insert(producer);
            }
            _ => return,
        }
        if let Some(node) = self.nodes.get_mut(&producer) {
            node.dependents.insert(consumer);
        }
    }

    /// Drop every edge in which `id` is the consumer.
    fn sever_upstream(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        let producers = std::mem::take(&mut node.dependencies);
        for producer in producers {
            if let Some(node) = self.nodes.get_mut(&producer) {
                node.dependents.shift_remove(&id);
            }
        }
    }

    /// Invalidate `root` and everything downstream of it.
    ///
    /// For a cell this invalidates its dependents. Each computed node is
    /// invalidated at most once: its dependent set is swapped out before
    /// the walk continues below it. Observers land in the queue, once.
    ///
    /// A node that is evaluating has already lost the edge that led here,
    /// so it is flagged instead: a computing node settles invalid, a running
    /// observer is queued again when its run ends.
    ///
    /// Returns the number of nodes that changed state.
    pub(crate) fn invalidate(&mut self, root: NodeId) -> usize {
        let mut stack: SmallVec<[NodeId; 16]> = SmallVec::new();
        match self.nodes.get_mut(&root) {
            None => return 0,
            Some(node) if node.kind() == NodeKind::Cell => {
                stack.extend(node.take_dependents().into_iter().rev());
            }
            Some(_) => stack.push(root),
        }

        let mut count = 0;
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            let cascade = match &mut node.body {
                NodeBody::Cell => continue,
                NodeBody::Computed { state, cache, stale } => match *state {
                    ComputedState::Valid => {
                        *state = ComputedState::Invalid;
                        if let Some(old) = cache.take() {
                            self.garbage.push(old);
                        }
                        true
                    }
                    ComputedState::Computing if !*stale => {
                        *stale = true;
                        true
                    }
                    _ => continue,
                },
                NodeBody::Observer {
                    state,
                    priority,
                    rerun,
                    ..
                } => match *state {
                    ObserverState::Idle => {
                        *state = ObserverState::Pending;
                        self.queue.push(id, *priority);
                        false
                    }
                    ObserverState::Running if !*rerun => {
                        *rerun = true;
                        false
                    }
                    _ => continue,
                },
            };
            count += 1;
            self.events
                .record(id, node.label.as_deref(), EventKind::Invalidated);
            if cascade {
                stack.extend(node.take_dependents().into_iter().rev());
            }
        }
        count
    }

    /// Look up a computed node for a read by `reader`.
    ///
    /// A valid node yields its cached result; an invalid one is moved to
    /// `Computing` with its upstream edges severed. The reader gains an
    /// edge in the cached and cycle cases; in the recompute case the caller
    /// records it once the result is stored.
    pub(crate) fn read_computed<T>(&mut self, id: NodeId, reader: Option<NodeId>) -> ComputedRead<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let Some(node) = self.nodes.get_mut(&id) else {
            return ComputedRead::Missing;
        };
        let NodeBody::Computed { state, cache, stale } = &mut node.body else {
            return ComputedRead::Missing;
        };

        match *state {
            ComputedState::Valid => {
                let cached = cache
                    .as_ref()
                    .and_then(|cache| cache.downcast_ref::<Arc<Result<T>>>())
                    .cloned();
                if let Some(result) = cached {
                    self.add_edge(id, reader);
                    return ComputedRead::Cached(result);
                }
                // A valid node without a readable cache is treated as stale.
                *state = ComputedState::Computing;
            }
            ComputedState::Computing => {
                self.add_edge(id, reader);
                return ComputedRead::Cycle;
            }
            ComputedState::Invalid => {
                *state = ComputedState::Computing;
            }
        }
        *stale = false;

        self.events
            .record(id, node.label.as_deref(), EventKind::Recomputing);
        self.sever_upstream(id);
        ComputedRead::Recompute
    }

    /// Store the result of a computed thunk and mark the node valid.
    ///
    /// A node invalidated while it was computing discards the result and
    /// stays invalid, so the next read runs the thunk again.
    pub(crate) fn finish_compute(&mut self, id: NodeId, result: CachedResult, error: Option<String>) -> ComputeOutcome {
        let Some(node) = self.nodes.get_mut(&id) else {
            self.garbage.push(result);
            return ComputeOutcome::Gone;
        };
        let NodeBody::Computed { state, cache, stale } = &mut node.body else {
            self.garbage.push(result);
            return ComputeOutcome::Gone;
        };
        if *state != ComputedState::Computing {
            self.garbage.push(result);
            return ComputeOutcome::Gone;
        }
        if std::mem::take(stale) {
            *state = ComputedState::Invalid;
            self.garbage.push(result);
            self.events
                .record(id, node.label.as_deref(), EventKind::Invalidated);
            return ComputeOutcome::Stale;
        }

        *state = ComputedState::Valid;
        if let Some(old) = cache.replace(result) {
            self.garbage.push(old);
        }
        let kind = match error {
            Some(message) => EventKind::Error { message },
            None => EventKind::Valid,
        };
        self.events.record(id, node.label.as_deref(), kind);
        ComputeOutcome::Stored
    }

    /// Return a computed node that never finished to `Invalid`.
    pub(crate) fn abort_compute(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            if let NodeBody::Computed { state, stale, .. } = &mut node.body {
                if *state == ComputedState::Computing {
                    *state = ComputedState::Invalid;
                    *stale = false;
                }
            }
        }
    }

    /// Move a pending observer to `Running` and hand out its thunk.
    pub(crate) fn begin_observer(&mut self, id: NodeId) -> Option<ObserverThunk> {
        let node = self.nodes.get_mut(&id)?;
        let NodeBody::Observer { state, thunk, .. } = &mut node.body else {
            return None;
        };
        if *state != ObserverState::Pending {
            return None;
        }
        *state = ObserverState::Running;
        let thunk = thunk.clone();

        self.events
            .record(id, node.label.as_deref(), EventKind::Recomputing);
        self.sever_upstream(id);
        Some(thunk)
    }

    /// Settle a running observer. Returns its label if it still exists.
    ///
    /// An observer invalidated during its run goes straight back into the
    /// queue.
    pub(crate) fn finish_observer(&mut self, id: NodeId, result: &Result<()>) -> Option<Option<String>> {
        let node = self.nodes.get_mut(&id)?;
        let NodeBody::Observer {
            state,
            runs,
            priority,
            rerun,
            ..
        } = &mut node.body
        else {
            return None;
        };
        if *state != ObserverState::Running {
            return None;
        }
        *runs += 1;
        if std::mem::take(rerun) {
            *state = ObserverState::Pending;
            self.queue.push(id, *priority);
        } else {
            *state = ObserverState::Idle;
        }

        let kind = match result {
            Ok(()) => EventKind::Valid,
            Err(err) => EventKind::Error {
                message: err.to_string(),
            },
        };
        self.events.record(id, node.label.as_deref(), kind);
        Some(node.label.clone())
    }

    /// Return an observer that never finished to `Idle`.
    pub(crate) fn abort_observer(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            if let NodeBody::Observer { state, rerun, .. } = &mut node.body {
                if *state == ObserverState::Running {
                    *state = ObserverState::Idle;
                    *rerun = false;
                }
            }
        }
    }

    /// Queue an idle observer, or invalidate any other node.
    pub(crate) fn invalidate_explicit(&mut self, id: NodeId) -> Result<usize> {
        if !self.nodes.contains_key(&id) {
            return Err(ReactiveError::UnknownNode { node: id });
        }
        Ok(self.invalidate(id))
    }

    /// Remove a node and every edge touching it.
    ///
    /// With `invalidate_dependents`, consumers of the node are invalidated
    /// first so they notice it is gone on their next evaluation.
    pub(crate) fn remove(&mut self, id: NodeId, invalidate_dependents: bool) -> Option<NodeKind> {
        let dependents = self.nodes.get_mut(&id)?.take_dependents();
        for &dependent in &dependents {
            if let Some(node) = self.nodes.get_mut(&dependent) {
                node.dependencies.shift_remove(&id);
            }
            if invalidate_dependents {
                self.invalidate(dependent);
            }
        }

        self.queue.remove(id);
        self.sever_upstream(id);
        let node = self.nodes.shift_remove(&id)?;
        let kind = node.kind();
        self.events
            .record(id, node.label.as_deref(), EventKind::Destroyed);
        self.garbage.push(Box::new(node));
        Some(kind)
    }

    /// Remove every node.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.nodes.len();
        self.queue.clear();
        let nodes = std::mem::take(&mut self.nodes);
        self.garbage
            .extend(nodes.into_values().map(|node| Box::new(node) as Garbage));
        count
    }
}
