//! Reactive Runtime
//!
//! The runtime is the session object that connects cells, computed nodes
//! and observers. It owns the dependency graph, the tracking stack, the
//! flush queue and the timers of one session.
//!
//! # How It Works
//!
//! 1. A read made while some consumer is evaluating records an edge from
//!    the value read to that consumer.
//!
//! 2. A changing write invalidates the cell's dependents, transitively.
//!    Computed nodes just discard their cache; observers are queued.
//!
//! 3. [`Runtime::flush`] runs queued observers until the queue is empty.
//!    Running an observer re-reads its inputs, recomputing any invalidated
//!    computed node on the way and rediscovering edges.
//!
//! Because computed nodes only recompute when read, and are read only by
//! consumers that run after the whole invalidation has propagated, a
//! consumer never sees a mix of values from before and after a write.
//!
//! # Sessions
//!
//! Sessions are independent. Handles keep only a weak reference to their
//! session, so dropping the [`Runtime`] tears down every node it owns;
//! reads of computed nodes then fail with
//! [`ReactiveError::StaleReadAfterDestroy`].
//!
//! # Threading
//!
//! A session is driven from a single thread at a time. Internal locks are
//! never held while user code runs, so thunks may freely read, write and
//! create nodes of their own session.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::context::{Tracker, TrackingScope};
use crate::config::RuntimeConfig;
use crate::diagnostics::{events_to_json, EventKind, EventLog, GraphEvent};
use crate::error::{ReactiveError, Result};
use crate::graph::{
    ComputeOutcome, ComputedRead, FlushReport, Graph, NodeId, NodeKind, NodeStatus, ObserverFailure, SchedulerState,
};
use crate::timer::{Clock, SystemClock, TimerHandle, TimerQueue};

/// Shared state of a session.
pub struct RuntimeInner {
    pub(crate) config: RuntimeConfig,
    graph: Mutex<Graph>,
    pub(crate) tracker: Tracker,
    pub(crate) timers: Mutex<TimerQueue>,
    clock: Arc<dyn Clock>,
    failures: Mutex<Vec<ObserverFailure>>,
}

impl RuntimeInner {
    /// Run `f` on the locked graph, then drop any user values it released
    /// after the lock is gone.
    pub(crate) fn with_graph<R>(&self, f: impl FnOnce(&mut Graph) -> R) -> R {
        let (result, garbage) = {
            let mut graph = self.graph.lock();
            let result = f(&mut graph);
            (result, graph.take_garbage())
        };
        drop(garbage);
        result
    }

    /// Attribute a read of `producer` to the evaluating consumer, if any.
    pub(crate) fn record_read(&self, producer: NodeId) {
        let reader = self.tracker.current();
        if reader.is_some() {
            self.with_graph(|graph| graph.add_edge(producer, reader));
        }
    }

    /// A cell took a new value: invalidate everything downstream.
    pub(crate) fn cell_changed(&self, id: NodeId, revision: u64) {
        let writer = self.tracker.current();
        let invalidated = self.with_graph(|graph| {
            if !graph.contains(id) {
                return 0;
            }
            graph.record(id, EventKind::Changed { revision, writer });
            graph.invalidate(id)
        });
        if invalidated > 0 {
            self.maybe_auto_flush();
        }
    }

    /// Read a computed node, recomputing it first if it is invalid.
    pub(crate) fn read_computed<T>(&self, id: NodeId, compute: &dyn Fn() -> Result<T>) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let reader = self.tracker.current();
        match self.with_graph(|graph| graph.read_computed::<T>(id, reader)) {
            ComputedRead::Cached(result) => return (*result).clone(),
            ComputedRead::Cycle => return Err(ReactiveError::CyclicDependency { node: id }),
            ComputedRead::Missing => return Err(ReactiveError::StaleReadAfterDestroy { node: id }),
            ComputedRead::Recompute => {}
        }

        let result = {
            let evaluation = Evaluation::enter(self, id, NodeKind::Computed);
            let result = compute();
            evaluation.complete();
            result
        };

        let error = result.as_ref().err().map(ToString::to_string);
        let cached = Arc::new(result.clone());
        self.with_graph(|graph| match graph.finish_compute(id, Box::new(cached), error) {
            ComputeOutcome::Stored => graph.add_edge(id, reader),
            // The reader saw a value that is already out of date.
            ComputeOutcome::Stale => {
                if let Some(reader) = reader {
                    graph.invalidate(reader);
                }
            }
            ComputeOutcome::Gone => {}
        });
        result
    }

    pub(crate) fn invalidate(&self, id: NodeId) -> Result<()> {
        let invalidated = self.with_graph(|graph| graph.invalidate_explicit(id))?;
        if invalidated > 0 {
            self.maybe_auto_flush();
        }
        Ok(())
    }

    /// Flush now if the configuration and the current context allow it.
    pub(crate) fn maybe_auto_flush(&self) {
        if !self.config.auto_flush || self.tracker.in_evaluation() {
            return;
        }
        let ready = self.with_graph(|graph| {
            graph.batch_depth == 0 && graph.state == SchedulerState::Idle && !graph.queue.is_empty()
        });
        if !ready {
            return;
        }
        if let Err(err) = self.flush() {
            tracing::error!(error = %err, "automatic flush failed");
        }
    }

    pub(crate) fn flush(&self) -> Result<FlushReport> {
        if self.tracker.in_evaluation() {
            return Ok(FlushReport::default());
        }
        let acquired = self.with_graph(|graph| match graph.state {
            SchedulerState::Flushing => false,
            SchedulerState::Idle => {
                graph.state = SchedulerState::Flushing;
                true
            }
        });
        if !acquired {
            return Ok(FlushReport::default());
        }
        let _flushing = FlushGuard { inner: self };

        let limit = self.config.max_observer_runs_per_flush;
        let mut report = FlushReport::default();
        loop {
            let runs = report.observers_run;
            let next = self.with_graph(|graph| {
                if graph.queue.is_empty() {
                    Ok(None)
                } else if runs >= limit {
                    Err(ReactiveError::FlushLimitExceeded { limit })
                } else {
                    Ok(graph.queue.pop())
                }
            });
            match next {
                Ok(Some(id)) => self.run_observer(id, &mut report),
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(limit, "flush stopped at observer run limit");
                    return Err(err);
                }
            }
        }

        tracing::debug!(
            observers = report.observers_run,
            failures = report.failures.len(),
            "flush complete"
        );
        Ok(report)
    }

    fn run_observer(&self, id: NodeId, report: &mut FlushReport) {
        let Some(thunk) = self.with_graph(|graph| graph.begin_observer(id)) else {
            return;
        };

        let result = {
            let evaluation = Evaluation::enter(self, id, NodeKind::Observer);
            let result = thunk();
            evaluation.complete();
            result
        };
        let label = self.with_graph(|graph| graph.finish_observer(id, &result));
        drop(thunk);
        report.observers_run += 1;

        if let Err(error) = result {
            let label = label.flatten();
            tracing::warn!(observer = %id, label = label.as_deref(), error = %error, "observer failed");
            let failure = ObserverFailure {
                observer: id,
                label,
                error,
            };
            self.failures.lock().push(failure.clone());
            report.failures.push(failure);
        }
    }

    /// Forget a node whose last handle was dropped.
    pub(crate) fn release_node(&self, id: NodeId) {
        self.with_graph(|graph| graph.remove(id, false));
        self.timers.lock().cancel_node(id);
    }

    /// Destroy a node on request. Its consumers are invalidated so they
    /// observe the removal. Returns false if it was already gone.
    pub(crate) fn destroy_node(&self, id: NodeId) -> bool {
        let removed = self.with_graph(|graph| graph.remove(id, true)).is_some();
        self.timers.lock().cancel_node(id);
        if removed {
            self.maybe_auto_flush();
        }
        removed
    }

    pub(crate) fn status(&self, id: NodeId) -> Option<NodeStatus> {
        self.with_graph(|graph| graph.status(id))
    }

    pub(crate) fn schedule_invalidate(
        self: &Arc<Self>,
        node: NodeId,
        after: Duration,
        repeating: bool,
    ) -> Result<TimerHandle> {
        if !self.with_graph(|graph| graph.contains(node)) {
            return Err(ReactiveError::UnknownNode { node });
        }
        let now = self.clock.now();
        let id = self.timers.lock().schedule(node, now, after, repeating);
        tracing::trace!(timer = %id, node = %node, ?after, repeating, "timer scheduled");
        Ok(TimerHandle::new(id, node, Arc::downgrade(self)))
    }
}

/// Marks a node as evaluating for the lifetime of the guard.
///
/// If the guard is dropped without [`Evaluation::complete`] (the thunk
/// panicked) the node returns to a state from which it can run again.
struct Evaluation<'a> {
    inner: &'a RuntimeInner,
    node: NodeId,
    kind: NodeKind,
    completed: bool,
    _scope: TrackingScope<'a>,
}

impl<'a> Evaluation<'a> {
    fn enter(inner: &'a RuntimeInner, node: NodeId, kind: NodeKind) -> Self {
        Self {
            inner,
            node,
            kind,
            completed: false,
            _scope: inner.tracker.enter(Some(node)),
        }
    }

    fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for Evaluation<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        tracing::warn!(node = %self.node, "evaluation unwound before completing");
        let (node, kind) = (self.node, self.kind);
        self.inner.with_graph(|graph| match kind {
            NodeKind::Computed => graph.abort_compute(node),
            NodeKind::Observer => graph.abort_observer(node),
            NodeKind::Cell => {}
        });
    }
}

struct FlushGuard<'a> {
    inner: &'a RuntimeInner,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.inner
            .with_graph(|graph| graph.state = SchedulerState::Idle);
    }
}

struct BatchGuard<'a> {
    inner: &'a RuntimeInner,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.inner
            .with_graph(|graph| graph.batch_depth = graph.batch_depth.saturating_sub(1));
    }
}

/// A reactive session.
///
/// Owns every cell, computed node, observer and timer created through it.
/// Dropping the runtime releases all of them.
pub struct Runtime {
    pub(crate) inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a session with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a session whose timers read time from `clock`.
    pub fn with_clock(config: RuntimeConfig, clock: Arc<dyn Clock>) -> Self {
        let events = EventLog::new(config.record_events, config.event_log_capacity);
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                graph: Mutex::new(Graph::new(events)),
                tracker: Tracker::new(),
                timers: Mutex::new(TimerQueue::new()),
                clock,
                failures: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Run every queued observer until the queue is empty.
    ///
    /// Observers queued while flushing run in the same flush. Calling this
    /// from inside a thunk, or while a flush is already running, does
    /// nothing and returns an empty report.
    pub fn flush(&self) -> Result<FlushReport> {
        self.inner.flush()
    }

    /// Run `f` with automatic flushing deferred until the outermost batch
    /// returns.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.with_graph(|graph| graph.batch_depth += 1);
        let result = {
            let _batch = BatchGuard { inner: &self.inner };
            f()
        };
        self.inner.maybe_auto_flush();
        result
    }

    /// Run `f` without recording any dependency for the reads it makes.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _scope = self.inner.tracker.enter(None);
        f()
    }

    /// Invalidate a node as if one of its inputs had changed.
    ///
    /// For a cell this invalidates its dependents. An idle observer is
    /// queued.
    pub fn invalidate(&self, node: NodeId) -> Result<()> {
        self.inner.invalidate(node)
    }

    /// Invalidate `node` after `after`, once or every `after`.
    pub fn schedule_invalidate(&self, node: NodeId, after: Duration, repeating: bool) -> Result<TimerHandle> {
        self.inner.schedule_invalidate(node, after, repeating)
    }

    /// Fire every timer that is due. Returns the number of timers fired.
    pub fn fire_due_timers(&self) -> usize {
        let now = self.inner.clock.now();
        let due = self.inner.timers.lock().take_due(now);
        if due.is_empty() {
            return 0;
        }

        let (fired, orphaned) = self.inner.with_graph(|graph| {
            let mut fired = 0;
            let mut orphaned = Vec::new();
            for &(timer, node) in &due {
                if graph.contains(node) {
                    graph.invalidate(node);
                    fired += 1;
                } else {
                    orphaned.push(timer);
                }
            }
            (fired, orphaned)
        });
        if !orphaned.is_empty() {
            let mut timers = self.inner.timers.lock();
            for timer in orphaned {
                timers.cancel(timer);
            }
        }

        tracing::debug!(fired, "timers fired");
        self.inner.maybe_auto_flush();
        fired
    }

    /// When the earliest timer is due, if any.
    pub fn next_timer_deadline(&self) -> Option<Instant> {
        self.inner.timers.lock().next_deadline()
    }

    pub fn timer_count(&self) -> usize {
        self.inner.timers.lock().len()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.inner.with_graph(|graph| graph.state)
    }

    /// Number of observers waiting for the next flush.
    pub fn pending_count(&self) -> usize {
        self.inner.with_graph(|graph| graph.queue.len())
    }

    /// Queued observers in the order the next flush would run them.
    pub fn pending_observers(&self) -> Vec<NodeId> {
        self.inner.with_graph(|graph| graph.queue.ids())
    }

    pub fn is_pending(&self, node: NodeId) -> bool {
        self.inner.with_graph(|graph| graph.queue.contains(node))
    }

    pub fn node_count(&self) -> usize {
        self.inner.with_graph(|graph| graph.len())
    }

    pub fn node_kind(&self, node: NodeId) -> Option<NodeKind> {
        self.inner.with_graph(|graph| graph.kind(node))
    }

    pub fn node_status(&self, node: NodeId) -> Option<NodeStatus> {
        self.inner.status(node)
    }

    /// Consumers that read `node` during their last evaluation.
    pub fn dependents_of(&self, node: NodeId) -> Vec<NodeId> {
        self.inner.with_graph(|graph| graph.dependents_of(node))
    }

    /// Producers `node` read during its last evaluation.
    pub fn dependencies_of(&self, node: NodeId) -> Vec<NodeId> {
        self.inner.with_graph(|graph| graph.dependencies_of(node))
    }

    /// Name a node for diagnostics. Returns false for unknown nodes.
    pub fn set_label(&self, node: NodeId, label: impl Into<String>) -> bool {
        let label = label.into();
        self.inner.with_graph(|graph| graph.set_label(node, label))
    }

    /// The consumer currently evaluating, if any.
    pub fn current_consumer(&self) -> Option<NodeId> {
        self.inner.tracker.current()
    }

    /// Observer errors caught since the last call.
    pub fn take_observer_failures(&self) -> Vec<ObserverFailure> {
        std::mem::take(&mut *self.inner.failures.lock())
    }

    /// A copy of the diagnostic event log.
    pub fn events(&self) -> Vec<GraphEvent> {
        self.inner.with_graph(|graph| graph.events.snapshot())
    }

    /// Drain the diagnostic event log.
    pub fn take_events(&self) -> Vec<GraphEvent> {
        self.inner.with_graph(|graph| graph.events.drain())
    }

    /// The diagnostic event log as JSON.
    pub fn events_json(&self) -> serde_json::Result<String> {
        events_to_json(&self.events())
    }

    /// Remove every node and timer of this session.
    ///
    /// Existing handles stay usable as plain values: cells keep their
    /// value, computed reads fail with `StaleReadAfterDestroy`, observers
    /// report themselves destroyed. Returns the number of nodes removed.
    pub fn dispose(&self) -> usize {
        let removed = self.inner.with_graph(|graph| graph.clear());
        self.inner.timers.lock().clear();
        self.inner.failures.lock().clear();
        tracing::debug!(removed, "session disposed");
        removed
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("nodes", &self.node_count())
            .field("pending", &self.pending_count())
            .field("state", &self.scheduler_state())
            .field("timers", &self.timer_count())
            .finish()
    }
}
