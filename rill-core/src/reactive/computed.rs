//! Computed Nodes
//!
//! A computed node is a cached derived value. It runs its thunk the first
//! time it is read, caches the result, and keeps returning the cache until
//! one of the values it read changes.
//!
//! # Laziness
//!
//! Invalidation only discards the cache. The thunk runs again on the next
//! read, so a computed node that nobody reads costs nothing after its
//! inputs change:
//!
//! - A cell changes
//! - 10 computed nodes depend on it
//! - Only the ones actually read will recompute
//!
//! # Errors
//!
//! A failing thunk is cached like a value. Every read returns the same error
//! until the node is invalidated again. A read that would re-enter a node
//! already computing fails with [`ReactiveError::CyclicDependency`].

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::runtime::{Runtime, RuntimeInner};
use crate::error::{ReactiveError, Result};
use crate::graph::{ComputedState, Node, NodeId, NodeStatus};
use crate::timer::TimerHandle;

type Thunk<T> = Box<dyn Fn() -> Result<T> + Send + Sync>;

struct ComputedShared<T> {
    id: NodeId,
    compute: Thunk<T>,
    runtime: Weak<RuntimeInner>,
}

impl<T> Drop for ComputedShared<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.runtime.upgrade() {
            inner.release_node(self.id);
        }
    }
}

/// A cached derived value.
///
/// Handles are cheap to clone. The node leaves the graph when its last
/// handle is dropped or when [`destroy`](Self::destroy) is called.
pub struct Computed<T> {
    shared: Arc<ComputedShared<T>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn create(runtime: &Runtime, compute: Thunk<T>) -> Self {
        let id = NodeId::new();
        runtime.inner.with_graph(|graph| graph.insert(Node::computed(id)));
        tracing::trace!(node = %id, "computed created");
        Self {
            shared: Arc::new(ComputedShared {
                id,
                compute,
                runtime: Arc::downgrade(&runtime.inner),
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.shared.id
    }

    /// Get the current value, recomputing it if it is invalid.
    ///
    /// Inside an evaluation this records the reader as a dependent, like
    /// reading a cell.
    pub fn read(&self) -> Result<T> {
        let inner = self.runtime()?;
        inner.read_computed(self.shared.id, &*self.shared.compute)
    }

    /// Like [`read`](Self::read) but without recording a dependency.
    ///
    /// The node still recomputes if it is invalid; the reads its thunk makes
    /// are tracked for the node itself as usual.
    pub fn read_untracked(&self) -> Result<T> {
        let inner = self.runtime()?;
        let _scope = inner.tracker.enter(None);
        inner.read_computed(self.shared.id, &*self.shared.compute)
    }

    /// Discard the cache so the next read recomputes.
    pub fn invalidate(&self) -> Result<()> {
        self.runtime()?.invalidate(self.shared.id)
    }

    /// Remove the node from the graph. Later reads fail with
    /// [`ReactiveError::StaleReadAfterDestroy`]; its consumers are
    /// invalidated. Returns false if it was already gone.
    pub fn destroy(&self) -> bool {
        match self.shared.runtime.upgrade() {
            Some(inner) => inner.destroy_node(self.shared.id),
            None => false,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.state().is_none()
    }

    /// Current state, or `None` once destroyed.
    pub fn state(&self) -> Option<ComputedState> {
        let inner = self.shared.runtime.upgrade()?;
        match inner.status(self.shared.id)? {
            NodeStatus::Computed(state) => Some(state),
            _ => None,
        }
    }

    /// Whether a cached result (value or error) is present.
    pub fn has_value(&self) -> bool {
        match self.shared.runtime.upgrade() {
            Some(inner) => inner.with_graph(|graph| graph.has_cached_value(self.shared.id)),
            None => false,
        }
    }

    /// Invalidate this node once, after `after`.
    pub fn invalidate_after(&self, after: Duration) -> Result<TimerHandle> {
        self.runtime()?.schedule_invalidate(self.shared.id, after, false)
    }

    /// Invalidate this node every `period`.
    pub fn invalidate_every(&self, period: Duration) -> Result<TimerHandle> {
        self.runtime()?.schedule_invalidate(self.shared.id, period, true)
    }

    fn runtime(&self) -> Result<Arc<RuntimeInner>> {
        self.shared
            .runtime
            .upgrade()
            .ok_or(ReactiveError::StaleReadAfterDestroy {
                node: self.shared.id,
            })
    }
}

impl<T> fmt::Debug for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Runtime {
    /// Create a computed node from an infallible thunk.
    pub fn new_computed<T, F>(&self, compute: F) -> Computed<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Computed::create(self, Box::new(move || Ok(compute())))
    }

    /// Create a computed node whose thunk can fail.
    pub fn new_try_computed<T, F>(&self, compute: F) -> Computed<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Computed::create(self, Box::new(compute))
    }
}
