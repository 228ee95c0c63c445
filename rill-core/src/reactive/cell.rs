//! Value Cells
//!
//! A cell is a source of the graph. It holds a value, knows its dependents,
//! and invalidates them when a write changes the value.
//!
//! Reading a cell inside an evaluation records the reader as a dependent;
//! reading it anywhere else just returns the value.
//!
//! # Equality
//!
//! A cell made with [`Runtime::new_value`] treats every write as a change.
//! [`Runtime::new_distinct_value`] compares with `PartialEq` and
//! [`Runtime::new_value_with_eq`] with a custom predicate; a write equal to
//! the previous value still replaces it and bumps the revision, but does not
//! invalidate anything. Sessions configured without `skip_equal_writes`
//! ignore the predicate.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::runtime::{Runtime, RuntimeInner};
use crate::graph::{Node, NodeId};

type Equality<T> = Box<dyn Fn(&T, &T) -> bool + Send + Sync>;

struct CellShared<T> {
    id: NodeId,
    value: RwLock<T>,
    revision: AtomicU64,
    equality: Option<Equality<T>>,
    runtime: Weak<RuntimeInner>,
}

impl<T> Drop for CellShared<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.runtime.upgrade() {
            inner.release_node(self.id);
        }
    }
}

/// A mutable reactive value.
///
/// Handles are cheap to clone and all refer to the same cell. The cell
/// leaves the graph when its last handle is dropped.
pub struct ValueCell<T> {
    shared: Arc<CellShared<T>>,
}

impl<T> Clone for ValueCell<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> ValueCell<T>
where
    T: Send + Sync + 'static,
{
    fn create(runtime: &Runtime, value: T, equality: Option<Equality<T>>) -> Self {
        let id = NodeId::new();
        runtime.inner.with_graph(|graph| graph.insert(Node::cell(id)));
        tracing::trace!(node = %id, "cell created");
        Self {
            shared: Arc::new(CellShared {
                id,
                value: RwLock::new(value),
                revision: AtomicU64::new(0),
                equality,
                runtime: Arc::downgrade(&runtime.inner),
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.shared.id
    }

    /// Get a clone of the current value, recording a dependency when read
    /// during an evaluation.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.track();
        self.shared.value.read().clone()
    }

    /// Get a clone of the current value without recording a dependency.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.shared.value.read().clone()
    }

    /// Borrow the current value, recording a dependency like [`get`](Self::get).
    ///
    /// `f` runs under the cell's read lock and must not write this cell.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&*self.shared.value.read())
    }

    /// Replace the value.
    ///
    /// The revision always advances. Dependents are invalidated unless the
    /// cell's equality predicate says the value did not change.
    pub fn set(&self, value: T) {
        let old = std::mem::replace(&mut *self.shared.value.write(), value);
        let revision = self.shared.revision.fetch_add(1, Ordering::AcqRel) + 1;

        let Some(inner) = self.shared.runtime.upgrade() else {
            return;
        };
        let changed = match &self.shared.equality {
            Some(eq) if inner.config.skip_equal_writes => !eq(&old, &*self.shared.value.read()),
            _ => true,
        };
        drop(old);

        if changed {
            inner.cell_changed(self.shared.id, revision);
        } else {
            tracing::trace!(node = %self.shared.id, revision, "equal write skipped");
        }
    }

    /// Set the value computed from the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&*self.shared.value.read());
        self.set(next);
    }

    /// Number of writes so far, including writes that did not change the value.
    pub fn revision(&self) -> u64 {
        self.shared.revision.load(Ordering::Acquire)
    }

    /// Consumers that read this cell during their last evaluation.
    pub fn dependent_count(&self) -> usize {
        match self.shared.runtime.upgrade() {
            Some(inner) => inner.with_graph(|graph| graph.dependents_of(self.shared.id).len()),
            None => 0,
        }
    }

    fn track(&self) {
        if let Some(inner) = self.shared.runtime.upgrade() {
            inner.record_read(self.shared.id);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ValueCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueCell")
            .field("id", &self.shared.id)
            .field("value", &*self.shared.value.read())
            .field("revision", &self.shared.revision.load(Ordering::Acquire))
            .finish()
    }
}

impl Runtime {
    /// Create a cell where every write counts as a change.
    pub fn new_value<T>(&self, value: T) -> ValueCell<T>
    where
        T: Send + Sync + 'static,
    {
        ValueCell::create(self, value, None)
    }

    /// Create a cell that skips writes equal to the current value.
    pub fn new_distinct_value<T>(&self, value: T) -> ValueCell<T>
    where
        T: PartialEq + Send + Sync + 'static,
    {
        ValueCell::create(self, value, Some(Box::new(|a: &T, b: &T| a == b)))
    }

    /// Create a cell with a custom equality predicate.
    pub fn new_value_with_eq<T, F>(&self, value: T, eq: F) -> ValueCell<T>
    where
        T: Send + Sync + 'static,
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        ValueCell::create(self, value, Some(Box::new(eq)))
    }
}
