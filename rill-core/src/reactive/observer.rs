//! Observers
//!
//! An observer is a side-effecting sink. It runs once after creation to
//! establish its dependencies and again on every flush after one of them
//! changes.
//!
//! # Differences from Computed
//!
//! - Computed nodes return a value; observers do not.
//! - Computed nodes are lazy (recompute on read); observers are eager (queued
//!   on invalidation, run by the next flush).
//! - Observers live until destroyed. Dropping a handle does not stop one.
//!
//! # Errors
//!
//! An error returned by an observer thunk is logged, recorded as an
//! [`ObserverFailure`](crate::graph::ObserverFailure) and does not stop the
//! flush from running the remaining observers.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::runtime::{Runtime, RuntimeInner};
use crate::error::{ReactiveError, Result};
use crate::graph::{Node, NodeId, NodeStatus, ObserverState};
use crate::timer::TimerHandle;

/// Handle to an observer.
#[derive(Clone)]
pub struct Observer {
    id: NodeId,
    priority: i32,
    runtime: Weak<RuntimeInner>,
}

impl Observer {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Scheduling priority. Higher runs first within a flush.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Stop the observer: it leaves the queue and the graph and never runs
    /// again. Returns false if it was already destroyed.
    pub fn destroy(&self) -> bool {
        match self.runtime.upgrade() {
            Some(inner) => inner.destroy_node(self.id),
            None => false,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.state().is_none()
    }

    /// Current state, or `None` once destroyed.
    pub fn state(&self) -> Option<ObserverState> {
        let inner = self.runtime.upgrade()?;
        match inner.status(self.id)? {
            NodeStatus::Observer(state) => Some(state),
            _ => None,
        }
    }

    /// Number of completed runs, successful or not.
    pub fn run_count(&self) -> u64 {
        self.runtime
            .upgrade()
            .and_then(|inner| inner.with_graph(|graph| graph.observer_runs(self.id)))
            .unwrap_or(0)
    }

    /// Queue the observer as if one of its inputs had changed.
    pub fn invalidate(&self) -> Result<()> {
        self.runtime()?.invalidate(self.id)
    }

    /// Re-run this observer once, after `after`.
    pub fn invalidate_after(&self, after: Duration) -> Result<TimerHandle> {
        self.runtime()?.schedule_invalidate(self.id, after, false)
    }

    /// Re-run this observer every `period`.
    pub fn invalidate_every(&self, period: Duration) -> Result<TimerHandle> {
        self.runtime()?.schedule_invalidate(self.id, period, true)
    }

    fn runtime(&self) -> Result<Arc<RuntimeInner>> {
        self.runtime
            .upgrade()
            .ok_or(ReactiveError::UnknownNode { node: self.id })
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("state", &self.state())
            .finish()
    }
}

impl Runtime {
    /// Create an observer with priority 0.
    ///
    /// It starts pending and runs on the next flush, immediately if the
    /// session flushes automatically.
    pub fn new_observer<F>(&self, thunk: F) -> Observer
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.new_observer_with_priority(thunk, 0)
    }

    pub fn new_observer_with_priority<F>(&self, thunk: F, priority: i32) -> Observer
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        let id = NodeId::new();
        let node = Node::observer(id, priority, Arc::new(thunk));
        self.inner
            .with_graph(|graph| graph.insert_observer(node, priority));
        tracing::trace!(node = %id, priority, "observer created");

        let observer = Observer {
            id,
            priority,
            runtime: Arc::downgrade(&self.inner),
        };
        self.inner.maybe_auto_flush();
        observer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use parking_lot::Mutex;

    #[test]
    fn observer_runs_on_creation_and_change() {
        let rt = Runtime::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cell = rt.new_value(1);

        let (seen_clone, cell_clone) = (seen.clone(), cell.clone());
        let observer = rt.new_observer(move || {
            seen_clone.lock().push(cell_clone.get());
            Ok(())
        });
        assert_eq!(*seen.lock(), vec![1]);
        assert_eq!(observer.state(), Some(ObserverState::Idle));

        cell.set(2);
        cell.set(3);
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
        assert_eq!(observer.run_count(), 3);
    }

    #[test]
    fn manual_observer_waits_for_flush() {
        let rt = Runtime::with_config(RuntimeConfig::manual_flush());
        let observer = rt.new_observer(|| Ok(()));
        assert_eq!(observer.state(), Some(ObserverState::Pending));
        assert_eq!(observer.run_count(), 0);

        rt.flush().unwrap();
        assert_eq!(observer.state(), Some(ObserverState::Idle));
        assert_eq!(observer.run_count(), 1);

        observer.invalidate().unwrap();
        assert_eq!(observer.state(), Some(ObserverState::Pending));
    }

    #[test]
    fn destroyed_observer_never_runs() {
        let rt = Runtime::with_config(RuntimeConfig::manual_flush());
        let cell = rt.new_value(0);
        let cell_clone = cell.clone();
        let observer = rt.new_observer(move || {
            cell_clone.get();
            Ok(())
        });
        rt.flush().unwrap();
        assert_eq!(cell.dependent_count(), 1);

        cell.set(1);
        assert!(observer.destroy());
        assert_eq!(rt.pending_count(), 0);
        assert_eq!(cell.dependent_count(), 0);
        assert!(rt.flush().unwrap().is_empty());
        assert_eq!(observer.run_count(), 0);
        assert!(!observer.destroy());
        assert!(matches!(
            observer.invalidate(),
            Err(ReactiveError::UnknownNode { .. })
        ));
    }

    #[test]
    fn dropping_handle_keeps_observer_alive() {
        let rt = Runtime::new();
        let cell = rt.new_value(0);
        let runs = Arc::new(Mutex::new(0));
        let (runs_clone, cell_clone) = (runs.clone(), cell.clone());
        drop(rt.new_observer(move || {
            cell_clone.get();
            *runs_clone.lock() += 1;
            Ok(())
        }));

        cell.set(1);
        assert_eq!(*runs.lock(), 2);
    }

    #[test]
    fn observer_may_destroy_itself() {
        let rt = Runtime::new();
        let cell = rt.new_value(0);
        let slot: Arc<Mutex<Option<Observer>>> = Arc::default();
        let (slot_clone, cell_clone) = (slot.clone(), cell.clone());
        let observer = rt.new_observer(move || {
            if cell_clone.get() > 0 {
                if let Some(me) = slot_clone.lock().as_ref() {
                    me.destroy();
                }
            }
            Ok(())
        });
        *slot.lock() = Some(observer.clone());

        cell.set(1);
        assert!(observer.is_destroyed());
        cell.set(2);
        assert_eq!(rt.pending_count(), 0);
    }
}
