//! Dependency Tracking Context
//!
//! The tracker records which computation is currently running, so that a
//! read can register the running computation as a dependent of whatever it
//! reads.
//!
//! # Implementation
//!
//! Each session owns a stack. Entering an evaluation pushes a frame naming
//! the consumer; the returned guard pops it when dropped, on every exit path
//! including unwinding. Nested evaluations (a computed node reading another
//! computed node) push nested frames.
//!
//! A frame without a consumer suppresses tracking for reads made inside it.

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::graph::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frame {
    consumer: Option<NodeId>,
}

/// Session-owned stack of evaluating consumers.
#[derive(Debug, Default)]
pub(crate) struct Tracker {
    stack: Mutex<SmallVec<[Frame; 8]>>,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enter a new tracking scope for `consumer`.
    ///
    /// While the scope is alive, reads register `consumer` as a dependent.
    pub(crate) fn enter(&self, consumer: Option<NodeId>) -> TrackingScope<'_> {
        self.stack.lock().push(Frame { consumer });
        TrackingScope {
            tracker: self,
            consumer,
        }
    }

    /// The consumer reads should be attributed to, if any.
    pub(crate) fn current(&self) -> Option<NodeId> {
        self.stack.lock().last().and_then(|frame| frame.consumer)
    }

    /// Whether any consumer is evaluating on the current call stack.
    pub(crate) fn in_evaluation(&self) -> bool {
        self.stack.lock().iter().any(|frame| frame.consumer.is_some())
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.stack.lock().len()
    }

    /// The consumers on the stack, outermost first.
    #[cfg(test)]
    pub(crate) fn consumers(&self) -> Vec<NodeId> {
        self.stack
            .lock()
            .iter()
            .filter_map(|frame| frame.consumer)
            .collect()
    }
}

/// Guard that pops its frame when dropped.
pub(crate) struct TrackingScope<'a> {
    tracker: &'a Tracker,
    consumer: Option<NodeId>,
}

impl Drop for TrackingScope<'_> {
    fn drop(&mut self) {
        let popped = self.tracker.stack.lock().pop();

        // Scopes are strictly nested; a mismatch is a bug in the runtime.
        if let Some(frame) = popped {
            debug_assert_eq!(
                frame.consumer, self.consumer,
                "TrackingScope mismatch: expected {:?}, got {:?}",
                self.consumer, frame.consumer
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_tracks_consumer() {
        let tracker = Tracker::new();
        let id = NodeId::new();

        assert!(!tracker.in_evaluation());
        assert!(tracker.current().is_none());

        {
            let _scope = tracker.enter(Some(id));
            assert!(tracker.in_evaluation());
            assert_eq!(tracker.current(), Some(id));
        }

        assert!(!tracker.in_evaluation());
        assert_eq!(tracker.depth(), 0);
    }

    #[test]
    fn nested_scopes() {
        let tracker = Tracker::new();
        let outer = NodeId::new();
        let inner = NodeId::new();

        {
            let _outer = tracker.enter(Some(outer));
            {
                let _inner = tracker.enter(Some(inner));
                assert_eq!(tracker.current(), Some(inner));
                assert_eq!(tracker.consumers(), vec![outer, inner]);
            }
            assert_eq!(tracker.current(), Some(outer));
        }

        assert!(tracker.current().is_none());
    }

    #[test]
    fn untracked_frame_hides_consumer() {
        let tracker = Tracker::new();
        let id = NodeId::new();

        let _scope = tracker.enter(Some(id));
        {
            let _untracked = tracker.enter(None);
            assert!(tracker.current().is_none());
            assert!(tracker.in_evaluation());
        }
        assert_eq!(tracker.current(), Some(id));
    }

    #[test]
    fn scope_pops_on_unwind() {
        let tracker = Tracker::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _scope = tracker.enter(Some(NodeId::new()));
            panic!("thunk failed");
        }));

        assert!(result.is_err());
        assert_eq!(tracker.depth(), 0);
    }
}
