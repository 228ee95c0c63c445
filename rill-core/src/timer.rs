//! Timed Invalidation
//!
//! A node can ask to be invalidated after a delay, once or periodically.
//! Firing a timer has the same effect as an upstream write.
//!
//! The engine does not own a thread or an event loop. The embedding
//! application calls [`Runtime::fire_due_timers`](crate::Runtime::fire_due_timers)
//! from its own loop, using
//! [`Runtime::next_timer_deadline`](crate::Runtime::next_timer_deadline) to
//! decide how long to sleep. Time comes from a [`Clock`], so tests can drive
//! timers with a [`ManualClock`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::graph::NodeId;
use crate::reactive::RuntimeInner;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time via [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.elapsed.lock() += by;
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock()
    }
}

/// Identifier of a registered timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct TimerEntry {
    node: NodeId,
    deadline: Instant,
    period: Option<Duration>,
}

/// All timers of one session.
#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    entries: IndexMap<TimerId, TimerEntry>,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn schedule(&mut self, node: NodeId, now: Instant, after: Duration, repeating: bool) -> TimerId {
        let id = TimerId::next();
        self.entries.insert(
            id,
            TimerEntry {
                node,
                deadline: now + after,
                // A zero period would fire forever within one call.
                period: repeating.then_some(after.max(Duration::from_nanos(1))),
            },
        );
        id
    }

    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        self.entries.shift_remove(&id).is_some()
    }

    pub(crate) fn cancel_node(&mut self, node: NodeId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.node != node);
        before - self.entries.len()
    }

    pub(crate) fn contains(&self, id: TimerId) -> bool {
        self.entries.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|entry| entry.deadline).min()
    }

    /// Collect the nodes whose timers are due at `now`, ordered by deadline.
    ///
    /// One-shot timers are removed. Repeating timers move to their next
    /// deadline after `now`, skipping any periods that were missed, so each
    /// fires at most once per call.
    pub(crate) fn take_due(&mut self, now: Instant) -> Vec<(TimerId, NodeId)> {
        let mut due: Vec<(Instant, TimerId, NodeId)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(&id, entry)| (entry.deadline, id, entry.node))
            .collect();
        due.sort();

        for &(_, id, _) in &due {
            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            let period = entry.period;
            match period {
                Some(period) => entry.deadline = advance_deadline(entry.deadline, period, now),
                None => {
                    self.entries.shift_remove(&id);
                }
            }
        }

        due.into_iter().map(|(_, id, node)| (id, node)).collect()
    }
}

/// The first `deadline + k * period` strictly after `now`.
fn advance_deadline(deadline: Instant, period: Duration, now: Instant) -> Instant {
    let missed = now.saturating_duration_since(deadline).as_nanos() / period.as_nanos().max(1) + 1;
    let skip = u64::try_from(period.as_nanos().saturating_mul(missed)).unwrap_or(u64::MAX);
    deadline
        .checked_add(Duration::from_nanos(skip))
        .unwrap_or(now + period)
}

/// Handle to a scheduled invalidation.
///
/// Dropping the handle does not cancel the timer.
#[derive(Clone)]
pub struct TimerHandle {
    id: TimerId,
    node: NodeId,
    runtime: Weak<RuntimeInner>,
}

impl TimerHandle {
    pub(crate) fn new(id: TimerId, node: NodeId, runtime: Weak<RuntimeInner>) -> Self {
        Self { id, node, runtime }
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    /// The node this timer invalidates.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Cancel the timer. Returns false if it already fired (one-shot),
    /// was cancelled, or its session is gone.
    pub fn cancel(&self) -> bool {
        match self.runtime.upgrade() {
            Some(inner) => inner.timers.lock().cancel(self.id),
            None => false,
        }
    }

    /// Whether the timer will fire again.
    pub fn is_active(&self) -> bool {
        match self.runtime.upgrade() {
            Some(inner) => inner.timers.lock().contains(self.id),
            None => false,
        }
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("id", &self.id)
            .field("node", &self.node)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now() - start, Duration::from_millis(250));
        assert_eq!(clock.elapsed(), Duration::from_millis(250));
    }

    #[test]
    fn one_shot_timer_fires_once() {
        let clock = ManualClock::new();
        let mut timers = TimerQueue::new();
        let node = NodeId::new();
        let id = timers.schedule(node, clock.now(), Duration::from_secs(1), false);

        assert!(timers.take_due(clock.now()).is_empty());
        clock.advance(Duration::from_secs(1));
        assert_eq!(timers.take_due(clock.now()), vec![(id, node)]);
        assert!(!timers.contains(id));
        assert!(timers.take_due(clock.now()).is_empty());
    }

    #[test]
    fn repeating_timer_skips_missed_periods() {
        let clock = ManualClock::new();
        let mut timers = TimerQueue::new();
        let node = NodeId::new();
        let start = clock.now();
        timers.schedule(node, start, Duration::from_secs(1), true);

        clock.advance(Duration::from_millis(3500));
        assert_eq!(timers.take_due(clock.now()).len(), 1);
        assert_eq!(timers.next_deadline(), Some(start + Duration::from_secs(4)));
    }

    #[test]
    fn tiny_period_catches_up_in_one_step() {
        let clock = ManualClock::new();
        let mut timers = TimerQueue::new();
        let node = NodeId::new();
        timers.schedule(node, clock.now(), Duration::ZERO, true);

        clock.advance(Duration::from_secs(10));
        assert_eq!(timers.take_due(clock.now()).len(), 1);
        assert_eq!(
            timers.next_deadline(),
            Some(clock.now() + Duration::from_nanos(1))
        );
    }

    #[test]
    fn advanced_deadline_lands_after_now() {
        let start = Instant::now();
        let period = Duration::from_millis(300);
        assert_eq!(advance_deadline(start, period, start), start + period);
        assert_eq!(
            advance_deadline(start, period, start + Duration::from_millis(900)),
            start + Duration::from_millis(1200)
        );
    }

    #[test]
    fn due_timers_are_ordered_by_deadline() {
        let clock = ManualClock::new();
        let mut timers = TimerQueue::new();
        let late = NodeId::new();
        let early = NodeId::new();
        timers.schedule(late, clock.now(), Duration::from_secs(2), false);
        timers.schedule(early, clock.now(), Duration::from_secs(1), false);

        clock.advance(Duration::from_secs(5));
        let nodes: Vec<NodeId> = timers
            .take_due(clock.now())
            .into_iter()
            .map(|(_, node)| node)
            .collect();
        assert_eq!(nodes, vec![early, late]);
    }

    #[test]
    fn cancel_by_node() {
        let clock = ManualClock::new();
        let mut timers = TimerQueue::new();
        let node = NodeId::new();
        let other = NodeId::new();
        timers.schedule(node, clock.now(), Duration::from_secs(1), true);
        timers.schedule(node, clock.now(), Duration::from_secs(2), false);
        let keep = timers.schedule(other, clock.now(), Duration::from_secs(1), false);

        assert_eq!(timers.cancel_node(node), 2);
        assert_eq!(timers.len(), 1);
        assert!(timers.cancel(keep));
        assert!(timers.next_deadline().is_none());
    }
}
