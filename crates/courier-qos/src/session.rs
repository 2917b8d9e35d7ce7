//! Per-session queue bookkeeping.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::payload::Payload;

/// Queue state for one session: a latest-only slot for normal updates, a
/// FIFO for priority updates, and the timestamps that drive pacing.
///
/// Holds no I/O; the scheduler core owns every instance exclusively.
#[derive(Debug, Default)]
pub(crate) struct SessionQueueState {
    /// Latest buffered normal update, if any.
    normal_slot: Option<Payload>,
    /// Buffered priority updates, oldest first.
    priority_queue: VecDeque<Payload>,
    /// When the last normal dispatch started the cooldown.
    last_dispatch_at: Option<Instant>,
    /// When a dispatch for this session last completed successfully. Feeds
    /// the active-emitter signal, not the cooldown.
    last_active_at: Option<Instant>,
    /// A priority dispatch for this session is still running, whether it
    /// went inline or was drained by the loop. Later priority payloads
    /// queue behind it; the FIFO stays parked until it completes.
    high_in_flight: bool,
}

impl SessionQueueState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Installs a normal payload, discarding any payload already in the
    /// slot. Returns true if an older payload was superseded.
    pub(crate) fn store_normal(&mut self, payload: Payload) -> bool {
        let superseded = self.normal_slot.is_some();
        self.normal_slot = Some(payload);
        superseded
    }

    /// Appends a priority payload to the FIFO.
    pub(crate) fn push_priority(&mut self, payload: Payload) {
        self.priority_queue.push_back(payload);
    }

    /// Takes the next payload to dispatch: the FIFO head if any, otherwise
    /// the normal slot. Priority strictly before normal is a hard invariant.
    pub(crate) fn pop_next(&mut self) -> Option<Payload> {
        if let Some(payload) = self.priority_queue.pop_front() {
            return Some(payload);
        }
        self.normal_slot.take()
    }

    /// True once the cooldown since the last normal dispatch has lapsed.
    pub(crate) fn is_eligible(&self, now: Instant, session_tick: Duration) -> bool {
        match self.last_dispatch_at {
            None => true,
            Some(at) => now.duration_since(at) >= session_tick,
        }
    }

    /// Starts the cooldown.
    pub(crate) fn mark_dispatched(&mut self, now: Instant) {
        self.last_dispatch_at = Some(now);
    }

    /// Records a successful dispatch for the active-emitter signal.
    pub(crate) fn mark_active(&mut self, now: Instant) {
        self.last_active_at = Some(now);
    }

    /// True while a priority dispatch has not completed.
    pub(crate) fn high_in_flight(&self) -> bool {
        self.high_in_flight
    }

    pub(crate) fn begin_high_dispatch(&mut self) {
        self.high_in_flight = true;
    }

    pub(crate) fn finish_high_dispatch(&mut self) {
        self.high_in_flight = false;
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.normal_slot.is_some() || !self.priority_queue.is_empty()
    }

    pub(crate) fn priority_pending(&self) -> bool {
        !self.priority_queue.is_empty()
    }

    pub(crate) fn has_normal(&self) -> bool {
        self.normal_slot.is_some()
    }

    /// Pending payloads for this session.
    pub(crate) fn queue_depth(&self) -> usize {
        usize::from(self.normal_slot.is_some()) + self.priority_queue.len()
    }

    /// True if the session was dispatched to within the window.
    pub(crate) fn active_within(&self, now: Instant, window: Duration) -> bool {
        self.last_active_at
            .is_some_and(|at| now.duration_since(at) <= window)
    }

    /// True once the entry can be garbage-collected: nothing pending and
    /// both timestamps outside the retention horizon.
    pub(crate) fn is_collectable(&self, now: Instant, retention: Duration) -> bool {
        if self.has_pending() || self.high_in_flight {
            return false;
        }
        let fresh = |at: Option<Instant>| at.is_some_and(|t| now.duration_since(t) < retention);
        !fresh(self.last_dispatch_at) && !fresh(self.last_active_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::DispatchFuture;
    use courier_models::{SessionId, UpdatePriority};

    fn payload(priority: UpdatePriority) -> Payload {
        Payload::new(
            SessionId::from("s1"),
            priority,
            Box::new(|| -> DispatchFuture { Box::pin(async { Ok(()) }) }),
        )
    }

    #[test]
    fn test_store_normal_supersedes() {
        let mut state = SessionQueueState::new();

        assert!(!state.store_normal(payload(UpdatePriority::Normal)));
        assert!(state.store_normal(payload(UpdatePriority::Normal)));
        assert!(state.store_normal(payload(UpdatePriority::Normal)));
        assert_eq!(state.queue_depth(), 1);
    }

    #[test]
    fn test_pop_next_priority_before_normal() {
        let mut state = SessionQueueState::new();

        state.store_normal(payload(UpdatePriority::Normal));
        state.push_priority(payload(UpdatePriority::High));
        state.push_priority(payload(UpdatePriority::High));

        assert_eq!(state.queue_depth(), 3);
        assert_eq!(state.pop_next().unwrap().priority, UpdatePriority::High);
        assert_eq!(state.pop_next().unwrap().priority, UpdatePriority::High);
        assert_eq!(state.pop_next().unwrap().priority, UpdatePriority::Normal);
        assert!(state.pop_next().is_none());
    }

    #[test]
    fn test_eligibility_cooldown() {
        let mut state = SessionQueueState::new();
        let tick = Duration::from_secs(5);
        let start = Instant::now();

        // Never dispatched: immediately eligible.
        assert!(state.is_eligible(start, tick));

        state.mark_dispatched(start);
        assert!(!state.is_eligible(start, tick));
        assert!(!state.is_eligible(start + Duration::from_secs(4), tick));
        assert!(state.is_eligible(start + Duration::from_secs(5), tick));
    }

    #[test]
    fn test_active_within_window() {
        let mut state = SessionQueueState::new();
        let window = Duration::from_secs(60);
        let start = Instant::now();

        assert!(!state.active_within(start, window));

        state.mark_active(start);
        assert!(state.active_within(start + Duration::from_secs(30), window));
        assert!(!state.active_within(start + Duration::from_secs(61), window));
    }

    #[test]
    fn test_is_collectable() {
        let mut state = SessionQueueState::new();
        let retention = Duration::from_secs(60);
        let start = Instant::now();

        // Fresh empty entry with no history collects immediately.
        assert!(state.is_collectable(start, retention));

        state.mark_dispatched(start);
        state.mark_active(start);
        assert!(!state.is_collectable(start + Duration::from_secs(30), retention));
        assert!(state.is_collectable(start + Duration::from_secs(61), retention));

        // Pending payloads always pin the entry.
        state.store_normal(payload(UpdatePriority::Normal));
        assert!(!state.is_collectable(start + Duration::from_secs(120), retention));
    }

    #[test]
    fn test_high_in_flight_pins_entry() {
        let mut state = SessionQueueState::new();
        let retention = Duration::from_secs(60);
        let start = Instant::now();

        state.begin_high_dispatch();
        assert!(state.high_in_flight());
        assert!(!state.is_collectable(start, retention));

        state.finish_high_dispatch();
        assert!(!state.high_in_flight());
        assert!(state.is_collectable(start, retention));
    }
}
