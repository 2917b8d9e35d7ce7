//! Read-only observability view.

use serde::Serialize;

use crate::cadence::Cadence;

/// Point-in-time view of a scheduler's counters and cadence.
///
/// Computed on demand by [`OutputScheduler::snapshot`]; never cached.
/// Counters are cumulative for the scheduler's lifetime.
///
/// [`OutputScheduler::snapshot`]: crate::scheduler::OutputScheduler::snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    /// Pending payloads across all sessions (slots plus priority queues).
    pub queue_depth: usize,
    /// Successfully dispatched payloads.
    pub dispatched: u64,
    /// Normal payloads discarded by coalescing.
    pub superseded_payloads: u64,
    /// Delivery actions that returned an error.
    pub dispatch_errors: u64,
    /// Exponentially smoothed active-session count.
    pub smoothed_active_sessions: f64,
    /// Cadence in effect when the snapshot was taken.
    pub cadence: Cadence,
}
