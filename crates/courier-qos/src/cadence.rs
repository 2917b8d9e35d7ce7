//! Cadence calculator.
//!
//! Pure functions turning a [`PacingPolicy`] and the live smoothed
//! active-session count into concrete pacing intervals. All arithmetic is
//! done in whole milliseconds so the granularity rounding is exact.

use std::time::Duration;

use serde::Serialize;

use crate::policy::PacingPolicy;

/// Concrete pacing intervals derived from a policy. Never mutated directly;
/// the dispatch loop recomputes a fresh value every pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cadence {
    /// Messages/minute actually available for output updates.
    pub effective_output_mpm: u32,
    /// Minimum spacing between any two output dispatches adapter-wide. Also
    /// the loop period in `CoalesceOnly` mode.
    pub global_tick: Duration,
    /// Per-session cooldown between two normal dispatches.
    pub session_tick: Duration,
}

impl Cadence {
    /// Computes the cadence for a policy and a smoothed active-session count.
    ///
    /// Degenerate policies (budget below reserve, zero ratio) clamp the
    /// effective rate to 1 mpm, so a finite positive tick always exists.
    pub fn compute(policy: &PacingPolicy, smoothed_active_sessions: f64) -> Self {
        let budget = (f64::from(policy.group_mpm) * policy.output_budget_ratio).floor() as i64;
        let headroom = i64::from(policy.group_mpm) - i64::from(policy.reserve_mpm);
        let effective_output_mpm = budget.min(headroom).max(1) as u32;

        let granularity_ms = policy.rounding_ms.max(1);
        let global_ms = ceil_to_granularity_ms(
            60_000.0 / f64::from(effective_output_mpm),
            granularity_ms,
        );

        let mut session_ms = global_ms as f64 * smoothed_active_sessions.max(0.0);
        session_ms = session_ms.max(policy.min_session_tick_s.max(0.0) * 1000.0);
        if let Some(max_s) = policy.max_session_tick_s {
            session_ms = session_ms.min(max_s.max(0.0) * 1000.0);
        }
        let session_ms = ceil_to_granularity_ms(session_ms, granularity_ms);

        Self {
            effective_output_mpm,
            global_tick: Duration::from_millis(global_ms),
            session_tick: Duration::from_millis(session_ms),
        }
    }
}

/// Rounds a millisecond value up to the next multiple of the granularity.
fn ceil_to_granularity_ms(raw_ms: f64, granularity_ms: u64) -> u64 {
    let steps = (raw_ms / granularity_ms as f64).ceil().max(0.0) as u64;
    steps * granularity_ms
}
