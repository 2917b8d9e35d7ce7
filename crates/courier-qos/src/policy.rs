//! Pacing policy configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the scheduler shapes outbound updates for one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingMode {
    /// No shaping: every update is dispatched inline, nothing is tracked.
    Off,
    /// Updates are always buffered and coalesced; the loop flushes every
    /// session once per global tick.
    CoalesceOnly,
    /// Full shaping: inline dispatch while a session is eligible, coalesced
    /// buffering during its cooldown, priority bypass for finals.
    Strict,
}

/// Per-adapter pacing policy. Read-only after construction.
///
/// Durations are expressed as the raw numbers adapter config files carry
/// (`*_s` seconds, `*_ms` milliseconds); accessors convert to [`Duration`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingPolicy {
    /// Shaping mode.
    pub mode: PacingMode,
    /// Platform-wide message/minute budget for the whole adapter.
    pub group_mpm: u32,
    /// Fraction of `group_mpm` reserved for session output updates.
    pub output_budget_ratio: f64,
    /// Messages/minute carved out for non-update traffic.
    pub reserve_mpm: u32,
    /// Lower bound on the per-session cooldown, in seconds.
    pub min_session_tick_s: f64,
    /// Optional upper bound on the per-session cooldown, in seconds.
    pub max_session_tick_s: Option<f64>,
    /// How long after its last dispatch a session still counts as active,
    /// in seconds.
    pub active_emitter_window_s: f64,
    /// Smoothing factor for the active-session EMA, in (0, 1].
    pub active_emitter_ema_alpha: f64,
    /// Granularity all computed ticks are rounded up to, in milliseconds.
    pub rounding_ms: u64,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            mode: PacingMode::Strict,
            group_mpm: 20,
            output_budget_ratio: 0.5,
            reserve_mpm: 2,
            min_session_tick_s: 2.0,
            max_session_tick_s: None,
            active_emitter_window_s: 60.0,
            active_emitter_ema_alpha: 0.3,
            rounding_ms: 250,
        }
    }
}

impl PacingPolicy {
    /// Creates a policy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the shaping mode.
    pub fn with_mode(mut self, mode: PacingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the platform-wide message/minute budget.
    pub fn with_group_mpm(mut self, mpm: u32) -> Self {
        self.group_mpm = mpm;
        self
    }

    /// Sets the output budget ratio.
    pub fn with_output_budget_ratio(mut self, ratio: f64) -> Self {
        self.output_budget_ratio = ratio;
        self
    }

    /// Sets the reserved messages/minute for non-update traffic.
    pub fn with_reserve_mpm(mut self, mpm: u32) -> Self {
        self.reserve_mpm = mpm;
        self
    }

    /// Sets the minimum per-session cooldown in seconds.
    pub fn with_min_session_tick_s(mut self, secs: f64) -> Self {
        self.min_session_tick_s = secs;
        self
    }

    /// Sets the maximum per-session cooldown in seconds.
    pub fn with_max_session_tick_s(mut self, secs: f64) -> Self {
        self.max_session_tick_s = Some(secs);
        self
    }

    /// Sets the active-emitter window in seconds.
    pub fn with_active_emitter_window_s(mut self, secs: f64) -> Self {
        self.active_emitter_window_s = secs;
        self
    }

    /// Sets the EMA smoothing factor.
    pub fn with_active_emitter_ema_alpha(mut self, alpha: f64) -> Self {
        self.active_emitter_ema_alpha = alpha;
        self
    }

    /// Sets the tick rounding granularity in milliseconds.
    pub fn with_rounding_ms(mut self, ms: u64) -> Self {
        self.rounding_ms = ms;
        self
    }

    /// Active-emitter window as a duration.
    pub fn active_emitter_window(&self) -> Duration {
        Duration::from_secs_f64(self.active_emitter_window_s.max(0.0))
    }

    /// Loop wake interval in `Strict` mode.
    ///
    /// Bounded by the rounding granularity so priority drains and newly
    /// eligible sessions are detected well within one session tick.
    pub fn strict_poll_interval(&self) -> Duration {
        Duration::from_millis(self.rounding_ms.clamp(10, 1000))
    }
}
