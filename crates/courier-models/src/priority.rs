//! Update priority classes.

use serde::{Deserialize, Serialize};

/// Priority class of an outbound session update.
///
/// `High` is reserved for completion/final messages: they bypass pacing
/// entirely and are never coalesced away. Everything else (incremental
/// progress, tool output echoes) is `Normal` and subject to coalescing and
/// the per-session cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePriority {
    /// Incremental update; may be coalesced or delayed.
    Normal,
    /// Completion/final update; dispatched ahead of any normal update.
    High,
}

impl UpdatePriority {
    /// Returns true for `High`.
    pub fn is_high(self) -> bool {
        matches!(self, UpdatePriority::High)
    }
}
