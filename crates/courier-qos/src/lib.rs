//! Output QoS scheduler for Courier chat adapters.
//!
//! Chat platforms enforce a messages-per-minute budget; AI-agent sessions
//! produce far more incremental updates than that budget allows. This crate
//! decides, for every pending update across all of one adapter's sessions,
//! when and in what order to release it:
//!
//! - superseded intermediate updates are dropped, not queued,
//! - completion/final updates bypass pacing entirely,
//! - no single session monopolizes the shared budget,
//! - the pacing interval adapts live to how many sessions are active.
//!
//! One [`OutputScheduler`] serves one platform adapter in one process.
//!
//! # Example
//!
//! ```ignore
//! use courier_models::UpdatePriority;
//! use courier_qos::{OutputScheduler, PacingMode, PacingPolicy};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let policy = PacingPolicy::new()
//!         .with_mode(PacingMode::Strict)
//!         .with_group_mpm(20)
//!         .with_output_budget_ratio(0.8)
//!         .with_reserve_mpm(4);
//!     let scheduler = OutputScheduler::new("telegram", policy);
//!     scheduler.start()?;
//!
//!     // For every session output update:
//!     scheduler
//!         .submit("session-1", UpdatePriority::Normal, move || async move {
//!             // the actual platform API call
//!             Ok(())
//!         })
//!         .await?;
//!
//!     scheduler.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Key concepts
//!
//! ## Cadence
//!
//! The [`Cadence`] calculator turns the adapter's [`PacingPolicy`] and a
//! smoothed active-session count into a global tick (adapter-wide spacing)
//! and a session tick (per-session cooldown between normal dispatches).
//!
//! ## Coalescing
//!
//! While a session is cooling down, each session keeps at most one buffered
//! normal update; newer submissions replace it and the older payload is
//! counted as superseded.
//!
//! ## Dispatch loop
//!
//! A background task drains priority FIFOs, flushes newly eligible sessions
//! in stable round-robin order, and recomputes the cadence from an
//! exponentially smoothed active-session count every pass.

pub mod cadence;
pub mod error;
pub mod payload;
pub mod policy;
pub mod scheduler;
pub mod snapshot;

mod session;

// Re-export main types
pub use cadence::Cadence;
pub use error::{QosError, Result};
pub use payload::{BoxError, DispatchAction, DispatchFuture, Payload};
pub use policy::{PacingMode, PacingPolicy};
pub use scheduler::{OutputScheduler, SubmitOutcome};
pub use snapshot::SchedulerSnapshot;
