//! Scheduler core and background dispatch loop.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace, warn};

use courier_models::{SessionId, UpdatePriority};

use crate::cadence::Cadence;
use crate::error::{QosError, Result};
use crate::payload::{BoxError, DispatchAction, DispatchFuture, Payload};
use crate::policy::{PacingMode, PacingPolicy};
use crate::session::SessionQueueState;
use crate::snapshot::SchedulerSnapshot;

/// How often the loop emits one observability summary, independent of the
/// dispatch cadence.
const SUMMARY_INTERVAL: Duration = Duration::from_secs(30);

/// What `submit` did with a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The delivery action ran inline; it completed (or failed) before
    /// `submit` returned.
    Dispatched,
    /// Buffered for the background loop.
    Buffered,
    /// Buffered, replacing an older normal payload of the same session.
    Coalesced,
}

/// Mutable scheduler state, guarded by one mutex. The lock is never held
/// across an await; delivery actions always run outside it.
struct SchedulerState {
    sessions: HashMap<SessionId, SessionQueueState>,
    smoothed_active: f64,
    ema_seeded: bool,
    cadence: Cadence,
    /// Last session serviced by the round-robin pass.
    rr_cursor: Option<SessionId>,
}

struct SchedulerInner {
    adapter_key: String,
    policy: PacingPolicy,
    state: Mutex<SchedulerState>,
    dispatched: AtomicU64,
    superseded: AtomicU64,
    dispatch_errors: AtomicU64,
}

impl SchedulerInner {
    fn lock_state(&self) -> Result<MutexGuard<'_, SchedulerState>> {
        self.state
            .lock()
            .map_err(|e| QosError::LockPoisoned(e.to_string()))
    }

    /// Runs one delivery action and records the outcome.
    async fn execute(&self, payload: Payload) {
        let session_id = payload.session_id.clone();
        let priority = payload.priority;
        let waited_ms = payload.enqueued_at.elapsed().as_millis() as u64;

        let result = (payload.action)().await;

        if let Ok(mut state) = self.state.lock() {
            if let Some(session) = state.sessions.get_mut(&session_id) {
                if priority.is_high() {
                    session.finish_high_dispatch();
                }
                if result.is_ok() {
                    session.mark_active(Instant::now());
                }
            }
        }

        match result {
            Ok(()) => {
                self.dispatched.fetch_add(1, Ordering::Relaxed);
                trace!(
                    adapter = %self.adapter_key,
                    session = %session_id,
                    priority = ?priority,
                    waited_ms,
                    "dispatched update"
                );
            }
            Err(error) => {
                self.dispatch_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    adapter = %self.adapter_key,
                    session = %session_id,
                    priority = ?priority,
                    error = %error,
                    "dispatch action failed"
                );
            }
        }
    }

    /// Folds the instantaneous active-session count into the EMA and derives
    /// a fresh cadence from it.
    fn refresh_cadence(&self, state: &mut SchedulerState, now: Instant) {
        let window = self.policy.active_emitter_window();
        let raw = state
            .sessions
            .values()
            .filter(|s| s.has_pending() || s.active_within(now, window))
            .count() as f64;

        let alpha = self.policy.active_emitter_ema_alpha.clamp(0.0, 1.0);
        if state.ema_seeded {
            state.smoothed_active = alpha * raw + (1.0 - alpha) * state.smoothed_active;
        } else {
            state.smoothed_active = raw;
            state.ema_seeded = true;
        }

        state.cadence = Cadence::compute(&self.policy, state.smoothed_active);
        trace!(
            adapter = %self.adapter_key,
            raw,
            smoothed = state.smoothed_active,
            session_tick_ms = state.cadence.session_tick.as_millis() as u64,
            "cadence refreshed"
        );
    }

    /// Takes every payload due for dispatch this tick, at most one per
    /// session.
    fn collect_due(&self, state: &mut SchedulerState, now: Instant) -> Vec<Payload> {
        let mut due = Vec::new();

        match self.policy.mode {
            PacingMode::Off => {}
            PacingMode::CoalesceOnly => {
                let mut keys: Vec<SessionId> = state
                    .sessions
                    .iter()
                    .filter(|(_, s)| s.has_pending())
                    .map(|(k, _)| k.clone())
                    .collect();
                keys.sort();

                for key in keys {
                    if let Some(session) = state.sessions.get_mut(&key) {
                        let popped = if session.priority_pending() {
                            if session.high_in_flight() {
                                // The pending final blocks the slot too;
                                // priority before normal holds per session.
                                None
                            } else {
                                session.begin_high_dispatch();
                                session.pop_next()
                            }
                        } else {
                            session.pop_next()
                        };
                        if let Some(payload) = popped {
                            due.push(payload);
                        }
                    }
                }
            }
            PacingMode::Strict => {
                let session_tick = state.cadence.session_tick;
                let mut keys: Vec<SessionId> = state.sessions.keys().cloned().collect();
                keys.sort();

                // Stable round-robin: resume after the last serviced session.
                let start = match &state.rr_cursor {
                    Some(cursor) => keys.iter().position(|k| k > cursor).unwrap_or(0),
                    None => 0,
                };
                keys.rotate_left(start);

                let mut last_serviced = None;
                for key in keys {
                    let Some(session) = state.sessions.get_mut(&key) else {
                        continue;
                    };
                    let popped = if session.priority_pending() {
                        if session.high_in_flight() {
                            // At most one priority dispatch per session at a
                            // time; the FIFO drains once it completes.
                            None
                        } else {
                            // Finals drain regardless of cooldown.
                            session.begin_high_dispatch();
                            session.pop_next()
                        }
                    } else if session.has_normal() && session.is_eligible(now, session_tick) {
                        session.mark_dispatched(now);
                        session.pop_next()
                    } else {
                        None
                    };
                    if let Some(payload) = popped {
                        last_serviced = Some(key);
                        due.push(payload);
                    }
                }
                if last_serviced.is_some() {
                    state.rr_cursor = last_serviced;
                }
            }
        }

        due
    }

    fn log_summary(&self, state: &SchedulerState) {
        let queue_depth: usize = state
            .sessions
            .values()
            .map(SessionQueueState::queue_depth)
            .sum();
        info!(
            adapter = %self.adapter_key,
            mode = ?self.policy.mode,
            global_tick_s = state.cadence.global_tick.as_secs_f64(),
            session_tick_s = state.cadence.session_tick.as_secs_f64(),
            active_sessions = state.smoothed_active,
            queue_depth,
            dispatched = self.dispatched.load(Ordering::Relaxed),
            superseded = self.superseded.load(Ordering::Relaxed),
            errors = self.dispatch_errors.load(Ordering::Relaxed),
            "output pacing summary"
        );
    }
}

/// Where `submit` routed a payload, decided under the state lock.
enum Routed {
    Inline(Payload),
    Buffered,
    Coalesced,
}

/// Per-adapter output QoS scheduler.
///
/// One instance shapes all session output updates for one platform adapter:
/// it coalesces superseded intermediate updates, lets completion messages
/// bypass pacing, and spaces normal updates so no session monopolizes the
/// adapter's message budget. See [`PacingPolicy`] for the tunables.
pub struct OutputScheduler {
    inner: Arc<SchedulerInner>,
    /// Handle to the dispatch loop task.
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,
    /// Shutdown signal receiver (for cloning to the loop).
    shutdown_rx: watch::Receiver<bool>,
}

impl OutputScheduler {
    /// Creates a scheduler for one adapter.
    ///
    /// The initial cadence is computed with a smoothed active-session count
    /// of 1.0; the loop replaces it with measured values from its first pass.
    pub fn new(adapter_key: impl Into<String>, policy: PacingPolicy) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cadence = Cadence::compute(&policy, 1.0);

        Self {
            inner: Arc::new(SchedulerInner {
                adapter_key: adapter_key.into(),
                policy,
                state: Mutex::new(SchedulerState {
                    sessions: HashMap::new(),
                    smoothed_active: 1.0,
                    ema_seeded: false,
                    cadence,
                    rr_cursor: None,
                }),
                dispatched: AtomicU64::new(0),
                superseded: AtomicU64::new(0),
                dispatch_errors: AtomicU64::new(0),
            }),
            loop_handle: Mutex::new(None),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// The policy this scheduler was built from.
    pub fn policy(&self) -> &PacingPolicy {
        &self.inner.policy
    }

    /// The adapter key used in log output.
    pub fn adapter_key(&self) -> &str {
        &self.inner.adapter_key
    }

    /// Spawns the background dispatch loop.
    ///
    /// No-op in `Off` mode, and a no-op if the loop is already running.
    pub fn start(&self) -> Result<()> {
        if self.inner.policy.mode == PacingMode::Off {
            debug!(
                adapter = %self.inner.adapter_key,
                "pacing disabled; dispatch loop not started"
            );
            return Ok(());
        }

        let mut guard = self
            .loop_handle
            .lock()
            .map_err(|e| QosError::LockPoisoned(e.to_string()))?;
        if guard.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        let _ = self.shutdown_tx.send(false);
        let inner = Arc::clone(&self.inner);
        let shutdown_rx = self.shutdown_rx.clone();
        *guard = Some(tokio::spawn(dispatch_loop(inner, shutdown_rx)));

        Ok(())
    }

    /// Stops the dispatch loop and awaits its exit.
    ///
    /// Safe to call before `start` and safe to call twice. Buffered payloads
    /// are dropped; dispatches the loop already started are awaited, so once
    /// this returns no loop-initiated dispatch is still in flight.
    pub async fn stop(&self) -> Result<()> {
        let handle = {
            let mut guard = self
                .loop_handle
                .lock()
                .map_err(|e| QosError::LockPoisoned(e.to_string()))?;
            guard.take()
        };

        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = handle {
            debug!(adapter = %self.inner.adapter_key, "waiting for dispatch loop to stop");
            if let Err(e) = handle.await {
                // Cancellation here signals clean shutdown, not an error.
                if !e.is_cancelled() {
                    return Err(QosError::Shutdown(format!("dispatch loop panicked: {e}")));
                }
            }
        }

        Ok(())
    }

    /// Submits one output update for a session.
    ///
    /// Depending on mode, priority, and the session's cooldown, the delivery
    /// action either runs inline (awaited on the caller's context, so the
    /// caller observes back-pressure) or is buffered for the loop. Inline
    /// delivery failures are counted and logged, never returned.
    pub async fn submit<F, Fut>(
        &self,
        session_id: impl Into<SessionId>,
        priority: UpdatePriority,
        action: F,
    ) -> Result<SubmitOutcome>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        let boxed: DispatchAction = Box::new(move || -> DispatchFuture { Box::pin(action()) });
        self.submit_action(session_id.into(), priority, boxed).await
    }

    /// Boxed-action form of [`submit`](Self::submit).
    pub async fn submit_action(
        &self,
        session_id: SessionId,
        priority: UpdatePriority,
        action: DispatchAction,
    ) -> Result<SubmitOutcome> {
        if self.inner.policy.mode == PacingMode::Off {
            // Passthrough: no buffering, no accounting.
            if let Err(error) = action().await {
                debug!(
                    adapter = %self.inner.adapter_key,
                    session = %session_id,
                    error = %error,
                    "passthrough dispatch failed"
                );
            }
            return Ok(SubmitOutcome::Dispatched);
        }

        let now = Instant::now();
        let payload = Payload::new(session_id.clone(), priority, action);

        let routed = {
            let mut state = self.inner.lock_state()?;
            let session_tick = state.cadence.session_tick;
            let session = state
                .sessions
                .entry(session_id)
                .or_insert_with(SessionQueueState::new);

            match (priority, self.inner.policy.mode) {
                (UpdatePriority::High, _) => {
                    if session.priority_pending() || session.high_in_flight() {
                        // An older final for this session has not cleared
                        // yet; keep FIFO order behind it.
                        session.push_priority(payload);
                        Routed::Buffered
                    } else {
                        session.begin_high_dispatch();
                        Routed::Inline(payload)
                    }
                }
                (UpdatePriority::Normal, PacingMode::CoalesceOnly) => {
                    if session.store_normal(payload) {
                        self.inner.superseded.fetch_add(1, Ordering::Relaxed);
                        Routed::Coalesced
                    } else {
                        Routed::Buffered
                    }
                }
                (UpdatePriority::Normal, PacingMode::Strict) => {
                    if session.priority_pending() || !session.is_eligible(now, session_tick) {
                        if session.store_normal(payload) {
                            self.inner.superseded.fetch_add(1, Ordering::Relaxed);
                            Routed::Coalesced
                        } else {
                            Routed::Buffered
                        }
                    } else {
                        session.mark_dispatched(now);
                        Routed::Inline(payload)
                    }
                }
                (_, PacingMode::Off) => unreachable!("handled above"),
            }
        };

        match routed {
            Routed::Inline(payload) => {
                self.inner.execute(payload).await;
                Ok(SubmitOutcome::Dispatched)
            }
            Routed::Buffered => Ok(SubmitOutcome::Buffered),
            Routed::Coalesced => Ok(SubmitOutcome::Coalesced),
        }
    }

    /// Computes a point-in-time observability snapshot.
    ///
    /// Never blocks on the dispatch loop; only the brief state lock is taken.
    pub fn snapshot(&self) -> Result<SchedulerSnapshot> {
        let state = self.inner.lock_state()?;
        let queue_depth = state
            .sessions
            .values()
            .map(SessionQueueState::queue_depth)
            .sum();

        Ok(SchedulerSnapshot {
            queue_depth,
            dispatched: self.inner.dispatched.load(Ordering::Relaxed),
            superseded_payloads: self.inner.superseded.load(Ordering::Relaxed),
            dispatch_errors: self.inner.dispatch_errors.load(Ordering::Relaxed),
            smoothed_active_sessions: state.smoothed_active,
            cadence: state.cadence.clone(),
        })
    }
}

impl Drop for OutputScheduler {
    fn drop(&mut self) {
        // Signal the loop in case the caller never stopped us.
        let _ = self.shutdown_tx.send(true);
    }
}

/// Background dispatch loop. Runs until the shutdown signal flips.
async fn dispatch_loop(inner: Arc<SchedulerInner>, mut shutdown: watch::Receiver<bool>) {
    debug!(
        adapter = %inner.adapter_key,
        mode = ?inner.policy.mode,
        "starting dispatch loop"
    );
    let mut last_summary = Instant::now();
    let mut dispatches: JoinSet<()> = JoinSet::new();

    loop {
        // Refresh the EMA and cadence, then pick the mode's wake interval.
        let sleep_for = match inner.lock_state() {
            Ok(mut state) => {
                inner.refresh_cadence(&mut state, Instant::now());
                match inner.policy.mode {
                    PacingMode::CoalesceOnly => state.cadence.global_tick,
                    _ => inner.policy.strict_poll_interval(),
                }
            }
            Err(e) => {
                warn!(adapter = %inner.adapter_key, error = %e, "scheduler state poisoned; dispatch loop exiting");
                return;
            }
        };

        tokio::select! {
            _ = sleep(sleep_for) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!(adapter = %inner.adapter_key, "dispatch loop received shutdown signal");
                    break;
                }
            }
        }

        let now = Instant::now();
        let due = match inner.lock_state() {
            Ok(mut state) => {
                let due = inner.collect_due(&mut state, now);
                let retention = state
                    .cadence
                    .session_tick
                    .max(inner.policy.active_emitter_window());
                state.sessions.retain(|_, s| !s.is_collectable(now, retention));
                due
            }
            Err(e) => {
                warn!(adapter = %inner.adapter_key, error = %e, "scheduler state poisoned; dispatch loop exiting");
                return;
            }
        };

        // Each dispatch is its own task: a hung delivery action stalls only
        // its own payload, never the loop or other sessions. The set is
        // drained on shutdown so `stop` returns only once they settle.
        for payload in due {
            let inner = Arc::clone(&inner);
            dispatches.spawn(async move { inner.execute(payload).await });
        }
        while dispatches.try_join_next().is_some() {}

        if last_summary.elapsed() >= SUMMARY_INTERVAL {
            if let Ok(state) = inner.lock_state() {
                inner.log_summary(&state);
            }
            last_summary = Instant::now();
        }
    }

    // Let in-flight dispatches finish before the loop reports itself stopped.
    while dispatches.join_next().await.is_some() {}

    debug!(adapter = %inner.adapter_key, "dispatch loop stopped");
}
