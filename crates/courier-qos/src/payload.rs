//! Pending output updates.

use std::fmt;

use futures::future::BoxFuture;
use tokio::time::Instant;

use courier_models::{SessionId, UpdatePriority};

/// Opaque error returned by a delivery action.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The future a delivery action resolves to.
pub type DispatchFuture = BoxFuture<'static, Result<(), BoxError>>;

/// A caller-supplied delivery action: performs the actual platform API call.
/// Invoked at most once, at dispatch time; the scheduler never inspects the
/// captured data.
pub type DispatchAction = Box<dyn FnOnce() -> DispatchFuture + Send + 'static>;

/// One pending output update. Immutable once created; superseded payloads
/// are discarded, never mutated.
pub struct Payload {
    /// The session this update belongs to.
    pub session_id: SessionId,
    /// Priority class.
    pub priority: UpdatePriority,
    /// The delivery action.
    pub action: DispatchAction,
    /// When the payload entered the scheduler.
    pub enqueued_at: Instant,
}

impl Payload {
    /// Creates a payload stamped with the current time.
    pub fn new(session_id: SessionId, priority: UpdatePriority, action: DispatchAction) -> Self {
        Self {
            session_id,
            priority,
            action,
            enqueued_at: Instant::now(),
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("session_id", &self.session_id)
            .field("priority", &self.priority)
            .field("enqueued_at", &self.enqueued_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_payload_action_invoked_once() {
        let payload = Payload::new(
            SessionId::from("s1"),
            UpdatePriority::Normal,
            Box::new(|| -> DispatchFuture { Box::pin(async { Ok(()) }) }),
        );

        assert_eq!(payload.session_id.as_str(), "s1");
        assert_eq!(payload.priority, UpdatePriority::Normal);

        // FnOnce: consuming the action is the only way to run it.
        let result = (payload.action)().await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_payload_debug_omits_action() {
        let payload = Payload::new(
            SessionId::from("s1"),
            UpdatePriority::High,
            Box::new(|| -> DispatchFuture { Box::pin(async { Ok(()) }) }),
        );
        let rendered = format!("{payload:?}");
        assert!(rendered.contains("s1"));
        assert!(rendered.contains("High"));
        assert!(!rendered.contains("action"));
    }
}
