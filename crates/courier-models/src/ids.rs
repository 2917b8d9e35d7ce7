//! Typed identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one AI-agent session.
///
/// The value is opaque to Courier: adapters decide what goes in it (a tmux
/// session name, a chat thread key, a UUID). It only needs to be stable for
/// the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a session ID from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_display() {
        let id = SessionId::new("claude-main");
        assert_eq!(id.to_string(), "claude-main");
        assert_eq!(id.as_str(), "claude-main");
    }

    #[test]
    fn test_session_id_from() {
        let a = SessionId::from("s1");
        let b = SessionId::from("s1".to_string());
        assert_eq!(a, b);
    }

    #[test]
    fn test_session_id_serde_transparent() {
        let id = SessionId::new("gemini-2");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"gemini-2\"");

        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
