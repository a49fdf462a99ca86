use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// Recipient name for a broadcast to every other agent.
pub const TO_ALL: &str = "all";
/// Recipient name for final output addressed to the human.
pub const TO_USER: &str = "user";
/// Channel name for unaddressed working notes. Log-only, never routed.
pub const TO_NOTES: &str = "notes";

/// One routed (or logged) utterance in a session transcript.
///
/// `to` is a live agent name or one of the reserved channels above. Messages
/// with `to == "user"` or `to == "notes"` are never enqueued for delivery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Transcript row id, present once persisted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub session_id: SessionId,
    pub from: String,
    pub to: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub turn: u32,
}

impl Message {
    pub fn new(
        session_id: SessionId,
        from: impl Into<String>,
        to: impl Into<String>,
        content: impl Into<String>,
        turn: u32,
    ) -> Self {
        Self {
            id: None,
            session_id,
            from: from.into(),
            to: to.into(),
            content: content.into(),
            timestamp: Utc::now(),
            turn,
        }
    }
}
