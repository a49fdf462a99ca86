use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::{AgentState, AgentStatus};
use crate::ids::SessionId;

/// Guardrail that throttled or ended a session. Expected outcomes, not errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    Timeout,
    Converged,
    PingPong,
    MaxTurns,
}

impl std::fmt::Display for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Converged => write!(f, "converged"),
            Self::PingPong => write!(f, "ping_pong"),
            Self::MaxTurns => write!(f, "max_turns"),
        }
    }
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Converged,
    MaxTurns,
    Timeout,
    Stopped,
    Error,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Converged => write!(f, "converged"),
            Self::MaxTurns => write!(f, "max_turns"),
            Self::Timeout => write!(f, "timeout"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Everything observers see about a session, in emission order.
///
/// The stream for one run starts with `session_start` and ends with exactly
/// one `session_end`; everything in between is append-only and strictly
/// ordered.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgenticEvent {
    #[serde(rename = "session_start")]
    SessionStart {
        session_id: SessionId,
        prompt: String,
        agents: Vec<AgentState>,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "message")]
    Message {
        session_id: SessionId,
        from: String,
        to: String,
        content: String,
        turn: u32,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "agent_status")]
    AgentStatus {
        session_id: SessionId,
        agent: String,
        status: AgentStatus,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "turn_complete")]
    TurnComplete {
        session_id: SessionId,
        turn: u32,
        pending_count: usize,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "guardrail")]
    Guardrail {
        session_id: SessionId,
        guard: Guard,
        detail: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "error")]
    Error {
        session_id: SessionId,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        error: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "session_end")]
    SessionEnd {
        session_id: SessionId,
        reason: EndReason,
        turn: u32,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl AgenticEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::SessionStart { session_id, .. }
            | Self::Message { session_id, .. }
            | Self::AgentStatus { session_id, .. }
            | Self::TurnComplete { session_id, .. }
            | Self::Guardrail { session_id, .. }
            | Self::Error { session_id, .. }
            | Self::SessionEnd { session_id, .. } => session_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionStart { .. } => "session_start",
            Self::Message { .. } => "message",
            Self::AgentStatus { .. } => "agent_status",
            Self::TurnComplete { .. } => "turn_complete",
            Self::Guardrail { .. } => "guardrail",
            Self::Error { .. } => "error",
            Self::SessionEnd { .. } => "session_end",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_events() -> Vec<AgenticEvent> {
        let sid = SessionId::from_raw("abc1234");
        let now = Utc::now();
        vec![
            AgenticEvent::SessionStart {
                session_id: sid.clone(),
                prompt: "Review the auth module".into(),
                agents: vec![],
                timestamp: now,
            },
            AgenticEvent::Message {
                session_id: sid.clone(),
                from: "reviewer".into(),
                to: "critic".into(),
                content: "check this".into(),
                turn: 0,
                timestamp: now,
            },
            AgenticEvent::AgentStatus {
                session_id: sid.clone(),
                agent: "critic".into(),
                status: AgentStatus::Active,
                timestamp: now,
            },
            AgenticEvent::TurnComplete {
                session_id: sid.clone(),
                turn: 1,
                pending_count: 2,
                timestamp: now,
            },
            AgenticEvent::Guardrail {
                session_id: sid.clone(),
                guard: Guard::PingPong,
                detail: "Breaking conversation cycle involving critic".into(),
                timestamp: now,
            },
            AgenticEvent::Error {
                session_id: sid.clone(),
                agent: Some("critic".into()),
                error: "spawn failed".into(),
                timestamp: now,
            },
            AgenticEvent::SessionEnd {
                session_id: sid,
                reason: EndReason::Converged,
                turn: 3,
                elapsed_ms: 1500,
                timestamp: now,
            },
        ]
    }

    #[test]
    fn session_id_accessor_covers_all_variants() {
        for event in sample_events() {
            assert_eq!(event.session_id().as_str(), "abc1234");
        }
    }

    #[test]
    fn event_type_matches_serde_tag() {
        for event in sample_events() {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.event_type());
        }
    }

    #[test]
    fn serde_roundtrip_preserves_tag() {
        for event in sample_events() {
            let json = serde_json::to_string(&event).unwrap();
            let parsed: AgenticEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(event.event_type(), parsed.event_type());
        }
    }

    #[test]
    fn guard_and_reason_serialize_snake_case() {
        assert_eq!(serde_json::to_string(&Guard::PingPong).unwrap(), "\"ping_pong\"");
        assert_eq!(serde_json::to_string(&Guard::MaxTurns).unwrap(), "\"max_turns\"");
        assert_eq!(
            serde_json::to_string(&EndReason::MaxTurns).unwrap(),
            "\"max_turns\""
        );
        assert_eq!(EndReason::Stopped.to_string(), "stopped");
        assert_eq!(Guard::Converged.to_string(), "converged");
    }

    #[test]
    fn error_event_agent_is_optional() {
        let event = AgenticEvent::Error {
            session_id: SessionId::from_raw("abc1234"),
            agent: None,
            error: "store unavailable".into(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("agent").is_none());
    }
}
