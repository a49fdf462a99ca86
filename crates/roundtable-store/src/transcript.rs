//! Append-only conversation log for agent sessions.
//!
//! Not a runtime queue: in-memory routing happens in the engine. This keeps
//! the complete transcript for logs, replay, and later inspection.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use tracing::instrument;

use roundtable_core::{AgentConfig, AgentState, AgentStatus, Message, SessionId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{get, get_opt, parse_enum, parse_timestamp};

/// Terminal (or current) status of a persisted session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
    Stopped,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// One session as read back from the transcript, agents included.
#[derive(Clone, Debug)]
pub struct SessionRecord {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub prompt: String,
    pub status: SessionStatus,
    pub agents: Vec<AgentState>,
    /// Highest turn number seen in this session's messages.
    pub turn: u32,
    pub max_turns: u32,
}

/// Partial update for one agent row. Unset fields are left alone;
/// `last_seen` is always refreshed.
#[derive(Debug, Default)]
pub struct AgentUpdate {
    pub status: Option<AgentStatus>,
    pub backend_session_id: Option<String>,
    pub message_count: Option<u32>,
}

/// Persistence surface for session transcripts.
///
/// Clones share the same underlying database handle.
#[derive(Clone)]
pub struct TranscriptStore {
    db: Database,
}

impl TranscriptStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, prompt, id), fields(session_id = %id, max_turns))]
    pub fn create_session(
        &self,
        id: &SessionId,
        prompt: &str,
        max_turns: u32,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, prompt, max_turns, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id.as_str(), prompt, max_turns, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self, id), fields(session_id = %id, status = %status))]
    pub fn end_session(&self, id: &SessionId, status: SessionStatus) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET status = ?1, ended_at = ?2 WHERE id = ?3",
                params![status.to_string(), Utc::now().to_rfc3339(), id.as_str()],
            )?;
            Ok(())
        })
    }

    pub fn get_session(&self, id: &SessionId) -> Result<Option<SessionRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let base = {
                let mut stmt = conn.prepare(
                    "SELECT id, prompt, status, max_turns, created_at, ended_at
                     FROM sessions WHERE id = ?1",
                )?;
                let mut rows = stmt.query([id.as_str()])?;
                match rows.next()? {
                    Some(row) => Some(session_from_row(row)?),
                    None => None,
                }
            };

            match base {
                Some(mut record) => {
                    record.agents = agents_for(conn, record.id.as_str())?;
                    record.turn = max_turn(conn, record.id.as_str())?;
                    Ok(Some(record))
                }
                None => Ok(None),
            }
        })
    }

    /// All sessions, most recently created first.
    pub fn list_sessions(&self) -> Result<Vec<SessionRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut records = {
                let mut stmt = conn.prepare(
                    "SELECT id, prompt, status, max_turns, created_at, ended_at
                     FROM sessions ORDER BY rowid DESC",
                )?;
                let mut rows = stmt.query([])?;
                let mut records = Vec::new();
                while let Some(row) = rows.next()? {
                    records.push(session_from_row(row)?);
                }
                records
            };

            for record in &mut records {
                record.agents = agents_for(conn, record.id.as_str())?;
                record.turn = max_turn(conn, record.id.as_str())?;
            }
            Ok(records)
        })
    }

    pub fn add_agent(&self, session_id: &SessionId, agent: &AgentConfig) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO agents (session_id, name, backend, model) VALUES (?1, ?2, ?3, ?4)",
                params![
                    session_id.as_str(),
                    agent.name,
                    agent.backend.to_string(),
                    agent.model,
                ],
            )?;
            Ok(())
        })
    }

    pub fn update_agent(
        &self,
        session_id: &SessionId,
        name: &str,
        update: &AgentUpdate,
    ) -> Result<(), StoreError> {
        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(status) = update.status {
            sets.push("status = ?");
            values.push(Value::Text(status.to_string()));
        }
        if let Some(ref backend_session_id) = update.backend_session_id {
            sets.push("backend_session_id = ?");
            values.push(Value::Text(backend_session_id.clone()));
        }
        if let Some(count) = update.message_count {
            sets.push("message_count = ?");
            values.push(Value::Integer(i64::from(count)));
        }
        sets.push("last_seen = ?");
        values.push(Value::Text(Utc::now().to_rfc3339()));

        values.push(Value::Text(session_id.as_str().to_owned()));
        values.push(Value::Text(name.to_owned()));

        let sql = format!(
            "UPDATE agents SET {} WHERE session_id = ? AND name = ?",
            sets.join(", ")
        );
        self.db.with_conn(move |conn| {
            conn.execute(&sql, params_from_iter(values))?;
            Ok(())
        })
    }

    pub fn agents(&self, session_id: &SessionId) -> Result<Vec<AgentState>, StoreError> {
        self.db.with_conn(|conn| agents_for(conn, session_id.as_str()))
    }

    /// Append one message and bump the sender's message count, atomically.
    /// Returns the new transcript row id.
    pub fn append_message(&self, msg: &Message) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO messages (session_id, from_agent, to_agent, content, turn, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    msg.session_id.as_str(),
                    msg.from,
                    msg.to,
                    msg.content,
                    msg.turn,
                    msg.timestamp.to_rfc3339(),
                ],
            )?;
            let id = tx.last_insert_rowid();

            tx.execute(
                "UPDATE agents SET message_count = message_count + 1
                 WHERE session_id = ?1 AND name = ?2",
                params![msg.session_id.as_str(), msg.from],
            )?;

            tx.commit()?;
            Ok(id)
        })
    }

    pub fn transcript(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, from_agent, to_agent, content, turn, timestamp
                 FROM messages WHERE session_id = ?1 ORDER BY turn, id",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut messages = Vec::new();
            while let Some(row) = rows.next()? {
                messages.push(message_from_row(row)?);
            }
            Ok(messages)
        })
    }

    pub fn message_count(&self, session_id: &SessionId) -> Result<u32, StoreError> {
        self.db.with_conn(|conn| {
            let count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
                [session_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Remove a session and everything recorded under it.
    #[instrument(skip(self, id), fields(session_id = %id))]
    pub fn delete_session(&self, id: &SessionId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM messages WHERE session_id = ?1", [id.as_str()])?;
            tx.execute("DELETE FROM agents WHERE session_id = ?1", [id.as_str()])?;
            tx.execute("DELETE FROM sessions WHERE id = ?1", [id.as_str()])?;
            tx.commit()?;
            Ok(())
        })
    }
}

/// Base record from a sessions row. Agents and turn are filled by the caller.
fn session_from_row(row: &rusqlite::Row<'_>) -> Result<SessionRecord, StoreError> {
    let id: String = get(row, 0, "sessions", "id")?;
    let status: String = get(row, 2, "sessions", "status")?;
    let created_at: String = get(row, 4, "sessions", "created_at")?;
    let ended_at: Option<String> = get_opt(row, 5, "sessions", "ended_at")?;

    Ok(SessionRecord {
        id: SessionId::from_raw(id),
        prompt: get(row, 1, "sessions", "prompt")?,
        status: parse_enum(&status, "sessions", "status")?,
        max_turns: get(row, 3, "sessions", "max_turns")?,
        created_at: parse_timestamp(&created_at, "sessions", "created_at")?,
        ended_at: match ended_at {
            Some(raw) => Some(parse_timestamp(&raw, "sessions", "ended_at")?),
            None => None,
        },
        agents: Vec::new(),
        turn: 0,
    })
}

fn agents_for(conn: &Connection, session_id: &str) -> Result<Vec<AgentState>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT name, backend, model, backend_session_id, status, message_count, last_seen
         FROM agents WHERE session_id = ?1 ORDER BY rowid",
    )?;
    let mut rows = stmt.query([session_id])?;
    let mut agents = Vec::new();
    while let Some(row) = rows.next()? {
        let backend: String = get(row, 1, "agents", "backend")?;
        let status: String = get(row, 4, "agents", "status")?;
        let last_seen: Option<String> = get_opt(row, 6, "agents", "last_seen")?;

        agents.push(AgentState {
            name: get(row, 0, "agents", "name")?,
            backend: parse_enum(&backend, "agents", "backend")?,
            model: get_opt(row, 2, "agents", "model")?,
            backend_session_id: get_opt(row, 3, "agents", "backend_session_id")?,
            status: parse_enum(&status, "agents", "status")?,
            message_count: get(row, 5, "agents", "message_count")?,
            last_seen: match last_seen {
                Some(raw) => Some(parse_timestamp(&raw, "agents", "last_seen")?),
                None => None,
            },
        });
    }
    Ok(agents)
}

fn message_from_row(row: &rusqlite::Row<'_>) -> Result<Message, StoreError> {
    let session_id: String = get(row, 1, "messages", "session_id")?;
    let timestamp: String = get(row, 6, "messages", "timestamp")?;

    Ok(Message {
        id: Some(get(row, 0, "messages", "id")?),
        session_id: SessionId::from_raw(session_id),
        from: get(row, 2, "messages", "from_agent")?,
        to: get(row, 3, "messages", "to_agent")?,
        content: get(row, 4, "messages", "content")?,
        turn: get(row, 5, "messages", "turn")?,
        timestamp: parse_timestamp(&timestamp, "messages", "timestamp")?,
    })
}

fn max_turn(conn: &Connection, session_id: &str) -> Result<u32, StoreError> {
    let max: Option<u32> = conn.query_row(
        "SELECT MAX(turn) FROM messages WHERE session_id = ?1",
        [session_id],
        |row| row.get(0),
    )?;
    Ok(max.unwrap_or(0))
}
