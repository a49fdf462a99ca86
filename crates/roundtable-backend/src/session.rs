//! Maps agent names to live backend sessions.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use roundtable_core::{
    AgentBackend, AgentConfig, Backend, BackendError, SandboxMode, SpawnOutcome,
};

use crate::claude::{resume_args, spawn_args, ClaudeCli};

/// One live backend session for an agent.
#[derive(Clone, Debug)]
pub struct SessionInfo {
    pub agent_name: String,
    pub backend: Backend,
    pub session_id: String,
    /// Alternating prompts and outputs, in delivery order.
    pub history: Vec<String>,
}

/// Tracks one subprocess-backed session per agent name.
///
/// Only the `claude` backend can spawn; other backends are rejected up front
/// and leave no session behind. A failed spawn also leaves no session, so
/// the orchestrator can retry or write the agent off without stale state.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: DashMap<String, SessionInfo>,
    cli: ClaudeCli,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            cli: ClaudeCli::new(),
        }
    }

    /// Point at a different binary. Tests use stub scripts.
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.cli = self.cli.with_command(command);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.cli = self.cli.with_timeout(timeout);
        self
    }

    pub fn has_session(&self, agent_name: &str) -> bool {
        self.sessions.contains_key(agent_name)
    }

    pub fn get_session(&self, agent_name: &str) -> Option<SessionInfo> {
        self.sessions.get(agent_name).map(|entry| entry.clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[async_trait]
impl AgentBackend for SessionManager {
    async fn spawn(
        &self,
        agent: &AgentConfig,
        system_prompt: &str,
        initial_prompt: &str,
        repo_path: &Path,
        sandbox: SandboxMode,
    ) -> Result<SpawnOutcome, BackendError> {
        match agent.backend {
            Backend::Claude => {}
            other => return Err(BackendError::Unsupported(other)),
        }

        let session_id = Uuid::new_v4().to_string();
        let args = spawn_args(
            &session_id,
            system_prompt,
            initial_prompt,
            repo_path,
            agent.model.as_deref(),
            sandbox,
        );
        debug!(agent = %agent.name, %session_id, "spawning claude session");
        let output = self.cli.exec(args, repo_path).await?;

        self.sessions.insert(
            agent.name.clone(),
            SessionInfo {
                agent_name: agent.name.clone(),
                backend: agent.backend,
                session_id: session_id.clone(),
                history: vec![initial_prompt.to_string(), output.clone()],
            },
        );
        Ok(SpawnOutcome { output, session_id })
    }

    async fn resume(
        &self,
        agent_name: &str,
        message: &str,
        repo_path: &Path,
    ) -> Result<String, BackendError> {
        // Clone the id out so no map guard is held across the subprocess.
        let session_id = self
            .sessions
            .get(agent_name)
            .map(|entry| entry.session_id.clone())
            .ok_or_else(|| BackendError::NoSession(agent_name.to_string()))?;

        debug!(agent = %agent_name, %session_id, "resuming claude session");
        let output = self
            .cli
            .exec(resume_args(&session_id, message), repo_path)
            .await?;

        if let Some(mut entry) = self.sessions.get_mut(agent_name) {
            entry.history.push(message.to_string());
            entry.history.push(output.clone());
        }
        Ok(output)
    }

    fn clear(&self) {
        self.sessions.clear();
    }
}
