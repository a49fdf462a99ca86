use std::path::Path;

use async_trait::async_trait;

use crate::agents::AgentConfig;
use crate::config::SandboxMode;
use crate::errors::BackendError;

/// Result of a first agent turn: the text it produced plus the backend session
/// id that later turns resume from.
#[derive(Clone, Debug)]
pub struct SpawnOutcome {
    pub output: String,
    pub session_id: String,
}

/// Driver for one kind of agent subprocess.
///
/// Implementations own the mapping from agent name to live backend session.
/// `spawn` starts a fresh session for an agent and returns its first output;
/// `resume` continues an existing session with a new message. Both run in the
/// given repository directory.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn spawn(
        &self,
        agent: &AgentConfig,
        system_prompt: &str,
        initial_prompt: &str,
        repo_path: &Path,
        sandbox: SandboxMode,
    ) -> Result<SpawnOutcome, BackendError>;

    async fn resume(
        &self,
        agent_name: &str,
        message: &str,
        repo_path: &Path,
    ) -> Result<String, BackendError>;

    /// Forget all tracked sessions. Subsequent `resume` calls fail until the
    /// agent is spawned again.
    fn clear(&self);
}
