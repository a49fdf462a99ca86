use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agents::AgentConfig;

/// Default cap on routing turns per session.
pub const DEFAULT_MAX_TURNS: u32 = 20;
/// Default wall-clock budget for a whole session.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(900);

/// How much of the repository the agent subprocesses may touch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxMode {
    ReadOnly,
    WorkspaceWrite,
    DangerFullAccess,
}

impl std::fmt::Display for SandboxMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "read-only"),
            Self::WorkspaceWrite => write!(f, "workspace-write"),
            Self::DangerFullAccess => write!(f, "danger-full-access"),
        }
    }
}

impl std::str::FromStr for SandboxMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read-only" => Ok(Self::ReadOnly),
            "workspace-write" => Ok(Self::WorkspaceWrite),
            "danger-full-access" => Ok(Self::DangerFullAccess),
            other => Err(format!("unknown sandbox mode: {other}")),
        }
    }
}

/// Everything one `run()` needs.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub agents: Vec<AgentConfig>,
    pub prompt: String,
    pub max_turns: u32,
    pub timeout: Duration,
    pub repo_path: PathBuf,
    pub sandbox: SandboxMode,
}

impl SessionConfig {
    pub fn new(
        agents: Vec<AgentConfig>,
        prompt: impl Into<String>,
        repo_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            agents,
            prompt: prompt.into(),
            max_turns: DEFAULT_MAX_TURNS,
            timeout: DEFAULT_TIMEOUT,
            repo_path: repo_path.into(),
            sandbox: SandboxMode::ReadOnly,
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sandbox(mut self, sandbox: SandboxMode) -> Self {
        self.sandbox = sandbox;
        self
    }
}
