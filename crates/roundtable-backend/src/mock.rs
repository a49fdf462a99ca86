//! Scripted backend for orchestrator tests. No subprocesses involved.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use roundtable_core::{AgentBackend, AgentConfig, BackendError, SandboxMode, SpawnOutcome};

/// Arguments captured from a `spawn` call.
#[derive(Clone, Debug)]
pub struct SpawnCall {
    pub agent: String,
    pub system_prompt: String,
    pub prompt: String,
}

/// Arguments captured from a `resume` call.
#[derive(Clone, Debug)]
pub struct ResumeCall {
    pub agent: String,
    pub message: String,
}

#[derive(Default)]
struct MockState {
    spawn_scripts: HashMap<String, VecDeque<Result<String, BackendError>>>,
    resume_scripts: HashMap<String, VecDeque<Result<String, BackendError>>>,
    spawn_calls: Vec<SpawnCall>,
    resume_calls: Vec<ResumeCall>,
    clears: usize,
}

/// Backend that replays pre-programmed outcomes per agent, in order.
///
/// Unscripted calls succeed with a canned reply, so tests only script the
/// outcomes they care about. `clear` leaves scripts in place and just counts
/// invocations.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
    latency: Option<Duration>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every spawn/resume, for tests that need the
    /// session to still be running when they act.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue the next spawn outcome for an agent.
    pub fn script_spawn(&self, agent: &str, outcome: Result<String, BackendError>) {
        self.state
            .lock()
            .spawn_scripts
            .entry(agent.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Queue the next resume outcome for an agent.
    pub fn script_resume(&self, agent: &str, outcome: Result<String, BackendError>) {
        self.state
            .lock()
            .resume_scripts
            .entry(agent.to_string())
            .or_default()
            .push_back(outcome);
    }

    pub fn spawn_calls(&self) -> Vec<SpawnCall> {
        self.state.lock().spawn_calls.clone()
    }

    pub fn resume_calls(&self) -> Vec<ResumeCall> {
        self.state.lock().resume_calls.clone()
    }

    pub fn clear_count(&self) -> usize {
        self.state.lock().clears
    }
}

#[async_trait]
impl AgentBackend for MockBackend {
    async fn spawn(
        &self,
        agent: &AgentConfig,
        system_prompt: &str,
        initial_prompt: &str,
        _repo_path: &Path,
        _sandbox: SandboxMode,
    ) -> Result<SpawnOutcome, BackendError> {
        let (session_id, scripted) = {
            let mut state = self.state.lock();
            state.spawn_calls.push(SpawnCall {
                agent: agent.name.clone(),
                system_prompt: system_prompt.to_string(),
                prompt: initial_prompt.to_string(),
            });
            let session_id = format!("mock-{}-{}", agent.name, state.spawn_calls.len());
            let scripted = state
                .spawn_scripts
                .get_mut(&agent.name)
                .and_then(|queue| queue.pop_front());
            (session_id, scripted)
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match scripted {
            Some(Ok(output)) => Ok(SpawnOutcome { output, session_id }),
            Some(Err(err)) => Err(err),
            None => Ok(SpawnOutcome {
                output: "Acknowledged.".to_string(),
                session_id,
            }),
        }
    }

    async fn resume(
        &self,
        agent_name: &str,
        message: &str,
        _repo_path: &Path,
    ) -> Result<String, BackendError> {
        let scripted = {
            let mut state = self.state.lock();
            state.resume_calls.push(ResumeCall {
                agent: agent_name.to_string(),
                message: message.to_string(),
            });
            state
                .resume_scripts
                .get_mut(agent_name)
                .and_then(|queue| queue.pop_front())
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        scripted.unwrap_or_else(|| Ok("Acknowledged.".to_string()))
    }

    fn clear(&self) {
        self.state.lock().clears += 1;
    }
}
