//! Session orchestrator.
//!
//! Owns the main loop: spawn agents, route messages, enforce guardrails,
//! emit events. One in-flight session per instance, single consumer.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use roundtable_core::messages::{TO_ALL, TO_NOTES, TO_USER};
use roundtable_core::parser::{build_system_prompt, parse_response};
use roundtable_core::{
    AgentBackend, AgentConfig, AgentState, AgentStatus, AgenticEvent, EndReason, EventChannel,
    EventStream, Guard, Message, SessionConfig, SessionId,
};
use roundtable_store::{AgentUpdate, SessionStatus, StoreError, TranscriptStore};

use crate::error::OrchestratorError;
use crate::guardrails::{ExchangeTracker, NO_PROGRESS_LIMIT};
use crate::queue::MessageQueue;

type Listener = Arc<dyn Fn(&AgenticEvent) + Send + Sync>;

/// Push-side registration handle returned by [`Orchestrator::on_event`].
pub struct Subscription {
    id: u64,
    listeners: Arc<Mutex<Vec<(u64, Listener)>>>,
}

impl Subscription {
    /// Stop receiving events. Dropping without calling this keeps the
    /// listener attached.
    pub fn unsubscribe(self) {
        self.listeners.lock().retain(|(id, _)| *id != self.id);
    }
}

/// Drives multi-agent sessions: spawns every agent against one shared
/// prompt, then routes `@mention` output between them turn by turn until a
/// guardrail or the turn budget ends the session.
///
/// All mutable session state lives behind one shared [`Inner`], so multiple
/// orchestrators in the same process never interfere.
pub struct Orchestrator {
    inner: Arc<Inner>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    backend: Arc<dyn AgentBackend>,
    store: TranscriptStore,
    /// True from `run()` acceptance until the loop task settles.
    running: AtomicBool,
    /// End-of-session guard; exactly one `session_end` per run.
    ended: AtomicBool,
    session_id: Mutex<SessionId>,
    turn: AtomicU32,
    started: Mutex<Instant>,
    cancel: Mutex<CancellationToken>,
    queue: Mutex<MessageQueue>,
    agents: Mutex<Vec<AgentState>>,
    tracker: Mutex<ExchangeTracker>,
    no_progress: AtomicU32,
    channel: Mutex<Option<EventChannel>>,
    listeners: Arc<Mutex<Vec<(u64, Listener)>>>,
    next_listener_id: AtomicU64,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn AgentBackend>, store: TranscriptStore) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                store,
                running: AtomicBool::new(false),
                ended: AtomicBool::new(true),
                session_id: Mutex::new(SessionId::new()),
                turn: AtomicU32::new(0),
                started: Mutex::new(Instant::now()),
                cancel: Mutex::new(CancellationToken::new()),
                queue: Mutex::new(MessageQueue::new()),
                agents: Mutex::new(Vec::new()),
                tracker: Mutex::new(ExchangeTracker::new()),
                no_progress: AtomicU32::new(0),
                channel: Mutex::new(None),
                listeners: Arc::new(Mutex::new(Vec::new())),
                next_listener_id: AtomicU64::new(0),
            }),
            loop_handle: Mutex::new(None),
        }
    }

    /// Start a session and return its ordered event stream.
    ///
    /// Rejects with [`OrchestratorError::AlreadyRunning`] while a previous
    /// run's loop has not settled. `session_start` is emitted before this
    /// returns; everything after arrives through the stream as the loop
    /// progresses in the background.
    pub async fn run(&self, config: SessionConfig) -> Result<EventStream, OrchestratorError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(OrchestratorError::AlreadyRunning);
        }
        match self.start(config) {
            Ok(stream) => Ok(stream),
            Err(err) => {
                self.inner.running.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    fn start(&self, config: SessionConfig) -> Result<EventStream, OrchestratorError> {
        let inner = &self.inner;
        let session_id = SessionId::new();
        *inner.session_id.lock() = session_id.clone();
        inner.turn.store(0, Ordering::SeqCst);
        *inner.started.lock() = Instant::now();
        inner.queue.lock().clear();
        inner.tracker.lock().clear();
        inner.no_progress.store(0, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        *inner.cancel.lock() = cancel.clone();
        *inner.agents.lock() = config.agents.iter().map(AgentState::from_config).collect();

        inner
            .store
            .create_session(&session_id, &config.prompt, config.max_turns)?;
        for agent in &config.agents {
            inner.store.add_agent(&session_id, agent)?;
        }

        let (channel, stream) = EventChannel::new();
        *inner.channel.lock() = Some(channel);
        inner.ended.store(false, Ordering::SeqCst);

        info!(
            session_id = %session_id,
            agents = config.agents.len(),
            max_turns = config.max_turns,
            "agentic session started"
        );
        inner.emit(AgenticEvent::SessionStart {
            session_id,
            prompt: config.prompt.clone(),
            agents: inner.agents.lock().clone(),
            timestamp: Utc::now(),
        });

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            if let Err(err) = run_loop(&inner, &config, cancel).await {
                error!(error = %err, "session loop failed");
                let session_id = inner.session_id.lock().clone();
                inner.emit(AgenticEvent::Error {
                    session_id,
                    agent: None,
                    error: err.to_string(),
                    timestamp: Utc::now(),
                });
                inner.end_session(EndReason::Error);
            }
            inner.running.store(false, Ordering::SeqCst);
        });
        *self.loop_handle.lock() = Some(handle);

        Ok(stream)
    }

    /// End the current session with reason `stopped`. Safe to call at any
    /// time, from any task; repeated calls are no-ops.
    pub fn stop(&self) {
        self.inner.cancel.lock().cancel();
        self.inner.end_session(EndReason::Stopped);
    }

    /// Stop and wait for the loop task to settle.
    pub async fn close(&self) {
        self.stop();
        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Register a push-style listener. Every listener and the event stream
    /// observe the identical ordered sequence. A panicking listener is
    /// caught and skipped, never aborting the loop or its peers.
    pub fn on_event<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AgenticEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::clone(&self.inner.listeners),
        }
    }

    /// Identifier of the current (or most recent) session.
    pub fn session_id(&self) -> SessionId {
        self.inner.session_id.lock().clone()
    }

    /// Live agent states. Remain readable after the session ends, until the
    /// next `run()` replaces them.
    pub fn agent_states(&self) -> Vec<AgentState> {
        self.inner.agents.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}

impl Inner {
    fn emit(&self, event: AgenticEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!(event = event.event_type(), "event listener panicked");
            }
        }
        if let Some(channel) = self.channel.lock().as_ref() {
            channel.push(event);
        }
    }

    /// Mutate and persist an agent's status if the agent is known; the
    /// status event is emitted either way.
    fn set_agent_status(&self, agent: &str, status: AgentStatus) -> Result<(), StoreError> {
        let session_id = self.session_id.lock().clone();
        let known = {
            let mut agents = self.agents.lock();
            match agents.iter_mut().find(|state| state.name == agent) {
                Some(state) => {
                    state.status = status;
                    true
                }
                None => false,
            }
        };
        if known {
            self.store.update_agent(
                &session_id,
                agent,
                &AgentUpdate {
                    status: Some(status),
                    ..Default::default()
                },
            )?;
        }
        self.emit(AgenticEvent::AgentStatus {
            session_id,
            agent: agent.to_string(),
            status,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Persist one utterance and emit it, except that the `notes` channel is
    /// log-only. The sender's in-memory counters follow the transcript.
    fn log_message(
        &self,
        session_id: &SessionId,
        from: &str,
        to: &str,
        content: &str,
        turn: u32,
    ) -> Result<(), StoreError> {
        let message = Message::new(session_id.clone(), from, to, content, turn);
        self.store.append_message(&message)?;
        {
            let mut agents = self.agents.lock();
            if let Some(state) = agents.iter_mut().find(|state| state.name == from) {
                state.message_count += 1;
                state.last_seen = Some(message.timestamp);
            }
        }
        if to != TO_NOTES {
            self.emit(AgenticEvent::Message {
                session_id: message.session_id,
                from: message.from,
                to: message.to,
                content: message.content,
                turn: message.turn,
                timestamp: message.timestamp,
            });
        }
        Ok(())
    }

    /// One-shot end-of-session path: persist the terminal status, emit
    /// `session_end`, close the stream, and release per-run resources.
    /// Agent states stay readable until the next run.
    fn end_session(&self, reason: EndReason) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        let session_id = self.session_id.lock().clone();
        let turn = self.turn.load(Ordering::SeqCst);
        let elapsed_ms = self.started.lock().elapsed().as_millis() as u64;
        let status = match reason {
            EndReason::Error => SessionStatus::Failed,
            EndReason::Stopped => SessionStatus::Stopped,
            _ => SessionStatus::Completed,
        };
        if let Err(err) = self.store.end_session(&session_id, status) {
            error!(session_id = %session_id, error = %err, "failed to persist session end");
        }
        info!(session_id = %session_id, %reason, turn, elapsed_ms, "session ended");
        self.emit(AgenticEvent::SessionEnd {
            session_id,
            reason,
            turn,
            elapsed_ms,
            timestamp: Utc::now(),
        });
        if let Some(channel) = self.channel.lock().take() {
            channel.close();
        }
        self.queue.lock().clear();
        self.tracker.lock().clear();
        self.no_progress.store(0, Ordering::SeqCst);
        self.backend.clear();
    }
}

/// Parse one agent's raw output, log and emit every directive, and enqueue
/// whatever is addressed to live agents. `all` fans out to every agent but
/// the sender; `user` and leftover notes are logged, never enqueued.
fn route_output(
    inner: &Inner,
    session_id: &SessionId,
    agents: &[AgentConfig],
    known_targets: &HashSet<String>,
    from: &str,
    output: &str,
    turn: u32,
) -> Result<(), StoreError> {
    let parsed = parse_response(output, known_targets);

    for outbound in &parsed.messages {
        inner.log_message(session_id, from, &outbound.to, &outbound.content, turn)?;

        if outbound.to == TO_ALL {
            let mut queue = inner.queue.lock();
            for other in agents {
                if other.name != from {
                    queue.enqueue(Message::new(
                        session_id.clone(),
                        from,
                        other.name.as_str(),
                        outbound.content.as_str(),
                        turn,
                    ));
                }
            }
        } else if outbound.to != TO_USER {
            inner.queue.lock().enqueue(Message::new(
                session_id.clone(),
                from,
                outbound.to.as_str(),
                outbound.content.as_str(),
                turn,
            ));
        }
    }

    if let Some(notes) = &parsed.notes {
        inner.log_message(session_id, from, TO_NOTES, notes, turn)?;
    }
    Ok(())
}

/// Pressure notice prepended to a resume prompt as the turn budget runs out.
fn turn_notice(turn: u32, max_turns: u32) -> Option<String> {
    if max_turns == 0 {
        return None;
    }
    if turn == max_turns {
        Some(
            "FINAL TURN: this is the last turn of the session. Answer only to @user \
             with your conclusions. Do not address other agents."
                .to_string(),
        )
    } else if turn + 1 == max_turns {
        Some(
            "NOTE: only 2 turns remain in this session. Wrap up open threads and \
             direct your final answer to @user soon."
                .to_string(),
        )
    } else {
        None
    }
}

#[instrument(skip_all, fields(session_id = %inner.session_id.lock(), agents = config.agents.len()))]
async fn run_loop(
    inner: &Arc<Inner>,
    config: &SessionConfig,
    cancel: CancellationToken,
) -> Result<(), OrchestratorError> {
    let session_id = inner.session_id.lock().clone();
    let agent_names: Vec<String> = config.agents.iter().map(|a| a.name.clone()).collect();
    let mut known_targets: HashSet<String> = agent_names.iter().cloned().collect();
    known_targets.insert(TO_ALL.to_string());
    known_targets.insert(TO_USER.to_string());

    // Phase 1: spawn every agent sequentially against the shared prompt.
    // Outputs are held back so no agent sees a peer's reaction before all
    // first impressions are in.
    let mut held: Vec<(String, String)> = Vec::new();
    for agent in &config.agents {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let system_prompt = build_system_prompt(
            &agent.name,
            &agent_names,
            agent.description.as_deref(),
            config.max_turns,
        );
        inner.set_agent_status(&agent.name, AgentStatus::Active)?;

        match inner
            .backend
            .spawn(
                agent,
                &system_prompt,
                &config.prompt,
                &config.repo_path,
                config.sandbox,
            )
            .await
        {
            Ok(outcome) => {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                inner.store.update_agent(
                    &session_id,
                    &agent.name,
                    &AgentUpdate {
                        backend_session_id: Some(outcome.session_id.clone()),
                        ..Default::default()
                    },
                )?;
                {
                    let mut agents = inner.agents.lock();
                    if let Some(state) = agents.iter_mut().find(|s| s.name == agent.name) {
                        state.backend_session_id = Some(outcome.session_id.clone());
                    }
                }
                inner.log_message(&session_id, TO_USER, &agent.name, &config.prompt, 0)?;
                inner.set_agent_status(&agent.name, AgentStatus::Idle)?;
                held.push((agent.name.clone(), outcome.output));
            }
            Err(err) => {
                warn!(agent = %agent.name, error = %err, "agent failed to spawn");
                inner.emit(AgenticEvent::Error {
                    session_id: session_id.clone(),
                    agent: Some(agent.name.clone()),
                    error: err.to_string(),
                    timestamp: Utc::now(),
                });
                inner.set_agent_status(&agent.name, AgentStatus::Dead)?;
            }
        }
    }

    // Phase 1b: route the held first outputs, in spawn order.
    for (agent_name, output) in held {
        if cancel.is_cancelled() {
            return Ok(());
        }
        route_output(
            inner,
            &session_id,
            &config.agents,
            &known_targets,
            &agent_name,
            &output,
            0,
        )?;
    }
    inner.emit(AgenticEvent::TurnComplete {
        session_id: session_id.clone(),
        turn: 0,
        pending_count: inner.queue.lock().len(),
        timestamp: Utc::now(),
    });

    // Phase 2: drain the queue and resume addressed agents, turn by turn.
    let mut turn: u32 = 1;
    inner.turn.store(turn, Ordering::SeqCst);
    while turn <= config.max_turns {
        if cancel.is_cancelled() {
            return Ok(());
        }
        inner.tracker.lock().decay();

        let elapsed = inner.started.lock().elapsed();
        if elapsed > config.timeout {
            inner.emit(AgenticEvent::Guardrail {
                session_id: session_id.clone(),
                guard: Guard::Timeout,
                detail: format!("Session timed out after {}s", config.timeout.as_secs()),
                timestamp: Utc::now(),
            });
            inner.end_session(EndReason::Timeout);
            return Ok(());
        }

        if inner.queue.lock().is_empty() {
            let count = inner.no_progress.fetch_add(1, Ordering::SeqCst) + 1;
            if count >= NO_PROGRESS_LIMIT {
                inner.emit(AgenticEvent::Guardrail {
                    session_id: session_id.clone(),
                    guard: Guard::Converged,
                    detail: format!("No new messages for {count} consecutive turns"),
                    timestamp: Utc::now(),
                });
                inner.end_session(EndReason::Converged);
                return Ok(());
            }
        } else {
            inner.no_progress.store(0, Ordering::SeqCst);
        }

        let pending = inner.queue.lock().dequeue_all();
        if pending.is_empty() {
            // Nothing left to deliver; the conversation has settled.
            inner.end_session(EndReason::Converged);
            return Ok(());
        }

        for (recipient, batch) in pending {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if !config.agents.iter().any(|a| a.name == recipient) {
                continue;
            }
            let alive = {
                let agents = inner.agents.lock();
                agents
                    .iter()
                    .any(|s| s.name == recipient && s.status != AgentStatus::Dead)
            };
            if !alive {
                continue;
            }

            if inner.tracker.lock().record_batch(&batch) {
                inner.emit(AgenticEvent::Guardrail {
                    session_id: session_id.clone(),
                    guard: Guard::PingPong,
                    detail: format!("Breaking conversation cycle involving {recipient}"),
                    timestamp: Utc::now(),
                });
                continue;
            }

            let mut composed = batch
                .iter()
                .map(|m| format!("@{} says: {}", m.from, m.content))
                .collect::<Vec<_>>()
                .join("\n\n");
            if let Some(notice) = turn_notice(turn, config.max_turns) {
                composed = format!("{notice}\n\n{composed}");
            }

            inner.set_agent_status(&recipient, AgentStatus::Active)?;
            match inner
                .backend
                .resume(&recipient, &composed, &config.repo_path)
                .await
            {
                Ok(output) => {
                    if cancel.is_cancelled() {
                        return Ok(());
                    }
                    inner.set_agent_status(&recipient, AgentStatus::Idle)?;
                    route_output(
                        inner,
                        &session_id,
                        &config.agents,
                        &known_targets,
                        &recipient,
                        &output,
                        turn,
                    )?;
                }
                Err(err) => {
                    if cancel.is_cancelled() {
                        return Ok(());
                    }
                    warn!(agent = %recipient, error = %err, "agent failed to resume");
                    inner.emit(AgenticEvent::Error {
                        session_id: session_id.clone(),
                        agent: Some(recipient.clone()),
                        error: err.to_string(),
                        timestamp: Utc::now(),
                    });
                    inner.set_agent_status(&recipient, AgentStatus::Dead)?;
                }
            }
        }

        inner.emit(AgenticEvent::TurnComplete {
            session_id: session_id.clone(),
            turn,
            pending_count: inner.queue.lock().len(),
            timestamp: Utc::now(),
        });
        turn += 1;
        inner.turn.store(turn, Ordering::SeqCst);
    }

    inner.emit(AgenticEvent::Guardrail {
        session_id: session_id.clone(),
        guard: Guard::MaxTurns,
        detail: format!("Reached maximum of {} turns", config.max_turns),
        timestamp: Utc::now(),
    });
    inner.end_session(EndReason::MaxTurns);
    Ok(())
}
