use roundtable_store::StoreError;

/// Errors surfaced by [`Orchestrator::run`](crate::Orchestrator::run).
///
/// Per-agent backend failures never appear here; they become `error` events
/// and the session carries on without the agent.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// A previous run's loop has not settled yet.
    #[error("a session is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Store(#[from] StoreError),
}
