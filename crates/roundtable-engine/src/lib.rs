//! Session engine: the orchestrator control loop plus its in-memory
//! routing and guardrail machinery.
//!
//! The engine is backend-agnostic; anything implementing
//! [`roundtable_core::AgentBackend`] can drive agents.

pub mod error;
pub mod guardrails;
pub mod orchestrator;
pub mod queue;

pub use error::OrchestratorError;
pub use guardrails::ExchangeTracker;
pub use orchestrator::{Orchestrator, Subscription};
pub use queue::MessageQueue;
