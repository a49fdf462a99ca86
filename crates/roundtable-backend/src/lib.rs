//! Subprocess backends for agent sessions.
//!
//! [`SessionManager`] drives the real `claude` CLI, one headless invocation
//! per agent turn. [`MockBackend`] is a scripted stand-in so orchestrator
//! tests run without subprocesses.

pub mod claude;
pub mod mock;
pub mod session;

pub use claude::ClaudeCli;
pub use mock::MockBackend;
pub use session::{SessionInfo, SessionManager};
