pub mod agents;
pub mod backend;
pub mod channel;
pub mod config;
pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod names;
pub mod parser;

pub use agents::{AgentConfig, AgentState, AgentStatus, Backend};
pub use backend::{AgentBackend, SpawnOutcome};
pub use channel::{EventChannel, EventStream};
pub use config::{SandboxMode, SessionConfig};
pub use errors::BackendError;
pub use events::{AgenticEvent, EndReason, Guard};
pub use ids::SessionId;
pub use messages::Message;
