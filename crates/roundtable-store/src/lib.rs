pub mod database;
pub mod error;
pub mod row_helpers;
pub mod schema;
pub mod transcript;

pub use database::Database;
pub use error::StoreError;
pub use transcript::{AgentUpdate, SessionRecord, SessionStatus, TranscriptStore};
