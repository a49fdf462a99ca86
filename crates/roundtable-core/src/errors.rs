/// Errors from spawning or resuming an agent subprocess.
///
/// Launch failures (the binary could not even start) are distinct from run
/// failures (the process ran and produced nothing usable) so callers can log
/// them apart.
#[derive(Clone, Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend \"{0}\" is not yet supported, use claude")]
    Unsupported(crate::agents::Backend),
    #[error("no session for agent: {0}")]
    NoSession(String),
    #[error("failed to spawn claude: {0}")]
    Launch(String),
    #[error("claude session timed out after {0}s")]
    Timeout(u64),
    #[error("claude exited with code {0}")]
    Exited(i32),
    /// Captured stderr from a run that exited without usable stdout.
    #[error("{0}")]
    Failed(String),
}

impl BackendError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unsupported(_) => "unsupported",
            Self::NoSession(_) => "no_session",
            Self::Launch(_) => "launch",
            Self::Timeout(_) => "timeout",
            Self::Exited(_) => "exited",
            Self::Failed(_) => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Backend;

    #[test]
    fn messages_name_the_problem() {
        let err = BackendError::Unsupported(Backend::Gemini);
        assert!(err.to_string().contains("not yet supported"), "got: {err}");

        let err = BackendError::NoSession("critic".into());
        assert_eq!(err.to_string(), "no session for agent: critic");

        let err = BackendError::Timeout(600);
        assert_eq!(err.to_string(), "claude session timed out after 600s");

        let err = BackendError::Exited(1);
        assert_eq!(err.to_string(), "claude exited with code 1");

        let err = BackendError::Failed("permission denied".into());
        assert_eq!(err.to_string(), "permission denied");
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(BackendError::Launch("ENOENT".into()).error_kind(), "launch");
        assert_eq!(BackendError::Timeout(600).error_kind(), "timeout");
        assert_eq!(BackendError::Failed("x".into()).error_kind(), "failed");
    }
}
