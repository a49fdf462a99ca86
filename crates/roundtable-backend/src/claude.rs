//! Claude CLI subprocess driver.
//!
//! Every agent turn is one headless `claude -p` invocation. The first turn
//! creates a backend session with `--session-id`; later turns resume it with
//! `-r`. The subprocess runs inside the target repository with its tool set
//! cut down to the session's sandbox mode.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use roundtable_core::{BackendError, SandboxMode};

/// Turn budget for a single subprocess invocation, not the whole session.
pub const SUBPROCESS_MAX_TURNS: u32 = 3;

/// Wall-clock limit for one subprocess invocation.
pub const SUBPROCESS_TIMEOUT: Duration = Duration::from_secs(600);

/// Env vars that would make a nested CLI believe it is already inside a
/// session. Stripped from the child environment.
const NESTED_SESSION_VARS: [&str; 2] = ["CLAUDECODE", "CLAUDE_CODE_SESSION"];

fn sandbox_tools(sandbox: SandboxMode) -> &'static str {
    match sandbox {
        SandboxMode::ReadOnly => "Read,Grep,Glob,LS,WebFetch,WebSearch",
        SandboxMode::WorkspaceWrite => "Read,Grep,Glob,LS,WebFetch,WebSearch,Write,Edit",
        SandboxMode::DangerFullAccess => "Read,Grep,Glob,LS,WebFetch,WebSearch,Write,Edit,Bash",
    }
}

/// Args for the first turn of an agent session.
///
/// The system prompt and the initial prompt travel as one `-p` payload,
/// separated by a `---` rule. `--disallowedTools Task` keeps the agent from
/// spawning subagents of its own.
pub fn spawn_args(
    session_id: &str,
    system_prompt: &str,
    initial_prompt: &str,
    repo_path: &Path,
    model: Option<&str>,
    sandbox: SandboxMode,
) -> Vec<String> {
    let tools = sandbox_tools(sandbox);
    let mut args = vec![
        "-p".to_string(),
        format!("{system_prompt}\n\n---\n\n{initial_prompt}"),
        "--session-id".to_string(),
        session_id.to_string(),
        "--add-dir".to_string(),
        repo_path.display().to_string(),
        "--max-turns".to_string(),
        SUBPROCESS_MAX_TURNS.to_string(),
        "--output-format".to_string(),
        "text".to_string(),
    ];
    if let Some(model) = model {
        args.push("--model".to_string());
        args.push(model.to_string());
    }
    args.extend([
        "--tools".to_string(),
        tools.to_string(),
        "--allowedTools".to_string(),
        tools.to_string(),
        "--disable-slash-commands".to_string(),
        "--disallowedTools".to_string(),
        "Task".to_string(),
    ]);
    args
}

/// Args for a later turn resuming an existing session.
pub fn resume_args(session_id: &str, message: &str) -> Vec<String> {
    vec![
        "-p".to_string(),
        message.to_string(),
        "-r".to_string(),
        session_id.to_string(),
        "--max-turns".to_string(),
        SUBPROCESS_MAX_TURNS.to_string(),
        "--output-format".to_string(),
        "text".to_string(),
    ]
}

/// Runs the `claude` binary with a timeout, capturing stdout and stderr.
///
/// The command name is overridable so tests can point it at a stub script.
#[derive(Clone, Debug)]
pub struct ClaudeCli {
    command: String,
    timeout: Duration,
}

impl Default for ClaudeCli {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeCli {
    pub fn new() -> Self {
        Self {
            command: "claude".to_string(),
            timeout: SUBPROCESS_TIMEOUT,
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run one invocation to completion and return its trimmed stdout.
    ///
    /// A non-zero exit still counts as success when stdout is non-empty; the
    /// CLI reports some recoverable conditions that way. With no stdout the
    /// error is stderr if present, otherwise the exit code.
    pub async fn exec(&self, args: Vec<String>, repo_path: &Path) -> Result<String, BackendError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&args)
            .current_dir(repo_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for var in NESTED_SESSION_VARS {
            cmd.env_remove(var);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| BackendError::Launch(e.to_string()))?;

        // Drain both pipes while waiting, or a chatty child blocks on a full
        // pipe buffer and never exits.
        let stdout_task = tokio::spawn(read_pipe(child.stdout.take()));
        let stderr_task = tokio::spawn(read_pipe(child.stderr.take()));

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(waited) => waited.map_err(|e| BackendError::Launch(e.to_string()))?,
            Err(_) => {
                terminate(&mut child).await;
                return Err(BackendError::Timeout(self.timeout.as_secs()));
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let stdout = stdout.trim();
        let stderr = stderr.trim();

        if !stdout.is_empty() {
            return Ok(stdout.to_string());
        }
        if !stderr.is_empty() {
            return Err(BackendError::Failed(stderr.to_string()));
        }
        Err(BackendError::Exited(status.code().unwrap_or(-1)))
    }
}

async fn read_pipe<R>(pipe: Option<R>) -> String
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut buf = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut buf).await;
    }
    buf
}

/// Stop a child that overran its window. SIGTERM first so the CLI can flush
/// session state; `kill_on_drop` reaps one that ignores it.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }
    let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_spawn(model: Option<&str>, sandbox: SandboxMode) -> Vec<String> {
        spawn_args(
            "abc-123",
            "You are a reviewer",
            "Review auth",
            Path::new("/my/repo"),
            model,
            sandbox,
        )
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        let idx = args.iter().position(|a| a == flag)?;
        args.get(idx + 1).map(String::as_str)
    }

    #[test]
    fn spawn_args_concatenate_prompts_with_separator() {
        let args = args_spawn(None, SandboxMode::ReadOnly);
        assert_eq!(
            value_after(&args, "-p"),
            Some("You are a reviewer\n\n---\n\nReview auth")
        );
    }

    #[test]
    fn spawn_args_carry_session_and_repo() {
        let args = args_spawn(None, SandboxMode::ReadOnly);
        assert_eq!(value_after(&args, "--session-id"), Some("abc-123"));
        assert_eq!(value_after(&args, "--add-dir"), Some("/my/repo"));
        assert_eq!(value_after(&args, "--max-turns"), Some("3"));
        assert_eq!(value_after(&args, "--output-format"), Some("text"));
    }

    #[test]
    fn spawn_args_include_model_only_when_set() {
        let args = args_spawn(Some("opus"), SandboxMode::ReadOnly);
        assert_eq!(value_after(&args, "--model"), Some("opus"));

        let args = args_spawn(None, SandboxMode::ReadOnly);
        assert!(!args.iter().any(|a| a == "--model"));
    }

    #[test]
    fn spawn_args_widen_tools_by_sandbox() {
        let args = args_spawn(None, SandboxMode::ReadOnly);
        let tools = value_after(&args, "--tools").unwrap();
        assert!(tools.contains("Read"));
        assert!(!tools.contains("Write"));
        assert!(!tools.contains("Bash"));
        assert_eq!(value_after(&args, "--allowedTools"), Some(tools));

        let args = args_spawn(None, SandboxMode::WorkspaceWrite);
        let tools = value_after(&args, "--tools").unwrap();
        assert!(tools.contains("Write"));
        assert!(tools.contains("Edit"));
        assert!(!tools.contains("Bash"));

        let args = args_spawn(None, SandboxMode::DangerFullAccess);
        assert!(value_after(&args, "--tools").unwrap().contains("Bash"));
    }

    #[test]
    fn spawn_args_block_subagents_and_slash_commands() {
        let args = args_spawn(None, SandboxMode::ReadOnly);
        assert!(args.iter().any(|a| a == "--disable-slash-commands"));
        assert_eq!(value_after(&args, "--disallowedTools"), Some("Task"));
    }

    #[test]
    fn resume_args_reference_the_session() {
        let args = resume_args("abc-123", "check this");
        assert_eq!(value_after(&args, "-p"), Some("check this"));
        assert_eq!(value_after(&args, "-r"), Some("abc-123"));
        assert_eq!(value_after(&args, "--max-turns"), Some("3"));
        assert!(!args.iter().any(|a| a == "--add-dir"));
        assert!(!args.iter().any(|a| a == "--session-id"));
    }

    #[cfg(unix)]
    mod exec {
        use super::*;
        use std::path::PathBuf;

        fn stub_dir() -> PathBuf {
            let dir =
                std::env::temp_dir().join(format!("roundtable-cli-{}", uuid::Uuid::new_v4()));
            std::fs::create_dir_all(&dir).unwrap();
            dir
        }

        fn stub(dir: &Path, script: &str) -> String {
            use std::os::unix::fs::PermissionsExt;
            let path = dir.join("claude-stub");
            std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
            path.to_string_lossy().into_owned()
        }

        #[tokio::test]
        async fn exec_returns_trimmed_stdout() {
            let dir = stub_dir();
            let cli = ClaudeCli::new().with_command(stub(&dir, r#"echo "agent response""#));
            let out = cli.exec(vec![], &dir).await.unwrap();
            assert_eq!(out, "agent response");
            let _ = std::fs::remove_dir_all(&dir);
        }

        #[tokio::test]
        async fn exec_passes_args_through() {
            let dir = stub_dir();
            let cli = ClaudeCli::new().with_command(stub(&dir, r#"printf '%s\n' "$@""#));
            let out = cli
                .exec(vec!["one".to_string(), "two".to_string()], &dir)
                .await
                .unwrap();
            assert_eq!(out, "one\ntwo");
            let _ = std::fs::remove_dir_all(&dir);
        }

        #[tokio::test]
        async fn exec_runs_in_repo_path() {
            let dir = stub_dir();
            let cli = ClaudeCli::new().with_command(stub(&dir, "pwd"));
            let out = cli.exec(vec![], &dir).await.unwrap();
            assert_eq!(PathBuf::from(out), dir.canonicalize().unwrap());
            let _ = std::fs::remove_dir_all(&dir);
        }

        #[tokio::test]
        async fn exec_accepts_stdout_on_nonzero_exit() {
            let dir = stub_dir();
            let cli = ClaudeCli::new().with_command(stub(&dir, "echo \"some output\"\nexit 1"));
            let out = cli.exec(vec![], &dir).await.unwrap();
            assert_eq!(out, "some output");
            let _ = std::fs::remove_dir_all(&dir);
        }

        #[tokio::test]
        async fn exec_reports_stderr_when_stdout_empty() {
            let dir = stub_dir();
            let cli =
                ClaudeCli::new().with_command(stub(&dir, "echo \"permission denied\" >&2\nexit 1"));
            let err = cli.exec(vec![], &dir).await.unwrap_err();
            assert_eq!(err.to_string(), "permission denied");
            assert_eq!(err.error_kind(), "failed");
            let _ = std::fs::remove_dir_all(&dir);
        }

        #[tokio::test]
        async fn exec_reports_exit_code_when_silent() {
            let dir = stub_dir();
            let cli = ClaudeCli::new().with_command(stub(&dir, "exit 3"));
            let err = cli.exec(vec![], &dir).await.unwrap_err();
            assert_eq!(err.to_string(), "claude exited with code 3");
            let _ = std::fs::remove_dir_all(&dir);
        }

        #[tokio::test]
        async fn exec_launch_failure_names_the_binary() {
            let dir = stub_dir();
            let cli = ClaudeCli::new().with_command("/nonexistent/claude-missing");
            let err = cli.exec(vec![], &dir).await.unwrap_err();
            assert_eq!(err.error_kind(), "launch");
            assert!(
                err.to_string().starts_with("failed to spawn claude:"),
                "got: {err}"
            );
            let _ = std::fs::remove_dir_all(&dir);
        }

        #[tokio::test]
        async fn exec_times_out() {
            let dir = stub_dir();
            let cli = ClaudeCli::new()
                .with_command(stub(&dir, "sleep 5"))
                .with_timeout(Duration::from_millis(100));
            let err = cli.exec(vec![], &dir).await.unwrap_err();
            assert_eq!(err.error_kind(), "timeout");
            assert!(err.to_string().contains("timed out after"), "got: {err}");
            let _ = std::fs::remove_dir_all(&dir);
        }

        #[tokio::test]
        async fn exec_strips_nested_session_vars() {
            let dir = stub_dir();
            std::env::set_var("CLAUDECODE", "1");
            std::env::set_var("CLAUDE_CODE_SESSION", "outer");
            let cli = ClaudeCli::new().with_command(stub(
                &dir,
                r#"printf '%s %s' "${CLAUDECODE-unset}" "${CLAUDE_CODE_SESSION-unset}""#,
            ));
            let out = cli.exec(vec![], &dir).await.unwrap();
            std::env::remove_var("CLAUDECODE");
            std::env::remove_var("CLAUDE_CODE_SESSION");
            assert_eq!(out, "unset unset");
            let _ = std::fs::remove_dir_all(&dir);
        }
    }
}
