use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use roundtable_backend::SessionManager;
use roundtable_core::names::assign_display_names;
use roundtable_core::{AgentConfig, AgenticEvent, Backend, SandboxMode, SessionConfig};
use roundtable_engine::Orchestrator;
use roundtable_store::{Database, TranscriptStore};

const USAGE: &str = "\
usage: roundtable [options] <agent>[:<backend>]... <prompt>

Spawns one CLI agent per entry and routes @mentions between them until
the conversation settles or a limit trips. Agents named without a dot
get a display name like maren.<agent>.

options:
  --repo <path>        repository the agents work in (default: current dir)
  --max-turns <n>      routing turn budget (default: 20)
  --timeout-secs <n>   wall-clock budget for the whole session (default: 900)
  --sandbox <mode>     read-only | workspace-write | danger-full-access
  -h, --help           show this help";

struct Cli {
    agents: Vec<AgentConfig>,
    prompt: String,
    repo_path: PathBuf,
    max_turns: Option<u32>,
    timeout: Option<Duration>,
    sandbox: Option<SandboxMode>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = parse_cli();
    let agents = assign_display_names(&cli.agents);

    let db_path = dirs_home().join(".roundtable").join("transcripts.db");
    let store = TranscriptStore::new(Database::open(&db_path)?);

    let mut config = SessionConfig::new(agents, cli.prompt, cli.repo_path);
    if let Some(max_turns) = cli.max_turns {
        config = config.with_max_turns(max_turns);
    }
    if let Some(timeout) = cli.timeout {
        config = config.with_timeout(timeout);
    }
    if let Some(sandbox) = cli.sandbox {
        config = config.with_sandbox(sandbox);
    }

    let orchestrator = Orchestrator::new(Arc::new(SessionManager::new()), store);
    let mut events = orchestrator.run(config).await?;

    loop {
        tokio::select! {
            maybe = events.recv() => match maybe {
                Some(event) => print_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, stopping session");
                orchestrator.stop();
            }
        }
    }

    orchestrator.close().await;
    tracing::info!(path = %db_path.display(), "transcript saved");
    Ok(())
}

fn print_event(event: &AgenticEvent) {
    match event {
        AgenticEvent::SessionStart {
            session_id, agents, ..
        } => {
            let roster: Vec<&str> = agents.iter().map(|a| a.name.as_str()).collect();
            tracing::info!(session_id = %session_id, agents = ?roster, "session started");
        }
        AgenticEvent::Message {
            from,
            to,
            content,
            turn,
            ..
        } => {
            println!("\n[turn {turn}] {from} -> {to}");
            println!("{content}");
        }
        AgenticEvent::AgentStatus { agent, status, .. } => {
            tracing::debug!(agent = %agent, status = %status, "agent status changed");
        }
        AgenticEvent::TurnComplete {
            turn,
            pending_count,
            ..
        } => {
            tracing::info!(turn = turn, pending = pending_count, "turn complete");
        }
        AgenticEvent::Guardrail { guard, detail, .. } => {
            tracing::warn!(guard = %guard, "{detail}");
        }
        AgenticEvent::Error { agent, error, .. } => match agent {
            Some(agent) => tracing::error!(agent = %agent, "{error}"),
            None => tracing::error!("{error}"),
        },
        AgenticEvent::SessionEnd {
            reason,
            turn,
            elapsed_ms,
            ..
        } => {
            tracing::info!(reason = %reason, turn = turn, elapsed_ms = elapsed_ms, "session ended");
        }
    }
}

fn parse_cli() -> Cli {
    let mut args = std::env::args().skip(1);
    let mut positionals: Vec<String> = Vec::new();
    let mut repo_path: Option<PathBuf> = None;
    let mut max_turns = None;
    let mut timeout = None;
    let mut sandbox = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            "--repo" => repo_path = Some(PathBuf::from(flag_value(&mut args, "--repo"))),
            "--max-turns" => {
                max_turns = Some(parse_number(&flag_value(&mut args, "--max-turns"), "--max-turns"))
            }
            "--timeout-secs" => {
                timeout = Some(Duration::from_secs(parse_number(
                    &flag_value(&mut args, "--timeout-secs"),
                    "--timeout-secs",
                )))
            }
            "--sandbox" => match flag_value(&mut args, "--sandbox").parse::<SandboxMode>() {
                Ok(mode) => sandbox = Some(mode),
                Err(err) => fail(&err),
            },
            flag if flag.starts_with('-') => fail(&format!("unknown flag: {flag}")),
            _ => positionals.push(arg),
        }
    }

    let prompt = match positionals.pop() {
        Some(prompt) if !positionals.is_empty() => prompt,
        _ => fail("expected at least one agent and a prompt"),
    };
    let agents = positionals.iter().map(|entry| parse_agent(entry)).collect();

    Cli {
        agents,
        prompt,
        repo_path: repo_path
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/tmp"))),
        max_turns,
        timeout,
        sandbox,
    }
}

fn parse_agent(entry: &str) -> AgentConfig {
    let (name, backend) = match entry.split_once(':') {
        Some((name, backend)) => match backend.parse::<Backend>() {
            Ok(backend) => (name, backend),
            Err(err) => fail(&err),
        },
        None => (entry, Backend::Claude),
    };
    if name.is_empty() {
        fail(&format!("agent entry has no name: {entry}"));
    }
    AgentConfig::new(name, backend)
}

fn flag_value(args: &mut impl Iterator<Item = String>, flag: &str) -> String {
    match args.next() {
        Some(value) => value,
        None => fail(&format!("{flag} expects a value")),
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, flag: &str) -> T {
    match value.parse() {
        Ok(n) => n,
        Err(_) => fail(&format!("{flag} expects a number, got: {value}")),
    }
}

fn fail(msg: &str) -> ! {
    eprintln!("roundtable: {msg}");
    eprintln!("{USAGE}");
    std::process::exit(2);
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
