//! Mention parser for agent output.
//!
//! Extracts `@agent:` mentions from raw response text. Rules:
//! 1. Fenced code blocks (``` ... ```) are never scanned for mentions
//! 2. Blockquote lines (leading `>`) are skipped
//! 3. `@name:` counts only at the start of a line
//! 4. Targets must be known names (agents plus "all" and "user")
//! 5. Everything unmatched is collected as working notes

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static MENTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@([\w.-]+):\s*(.*)").unwrap());

/// A routable message extracted from an agent's response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub to: String,
    pub content: String,
}

/// Result of parsing one agent response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    /// Messages to route to other agents.
    pub messages: Vec<OutboundMessage>,
    /// Leftover text addressed to nobody. Logged, never routed.
    pub notes: Option<String>,
}

/// Parse an agent's raw response into routable messages and working notes.
///
/// `known_targets` must contain every valid recipient, including the
/// broadcast and user pseudo-targets. A `@name:` line with an unknown name
/// is not a message; it joins the notes (or continues an open message).
pub fn parse_response(text: &str, known_targets: &HashSet<String>) -> ParsedResponse {
    let mut messages: Vec<OutboundMessage> = Vec::new();
    let mut note_lines: Vec<&str> = Vec::new();

    let mut in_code_block = false;
    let mut current: Option<OutboundMessage> = None;

    for line in text.split('\n') {
        // Fence lines toggle code-block state and are always notes.
        if line.trim_start().starts_with("```") {
            in_code_block = !in_code_block;
            if let Some(msg) = current.take() {
                messages.push(msg);
            }
            note_lines.push(line);
            continue;
        }

        if in_code_block {
            if let Some(msg) = current.take() {
                messages.push(msg);
            }
            note_lines.push(line);
            continue;
        }

        if line.trim_start().starts_with('>') {
            if let Some(msg) = current.take() {
                messages.push(msg);
            }
            note_lines.push(line);
            continue;
        }

        if let Some(caps) = MENTION_PATTERN.captures(line) {
            let target = &caps[1];
            // Unknown names fall through to the continuation/notes handling.
            if known_targets.contains(target) {
                if let Some(msg) = current.take() {
                    messages.push(msg);
                }
                current = Some(OutboundMessage {
                    to: target.to_string(),
                    content: caps[2].trim().to_string(),
                });
                continue;
            }
        }

        // A non-blank line continues an open message.
        if !line.trim().is_empty() {
            if let Some(msg) = current.as_mut() {
                msg.content.push('\n');
                msg.content.push_str(line);
                continue;
            }
        } else if let Some(msg) = current.take() {
            // A blank line ends the open message.
            messages.push(msg);
        }

        note_lines.push(line);
    }

    if let Some(msg) = current.take() {
        messages.push(msg);
    }

    let joined = note_lines.join("\n");
    let trimmed = joined.trim();
    ParsedResponse {
        messages,
        notes: (!trimmed.is_empty()).then(|| trimmed.to_string()),
    }
}

/// Build the system prompt that teaches an agent the mention protocol.
///
/// `agents` is the full roster including `role` itself; the prompt lists the
/// others. With no `description` the prompt falls back to the part of the
/// display name after the dot. A zero `max_turns` omits the turn budget.
pub fn build_system_prompt(
    role: &str,
    agents: &[String],
    description: Option<&str>,
    max_turns: u32,
) -> String {
    let other_agents: Vec<&str> = agents
        .iter()
        .map(String::as_str)
        .filter(|name| *name != role)
        .collect();
    let role_part = match role.split_once('.') {
        Some((_, rest)) => rest,
        None => role,
    };
    let role_desc = match description {
        Some(text) => format!("Your role: {text}"),
        None => format!("Stay focused on your role: {role_part}"),
    };
    let example_target = other_agents.first().copied().unwrap_or("other");

    let mut lines: Vec<String> = vec![
        format!("You are \"{role}\" in a multi-agent session."),
        format!("Other agents: {}", other_agents.join(", ")),
    ];
    if max_turns > 0 {
        lines.push(String::new());
        lines.push(format!(
            "This session has a HARD LIMIT of {max_turns} turns. After turn {max_turns}, \
             the session ends abruptly — any undelivered work is lost. Pace yourself and \
             deliver final output to @user before time runs out."
        ));
    }
    lines.extend(
        [
            "",
            "Agent names use the format firstname.role (e.g. maren.storyteller).",
            "Always use the FULL name (including the dot) in @mentions.",
            "",
            "HOW COMMUNICATION WORKS:",
            "- Plain text (no @mention) = your working notes. Visible in the transcript",
            "  but does NOT trigger a response from anyone. Use this for thinking,",
            "  commentary, or output that doesn't need a reply.",
            "- @name: message = sends a message to that agent and TRIGGERS THEM TO RESPOND.",
            "  Only use @mentions when you specifically need that agent to act or reply.",
            "- @user: message = final output delivered to the human. NOT routed to any agent.",
            "  ONLY use @user for the session's FINAL deliverable — the end result that the",
            "  human asked for. Do NOT use @user for intermediate answers, partial work, or",
            "  responses meant for other agents.",
            "- @all: message = broadcast to every agent (triggers ALL of them to respond).",
            "",
            "ROUTING RULE — think about WHO needs your output:",
            "Before responding, ask: \"Which agent needs this to do THEIR job?\"",
            "Route your output to THAT agent. For example, if a judge needs to score",
            "your answer, send it to the judge — not to @user. If a reviewer needs to",
            "see your code, send it to the reviewer. Only send to @user when the ENTIRE",
            "session task is complete and you're delivering the final result.",
            "",
            "CRITICAL: Do NOT @mention an agent unless you need them to do something.",
            "Unnecessary @mentions create infinite conversation loops. If you're done",
            "or just want to comment, write plain text instead.",
            "",
            "To message another agent, start a NEW LINE with @name: followed by your message.",
            "Your full message content goes after the @name: on the same line and continues",
            "on subsequent lines until the next @mention or blank line.",
            "",
            "Examples:",
            "I've analyzed the problem and found the key issue is X.",
            "",
        ]
        .map(String::from),
    );
    lines.push(format!(
        "@{example_target}: Based on my analysis, I need you to verify X."
    ));
    lines.extend(
        [
            "Here are the details you'll need to check.",
            "",
            "@user: Final report ready.",
            "",
            "Rules:",
            "- @mention = request for action. Plain text = notes/commentary.",
            "- Each line starting with @name: begins a new message to that agent.",
            "- Multi-line messages: lines after @name: continue until the next @mention or blank line.",
        ]
        .map(String::from),
    );
    lines.push(format!("- {role_desc}"));
    lines.extend(
        [
            "- When asked to start or go first, produce your output directly — do not ask others to start.",
            "- When your work is complete and you have nothing to request, write plain text. Do NOT",
            "  @mention agents just to say goodbye, acknowledge, or agree — that wastes their turn.",
        ]
        .map(String::from),
    );

    lines.join("\n")
}
