//! Display name assignment for session agents.
//!
//! Agents get memorable compound identities like `maren.storyteller` or
//! `einar.poet`. A name that already contains a dot is user-provided and
//! left untouched.

use std::collections::HashSet;

use rand::seq::SliceRandom;

use crate::agents::AgentConfig;

// Short, diverse, easy to type in @mentions.
const NAME_POOL: [&str; 50] = [
    "ada", "akira", "alba", "arlo", "asha", "basil", "bryn", "cleo", "cyrus", "dara", "eiko",
    "einar", "elara", "ezra", "fern", "gael", "hana", "ines", "idris", "juno", "kai", "kira",
    "lars", "lena", "lux", "maren", "milo", "nadia", "nico", "nova", "orin", "petra", "quinn",
    "ravi", "rune", "sage", "soren", "tala", "thea", "teo", "uri", "vera", "wren", "xander",
    "yara", "zara", "zeke", "io", "leif", "sol",
];

/// Prefix a random unique first name onto every agent without one.
///
/// Names are drawn without replacement so agents in the same session never
/// share a first name, including first names already claimed by dot-named
/// agents. Past fifty agents the fallback is `agent-N.role`. Returns a new
/// roster; the input is untouched.
pub fn assign_display_names(agents: &[AgentConfig]) -> Vec<AgentConfig> {
    let mut available: Vec<&str> = NAME_POOL.to_vec();
    available.shuffle(&mut rand::thread_rng());

    let mut used: HashSet<String> = HashSet::new();
    for agent in agents {
        if let Some((first, _)) = agent.name.split_once('.') {
            used.insert(first.to_string());
        }
    }

    agents
        .iter()
        .map(|agent| {
            if agent.name.contains('.') {
                return agent.clone();
            }

            let mut first_name = None;
            while let Some(candidate) = available.pop() {
                if !used.contains(candidate) {
                    used.insert(candidate.to_string());
                    first_name = Some(candidate.to_string());
                    break;
                }
            }
            let first_name = match first_name {
                Some(name) => name,
                None => {
                    let fallback = format!("agent-{}", used.len());
                    used.insert(fallback.clone());
                    fallback
                }
            };

            let mut renamed = agent.clone();
            renamed.name = format!("{first_name}.{}", agent.name);
            renamed
        })
        .collect()
}
