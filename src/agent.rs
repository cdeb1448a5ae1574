//! The bash-agent loop: iterative shell automation from a natural-language
//! goal.
//!
//! A linear Plan → Execute → Analyze cycle. Plan asks the model for a batch
//! of single-line commands in a fenced `sh` block; Execute runs them in
//! order and stops the batch at the first failure; Analyze asks the model to judge
//! progress and produce the next instruction. A plan with no command block
//! ends the loop. All loop state is local, so independent goals can be run
//! back to back.

use crate::backend::{ChatBackend, Usage};
use crate::exec::{run_shell_command, shorten_output};
use crate::history::{Entry, History, Role};
use crate::prompts::{AGENT_ANALYZE_SYSTEM, AGENT_PLAN_SYSTEM};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default ceiling on Plan/Execute/Analyze rounds. The observed original ran
/// unbounded; a cap keeps a confused model from looping forever.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct AgentOptions {
    pub max_iterations: usize,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Why the loop stopped. Backend failures are not represented here; they
/// propagate as errors to the caller.
#[derive(Debug, PartialEq, Eq)]
pub enum Termination {
    /// A plan after at least one executed batch proposed nothing further.
    GoalSatisfied { iterations: usize },
    /// The very first plan proposed no commands at all.
    NothingToRun,
    /// The configured iteration cap was hit before the model stopped.
    IterationLimit { iterations: usize },
}

impl Termination {
    pub fn describe(&self) -> String {
        match self {
            Termination::GoalSatisfied { iterations } => {
                format!("goal satisfied after {} round(s)", iterations)
            }
            Termination::NothingToRun => {
                "model proposed no commands; treating goal as already satisfied".to_string()
            }
            Termination::IterationLimit { iterations } => {
                format!("stopped at the {}-round iteration limit", iterations)
            }
        }
    }
}

/// Drive one goal to termination.
///
/// `history` is borrowed for the whole run: every command transcript and
/// model reply is appended through it. `on_usage` feeds session accounting.
/// Any backend failure aborts the loop and propagates.
pub async fn run_goal<B: ChatBackend>(
    backend: &B,
    history: &mut History,
    goal: &str,
    interrupt: &Arc<AtomicBool>,
    options: &AgentOptions,
    mut on_usage: impl FnMut(Usage),
) -> Result<Termination> {
    let mut instruction = goal.to_string();
    let mut executed_any = false;

    for iteration in 1..=options.max_iterations {
        // Plan
        history.push(Entry::user(instruction.clone()));
        let transcript = with_system(AGENT_PLAN_SYSTEM, history.window(), None);
        let reply = backend.send(&transcript).await?;
        if let Some(usage) = reply.usage {
            on_usage(usage);
        }
        history.push(Entry::assistant(reply.content.clone()));

        let commands = extract_command_batch(&reply.content);
        if commands.is_empty() {
            return Ok(if executed_any {
                Termination::GoalSatisfied { iterations: iteration }
            } else {
                Termination::NothingToRun
            });
        }

        // Execute: in order, halting the batch at the first failure.
        executed_any = true;
        for command in &commands {
            println!("$ {}", command);
            let result = run_shell_command(command, interrupt)?;
            history.push(Entry::user(format!(
                "user$ {}\n{}\n[{}]",
                command,
                shorten_output(&result.output),
                result.status_label()
            )));
            if !result.success() {
                break;
            }
        }
        // An interrupt only cancels the batch it arrived in.
        interrupt.store(false, Ordering::SeqCst);

        // Analyze
        let question = format!(
            "Goal: {}\nIs the goal satisfied? If not, give the next instruction.",
            goal
        );
        let transcript = with_system(AGENT_ANALYZE_SYSTEM, history.window(), Some(&question));
        let reply = backend.send(&transcript).await?;
        if let Some(usage) = reply.usage {
            on_usage(usage);
        }
        instruction = reply.content;
    }

    Ok(Termination::IterationLimit {
        iterations: options.max_iterations,
    })
}

/// System instruction + trailing history window + optional ephemeral user
/// turn, in transcript order.
fn with_system(system: &str, window: &[Entry], question: Option<&str>) -> Vec<Entry> {
    let mut transcript = Vec::with_capacity(window.len() + 2);
    transcript.push(Entry::new(Role::System, system));
    transcript.extend_from_slice(window);
    if let Some(question) = question {
        transcript.push(Entry::user(question));
    }
    transcript
}

/// Pull the command batch out of a plan response: the first fenced block
/// tagged `sh` or `bash`, one command per line. Blank lines are dropped and
/// trailing-backslash continuations are flattened into a single line, so no
/// batch entry ever contains an embedded line break. No such fence means the
/// model is done.
pub fn extract_command_batch(response: &str) -> Vec<String> {
    let mut lines = response.lines();
    let in_block = lines.by_ref().any(|line| {
        let tag = line.trim_end().trim_start_matches("```");
        line.trim_end().starts_with("```") && (tag == "sh" || tag == "bash")
    });
    if !in_block {
        return Vec::new();
    }

    let mut commands: Vec<String> = Vec::new();
    let mut pending: Option<String> = None;
    for line in lines {
        if line.trim_end() == "```" {
            break;
        }
        let mut text = match pending.take() {
            Some(mut joined) => {
                joined.push_str(line.trim_start());
                joined
            }
            None => line.to_string(),
        };
        if let Some(stripped) = text.strip_suffix('\\') {
            pending = Some(format!("{} ", stripped.trim_end()));
            continue;
        }
        text = text.trim().to_string();
        if !text.is_empty() {
            commands.push(text);
        }
    }
    // A dangling continuation at the end of the fence still counts.
    if let Some(joined) = pending {
        let text = joined.trim().to_string();
        if !text.is_empty() {
            commands.push(text);
        }
    }
    commands
}
