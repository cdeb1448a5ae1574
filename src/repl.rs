//! The interactive shell session.
//!
//! A plain read-eval loop over stdin. Lines starting with `#` go to the
//! model as chat (and any search/replace blocks in the reply are applied to
//! disk), lines starting with `%` hand a goal to the bash-agent loop, a few
//! builtins are handled locally, and everything else is passed through to
//! `sh`.

use crate::agent::{run_goal, AgentOptions};
use crate::backend::{backend_from_name, ChatBackend, HttpBackend, Usage};
use crate::config::Config;
use crate::exec::{run_shell_command, shorten_output};
use crate::history::{Entry, History, Role};
use crate::patch::{apply_operations, parse_edit_blocks, ApplyError};
use crate::prompts::{CHAT_SYSTEM, DIFF_SYSTEM};
use anyhow::Result;
use std::fs;
use std::io::{BufRead, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const RESET: &str = "\x1b[0m";
const PROMPT_STYLE: &str = "\x1b[1m\x1b[38;5;196m\x1b[48;5;16m";
const COST_STYLE: &str = "\x1b[1m\x1b[38;5;178m";

const HELP: &str = "\
commands:
  # <request>        ask the model; file edits in the reply are applied
  % <goal>           let the model drive the shell toward a goal
  set-llm <name>     switch backend (gpt-4-turbo, gpt-4, gpt-3.5-turbo,
                     openrouter/<model>)
  context [file]     attach a file whose content accompanies every # request
                     (no argument shows it, 'clear' detaches)
  cd [dir]           change directory
  help               this text
  exit               leave the shell
anything else runs as a shell command.";

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Continue,
    Exit,
}

pub struct Session {
    config: Config,
    backend: HttpBackend,
    history: History,
    context_file: Option<PathBuf>,
    interrupt: Arc<AtomicBool>,
    session_cost: f64,
}

impl Session {
    pub fn new(config: Config, interrupt: Arc<AtomicBool>) -> Result<Self> {
        let backend = backend_from_name(&config.backend)?;
        let history = History::new(config.history_window);
        Ok(Self {
            config,
            backend,
            history,
            context_file: None,
            interrupt,
            session_cost: 0.0,
        })
    }

    /// Blocking prompt loop. Runs until `exit` or EOF.
    pub async fn run(&mut self) -> Result<()> {
        let stdin = std::io::stdin();
        loop {
            self.print_prompt();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                // Ctrl-C at the prompt interrupts the read; just re-prompt.
                Err(err) if err.kind() == ErrorKind::Interrupted => {
                    self.interrupt.store(false, Ordering::SeqCst);
                    println!();
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
            if self.handle_line(line.trim()).await? == Outcome::Exit {
                break;
            }
        }
        Ok(())
    }

    /// One-shot `#` request, for non-interactive invocation.
    pub async fn ask(&mut self, instruction: &str) -> Result<()> {
        self.chat(instruction).await
    }

    /// One-shot `%` goal, for non-interactive invocation.
    pub async fn run_agent(&mut self, goal: &str) -> Result<()> {
        self.agent(goal).await
    }

    fn print_prompt(&self) {
        print!("{}", self.prompt_text());
        let _ = std::io::stdout().flush();
    }

    /// `user:cwd <<backend>>$ ` with only the backend tag styled, input on
    /// the same line.
    fn prompt_text(&self) -> String {
        let user = std::env::var("USER").unwrap_or_else(|_| "user".to_string());
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "?".to_string());
        format!(
            "{}:{} {}<<{}>>{}$ ",
            user, cwd, PROMPT_STYLE, self.config.backend, RESET
        )
    }

    async fn handle_line(&mut self, line: &str) -> Result<Outcome> {
        if line.is_empty() {
            return Ok(Outcome::Continue);
        }
        // A failed model call kills the step, never the shell: print the
        // reason and come back to the prompt.
        if let Some(instruction) = line.strip_prefix('#') {
            if let Err(err) = self.chat(instruction.trim()).await {
                eprintln!("backend call failed: {:#}", err);
            }
            return Ok(Outcome::Continue);
        }
        if let Some(goal) = line.strip_prefix('%') {
            if let Err(err) = self.agent(goal.trim()).await {
                eprintln!("backend call failed: {:#}", err);
            }
            return Ok(Outcome::Continue);
        }

        let (command, rest) = split_command(line);
        match command {
            "exit" | "quit" => return Ok(Outcome::Exit),
            "help" => println!("{}", HELP),
            "cd" => self.change_directory(rest),
            "set-llm" => self.set_backend(rest),
            "context" => self.set_context(rest),
            _ => self.passthrough(line)?,
        }
        Ok(Outcome::Continue)
    }

    // ═══════════════════════ builtins ═══════════════════════

    fn change_directory(&self, arg: &str) {
        let target = if arg.is_empty() {
            dirs::home_dir()
        } else {
            Some(PathBuf::from(arg))
        };
        match target {
            Some(path) => {
                if let Err(err) = std::env::set_current_dir(&path) {
                    eprintln!("cd: {}: {}", path.display(), err);
                }
            }
            None => eprintln!("cd: could not determine home directory"),
        }
    }

    fn set_backend(&mut self, name: &str) {
        if name.is_empty() {
            println!("current backend: {}", self.config.backend);
            return;
        }
        match backend_from_name(name) {
            Ok(backend) => {
                self.backend = backend;
                self.config.backend = name.to_string();
                if let Err(err) = self.config.save() {
                    eprintln!("warning: could not persist config: {}", err);
                }
                println!("backend set to {}", name);
            }
            Err(err) => eprintln!("{}", err),
        }
    }

    fn set_context(&mut self, arg: &str) {
        match arg {
            "" => match &self.context_file {
                Some(path) => println!("context file: {}", path.display()),
                None => println!("no context file attached"),
            },
            "clear" | "none" => {
                self.context_file = None;
                println!("context file detached");
            }
            path => {
                let path = PathBuf::from(path);
                if path.is_file() {
                    println!("context file: {}", path.display());
                    self.context_file = Some(path);
                } else {
                    eprintln!("context: {} is not a readable file", path.display());
                }
            }
        }
    }

    fn passthrough(&mut self, line: &str) -> Result<()> {
        self.interrupt.store(false, Ordering::SeqCst);
        let result = run_shell_command(line, &self.interrupt)?;
        // The model sees what the user has been doing at the shell.
        self.history.push(Entry::user(format!(
            "user$ {}\n{}",
            line,
            shorten_output(&result.output)
        )));
        Ok(())
    }

    // ═══════════════════════ model flows ═══════════════════════

    async fn chat(&mut self, instruction: &str) -> Result<()> {
        if instruction.is_empty() {
            return Ok(());
        }
        if let Some(reason) = self.budget_block() {
            eprintln!("{}", reason);
            return Ok(());
        }

        let mut transcript = vec![
            Entry::new(Role::System, CHAT_SYSTEM),
            Entry::new(Role::System, DIFF_SYSTEM),
        ];
        if let Some(path) = &self.context_file {
            if let Some(entry) = context_entry(path) {
                transcript.push(entry);
            }
        }
        transcript.extend_from_slice(self.history.window());
        transcript.push(Entry::user(instruction));

        let reply = self.backend.send(&transcript).await?;
        println!("{}", reply.content);

        self.history.push(Entry::user(instruction));
        self.history.push(Entry::assistant(reply.content.clone()));
        self.account(reply.usage);

        let operations = parse_edit_blocks(&reply.content);
        for applied in apply_operations(operations) {
            match &applied.result {
                Ok(()) => println!("applied: {}", applied.operation.file_path.display()),
                Err(ApplyError::TargetNotFound { path }) => {
                    eprintln!("skipped {}: search text not found", path.display())
                }
                Err(err) => eprintln!("patch failed: {}", err),
            }
        }
        Ok(())
    }

    async fn agent(&mut self, goal: &str) -> Result<()> {
        if goal.is_empty() {
            return Ok(());
        }
        if let Some(reason) = self.budget_block() {
            eprintln!("{}", reason);
            return Ok(());
        }

        self.interrupt.store(false, Ordering::SeqCst);
        let options = AgentOptions {
            max_iterations: self.config.agent_max_iterations,
        };
        let mut usages: Vec<Usage> = Vec::new();
        let termination = run_goal(
            &self.backend,
            &mut self.history,
            goal,
            &self.interrupt,
            &options,
            |usage| usages.push(usage),
        )
        .await?;

        for usage in usages {
            self.account(Some(usage));
        }
        println!("[agent] {}", termination.describe());
        Ok(())
    }

    /// A human-readable refusal when a spending limit has been reached, or
    /// `None` when calls may proceed.
    fn budget_block(&mut self) -> Option<String> {
        if self.config.tokens_remaining_today() == Some(0) {
            return Some(
                "daily token budget exhausted; raise daily_token_budget in the config to continue"
                    .to_string(),
            );
        }
        if let Some(ceiling) = self.config.session_cost_ceiling {
            if self.session_cost >= ceiling {
                return Some(format!(
                    "session cost ${:.4} reached the ${:.2} ceiling; restart to continue",
                    self.session_cost, ceiling
                ));
            }
        }
        None
    }

    fn account(&mut self, usage: Option<Usage>) {
        let Some(usage) = usage else { return };
        self.config.record_tokens(u64::from(usage.total_tokens));
        if let Err(err) = self.config.save() {
            eprintln!("warning: could not persist usage: {}", err);
        }
        let cost = self.backend.estimate_cost(&usage);
        if let Some(cost) = cost {
            self.session_cost += cost;
        }
        let cost_text = cost
            .map(|c| format!("${:.4}", c))
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "{}tokens: {} (today: {})  cost: {} (session: ${:.4}){}",
            COST_STYLE, usage.total_tokens, self.config.usage.tokens, cost_text, self.session_cost, RESET
        );
    }
}

/// Transcript entry for the attached context file, in the shell register the
/// model already knows: `cat <file>` followed by its contents.
fn context_entry(path: &Path) -> Option<Entry> {
    match fs::read_to_string(path) {
        Ok(content) => Some(Entry::user(format!("cat {}\n{}", path.display(), content))),
        Err(err) => {
            eprintln!(
                "warning: could not read context file {}: {}",
                path.display(),
                err
            );
            None
        }
    }
}

/// Split a line into its first word and the remainder.
fn split_command(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    }
}
