//! Shell command execution with live output and interrupt handling.
//!
//! Commands run under `sh -c`. Output is streamed to the terminal line by
//! line as it is produced (a liveness concern for the person watching, not a
//! concurrency feature) while being captured for the conversation history.
//! An interrupt raised mid-command kills the child and marks the step failed.

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// History entries keep at most this many characters of command output.
const MAX_TRANSCRIPT_CHARS: usize = 2000;

/// Outcome of one shell command.
#[derive(Debug)]
pub struct CommandResult {
    /// Captured stdout, with stderr appended under a separator when present.
    pub output: String,
    pub exit_code: Option<i32>,
    pub interrupted: bool,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        !self.interrupted && self.exit_code == Some(0)
    }

    /// Exit status as shown to the model: interrupts read as failures.
    pub fn status_label(&self) -> String {
        if self.interrupted {
            "interrupted".to_string()
        } else {
            match self.exit_code {
                Some(code) => format!("exit {}", code),
                None => "killed".to_string(),
            }
        }
    }
}

/// Run a command, echoing output as it arrives and polling the interrupt
/// flag. Runs the child to completion (or kill) before returning; the caller
/// never has more than one command in flight.
pub fn run_shell_command(command: &str, interrupt: &Arc<AtomicBool>) -> Result<CommandResult> {
    let mut child = Command::new("sh")
        .args(["-c", command])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to start command: {}", command))?;

    let stdout = child
        .stdout
        .take()
        .context("failed to capture stdout")?;
    let stderr = child
        .stderr
        .take()
        .context("failed to capture stderr")?;

    let stdout_handle = thread::spawn(move || {
        let mut captured = String::new();
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            println!("{}", line);
            captured.push_str(&line);
            captured.push('\n');
        }
        captured
    });
    let stderr_handle = thread::spawn(move || {
        let mut captured = String::new();
        for line in BufReader::new(stderr).lines().map_while(Result::ok) {
            eprintln!("{}", line);
            captured.push_str(&line);
            captured.push('\n');
        }
        captured
    });

    let mut interrupted = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {
                if interrupt.load(Ordering::SeqCst) {
                    interrupted = true;
                    let _ = child.kill();
                    break child.wait().ok();
                }
                thread::sleep(Duration::from_millis(50));
            }
            Err(err) => return Err(err).context("failed to wait for command"),
        }
    };

    let stdout_text = stdout_handle.join().unwrap_or_default();
    let stderr_text = stderr_handle.join().unwrap_or_default();

    let mut output = stdout_text;
    if !stderr_text.is_empty() {
        if !output.is_empty() {
            output.push_str("--- stderr ---\n");
        }
        output.push_str(&stderr_text);
    }

    Ok(CommandResult {
        output,
        exit_code: status.and_then(|s| s.code()),
        interrupted,
    })
}

/// Keep the head and tail of long output, like the original shell did, so a
/// chatty build log doesn't flood the model's context window.
pub fn shorten_output(output: &str) -> String {
    let total = output.chars().count();
    if total <= MAX_TRANSCRIPT_CHARS {
        return output.to_string();
    }
    let keep = MAX_TRANSCRIPT_CHARS / 2;
    let head: String = output.chars().take(keep).collect();
    let tail_rev: String = output.chars().rev().take(keep).collect();
    let tail: String = tail_rev.chars().rev().collect();
    format!("{}\n...\n{}", head, tail)
}
