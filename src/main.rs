use anyhow::Result;
use clap::Parser;
use llmsh::config::Config;
use llmsh::repl::Session;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "llmsh", version, about = "A shell with a language model riding along")]
struct Cli {
    /// Write a default config file and exit.
    #[arg(long)]
    setup: bool,

    /// Backend for this session, overriding the config.
    #[arg(long, value_name = "NAME")]
    backend: Option<String>,

    /// Send one request to the model, apply any edits, and exit.
    #[arg(long, value_name = "INSTRUCTION")]
    ask: Option<String>,

    /// Run the bash-agent loop toward a goal and exit.
    #[arg(long, value_name = "GOAL")]
    agent: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.setup {
        let config = Config::default();
        config.save()?;
        println!("wrote {}", Config::path()?.display());
        return Ok(());
    }

    let mut config = Config::load()?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }

    // Ctrl-C raises a flag instead of killing the process; whatever command
    // is running gets killed and the prompt comes back.
    let interrupt = Arc::new(AtomicBool::new(false));
    {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    break;
                }
                interrupt.store(true, Ordering::SeqCst);
            }
        });
    }

    let mut session = Session::new(config, interrupt)?;
    if let Some(instruction) = cli.ask {
        return session.ask(&instruction).await;
    }
    if let Some(goal) = cli.agent {
        return session.run_agent(&goal).await;
    }
    session.run().await
}
