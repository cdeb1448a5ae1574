//! llmsh — a shell with a language model riding along.
//!
//! The crate is organized around three pieces: the patch engine
//! ([`patch`]), which turns search/replace blocks in model output into file
//! edits; the bash-agent loop ([`agent`]), which iterates shell commands
//! toward a stated goal; and the interactive session ([`repl`]) that wires
//! both to a configured model backend.

pub mod agent;
pub mod backend;
pub mod config;
pub mod exec;
pub mod history;
pub mod patch;
pub mod prompts;
pub mod repl;
