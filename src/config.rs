//! Persistent configuration and daily usage accounting.
//!
//! Stored as JSON at `~/.config/llmsh/config.json`. Unknown fields are
//! ignored and missing fields take defaults, so old config files keep
//! working across upgrades. A file that fails to parse is set aside as
//! `config.json.corrupt` rather than deleted, and defaults take over.

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_BACKEND: &str = "gpt-4-turbo";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend name as understood by the backend lookup.
    pub backend: String,
    /// Trailing conversation turns sent with each model call.
    pub history_window: usize,
    /// Plan/Execute/Analyze rounds before the agent loop gives up.
    pub agent_max_iterations: usize,
    /// Cap on total tokens spent per calendar day. `None` means unlimited.
    pub daily_token_budget: Option<u64>,
    /// USD ceiling for a single session. `None` means unlimited.
    pub session_cost_ceiling: Option<f64>,
    /// Rolling same-day token count.
    pub usage: DailyUsage,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            history_window: crate::history::DEFAULT_WINDOW,
            agent_max_iterations: crate::agent::DEFAULT_MAX_ITERATIONS,
            daily_token_budget: None,
            session_cost_ceiling: None,
            usage: DailyUsage::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyUsage {
    /// Local calendar date the counter belongs to, `YYYY-MM-DD`.
    pub date: String,
    pub tokens: u64,
}

impl Config {
    pub fn path() -> Result<PathBuf> {
        let base = dirs::config_dir().context("could not determine config directory")?;
        Ok(base.join("llmsh").join("config.json"))
    }

    pub fn load() -> Result<Self> {
        Ok(Self::load_from(&Self::path()?))
    }

    /// Read a config file, falling back to defaults when it is absent and
    /// preserving (not deleting) a file that fails to parse.
    pub fn load_from(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&text) {
            Ok(config) => config,
            Err(err) => {
                let corrupt = path.with_extension("json.corrupt");
                if fs::rename(path, &corrupt).is_ok() {
                    eprintln!(
                        "warning: config file was unreadable ({}); preserved at {}",
                        err,
                        corrupt.display()
                    );
                } else {
                    eprintln!("warning: config file was unreadable ({}); using defaults", err);
                }
                Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path()?)
    }

    /// Atomic write: serialize to a sibling temp file, then rename over the
    /// target so a crash never leaves a half-written config behind.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o700));
            }
        }

        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600));
        }
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }

    /// Add to today's token count, resetting the counter on the first call of
    /// a new calendar day.
    pub fn record_tokens(&mut self, tokens: u64) {
        self.roll_over();
        self.usage.tokens = self.usage.tokens.saturating_add(tokens);
    }

    /// Tokens left under today's budget, or `None` when no budget is set.
    pub fn tokens_remaining_today(&mut self) -> Option<u64> {
        self.roll_over();
        self.daily_token_budget
            .map(|budget| budget.saturating_sub(self.usage.tokens))
    }

    fn roll_over(&mut self) {
        let today = Local::now().format("%Y-%m-%d").to_string();
        if self.usage.date != today {
            self.usage = DailyUsage {
                date: today,
                tokens: 0,
            };
        }
    }
}
