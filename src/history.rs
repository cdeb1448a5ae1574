//! Bounded conversation transcript shared between the REPL and the engines.
//!
//! Entries are role-tagged text turns. The history is append-then-truncate:
//! pushing past the window drops the oldest entries, matching the original
//! shell's "keep the last N turns" behavior.

use serde::Serialize;

/// Default number of trailing turns sent to the model.
pub const DEFAULT_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub role: Role,
    pub content: String,
}

impl Entry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Ordered transcript capped at a configurable window.
///
/// Owned by the session; the patch engine and the agent loop borrow it for
/// the duration of a call and append through `push`. Not safe to mutate from
/// another thread while a loop is running.
#[derive(Debug, Clone)]
pub struct History {
    entries: Vec<Entry>,
    window: usize,
}

impl History {
    pub fn new(window: usize) -> Self {
        Self {
            entries: Vec::new(),
            window: window.max(1),
        }
    }

    /// Append an entry, then truncate to the window from the front.
    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
        if self.entries.len() > self.window {
            let excess = self.entries.len() - self.window;
            self.entries.drain(..excess);
        }
    }

    /// The trailing window, oldest first.
    pub fn window(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_caps_at_window() {
        let mut history = History::new(3);
        for i in 0..5 {
            history.push(Entry::user(format!("turn {}", i)));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.window()[0].content, "turn 2");
        assert_eq!(history.window()[2].content, "turn 4");
    }

    #[test]
    fn test_window_preserves_order() {
        let mut history = History::new(4);
        history.push(Entry::user("question"));
        history.push(Entry::assistant("answer"));
        let roles: Vec<_> = history.window().iter().map(|e| e.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
    }

    #[test]
    fn test_zero_window_is_clamped() {
        let mut history = History::new(0);
        history.push(Entry::user("kept"));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let entry = Entry::new(Role::Assistant, "hi");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"assistant\""));
    }
}
