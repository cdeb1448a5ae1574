//! The code-patch engine: protocol parsing plus fuzzy application.
//!
//! `parse` turns raw model output into an ordered list of [`EditOperation`]s;
//! `apply` locates each operation's search text in the target file with
//! indentation-tolerant matching and rewrites the file. The engine guarantees
//! syntactic application only; it never judges whether the edit makes sense.

pub mod apply;
pub mod parse;

use std::path::PathBuf;

pub use apply::{apply_operation, MatchResult};
pub use parse::parse_edit_blocks;

/// One file-scoped search/replace instruction extracted from model output.
///
/// An empty `search_text` means "write `replace_text` as the file's full
/// contents". Operations are applied in the order they were parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOperation {
    pub file_path: PathBuf,
    pub search_text: String,
    pub replace_text: String,
}

impl EditOperation {
    /// Whether this operation creates (or overwrites) the whole file.
    pub fn is_create(&self) -> bool {
        self.search_text.is_empty()
    }
}

/// Per-operation application failure.
///
/// `TargetNotFound` is a text-matching problem (the model misremembered the
/// file); `Io` is an environment problem. Callers report them differently, so
/// they must stay distinct variants.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("patch target not found in {path}")]
    TargetNotFound { path: PathBuf },

    #[error("i/o failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of one operation within a batch.
#[derive(Debug)]
pub struct AppliedEdit {
    pub operation: EditOperation,
    pub result: Result<(), ApplyError>,
}

/// Apply a batch of operations in order.
///
/// A failing operation leaves its file unmodified but does not stop the
/// batch; later operations still run. Edits to the same file see the content
/// produced by earlier edits, not the original.
pub fn apply_operations(operations: Vec<EditOperation>) -> Vec<AppliedEdit> {
    operations
        .into_iter()
        .map(|operation| {
            let result = apply_operation(&operation);
            AppliedEdit { operation, result }
        })
        .collect()
}
