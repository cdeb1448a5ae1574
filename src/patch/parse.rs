//! Extraction of search/replace edit blocks from raw model output.
//!
//! The protocol embeds edits in fenced blocks:
//!
//! ````text
//! webserver.py
//! ```
//! <<<<<<< SEARCH
//! old lines
//! =======
//! new lines
//! >>>>>>> REPLACE
//! ```
//! ````
//!
//! Models are inconsistent about where the file path goes (the line before
//! the fence, or the first line inside it) and about closing fences, so the
//! parser is a forgiving line tokenizer: anything that does not complete the
//! grammar is skipped without error, and the caller only ever sees
//! well-formed operations.

use super::EditOperation;
use std::path::PathBuf;

const SEARCH_MARKER: &str = "<<<<<<< SEARCH";
const DIVIDER: &str = "=======";
const REPLACE_MARKER: &str = ">>>>>>> REPLACE";

/// Parse every well-formed edit block out of a model response.
///
/// A path stated before one block persists for later path-less blocks until a
/// new path is stated. Blocks that never resolve to a path are dropped.
pub fn parse_edit_blocks(response: &str) -> Vec<EditOperation> {
    let lines: Vec<&str> = response.lines().collect();
    let mut operations = Vec::new();
    let mut carried_path: Option<PathBuf> = None;

    let mut i = 0;
    while i < lines.len() {
        if !is_fence(lines[i]) {
            i += 1;
            continue;
        }

        let outside = if i > 0 { path_candidate(lines[i - 1]) } else { None };

        let Some(block) = scan_block(&lines, i + 1) else {
            // Malformed fence: resume scanning just past the opener.
            i += 1;
            continue;
        };

        if let Some(path) = resolve_path(block.inside_path, outside, &carried_path) {
            carried_path = Some(path.clone());
            operations.push(EditOperation {
                file_path: path,
                search_text: block.search,
                replace_text: block.replace,
            });
        }
        i = block.resume_at;
    }

    operations
}

struct Block {
    inside_path: Option<String>,
    search: String,
    replace: String,
    /// Index of the first line after the block (closing fence consumed).
    resume_at: usize,
}

/// Walk the grammar from just after a fence opener. Returns `None` on any
/// deviation; the caller treats that as "not an edit block".
fn scan_block(lines: &[&str], start: usize) -> Option<Block> {
    let mut i = start;

    // Optional path line between the fence and the search marker.
    let inside_path = if i < lines.len() && is_marker(lines[i], SEARCH_MARKER) {
        i += 1;
        None
    } else if i + 1 < lines.len() && is_marker(lines[i + 1], SEARCH_MARKER) {
        let candidate = path_candidate(lines[i]);
        i += 2;
        candidate
    } else {
        return None;
    };

    let mut search_lines = Vec::new();
    loop {
        let line = *lines.get(i)?;
        if is_marker(line, DIVIDER) {
            i += 1;
            break;
        }
        if is_marker(line, REPLACE_MARKER) {
            return None;
        }
        search_lines.push(line);
        i += 1;
    }

    let mut replace_lines = Vec::new();
    loop {
        let line = *lines.get(i)?;
        if is_marker(line, REPLACE_MARKER) {
            i += 1;
            break;
        }
        replace_lines.push(line);
        i += 1;
    }

    // Consume the closing fence when the model bothered to emit one.
    if i < lines.len() && lines[i].trim_end() == "```" {
        i += 1;
    }

    Some(Block {
        inside_path,
        search: join_section(search_lines),
        replace: join_section(replace_lines),
        resume_at: i,
    })
}

/// Join section lines, trimming at most one leading and one trailing blank
/// line. Internal blank lines and all indentation are preserved verbatim.
fn join_section(mut lines: Vec<&str>) -> String {
    if lines.first().is_some_and(|l| l.trim().is_empty()) {
        lines.remove(0);
    }
    if lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

fn is_fence(line: &str) -> bool {
    line.trim_end().starts_with("```")
}

/// Marker lines are literal, case-sensitive, trailing spaces tolerated.
fn is_marker(line: &str, marker: &str) -> bool {
    line.trim_end() == marker
}

/// A line that might name a file: non-blank, not part of the grammar itself,
/// optionally wrapped in backticks.
fn path_candidate(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || is_fence(trimmed) {
        return None;
    }
    if [SEARCH_MARKER, DIVIDER, REPLACE_MARKER].contains(&trimmed) {
        return None;
    }
    let stripped = trimmed
        .strip_prefix('`')
        .and_then(|s| s.strip_suffix('`'))
        .unwrap_or(trimmed);
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

/// Looks like a real path rather than a bare token or prose.
fn looks_like_path(candidate: &str) -> bool {
    !candidate.contains(char::is_whitespace)
        && (candidate.contains('.') || candidate.contains('/'))
}

/// Pick the block's path: the more path-like of the two candidate positions,
/// falling back to the most recently seen path.
fn resolve_path(
    inside: Option<String>,
    outside: Option<String>,
    carried: &Option<PathBuf>,
) -> Option<PathBuf> {
    for candidate in [&inside, &outside].into_iter().flatten() {
        if looks_like_path(candidate) {
            return Some(PathBuf::from(candidate));
        }
    }
    carried.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_block_with_leading_path() {
        let blob = "a.py\n```\n<<<<<<< SEARCH\nx = 1\n=======\nx = 2\n>>>>>>> REPLACE\n```\n";
        let ops = parse_edit_blocks(blob);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].file_path, PathBuf::from("a.py"));
        assert_eq!(ops[0].search_text, "x = 1");
        assert_eq!(ops[0].replace_text, "x = 2");
    }

    #[test]
    fn test_create_file_block_has_empty_search() {
        let blob = "new.py\n```\n<<<<<<< SEARCH\n=======\nprint('hi')\n>>>>>>> REPLACE\n```\n";
        let ops = parse_edit_blocks(blob);
        assert_eq!(ops.len(), 1);
        assert!(ops[0].is_create());
        assert_eq!(ops[0].replace_text, "print('hi')");
    }

    #[test]
    fn test_path_inside_fence() {
        let blob = "```python\nsrc/app.py\n<<<<<<< SEARCH\nold\n=======\nnew\n>>>>>>> REPLACE\n```\n";
        let ops = parse_edit_blocks(blob);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].file_path, PathBuf::from("src/app.py"));
    }

    #[test]
    fn test_backtick_wrapped_path() {
        let blob = "`lib/util.rs`\n```\n<<<<<<< SEARCH\nold\n=======\nnew\n>>>>>>> REPLACE\n```\n";
        let ops = parse_edit_blocks(blob);
        assert_eq!(ops[0].file_path, PathBuf::from("lib/util.rs"));
    }

    #[test]
    fn test_bare_token_defers_to_carried_path() {
        // "rust" is a language tag echoed on its own line, not a path.
        let blob = "\
a.py
```
<<<<<<< SEARCH
one
=======
two
>>>>>>> REPLACE
```

rust
```
<<<<<<< SEARCH
three
=======
four
>>>>>>> REPLACE
```
";
        let ops = parse_edit_blocks(blob);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1].file_path, PathBuf::from("a.py"));
    }

    #[test]
    fn test_pathless_blocks_inherit_most_recent_path() {
        let blob = "\
a.py
```
<<<<<<< SEARCH
a1
=======
a2
>>>>>>> REPLACE
```
b.py
```
<<<<<<< SEARCH
b1
=======
b2
>>>>>>> REPLACE
```

```
<<<<<<< SEARCH
c1
=======
c2
>>>>>>> REPLACE
```
";
        let ops = parse_edit_blocks(blob);
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].file_path, PathBuf::from("a.py"));
        assert_eq!(ops[1].file_path, PathBuf::from("b.py"));
        // Third block has no path line and inherits b.py.
        assert_eq!(ops[2].file_path, PathBuf::from("b.py"));
    }

    #[test]
    fn test_malformed_fence_is_skipped_silently() {
        let blob = "\
a.py
```
this fence has no markers at all
```
b.py
```
<<<<<<< SEARCH
ok
=======
fine
>>>>>>> REPLACE
```
";
        let ops = parse_edit_blocks(blob);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].file_path, PathBuf::from("b.py"));
    }

    #[test]
    fn test_divider_required_before_replace_marker() {
        let blob = "a.py\n```\n<<<<<<< SEARCH\nx\n>>>>>>> REPLACE\n```\n";
        assert!(parse_edit_blocks(blob).is_empty());
    }

    #[test]
    fn test_marker_trailing_spaces_tolerated() {
        let blob =
            "a.py\n```\n<<<<<<< SEARCH  \nx = 1\n=======   \nx = 2\n>>>>>>> REPLACE \n```\n";
        let ops = parse_edit_blocks(blob);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].search_text, "x = 1");
    }

    #[test]
    fn test_single_blank_line_trimmed_indentation_kept() {
        let blob = "\
a.py
```
<<<<<<< SEARCH

    def f(self):
        return 1

=======

    def f(self):
        return 2

>>>>>>> REPLACE
```
";
        let ops = parse_edit_blocks(blob);
        assert_eq!(ops[0].search_text, "    def f(self):\n        return 1");
        assert_eq!(ops[0].replace_text, "    def f(self):\n        return 2");
    }

    #[test]
    fn test_pathless_block_with_no_carried_path_is_dropped() {
        let blob = "```\n<<<<<<< SEARCH\nx\n=======\ny\n>>>>>>> REPLACE\n```\n";
        assert!(parse_edit_blocks(blob).is_empty());
    }

    #[test]
    fn test_prose_without_fences_yields_nothing() {
        let blob = "Here is how you could fix the bug.\nJust change x to 2.\n";
        assert!(parse_edit_blocks(blob).is_empty());
    }

    #[test]
    fn test_unterminated_block_at_eof_is_dropped() {
        let blob = "a.py\n```\n<<<<<<< SEARCH\nx = 1\n=======\nx = 2\n";
        assert!(parse_edit_blocks(blob).is_empty());
    }

    #[test]
    fn test_two_files_in_one_response() {
        let blob = "\
First:

webserver.py
```
<<<<<<< SEARCH
=======
print('server')
>>>>>>> REPLACE
```

Then:

runtest.py
```
<<<<<<< SEARCH
=======
print('test')
>>>>>>> REPLACE
```
";
        let ops = parse_edit_blocks(blob);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].file_path, PathBuf::from("webserver.py"));
        assert_eq!(ops[1].file_path, PathBuf::from("runtest.py"));
    }
}
