//! Fuzzy application of one edit operation against a real file.
//!
//! Models frequently remember code at the wrong indentation level (a method
//! body without its enclosing class indent) or insert and omit blank lines.
//! The matcher recovers the intended region with two tolerances: blank file
//! lines never break an alignment, and the whole search text is retried with
//! a growing indentation prefix up to a fixed ceiling. The first full match
//! at the smallest indent wins.
//!
//! Tabs are normalized to four spaces in both the file and the edit before
//! comparison, and the normalized text is what gets written back. Original
//! tab usage is not restored; that loss is accepted, not a bug.

use super::{ApplyError, EditOperation};
use std::fs;
use std::io::ErrorKind;

/// Indent levels probed, in spaces: 0, 2, 4, … up to the ceiling inclusive.
const INDENT_STEP: usize = 2;
const INDENT_CEILING: usize = 40;

/// A located search region: zero-indexed line span (end exclusive) plus the
/// number of leading spaces hypothesized to have been stripped from the
/// search text relative to the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult {
    pub start_line: usize,
    pub end_line: usize,
    pub indent: usize,
}

/// Apply one operation, overwriting the file on success.
///
/// The write is a plain whole-file overwrite: no atomic rename, no backup. A
/// crash mid-write can corrupt the target; callers wanting durability should
/// snapshot externally (version control).
pub fn apply_operation(op: &EditOperation) -> Result<(), ApplyError> {
    let search = normalize_tabs(&op.search_text);
    let replace = normalize_tabs(&op.replace_text);

    let search_lines: Vec<&str> = search
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();

    // Empty search (or blank-only search) means: this is the whole file.
    if search_lines.is_empty() {
        return fs::write(&op.file_path, &replace).map_err(|source| ApplyError::Io {
            path: op.file_path.clone(),
            source,
        });
    }

    // A file that does not exist yet simply has no content to match against;
    // that is a patch-target problem, not an environment problem.
    let content = match fs::read_to_string(&op.file_path) {
        Ok(content) => normalize_tabs(&content),
        Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
        Err(source) => {
            return Err(ApplyError::Io {
                path: op.file_path.clone(),
                source,
            })
        }
    };

    let file_lines: Vec<&str> = content.lines().collect();

    let located = locate(&file_lines, &search_lines).ok_or_else(|| ApplyError::TargetNotFound {
        path: op.file_path.clone(),
    })?;

    let indent_prefix = " ".repeat(located.indent);
    let mut new_lines: Vec<String> = Vec::with_capacity(file_lines.len());
    new_lines.extend(file_lines[..located.start_line].iter().map(|l| l.to_string()));
    for line in replace.lines() {
        if line.trim().is_empty() {
            new_lines.push(line.to_string());
        } else {
            new_lines.push(format!("{}{}", indent_prefix, line));
        }
    }
    new_lines.extend(file_lines[located.end_line..].iter().map(|l| l.to_string()));

    let mut updated = new_lines.join("\n");
    if content.ends_with('\n') {
        updated.push('\n');
    }

    fs::write(&op.file_path, updated).map_err(|source| ApplyError::Io {
        path: op.file_path.clone(),
        source,
    })
}

/// Indentation-probing search: an explicit bounded loop, never recursion, so
/// the ceiling stays a visible parameter and stack usage stays constant.
pub fn locate(file_lines: &[&str], search_lines: &[&str]) -> Option<MatchResult> {
    let mut indent = 0;
    while indent <= INDENT_CEILING {
        if let Some((start_line, end_line)) = align_at_indent(file_lines, search_lines, indent) {
            return Some(MatchResult {
                start_line,
                end_line,
                indent,
            });
        }
        indent += INDENT_STEP;
    }
    None
}

/// Try to align every search line (prefixed with `indent` spaces) against the
/// file, skipping blank file lines between matches. Blank lines in the file
/// are tolerated; they are never required to align with anything.
fn align_at_indent(
    file_lines: &[&str],
    search_lines: &[&str],
    indent: usize,
) -> Option<(usize, usize)> {
    let prefix = " ".repeat(indent);
    let prefixed: Vec<String> = search_lines
        .iter()
        .map(|line| format!("{}{}", prefix, line))
        .collect();

    'candidates: for start in 0..file_lines.len() {
        if file_lines[start].trim().is_empty() {
            continue;
        }
        if file_lines[start] != prefixed[0] {
            continue;
        }

        let mut file_idx = start + 1;
        let mut last_matched = start;
        for search_line in &prefixed[1..] {
            while file_idx < file_lines.len() && file_lines[file_idx].trim().is_empty() {
                file_idx += 1;
            }
            if file_idx >= file_lines.len() || file_lines[file_idx] != *search_line {
                continue 'candidates;
            }
            last_matched = file_idx;
            file_idx += 1;
        }

        return Some((start, last_matched + 1));
    }

    None
}

fn normalize_tabs(text: &str) -> String {
    text.replace('\t', "    ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn op(path: PathBuf, search: &str, replace: &str) -> EditOperation {
        EditOperation {
            file_path: path,
            search_text: search.to_string(),
            replace_text: replace.to_string(),
        }
    }

    #[test]
    fn test_concrete_scenario_single_line() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.py");
        fs::write(&file, "x = 1").unwrap();

        apply_operation(&op(file.clone(), "x = 1", "x = 2")).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "x = 2");
    }

    #[test]
    fn test_trailing_newline_preserved() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.py");
        fs::write(&file, "x = 1\n").unwrap();

        apply_operation(&op(file.clone(), "x = 1", "x = 2")).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "x = 2\n");
    }

    #[test]
    fn test_empty_search_creates_file_idempotently() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("fresh.py");

        let create = op(file.clone(), "", "print('hello')\n");
        apply_operation(&create).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "print('hello')\n");

        // Overwrite-idempotent: a second application yields the same content.
        apply_operation(&create).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "print('hello')\n");
    }

    #[test]
    fn test_indentation_probing_matches_shifted_region() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("m.py");
        fs::write(&file, "class C:\n  def f(self):\n    return 1\n").unwrap();

        // Search recalled without the class-level indent.
        apply_operation(&op(
            file.clone(),
            "def f(self):\n  return 1",
            "def f(self):\n  return 2",
        ))
        .unwrap();
        assert_eq!(
            fs::read_to_string(&file).unwrap(),
            "class C:\n  def f(self):\n    return 2\n"
        );
    }

    #[test]
    fn test_smallest_indent_level_preferred() {
        let file_lines = vec!["marker", "  marker"];
        let search_lines = vec!["marker"];
        let found = locate(&file_lines, &search_lines).unwrap();
        assert_eq!(found.indent, 0);
        assert_eq!((found.start_line, found.end_line), (0, 1));
    }

    #[test]
    fn test_indent_offset_reported() {
        let file_lines = vec!["class C:", "    def f():", "        pass"];
        let search_lines = vec!["def f():", "    pass"];
        let found = locate(&file_lines, &search_lines).unwrap();
        assert_eq!(found.indent, 4);
        assert_eq!((found.start_line, found.end_line), (1, 3));
    }

    #[test]
    fn test_blank_lines_in_file_tolerated() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("b.py");
        fs::write(&file, "one\n\n\ntwo\nthree\n").unwrap();

        apply_operation(&op(file.clone(), "one\ntwo", "ONE\nTWO")).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "ONE\nTWO\nthree\n");
    }

    #[test]
    fn test_blank_lines_in_search_ignored() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("c.py");
        fs::write(&file, "alpha\nbeta\n").unwrap();

        apply_operation(&op(file.clone(), "alpha\n\nbeta", "gamma")).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "gamma\n");
    }

    #[test]
    fn test_not_found_leaves_file_untouched() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("d.py");
        fs::write(&file, "keep me\n").unwrap();

        let err = apply_operation(&op(file.clone(), "never there", "x")).unwrap_err();
        assert!(matches!(err, ApplyError::TargetNotFound { .. }));
        assert_eq!(fs::read_to_string(&file).unwrap(), "keep me\n");
    }

    #[test]
    fn test_missing_file_reports_not_found_not_io() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("absent.py");

        let err = apply_operation(&op(file, "anything", "x")).unwrap_err();
        assert!(matches!(err, ApplyError::TargetNotFound { .. }));
    }

    #[test]
    fn test_missing_parent_directory_is_io_failure() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("no/such/dir/e.py");

        let err = apply_operation(&op(file, "", "content")).unwrap_err();
        assert!(matches!(err, ApplyError::Io { .. }));
    }

    #[test]
    fn test_tabs_normalized_before_matching() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("t.py");
        fs::write(&file, "def f():\n\treturn 1\n").unwrap();

        apply_operation(&op(
            file.clone(),
            "def f():\n    return 1",
            "def f():\n    return 2",
        ))
        .unwrap();
        // Normalization is lossy on purpose: tabs come back as spaces.
        assert_eq!(
            fs::read_to_string(&file).unwrap(),
            "def f():\n    return 2\n"
        );
    }

    #[test]
    fn test_replacement_reindented_to_discovered_offset() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("r.py");
        fs::write(&file, "  inner = 1\n").unwrap();

        apply_operation(&op(file.clone(), "inner = 1", "inner = 2\nextra = 3")).unwrap();
        assert_eq!(
            fs::read_to_string(&file).unwrap(),
            "  inner = 2\n  extra = 3\n"
        );
    }

    #[test]
    fn test_probing_stops_at_ceiling() {
        let deep = format!("{}marker", " ".repeat(INDENT_CEILING + 2));
        let file_lines = vec![deep.as_str()];
        let search_lines = vec!["marker"];
        assert!(locate(&file_lines, &search_lines).is_none());
    }

    #[test]
    fn test_empty_replace_deletes_span() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("del.py");
        fs::write(&file, "a\nb\nc\n").unwrap();

        apply_operation(&op(file.clone(), "b", "")).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "a\nc\n");
    }
}
