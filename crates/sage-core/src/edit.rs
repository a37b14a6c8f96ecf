//! Multi-strategy string matching for `edit_file`.
//!
//! A cascade of matching strategies, tried most-precise first, so a model's
//! slightly-off `old_string` (trailing whitespace drift, re-indentation,
//! escaped newlines) still resolves to a unique edit point instead of
//! failing outright.

/// Result of a single strategy's match attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchResult {
    pub success: bool,
    pub start: i64,
    pub end: i64,
    pub matched_text: String,
    pub strategy: String,
}

impl MatchResult {
    fn fail(strategy: &str) -> Self {
        Self {
            success: false,
            start: -1,
            end: -1,
            matched_text: String::new(),
            strategy: strategy.to_string(),
        }
    }
}

fn rstrip_lines(text: &str) -> String {
    text.split('\n')
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

fn exact_match(content: &str, search: &str) -> MatchResult {
    let count = content.matches(search).count();
    if count == 1 {
        let pos = content.find(search).unwrap();
        return MatchResult {
            success: true,
            start: pos as i64,
            end: (pos + search.len()) as i64,
            matched_text: search.to_string(),
            strategy: "exact".to_string(),
        };
    }
    MatchResult::fail("exact")
}

fn line_trimmed_match(content: &str, search: &str) -> MatchResult {
    let trimmed_content = rstrip_lines(content);
    let trimmed_search = rstrip_lines(search);

    let count = trimmed_content.matches(&trimmed_search).count();
    if count != 1 {
        return MatchResult::fail("line_trimmed");
    }

    let trimmed_pos = trimmed_content.find(&trimmed_search).unwrap();
    let lines_before = trimmed_content[..trimmed_pos].matches('\n').count();

    let original_lines: Vec<&str> = content.split('\n').collect();
    let original_pos: usize = if lines_before == 0 {
        0
    } else {
        original_lines[..lines_before]
            .iter()
            .map(|l| l.len() + 1)
            .sum()
    };

    let trimmed_lines_before: Vec<&str> = trimmed_content[..trimmed_pos].split('\n').collect();
    let offset_in_line = trimmed_lines_before.last().map(|l| l.len()).unwrap_or(0);
    let original_pos = original_pos + offset_in_line;

    let search_line_count = trimmed_search.matches('\n').count();
    let end_line = lines_before + search_line_count;

    if end_line >= original_lines.len() {
        return MatchResult::fail("line_trimmed");
    }

    let matched_text = original_lines[lines_before..=end_line].join("\n");

    MatchResult {
        success: true,
        start: original_pos as i64,
        end: (original_pos + matched_text.len()) as i64,
        matched_text,
        strategy: "line_trimmed".to_string(),
    }
}

fn block_anchor_match(content: &str, search: &str) -> MatchResult {
    let search_lines: Vec<&str> = search.split('\n').collect();
    if search_lines.len() < 2 {
        return MatchResult::fail("block_anchor");
    }

    let content_lines: Vec<&str> = content.split('\n').collect();

    let first_anchor = search_lines
        .iter()
        .map(|l| l.trim())
        .find(|l| !l.is_empty());
    let last_anchor = search_lines
        .iter()
        .rev()
        .map(|l| l.trim())
        .find(|l| !l.is_empty());

    let (Some(first_anchor), Some(last_anchor)) = (first_anchor, last_anchor) else {
        return MatchResult::fail("block_anchor");
    };

    let first_matches: Vec<usize> = content_lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.trim() == first_anchor)
        .map(|(i, _)| i)
        .collect();

    if first_matches.len() != 1 {
        return MatchResult::fail("block_anchor");
    }

    let start_line = first_matches[0];
    let expected_lines = search_lines.len();
    let search_bound = (start_line + expected_lines + 5).min(content_lines.len());

    for end_line in (start_line + 1)..search_bound {
        if content_lines[end_line].trim() == last_anchor {
            let actual_lines = end_line - start_line + 1;
            if (actual_lines as i64 - expected_lines as i64).abs() <= 2 {
                let start_pos: usize = content_lines[..start_line].iter().map(|l| l.len() + 1).sum();
                let end_pos: usize = content_lines[..=end_line].iter().map(|l| l.len() + 1).sum();
                let matched_text = content_lines[start_line..=end_line].join("\n");
                return MatchResult {
                    success: true,
                    start: start_pos as i64,
                    end: end_pos as i64,
                    matched_text,
                    strategy: "block_anchor".to_string(),
                };
            }
        }
    }

    MatchResult::fail("block_anchor")
}

fn strip_common_indent(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let min_indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min();

    let Some(min_indent) = min_indent else {
        return text.to_string();
    };

    lines
        .iter()
        .map(|l| {
            if l.trim().is_empty() {
                String::new()
            } else {
                l.chars().skip(min_indent).collect()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn indentation_flexible_match(content: &str, search: &str) -> MatchResult {
    let search_normalized = strip_common_indent(search);
    let search_lines: Vec<&str> = search_normalized.split('\n').collect();
    let content_lines: Vec<&str> = content.split('\n').collect();

    let search_first_line = search_lines.first().map(|l| l.trim()).unwrap_or("");
    if search_first_line.is_empty() {
        return MatchResult::fail("indentation_flexible");
    }

    let lines_match = |start: usize| -> bool {
        if start + search_lines.len() > content_lines.len() {
            return false;
        }
        search_lines
            .iter()
            .zip(&content_lines[start..start + search_lines.len()])
            .all(|(s, c)| s.trim() == c.trim())
    };

    for (i, line) in content_lines.iter().enumerate() {
        if line.trim() != search_first_line || !lines_match(i) {
            continue;
        }

        let other_matches = (0..content_lines.len())
            .filter(|&j| j != i && content_lines[j].trim() == search_first_line && lines_match(j))
            .count();

        if other_matches == 0 {
            let start_pos: usize = content_lines[..i].iter().map(|l| l.len() + 1).sum();
            let matched_text = content_lines[i..i + search_lines.len()].join("\n");
            let end_pos = start_pos + matched_text.len();
            return MatchResult {
                success: true,
                start: start_pos as i64,
                end: end_pos as i64,
                matched_text,
                strategy: "indentation_flexible".to_string(),
            };
        }
    }

    MatchResult::fail("indentation_flexible")
}

fn normalize_escapes(text: &str) -> String {
    text.replace("\\n", "\n")
        .replace("\\t", "\t")
        .replace("\\r", "\r")
        .replace("\\\"", "\"")
        .replace("\\'", "'")
        .replace("\\\\", "\\")
}

fn escape_normalized_match(content: &str, search: &str) -> MatchResult {
    let normalized = normalize_escapes(search);
    if normalized == search {
        return MatchResult::fail("escape_normalized");
    }

    let count = content.matches(&normalized).count();
    if count == 1 {
        let pos = content.find(&normalized).unwrap();
        return MatchResult {
            success: true,
            start: pos as i64,
            end: (pos + normalized.len()) as i64,
            matched_text: normalized,
            strategy: "escape_normalized".to_string(),
        };
    }

    MatchResult::fail("escape_normalized")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Last-resort strategy. Positions are approximate: callers must not rely
/// on `matched_text`/`end` for this strategy's result (see `apply_edit`).
fn whitespace_normalized_match(content: &str, search: &str) -> MatchResult {
    let norm_content = collapse_whitespace(content);
    let norm_search = collapse_whitespace(search);

    if norm_search.is_empty() {
        return MatchResult::fail("whitespace_normalized");
    }

    let count = norm_content.matches(&norm_search).count();
    if count != 1 {
        return MatchResult::fail("whitespace_normalized");
    }

    let norm_pos = norm_content.find(&norm_search).unwrap();
    let words_before = norm_content[..norm_pos].matches(' ').count();

    let mut original_pos = 0usize;
    let mut word_count = 0usize;
    let mut in_whitespace = true;
    for (i, ch) in content.char_indices() {
        if ch.is_whitespace() {
            in_whitespace = true;
        } else {
            if in_whitespace {
                word_count += 1;
                in_whitespace = false;
            }
            if word_count > words_before {
                original_pos = i;
                break;
            }
        }
    }

    MatchResult {
        success: true,
        start: original_pos as i64,
        end: -1,
        matched_text: String::new(),
        strategy: "whitespace_normalized".to_string(),
    }
}

/// Strategies in precedence order, most precise first.
const STRATEGIES: &[fn(&str, &str) -> MatchResult] = &[
    exact_match,
    line_trimmed_match,
    block_anchor_match,
    indentation_flexible_match,
    escape_normalized_match,
    whitespace_normalized_match,
];

pub fn find_best_match(content: &str, search: &str) -> MatchResult {
    for strategy in STRATEGIES {
        let result = strategy(content, search);
        if result.success {
            return result;
        }
    }
    MatchResult::fail("none")
}

/// Outcome of `apply_edit`: whether it succeeded, the resulting content,
/// and which strategy resolved the match (`"exact_multiple_N"` when the
/// fast path found more than one occurrence, `"no_match"` when no strategy
/// found anything).
pub struct EditOutcome {
    pub success: bool,
    pub content: String,
    pub strategy: String,
}

/// Replace the sole occurrence of `old` in `content` with `new`, falling
/// back through the strategy cascade when an exact match isn't unique.
pub fn apply_edit(content: &str, old: &str, new: &str) -> EditOutcome {
    let count = content.matches(old).count();
    if count == 1 {
        let pos = content.find(old).unwrap();
        let mut result = String::with_capacity(content.len() - old.len() + new.len());
        result.push_str(&content[..pos]);
        result.push_str(new);
        result.push_str(&content[pos + old.len()..]);
        return EditOutcome {
            success: true,
            content: result,
            strategy: "exact".to_string(),
        };
    }

    if count > 1 {
        return EditOutcome {
            success: false,
            content: content.to_string(),
            strategy: format!("exact_multiple_{count}"),
        };
    }

    let result = find_best_match(content, old);
    if !result.success {
        return EditOutcome {
            success: false,
            content: content.to_string(),
            strategy: "no_match".to_string(),
        };
    }

    if !result.matched_text.is_empty() && result.start >= 0 {
        let start = result.start as usize;
        let end = start + result.matched_text.len();
        let mut new_content = String::with_capacity(content.len() - (end - start) + new.len());
        new_content.push_str(&content[..start]);
        new_content.push_str(new);
        new_content.push_str(&content[end..]);
        return EditOutcome {
            success: true,
            content: new_content,
            strategy: result.strategy,
        };
    }

    if result.start >= 0 && result.end >= 0 {
        let start = result.start as usize;
        let end = result.end as usize;
        let mut new_content = String::with_capacity(content.len() - (end - start) + new.len());
        new_content.push_str(&content[..start]);
        new_content.push_str(new);
        new_content.push_str(&content[end..]);
        return EditOutcome {
            success: true,
            content: new_content,
            strategy: result.strategy,
        };
    }

    EditOutcome {
        success: false,
        content: content.to_string(),
        strategy: format!("{}_imprecise", result.strategy),
    }
}

/// If the exact strategy matched and the replacement is a deletion, and the
/// matched span occupies its whole line (only whitespace surrounds it),
/// also strip the trailing newline so no blank line is left behind. This
/// only fires for the `exact` strategy — fallback strategies are already
/// approximate and shouldn't compound the guesswork.
pub fn apply_delete_line_cleanup(content: &str, old: &str, strategy: &str) -> Option<String> {
    if strategy != "exact" {
        return None;
    }
    let pos = content.find(old)?;
    let line_start = content[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let before_match = &content[line_start..pos];
    if !before_match.is_empty() && !before_match.chars().all(char::is_whitespace) {
        return None;
    }

    let after_start = pos + old.len();
    let line_end = match content[after_start..].find('\n') {
        Some(i) => after_start + i + 1,
        None => content.len(),
    };
    let after_match = content[after_start..line_end].trim_end_matches('\n');
    if !after_match.is_empty() && !after_match.chars().all(char::is_whitespace) {
        return None;
    }

    Some(format!("{}{}", &content[..line_start], &content[line_end..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_unique_replaces_the_sole_occurrence() {
        let content = "fn foo() {\n    bar();\n}\n";
        let outcome = apply_edit(content, "bar();", "baz();");
        assert!(outcome.success);
        assert_eq!(outcome.strategy, "exact");
        assert_eq!(outcome.content, "fn foo() {\n    baz();\n}\n");
    }

    #[test]
    fn exact_multiple_occurrences_fails_with_count() {
        let content = "a\na\n";
        let outcome = apply_edit(content, "a", "b");
        assert!(!outcome.success);
        assert_eq!(outcome.strategy, "exact_multiple_2");
        assert_eq!(outcome.content, content);
    }

    #[test]
    fn line_trimmed_recovers_trailing_whitespace_drift() {
        let content = "foo   \nbar\n";
        let outcome = apply_edit(content, "foo\nbar", "baz");
        assert!(outcome.success);
        assert_eq!(outcome.strategy, "line_trimmed");
        assert_eq!(outcome.content, "baz\n");
    }

    #[test]
    fn idempotent_replace_with_identical_string_is_a_no_op() {
        let content = "unchanged\ncontent\n";
        let outcome = apply_edit(content, "unchanged\ncontent\n", "unchanged\ncontent\n");
        assert!(outcome.success);
        assert_eq!(outcome.content, content);
    }

    #[test]
    fn no_match_leaves_content_untouched() {
        let content = "hello world\n";
        let outcome = apply_edit(content, "goodbye", "hi");
        assert!(!outcome.success);
        assert_eq!(outcome.strategy, "no_match");
        assert_eq!(outcome.content, content);
    }

    #[test]
    fn block_anchor_tolerates_a_shifted_middle_line() {
        let content = "start\nfoo\nbar\nbaz\nend\n";
        let search = "start\nFOO CHANGED\nend";
        // middle differs entirely but anchors (start/end) are unique and
        // span length is within tolerance
        let result = find_best_match(content, search);
        assert!(result.success);
        assert_eq!(result.strategy, "block_anchor");
    }

    #[test]
    fn indentation_flexible_matches_regardless_of_indent_width() {
        let content = "def f():\n        return 1\n";
        let search = "def f():\n    return 1";
        let result = find_best_match(content, search);
        assert!(result.success);
        assert_eq!(result.strategy, "indentation_flexible");
    }

    #[test]
    fn escape_normalized_only_fires_when_normalization_changes_input() {
        let content = "line one\nline two\n";
        // search contains literal backslash-n, not a real newline
        let search = "line one\\nline two";
        let result = find_best_match(content, search);
        assert!(result.success);
        assert_eq!(result.strategy, "escape_normalized");
    }

    #[test]
    fn deletion_sugar_removes_whole_line_for_exact_strategy_only() {
        let content = "a\n    # TODO remove\nb\n";
        let cleaned = apply_delete_line_cleanup(content, "# TODO remove\n", "exact");
        assert_eq!(cleaned, Some("a\nb\n".to_string()));

        // Fallback strategies must not trigger the cleanup.
        let not_cleaned = apply_delete_line_cleanup(content, "# TODO remove\n", "line_trimmed");
        assert_eq!(not_cleaned, None);
    }
}
