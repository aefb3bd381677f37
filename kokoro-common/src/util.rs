//! Text helpers shared by the stores and the CLI.

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Works on character boundaries so Japanese text and emoji are never split.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}

/// Case-insensitive substring test. `needle` must already be lowercase.
pub fn contains_folded(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.to_lowercase().contains(needle)
}

/// Collapse runs of whitespace to single spaces and trim.
pub fn squash_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("hello", 10), "hello");
        assert_eq!(truncate_with_ellipsis("hello world", 5), "hello...");
        assert_eq!(truncate_with_ellipsis("こんにちは世界", 5), "こんにちは...");
        assert_eq!(truncate_with_ellipsis("", 10), "");
    }

    #[test]
    fn test_contains_folded() {
        assert!(contains_folded("Hello World", "hello"));
        assert!(contains_folded("Hello World", "o w"));
        assert!(!contains_folded("Hello World", "bye"));
        assert!(contains_folded("anything", ""));
    }

    #[test]
    fn test_squash_whitespace() {
        assert_eq!(squash_whitespace("  a \n\t b  "), "a b");
    }
}
