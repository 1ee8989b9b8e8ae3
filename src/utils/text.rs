//! Text helpers: normalization, whole-word tokenization, snippets

use unicode_normalization::UnicodeNormalization;

/// Normalize a query for keyword matching: NFKC fold, lowercase, collapse
/// whitespace. Matching is always done against this form.
pub fn normalize_query(query: &str) -> String {
    let folded: String = query.nfkc().collect::<String>().to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split into lowercase word tokens at whitespace/punctuation boundaries.
/// Hyphens and apostrophes inside a word are kept ("self-knowledge").
pub fn tokenize_words(text: &str) -> Vec<String> {
    let normalized = normalize_query(text);
    let mut words = Vec::new();
    let mut current = String::new();
    for ch in normalized.chars() {
        if ch.is_alphanumeric() || ch == '-' || ch == '\'' {
            current.push(ch);
        } else if !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Whether `needle` occurs in `haystack` as a whole word (or whole multi-word
/// phrase), case-insensitively.
pub fn contains_whole_word(haystack: &str, needle: &str) -> bool {
    let hay = tokenize_words(haystack);
    let needle_words = tokenize_words(needle);
    if needle_words.is_empty() || hay.len() < needle_words.len() {
        return false;
    }
    hay.windows(needle_words.len()).any(|w| w == needle_words)
}

/// First `max_chars` characters of `text`, cut back to the last whitespace
/// boundary when one exists, with a trailing ellipsis when truncated.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    let cut = head.rfind(char::is_whitespace).unwrap_or(head.len());
    let mut out: String = head[..cut].trim_end().to_string();
    out.push('\u{2026}');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace_and_case() {
        assert_eq!(normalize_query("  What   DO  laureates  "), "what do laureates");
    }

    #[test]
    fn tokenize_strips_punctuation_keeps_hyphens() {
        assert_eq!(
            tokenize_words("Justice, freedom; self-knowledge!"),
            vec!["justice", "freedom", "self-knowledge"]
        );
    }

    #[test]
    fn whole_word_matching_rejects_substrings() {
        assert!(contains_whole_word("a question of justice", "justice"));
        assert!(!contains_whole_word("adjusting the lens", "just"));
    }

    #[test]
    fn multi_word_phrases_match_as_a_unit() {
        assert!(contains_whole_word("the human condition endures", "human condition"));
        assert!(!contains_whole_word("human nature and the condition", "human condition"));
    }

    #[test]
    fn snippet_cuts_at_word_boundary() {
        let s = snippet("one two three four five", 12);
        assert!(s.chars().count() <= 13); // 12 + ellipsis
        assert!(s.ends_with('\u{2026}'));
        assert!(!s.contains("thre"));
    }

    #[test]
    fn snippet_returns_short_text_unchanged() {
        assert_eq!(snippet("short", 50), "short");
    }
}
