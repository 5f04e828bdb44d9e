//! Text helpers: cache-key normalization, token estimation and truncation

use std::borrow::Cow;

/// Normalized form used for cache keys (trimmed, lowercased)
pub fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Rough token count: one token per four characters, rounded up
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}

/// Cut `text` to at most `max_chars` characters, preferring a word boundary
///
/// Falls back to a hard cut when the last whitespace would drop more than
/// half of the allowed length.
pub fn truncate_at_word_boundary(text: &str, max_chars: usize) -> Cow<'_, str> {
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return Cow::Borrowed(text);
    };
    let prefix = text.get(..cut).unwrap_or(text);

    let boundary = prefix
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map(|(idx, _)| idx)
        .filter(|idx| prefix.get(..*idx).map_or(0, |p| p.chars().count()) >= max_chars / 2);

    let truncated = boundary
        .and_then(|idx| prefix.get(..idx))
        .unwrap_or(prefix);
    Cow::Owned(truncated.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_text("  Cardiology CLINIC \n"), "cardiology clinic");
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_short_text_untouched() {
        assert!(matches!(
            truncate_at_word_boundary("short text", 100),
            Cow::Borrowed("short text")
        ));
    }

    #[test]
    fn test_truncates_at_word_boundary() {
        let text = "pediatric cardiology department";
        let out = truncate_at_word_boundary(text, 24);
        assert_eq!(out, "pediatric cardiology");
        assert!(out.chars().count() <= 24);
    }

    #[test]
    fn test_hard_cut_without_whitespace() {
        let out = truncate_at_word_boundary("abcdefghijklmnop", 5);
        assert_eq!(out, "abcde");
    }

    #[test]
    fn test_multibyte_safe() {
        let out = truncate_at_word_boundary("médecin général hôpital", 10);
        assert!(out.chars().count() <= 10);
        assert_eq!(out, "médecin");
    }
}
