//! Text helpers: excerpt truncation and the sender hash.

use sha2::{Digest, Sha256};

/// Marker appended when an excerpt is hard-truncated.
pub const ELLIPSIS: &str = "...";

/// Hex characters kept from the sender digest.
const SENDER_HASH_LEN: usize = 16;

/// Truncate `text` to at most `max_chars` characters.
///
/// Cuts after the last sentence terminator when it falls in the final 20% of
/// the window; otherwise hard-truncates and appends [`ELLIPSIS`].
pub fn truncate_excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let cut = text
        .char_indices()
        .nth(max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    let window = &text[..cut];

    let boundary = window
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?'))
        .last()
        .map(|(idx, c)| (idx, c.len_utf8()));

    if let Some((idx, width)) = boundary {
        let pos = window[..idx].chars().count();
        if pos as f64 > max_chars as f64 * 0.8 {
            return window[..idx + width].to_string();
        }
    }

    format!("{window}{ELLIPSIS}")
}

/// Short, stable, non-reversible identifier for a sender address.
pub fn sender_hash(sender: &str) -> String {
    let digest = Sha256::digest(sender.trim().to_lowercase().as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(SENDER_HASH_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_excerpt("short.", 100), "short.");
        assert_eq!(truncate_excerpt("", 10), "");
    }

    #[test]
    fn cuts_at_late_sentence_boundary() {
        // Boundary at char 9 of a 10-char window (> 80%).
        let text = "abcdefghi. rest of the text";
        assert_eq!(truncate_excerpt(text, 10), "abcdefghi.");
    }

    #[test]
    fn hard_truncates_when_boundary_is_early() {
        let text = "ab. cdefghijklmnop";
        assert_eq!(truncate_excerpt(text, 10), "ab. cdefgh...");
    }

    #[test]
    fn truncation_respects_multibyte_chars() {
        let text = "ééééééééééééé";
        assert_eq!(truncate_excerpt(text, 4), "éééé...");
    }

    #[test]
    fn sender_hash_is_stable_and_normalized() {
        let a = sender_hash("Alice@Example.com");
        let b = sender_hash("  alice@example.com ");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, sender_hash("bob@example.com"));
    }
}
