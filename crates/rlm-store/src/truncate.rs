//! Response-body truncation shared by the dispatcher and the sandbox's
//! captured stdout.

/// Truncate `text` to at most `cap` bytes, appending a
/// `... (truncated, <n> more chars, ~<tokens> tokens)` annotation when it
/// does not fit.
///
/// Idempotent: re-truncating text that is already within `cap` is a no-op.
/// The cut point is a char boundary, never a byte offset inside a multi-byte
/// UTF-8 sequence.
pub fn truncate(text: &str, cap: usize) -> String {
    let total_chars = text.chars().count();
    if total_chars <= cap {
        return text.to_string();
    }

    let cut_byte = text.char_indices().nth(cap).map(|(i, _)| i).unwrap_or(text.len());
    let prefix = &text[..cut_byte];
    let remaining = total_chars - cap;
    let tokens_est = (remaining + 2) / 4; // round(n / 4)
    format!("{prefix}\n... (truncated, {remaining} more chars, ~{tokens_est} tokens)")
}

pub const RESPONSE_CAP: usize = 8000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_cap_is_identity() {
        assert_eq!(truncate("hello", 100), "hello");
    }

    #[test]
    fn over_cap_appends_annotation() {
        let text = "a".repeat(10);
        let out = truncate(&text, 4);
        assert!(out.starts_with("aaaa\n... (truncated, 6 more chars, ~2 tokens)"));
    }

    #[test]
    fn idempotent_when_result_fits() {
        let text = "a".repeat(10);
        let once = truncate(&text, 4);
        let twice = truncate(&once, RESPONSE_CAP);
        assert_eq!(once, twice);
    }

    #[test]
    fn cut_respects_utf8_boundaries() {
        let text = "héllo world";
        let out = truncate(text, 2);
        assert!(out.is_char_boundary(0));
    }
}
