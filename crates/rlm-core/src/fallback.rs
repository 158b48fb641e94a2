//! Fallback preview for files with no supported grammar.
//!
//! Ported from `_fallback_squeeze` in the original daemon: invalid UTF-8 is
//! replaced rather than rejected, since this path exists precisely for files
//! the rest of the pipeline can't parse and a best-effort preview is still
//! more useful to a client than an error.

const PREVIEW_LINES: usize = 20;

/// Build the `# <name> — ...` preview text for an unsupported file.
pub fn fallback_squeeze(display_name: &str, bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let lines: Vec<&str> = text.split('\n').collect();

    if lines.len() <= PREVIEW_LINES {
        return format!("# {display_name} — no grammar available ({} lines)\n{text}", lines.len());
    }

    let preview = lines[..PREVIEW_LINES].join("\n");
    let remainder = lines.len() - PREVIEW_LINES;
    format!(
        "# {display_name} — no grammar available ({} lines)\n{preview}\n... ({remainder} more lines)",
        lines.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_file_returned_whole() {
        let out = fallback_squeeze("data.txt", b"a\nb\nc");
        assert!(out.contains("a\nb\nc"));
        assert!(!out.contains("more lines"));
    }

    #[test]
    fn long_file_truncated_at_twenty_lines() {
        let body = (0..30).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let out = fallback_squeeze("data.txt", body.as_bytes());
        assert!(out.contains("10 more lines"));
        assert!(out.contains("line 0"));
        assert!(!out.contains("line 25"));
    }

    #[test]
    fn invalid_utf8_is_replaced_not_rejected() {
        let bytes: &[u8] = &[0x41, 0xff, 0x42];
        let out = fallback_squeeze("bin.dat", bytes);
        assert!(out.contains('A'));
    }
}
