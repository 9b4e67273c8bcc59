//! Logging helpers for untrusted serial text.
//! The gateway can emit line noise, so everything echoed into the log goes through here.

/// Longest preview of a serial line kept in a log record.
const MAX_PREVIEW: usize = 160;

/// Escape a serial line for single-line logging:
/// - `\r`, `\n` and `\t` become their escape sequences
/// - other control characters become `\xNN`
/// - backslash is doubled
///
/// Lines longer than [`MAX_PREVIEW`] characters are cut with an ellipsis.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Hex preview of raw bytes that could not be decoded as text.
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    let mut out: String = data
        .iter()
        .take(max)
        .map(|b| format!("{:02x}", b))
        .collect();
    if data.len() > max {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_control_characters() {
        assert_eq!(escape_log("R 20\r\n"), "R 20\\r\\n");
        assert_eq!(escape_log("a\tb\u{7}"), "a\\tb\\x07");
        assert_eq!(escape_log("c:\\tmp"), "c:\\\\tmp");
    }

    #[test]
    fn truncates_long_lines() {
        let long = "x".repeat(MAX_PREVIEW + 10);
        let esc = escape_log(&long);
        assert!(esc.ends_with('…'));
        assert_eq!(esc.chars().count(), MAX_PREVIEW + 1);
    }

    #[test]
    fn hex_preview_is_capped() {
        assert_eq!(hex_snippet(&[0xde, 0xad, 0xbe, 0xef], 8), "deadbeef");
        assert_eq!(hex_snippet(&[0xde, 0xad, 0xbe, 0xef], 2), "dead…");
    }
}
