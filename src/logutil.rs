//! Helpers that keep log lines single-line and bounded, whatever a device or
//! driver put into a message.

use std::fmt::Write;

const MAX_PREVIEW: usize = 300;

/// Escape control characters (`\n`, `\r`, `\t`, backslash, others as `\xNN`)
/// and cut the result at 300 characters with an ellipsis.
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
                let _ = write!(out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Space-separated hex of the first `max` bytes, e.g. `48 69 0a (+12)`.
pub fn hex_snippet(bytes: &[u8], max: usize) -> String {
    let shown = &bytes[..bytes.len().min(max)];
    let mut out = String::with_capacity(shown.len() * 3 + 8);
    for (i, b) in shown.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02x}", b);
    }
    if bytes.len() > shown.len() {
        let _ = write!(out, " (+{})", bytes.len() - shown.len());
    }
    out
}
