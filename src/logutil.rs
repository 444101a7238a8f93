//! Helpers for logging text that arrived over the mesh.
//!
//! Mesh messages are user controlled: they can carry newlines, terminal escapes or
//! simply be long. Everything inbound goes through [`escape_log`] before it reaches
//! a log line so each event stays on one line.

use std::fmt::Write;

/// Characters kept before a log preview is cut off.
pub const MAX_PREVIEW: usize = 200;

/// Escape control characters and cap the length at [`MAX_PREVIEW`] characters.
pub fn escape_log(s: &str) -> String {
    escape_log_with_limit(s, MAX_PREVIEW)
}

/// Like [`escape_log`] with an explicit character limit. Truncation appends `…`.
pub fn escape_log_with_limit(s: &str, limit: usize) -> String {
    let mut out = String::with_capacity(s.len().min(limit) + 4);
    for (count, ch) in s.chars().enumerate() {
        if count >= limit {
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

/// Shorten a hex public key for log output (`a1b2c3d4e5f6…`).
pub fn short_key(key: &str) -> String {
    const SHOWN: usize = 12;
    match key.char_indices().nth(SHOWN) {
        Some((idx, _)) => format!("{}…", &key[..idx]),
        None => key.to_string(),
    }
}
