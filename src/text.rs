//! Character-safe truncation helpers.

pub const ELLIPSIS: &str = "...";

/// Prefix of `s` holding at most `max_chars` characters.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// `s` cut to `max_chars` characters with [`ELLIPSIS`] appended when
/// anything was dropped.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    let cut = truncate_chars(s, max_chars);
    if cut.len() < s.len() {
        format!("{}{}", cut, ELLIPSIS)
    } else {
        s.to_string()
    }
}
