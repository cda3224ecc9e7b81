//! Small text and clock helpers.

/// Longest response body excerpt carried in an error message
pub const SNIPPET_CHARS: usize = 180;

/// Trimmed value, or `None` when missing or blank
pub fn trimmed_non_empty(value: Option<String>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// First `SNIPPET_CHARS` characters of a trimmed body
pub fn snippet(body: &str) -> String {
    body.trim().chars().take(SNIPPET_CHARS).collect()
}

/// Wall clock in unix milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Filesystem-safe stem, distinct for distinct inputs.
///
/// Lowercase ASCII letters, digits and `-` are kept. Every other byte,
/// uppercase letters included, becomes `_` and two lowercase hex digits.
pub fn file_stem(raw: &str) -> String {
    let mut stem = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("_{byte:02x}"));
        }
    }
    stem
}
