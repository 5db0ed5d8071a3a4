// Property key/value sanitation rules for the ingestion schema
use regex::Regex;
use std::sync::OnceLock;

pub const MAX_KEY_LENGTH: usize = 128;
pub const MAX_VALUE_LENGTH: usize = 8192;

const SAFE_KEY_PATTERN: &str = r"^[A-Za-z][A-Za-z0-9_]{0,127}$";

static SAFE_KEY: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

/// A key is safe when it starts with a letter, continues with letters, digits
/// or underscores and is at most 128 characters long.
pub fn is_safe_key(key: &str) -> bool {
    match SAFE_KEY.get_or_init(|| Regex::new(SAFE_KEY_PATTERN)) {
        Ok(regex) => regex.is_match(key),
        Err(_) => false,
    }
}

/// Truncates a value to `MAX_VALUE_LENGTH` characters. Over-length values are
/// never an error.
pub fn sanitize_value(value: impl Into<String>) -> String {
    let mut value = value.into();
    truncate_chars(&mut value, MAX_VALUE_LENGTH);
    value
}

pub(crate) fn truncate_chars(value: &mut String, max_chars: usize) {
    if value.len() <= max_chars {
        return;
    }
    if let Some((byte_index, _)) = value.char_indices().nth(max_chars) {
        value.truncate(byte_index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_keys() {
        assert!(is_safe_key("a"));
        assert!(is_safe_key("requestCount"));
        assert!(is_safe_key("http_status_2xx"));
        assert!(is_safe_key(&format!("k{}", "x".repeat(127))));
    }

    #[test]
    fn test_unsafe_keys() {
        assert!(!is_safe_key(""));
        assert!(!is_safe_key("1abc"));
        assert!(!is_safe_key("_private"));
        assert!(!is_safe_key("with-dash"));
        assert!(!is_safe_key("with space"));
        assert!(!is_safe_key(&format!("k{}", "x".repeat(128))));
    }

    #[test]
    fn test_value_truncation() {
        let long = "v".repeat(MAX_VALUE_LENGTH + 100);
        assert_eq!(sanitize_value(long).chars().count(), MAX_VALUE_LENGTH);

        let short = "hello";
        assert_eq!(sanitize_value(short), "hello");
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let long = "é".repeat(MAX_VALUE_LENGTH + 1);
        let truncated = sanitize_value(long);
        assert_eq!(truncated.chars().count(), MAX_VALUE_LENGTH);
        assert!(truncated.chars().all(|c| c == 'é'));
    }
}
