/// Maximum length of a sanitized column name (MySQL identifier limit).
pub const MAX_COLUMN_NAME_LEN: usize = 64;

/// Strip a column name down to `[A-Za-z0-9_]` and cap it at 64 characters.
///
/// The result is the only form of a column name that ever reaches SQL text,
/// so anything outside the allowed set is dropped rather than escaped.
pub fn sanitize_column_name(value: &str) -> String {
    return value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .take(MAX_COLUMN_NAME_LEN)
        .collect();
}

/// Trim and lower-case a value for allowed-value comparisons.
pub fn normalize_token(value: &str) -> String {
    return value.trim().to_lowercase();
}

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((byte_index, _)) => value[..byte_index].to_string(),
        None => value.to_string(),
    }
}

/// Accept only plain file names made of `[A-Za-z0-9._-]`, at most 255 characters.
/// Anything with a path separator is refused.
pub fn is_safe_file_name(file_name: &str) -> bool {
    !file_name.is_empty()
        && file_name.len() <= 255
        && file_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_column_name_strips_injection() {
        assert_eq!(
            sanitize_column_name("user_id; DROP TABLE users; --"),
            "user_idDROPTABLEusers"
        );
        assert_eq!(sanitize_column_name("Row Number"), "RowNumber");
        assert_eq!(sanitize_column_name("Température (°C)"), "TempratureC");
    }

    #[test]
    fn test_sanitize_column_name_caps_length() {
        let long = "a".repeat(100);
        assert_eq!(sanitize_column_name(&long).len(), MAX_COLUMN_NAME_LEN);
    }

    #[test]
    fn test_truncate_chars_respects_code_points() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_safe_file_names() {
        assert!(is_safe_file_name("upload_2024-01-01.xlsx"));
        assert!(!is_safe_file_name("../etc/passwd"));
        assert!(!is_safe_file_name("my file.xlsx"));
        assert!(!is_safe_file_name(""));
    }
}
