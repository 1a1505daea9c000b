use crate::TransferError;

/// Characters that are unsafe in a file or directory name on common platforms.
const UNSAFE_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Strips path-unsafe characters so `name` can be used as one path component.
///
/// Every occurrence of `\ / : * ? " < > |` is removed. Rejects:
/// - names that are empty after stripping
/// - `.` and `..`, which would resolve outside the intended directory
/// - names containing NUL or other control characters
pub fn sanitize_file_name(name: &str) -> Result<String, TransferError> {
    let cleaned: String = name.chars().filter(|c| !UNSAFE_CHARS.contains(c)).collect();

    if cleaned.is_empty() {
        return Err(TransferError::InvalidName(format!(
            "empty after sanitizing: {name:?}"
        )));
    }

    if cleaned == "." || cleaned == ".." {
        return Err(TransferError::InvalidName(format!(
            "relative directory name not allowed: {name:?}"
        )));
    }

    if cleaned.chars().any(char::is_control) {
        return Err(TransferError::InvalidName(format!(
            "control characters not allowed: {name:?}"
        )));
    }

    Ok(cleaned)
}

/// Returns whether `text` holds a character that sanitizing would strip or
/// reject.
pub fn has_unsafe_chars(text: &str) -> bool {
    text.chars().any(|c| UNSAFE_CHARS.contains(&c) || c.is_control())
}
