//! Helpers for storage pointers.
//!
//! A storage pointer is the backend-agnostic locator string for a stored
//! item. Providers interpret it against their own directory separator, so
//! the helpers here are parameterized over the separator character.

use crate::{Error, Result};

/// Ensure a storage pointer is non-empty and not just whitespace.
pub fn require_value(pointer: &str) -> Result<()> {
    if pointer.trim().is_empty() {
        return Err(Error::MissingStoragePointer);
    }
    Ok(())
}

/// Split a pointer into its components, dropping empty segments.
pub fn components(pointer: &str, separator: char) -> Vec<&str> {
    pointer
        .split(separator)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Split a pointer into `(directory path, name)`.
///
/// The directory path is `None` when the pointer has a single component.
pub fn split_name(pointer: &str, separator: char) -> (Option<String>, String) {
    let trimmed = pointer.trim_end_matches(separator);
    match trimmed.rfind(separator) {
        Some(idx) if idx > 0 => (
            Some(trimmed[..idx].to_string()),
            trimmed[idx + 1..].to_string(),
        ),
        Some(idx) => (None, trimmed[idx + 1..].to_string()),
        None => (None, trimmed.to_string()),
    }
}

/// Join a base with a pointer, avoiding duplicate separators.
pub fn join(base: &str, pointer: &str, separator: char) -> String {
    if base.is_empty() {
        return pointer.to_string();
    }
    format!(
        "{}{}{}",
        base.trim_end_matches(separator),
        separator,
        pointer.trim_start_matches(separator)
    )
}
