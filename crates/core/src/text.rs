//! Bounded free-text validation shared by the clinic modules.
//!
//! Lengths are counted in characters, not bytes; values are trimmed first.

use crate::error::{DomainError, DomainResult};

/// Trimmed text of `min..=max` characters.
pub fn bounded(field: &str, value: &str, min: usize, max: usize) -> DomainResult<String> {
    let trimmed = value.trim();
    let len = trimmed.chars().count();
    if len < min {
        return Err(if min == 1 {
            DomainError::validation(format!("{field} is required"))
        } else {
            DomainError::validation(format!("{field} must be at least {min} characters"))
        });
    }
    if len > max {
        return Err(DomainError::validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Non-empty trimmed text of at most `max` characters.
pub fn required(field: &str, value: &str, max: usize) -> DomainResult<String> {
    bounded(field, value, 1, max)
}

/// Optional trimmed text of at most `max` characters; blank input becomes `None`.
pub fn optional(field: &str, value: Option<&str>, max: usize) -> DomainResult<Option<String>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => bounded(field, v, 1, max).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_before_measuring() {
        assert_eq!(required("name", "  Ana  ", 3).unwrap(), "Ana");
        assert!(required("name", "   ", 3).is_err());
    }

    #[test]
    fn counts_characters_not_bytes() {
        assert!(bounded("name", "Zoë", 1, 3).is_ok());
    }

    #[test]
    fn blank_optional_is_none() {
        assert_eq!(optional("notes", Some("  "), 10).unwrap(), None);
        assert_eq!(optional("notes", None, 10).unwrap(), None);
        assert!(optional("notes", Some("x".repeat(11).as_str()), 10).is_err());
    }
}
