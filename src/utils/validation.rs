//! Input validation primitives.
//!
//! Replace verbose `ok_or_else` + `Error::validation_invalid_argument` chains.

use crate::error::{Error, Result};

/// Require an Option to contain a value.
pub fn require<T>(opt: Option<T>, field: &str, message: &str) -> Result<T> {
    opt.ok_or_else(|| Error::validation_invalid_argument(field, message, None, None))
}

/// Require a string to be non-empty after trimming.
///
/// Returns a reference to the trimmed string on success.
pub fn require_non_empty<'a>(value: &'a str, field: &str, message: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(Error::validation_invalid_argument(field, message, None, None))
    } else {
        Ok(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_returns_value_when_some() {
        assert_eq!(require(Some("value"), "field", "msg").unwrap(), "value");
    }

    #[test]
    fn require_returns_error_when_none() {
        let result: Result<&str> = require(None, "field", "Missing field");
        assert_eq!(result.unwrap_err().details["field"], "field");
    }

    #[test]
    fn require_non_empty_trims_whitespace() {
        assert_eq!(require_non_empty("  hello  ", "field", "msg").unwrap(), "hello");
    }

    #[test]
    fn require_non_empty_fails_for_whitespace_only() {
        assert!(require_non_empty("   ", "field", "Cannot be empty").is_err());
    }
}
