//! Identifier safety checks.
//!
//! Every dynamically-assembled column, table, pivot, foreign-key, or alias
//! that flows into generated SQL must pass [`validate_identifier`] before it
//! is quoted or interpolated. Parameter values never go through this path —
//! they are always placeholder-bound.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Error;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^[a-z_][\w.]*$").expect("valid regex"));

/// Validates a dynamically-sourced identifier against `^[A-Z_][\w.]*$`
/// (case-insensitive), failing with a contextual error naming the location
/// the identifier was destined for.
pub fn validate_identifier(name: &str, context: &str) -> Result<(), Error> {
    if IDENTIFIER_RE.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidIdentifier {
            name: name.to_string(),
            context: context.to_string(),
        })
    }
}

/// Returns whether `name` is a valid identifier without constructing an error.
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER_RE.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        assert!(is_valid_identifier("users"));
        assert!(is_valid_identifier("_hidden"));
        assert!(is_valid_identifier("User_2"));
        assert!(is_valid_identifier("users.id"));
    }

    #[test]
    fn rejects_unsafe_names() {
        assert!(!is_valid_identifier("1users"));
        assert!(!is_valid_identifier("users; DROP TABLE users"));
        assert!(!is_valid_identifier("users--"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("users, secrets"));
    }

    #[test]
    fn validate_identifier_carries_context() {
        let err = validate_identifier("bad name", "where clause column").unwrap_err();
        match err {
            Error::InvalidIdentifier { name, context } => {
                assert_eq!(name, "bad name");
                assert_eq!(context, "where clause column");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
