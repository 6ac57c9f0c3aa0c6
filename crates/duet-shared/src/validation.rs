//! Syntactic checks on user-supplied identifiers.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::SharedError;

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        // RFC 5322, simplified: local part, '@', dot-separated labels.
        Regex::new(
            concat!(
                r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@",
                r"[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?",
                r"(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
            ),
        )
        .expect("email pattern compiles")
    })
}

/// Check that `email` is a syntactically valid address.
///
/// Single-label domains (`user@localhost`) are accepted.
pub fn validate_email(email: &str) -> Result<(), SharedError> {
    if email.len() > 254 || !email_regex().is_match(email) {
        return Err(SharedError::InvalidEmail(email.to_string()));
    }
    Ok(())
}
