// Input validation utilities
//
// Syntactic checks only. Uniqueness (username/email) and token validity are decided by the
// account store and the token manager respectively.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::ValidationFailure;

pub const USERNAME_MAX_LEN: usize = 150;
pub const EMAIL_MAX_LEN: usize = 254;
pub const NAME_MAX_LEN: usize = 30;
pub const TOKEN_MAX_LEN: usize = 100;

static USERNAME_RE: OnceLock<Option<Regex>> = OnceLock::new();
static EMAIL_RE: OnceLock<Option<Regex>> = OnceLock::new();
static TOKEN_RE: OnceLock<Option<Regex>> = OnceLock::new();

// A pattern that fails to compile matches nothing (fail-closed).
fn matches(cell: &'static OnceLock<Option<Regex>>, pattern: &str, input: &str) -> bool {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(input))
}

/// Username: required, bounded, letters/digits and `@ . + - _` only.
pub fn validate_username(username: &str) -> Result<(), ValidationFailure> {
    if username.is_empty() {
        return Err(ValidationFailure::new("username", "This field is required."));
    }
    if username.chars().count() > USERNAME_MAX_LEN {
        return Err(ValidationFailure::new(
            "username",
            format!("Username must be {} characters or fewer.", USERNAME_MAX_LEN),
        ));
    }
    if !matches(&USERNAME_RE, r"^[\w.@+-]+$", username) {
        return Err(ValidationFailure::new(
            "username",
            "Username may only contain letters, digits and @/./+/-/_ characters.",
        ));
    }
    Ok(())
}

/// Email: required and syntactically valid.
pub fn validate_email(email: &str) -> Result<(), ValidationFailure> {
    if email.is_empty() {
        return Err(ValidationFailure::new("email", "This field is required."));
    }
    if email.len() > EMAIL_MAX_LEN
        || !matches(&EMAIL_RE, r"^[^\s@]+@[^\s@.]+(\.[^\s@.]+)+$", email)
    {
        return Err(ValidationFailure::new("email", "Enter a valid email address."));
    }
    Ok(())
}

/// Optional display names (first/last).
pub fn validate_display_name(field: &str, value: &str) -> Result<(), ValidationFailure> {
    if value.chars().count() > NAME_MAX_LEN {
        return Err(ValidationFailure::new(
            field,
            format!("Must be {} characters or fewer.", NAME_MAX_LEN),
        ));
    }
    Ok(())
}

/// Setup token: format only (URL-safe base64 alphabet). Validity is the token manager's job.
pub fn validate_token_format(token: &str) -> Result<(), ValidationFailure> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ValidationFailure::new("token", "Setup token is required."));
    }
    if token.len() > TOKEN_MAX_LEN || !matches(&TOKEN_RE, r"^[A-Za-z0-9_-]+$", token) {
        return Err(ValidationFailure::new("token", "Invalid token format."));
    }
    Ok(())
}

/// Post-setup redirect targets must be paths on this site. Scheme-relative `//host` and
/// `/\host` forms are rejected, as is anything with control characters.
pub fn is_local_redirect(target: &str) -> bool {
    target.starts_with('/')
        && !target.starts_with("//")
        && !target.starts_with("/\\")
        && !target.chars().any(char::is_control)
}
