// Password hashing and strength policy

use bcrypt::{hash, DEFAULT_COST};

use crate::error::{SetupError, SetupResult, ValidationFailure};

/// Minimum password length
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Maximum password length (bcrypt has a 72-byte limit)
pub const MAX_PASSWORD_LENGTH: usize = 72;

const DEFAULT_DENYLIST: &[&str] = &[
    "password",
    "12345678",
    "qwerty",
    "abc123",
    "admin123",
    "password1",
    "password123",
    "welcome123",
    "letmein",
    "letmein1",
    "monkey123",
    "passw0rd",
    "trustno1",
    "iloveyou1",
    "qwerty123",
];

/// Strength rules applied before any administrator account is created.
///
/// The denylist is a replaceable parameter; the defaults are a small list of
/// passwords that satisfy the letter+digit rule but are still trivially guessable.
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    denylist: Vec<String>,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::with_denylist(DEFAULT_DENYLIST.iter().map(|s| s.to_string()))
    }
}

impl PasswordPolicy {
    pub fn with_denylist(denylist: impl IntoIterator<Item = String>) -> Self {
        Self {
            min_length: MIN_PASSWORD_LENGTH,
            denylist: denylist.into_iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    /// Validate `password` for the account named `username`.
    pub fn validate(&self, password: &str, username: &str) -> Result<(), ValidationFailure> {
        let fail = |reason: String| Err(ValidationFailure::new("password", reason));

        if password.is_empty() {
            return fail("This field is required.".to_string());
        }
        if password.chars().count() < self.min_length {
            return fail(format!(
                "Password must be at least {} characters long.",
                self.min_length
            ));
        }
        if password.len() > MAX_PASSWORD_LENGTH {
            return fail(format!(
                "Password must be at most {} bytes long.",
                MAX_PASSWORD_LENGTH
            ));
        }
        if !password.chars().any(|c| c.is_alphabetic()) {
            return fail("Password must contain at least one letter.".to_string());
        }
        if !password.chars().any(|c| c.is_ascii_digit()) {
            return fail("Password must contain at least one number.".to_string());
        }
        let lowered = password.to_lowercase();
        if self.denylist.iter().any(|p| *p == lowered) {
            return fail(
                "This password is too common. Please choose a more secure password.".to_string(),
            );
        }
        if !username.is_empty() && lowered == username.to_lowercase() {
            return fail("Password must not be the same as the username.".to_string());
        }
        Ok(())
    }
}

/// Hash a password using bcrypt on the blocking thread pool.
pub async fn hash_password(password: &str, cost: Option<u32>) -> SetupResult<String> {
    let password = password.to_string();
    let cost = cost.unwrap_or(DEFAULT_COST);

    tokio::task::spawn_blocking(move || hash(password, cost))
        .await
        .map_err(|e| SetupError::Storage(anyhow::anyhow!("Password hashing task failed: {}", e)))?
        .map_err(|e| SetupError::Storage(anyhow::anyhow!("Password hashing failed: {}", e)))
}
