// Setup error taxonomy
//
// Validation failures are field-scoped and recovered locally (form re-render / CLI re-prompt).
// Conflict variants are distinct so callers can branch on them. State-file integrity problems
// never surface here: they are folded into "installation incomplete" by the service.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// A single rejected input, identifying the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationFailure {
    pub field: String,
    pub reason: String,
}

impl ValidationFailure {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Field-scoped validation failures collected from a whole form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    fields: BTreeMap<String, String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure; the first message reported for a field wins.
    pub fn add(&mut self, failure: ValidationFailure) {
        self.fields.entry(failure.field).or_insert(failure.reason);
    }

    pub fn has(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|(field, reason)| format!("{}: {}", field, reason))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("{0}")]
    Validation(#[from] ValidationFailure),

    #[error("An administrator account already exists")]
    AdminExists,

    #[error("Admin user not found")]
    AdminNotFound,

    #[error("Setup token is invalid, expired, or has already been used")]
    TokenRejected,

    #[error("Database unavailable: {0}")]
    Database(String),

    #[error("Installation state storage failed: {0:#}")]
    Storage(anyhow::Error),

    #[error("Installation cancelled by user")]
    Cancelled,
}

impl SetupError {
    /// Conflict errors (admin exists, token used/expired) that callers branch on.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SetupError::AdminExists | SetupError::TokenRejected)
    }

    pub fn validation_field(&self) -> Option<&str> {
        match self {
            SetupError::Validation(f) => Some(f.field.as_str()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for SetupError {
    fn from(err: anyhow::Error) -> Self {
        SetupError::Storage(err)
    }
}

impl From<std::io::Error> for SetupError {
    fn from(err: std::io::Error) -> Self {
        SetupError::Storage(anyhow::Error::new(err))
    }
}

impl From<sqlx::Error> for SetupError {
    fn from(err: sqlx::Error) -> Self {
        SetupError::Database(err.to_string())
    }
}

pub type SetupResult<T> = Result<T, SetupError>;
