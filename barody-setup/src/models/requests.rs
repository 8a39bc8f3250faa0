// Request models shared by the CLI and web entry points

use serde::Deserialize;

/// Validated input for a new administrator account.
#[derive(Debug, Clone, Default)]
pub struct NewAdmin {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

impl NewAdmin {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    pub fn with_names(mut self, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        self.first_name = first_name.into();
        self.last_name = last_name.into();
        self
    }
}

/// `?token=...` on wizard and create-admin routes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    pub token: Option<String>,
}

impl TokenQuery {
    /// The trimmed token, ignoring blank values.
    pub fn token(&self) -> Option<&str> {
        self.token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}
