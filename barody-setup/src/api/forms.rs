// Setup forms
//
// The forms check syntax only. Token validity and consumption belong to the installation
// service; username/email collisions are looked up through it as well.

use serde::Deserialize;

use crate::error::{SetupResult, ValidationErrors, ValidationFailure};
use crate::installation::InstallationService;
use crate::models::requests::NewAdmin;
use crate::utils::validation::validate_token_format;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminCreationForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_confirm: String,
    #[serde(default)]
    pub token: String,
}

impl AdminCreationForm {
    pub fn to_new_admin(&self) -> NewAdmin {
        NewAdmin::new(self.username.trim(), self.email.trim(), self.password.as_str())
            .with_names(self.first_name.trim(), self.last_name.trim())
    }

    /// Form-local rules: token format and password confirmation.
    pub fn local_errors(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if let Err(failure) = validate_token_format(&self.token) {
            errors.add(failure);
        }
        if self.password_confirm.is_empty() {
            errors.add(ValidationFailure::new(
                "password_confirm",
                "This field is required.",
            ));
        } else if self.password != self.password_confirm {
            errors.add(ValidationFailure::new(
                "password_confirm",
                "The two password fields didn't match.",
            ));
        }
        errors
    }

    /// Every field-scoped problem, including username/email already taken.
    pub async fn validate(&self, service: &InstallationService) -> SetupResult<ValidationErrors> {
        let mut errors = service.admin_form_errors(&self.to_new_admin()).await?;
        for (field, reason) in self.local_errors().iter() {
            errors.add(ValidationFailure::new(field, reason));
        }
        Ok(errors)
    }

    /// Copy for re-rendering: password fields are never echoed back.
    pub fn without_passwords(&self) -> Self {
        Self {
            password: String::new(),
            password_confirm: String::new(),
            ..self.clone()
        }
    }
}

/// Token pasted into the wizard landing page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenEntryForm {
    #[serde(default)]
    pub token: String,
}

impl TokenEntryForm {
    pub fn clean(&self) -> Result<String, ValidationFailure> {
        validate_token_format(&self.token)?;
        Ok(self.token.trim().to_string())
    }
}
