// Administrator provisioning
//
// Field rules run first (cheap, no I/O), then uniqueness against the account store. The store's
// UNIQUE constraints remain the final authority when two creators race.

use log::info;
use std::sync::Arc;

use crate::database::accounts::{AccountStore, AdminAccount};
use crate::error::{SetupError, SetupResult, ValidationErrors, ValidationFailure};
use crate::models::requests::NewAdmin;
use crate::security::password::{hash_password, PasswordPolicy};
use crate::utils::validation::{validate_display_name, validate_email, validate_username};

#[derive(Clone)]
pub struct AdminProvisioner {
    accounts: Arc<dyn AccountStore>,
    policy: PasswordPolicy,
    bcrypt_cost: Option<u32>,
}

impl AdminProvisioner {
    pub fn new(accounts: Arc<dyn AccountStore>, policy: PasswordPolicy) -> Self {
        Self {
            accounts,
            policy,
            bcrypt_cost: None,
        }
    }

    /// Override the bcrypt cost (tests use the minimum).
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = Some(cost);
        self
    }

    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    /// Syntactic and policy checks for every field.
    pub fn field_errors(&self, admin: &NewAdmin) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        let checks = [
            validate_username(&admin.username),
            validate_email(&admin.email),
            self.policy.validate(&admin.password, &admin.username),
            validate_display_name("first_name", &admin.first_name),
            validate_display_name("last_name", &admin.last_name),
        ];
        for failure in checks.into_iter().filter_map(Result::err) {
            errors.add(failure);
        }
        errors
    }

    /// Field checks plus username/email uniqueness.
    pub async fn collect_errors(&self, admin: &NewAdmin) -> SetupResult<ValidationErrors> {
        let mut errors = self.field_errors(admin);
        if !errors.has("username") && self.accounts.username_exists(&admin.username).await? {
            errors.add(ValidationFailure::new(
                "username",
                "A user with that username already exists.",
            ));
        }
        if !errors.has("email") && self.accounts.email_exists(&admin.email).await? {
            errors.add(ValidationFailure::new(
                "email",
                "A user with that email already exists.",
            ));
        }
        Ok(errors)
    }

    /// Create the administrator. Nothing is written unless every precondition holds.
    pub async fn create(&self, admin: &NewAdmin, force: bool) -> SetupResult<AdminAccount> {
        if !force && self.accounts.superuser_exists().await? {
            return Err(SetupError::AdminExists);
        }

        let errors = self.collect_errors(admin).await?;
        if let Some((field, reason)) = errors.iter().next() {
            return Err(ValidationFailure::new(field, reason).into());
        }

        let password_hash = hash_password(&admin.password, self.bcrypt_cost).await?;
        let account = self
            .accounts
            .create_superuser(admin, &password_hash, force)
            .await?;

        info!(
            "[PHASE: admin] [STEP: provision] Administrator provisioned (id={}, forced={})",
            account.id, force
        );
        Ok(account)
    }
}
