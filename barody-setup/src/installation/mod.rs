// Installation service
//
// Single source of truth for "is this deployment set up". Every entry point (CLI interactive,
// CLI headless, web wizard, gating middleware) goes through this facade; none of them touch the
// state files or the account store directly.
//
// IMPORTANT:
// - Never log plaintext tokens or passwords.
// - Missing, partial or corrupt state reads as "installation incomplete" (fail closed).

pub mod admin;
pub mod files;

use log::{error, info, warn};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Settings;
use crate::database::accounts::{AccountStore, AdminAccount};
use crate::error::{SetupError, SetupResult, ValidationErrors};
use crate::models::records::{InstallationRecord, SetupConfig};
use crate::models::requests::NewAdmin;
use crate::models::responses::{HealthReport, InstallationInfo, InstallationStatus, SetupProgress};
use crate::models::state::SetupPhase;
use crate::security::password::PasswordPolicy;
use crate::security::token::{IssuedToken, TokenManager};

use admin::AdminProvisioner;
use files::{JsonFileStore, Outcome};

/// Locations of the two durable state files.
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub installation_record: PathBuf,
    pub setup_config: PathBuf,
}

impl StatePaths {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            installation_record: settings.installation_record_path.clone(),
            setup_config: settings.setup_config_path.clone(),
        }
    }
}

pub struct InstallationService {
    record: JsonFileStore,
    setup_config: Arc<JsonFileStore>,
    tokens: TokenManager,
    accounts: Arc<dyn AccountStore>,
    admins: AdminProvisioner,
}

impl InstallationService {
    pub fn new(paths: StatePaths, accounts: Arc<dyn AccountStore>) -> Self {
        let setup_config = Arc::new(JsonFileStore::new(paths.setup_config));
        Self {
            record: JsonFileStore::new(paths.installation_record),
            tokens: TokenManager::new(setup_config.clone()),
            setup_config,
            admins: AdminProvisioner::new(accounts.clone(), PasswordPolicy::default()),
            accounts,
        }
    }

    pub fn with_admin_provisioner(mut self, admins: AdminProvisioner) -> Self {
        self.admins = admins;
        self
    }

    pub fn accounts(&self) -> &Arc<dyn AccountStore> {
        &self.accounts
    }

    pub fn password_policy(&self) -> &PasswordPolicy {
        self.admins.policy()
    }

    // =========================
    // Installation record
    // =========================

    /// The trusted installation record, if any.
    ///
    /// `Ok(None)` for absent, partial or unparseable records; `Err` only when the file exists
    /// but cannot be read at all.
    pub async fn installation_record(&self) -> SetupResult<Option<InstallationRecord>> {
        let raw = match self.record.read_value().await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(e) if e.downcast_ref::<serde_json::Error>().is_some() => {
                warn!(
                    "[PHASE: installation] [STEP: check] Installation record is corrupt, treating as incomplete: {:#}",
                    e
                );
                return Ok(None);
            }
            Err(e) => return Err(SetupError::Storage(e)),
        };

        if !InstallationRecord::has_required_keys(&raw) {
            warn!(
                "[PHASE: installation] [STEP: check] Installation record is missing required fields, treating as incomplete"
            );
            return Ok(None);
        }

        match serde_json::from_value::<InstallationRecord>(raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(
                    "[PHASE: installation] [STEP: check] Installation record has invalid field values: {}",
                    e
                );
                Ok(None)
            }
        }
    }

    /// Completion check that surfaces I/O failures (used by the gating middleware).
    pub async fn check_installation(&self) -> SetupResult<bool> {
        Ok(self
            .installation_record()
            .await?
            .is_some_and(|record| record.completed))
    }

    /// Never fails: any error reads as incomplete.
    pub async fn is_installation_complete(&self) -> bool {
        match self.check_installation().await {
            Ok(complete) => complete,
            Err(e) => {
                warn!(
                    "[PHASE: installation] [STEP: check] Installation check failed, treating as incomplete: {}",
                    e
                );
                false
            }
        }
    }

    pub async fn is_admin_created_during_install(&self) -> bool {
        matches!(self.installation_record().await, Ok(Some(record)) if record.admin_created)
    }

    /// Position in the SETUP -> SETUP_TOKEN_ISSUED -> OPERATIONAL state machine.
    pub async fn current_phase(&self) -> SetupPhase {
        if self.is_installation_complete().await {
            return SetupPhase::Operational;
        }
        match self.tokens.current().await {
            Some(record) if record.is_live_at(chrono::Utc::now()) => SetupPhase::SetupTokenIssued,
            _ => SetupPhase::Setup,
        }
    }

    /// Flip the system to operational. Rewrites the record wholesale with a fresh installation id.
    pub async fn mark_installation_complete(
        &self,
        admin_user_id: Option<i64>,
    ) -> SetupResult<InstallationRecord> {
        let admin_created = match admin_user_id {
            Some(id) => {
                if self.accounts.find_superuser(id).await?.is_none() {
                    error!(
                        "[PHASE: installation] [STEP: complete] Admin user {} not found",
                        id
                    );
                    return Err(SetupError::AdminNotFound);
                }
                true
            }
            None => self.accounts.superuser_exists().await.unwrap_or(false),
        };

        let record = InstallationRecord::new(admin_created);
        self.record.write(&record).await?;

        info!(
            "[PHASE: installation] [STEP: complete] Installation marked complete (installation_id={}, admin_created={})",
            record.installation_id, record.admin_created
        );
        Ok(record)
    }

    // =========================
    // Setup tokens
    // =========================

    pub async fn generate_setup_token(&self, expires_in_hours: i64) -> SetupResult<IssuedToken> {
        Ok(self.tokens.generate(expires_in_hours).await?)
    }

    pub async fn validate_setup_token(&self, token: &str) -> bool {
        self.tokens.validate(token).await
    }

    pub async fn consume_setup_token(&self, token: &str) -> SetupResult<bool> {
        Ok(self.tokens.consume(token).await?)
    }

    /// Consume `token`, failing with `TokenRejected` when it is not live.
    pub async fn redeem_setup_token(&self, token: &str) -> SetupResult<()> {
        if self.consume_setup_token(token).await? {
            Ok(())
        } else {
            Err(SetupError::TokenRejected)
        }
    }

    pub async fn cleanup_expired_tokens(&self) -> SetupResult<bool> {
        Ok(self.tokens.cleanup_expired().await?)
    }

    /// Merge arbitrary keys into the setup config. `setup_token` is reserved and ignored.
    pub async fn save_installation_config(&self, values: Map<String, Value>) -> SetupResult<()> {
        let stamp = chrono::Utc::now().to_rfc3339();
        self.setup_config
            .update(|config: &mut SetupConfig| {
                for (key, value) in values {
                    if key == "setup_token" {
                        continue;
                    }
                    config.extra.insert(key, value);
                }
                config
                    .extra
                    .insert("last_updated".to_string(), Value::String(stamp));
                Outcome::Commit(())
            })
            .await?;
        info!("[PHASE: installation] [STEP: save_config] Installation config saved");
        Ok(())
    }

    // =========================
    // Administrators
    // =========================

    /// Field-scoped problems with `admin`, including username/email collisions.
    pub async fn admin_form_errors(&self, admin: &NewAdmin) -> SetupResult<ValidationErrors> {
        self.admins.collect_errors(admin).await
    }

    pub async fn create_admin_user(&self, admin: &NewAdmin, force: bool) -> SetupResult<AdminAccount> {
        self.admins.create(admin, force).await
    }

    pub async fn list_admins(&self) -> SetupResult<Vec<AdminAccount>> {
        self.accounts.list_superusers().await
    }

    pub async fn find_admin(&self, id: i64) -> SetupResult<Option<AdminAccount>> {
        self.accounts.find_superuser(id).await
    }

    pub async fn apply_migrations(&self) -> SetupResult<Vec<String>> {
        self.accounts.apply_migrations().await
    }

    // =========================
    // Projections
    // =========================

    pub async fn get_setup_progress(&self) -> SetupProgress {
        let database_ready = self.accounts.ping().await.is_ok();
        let migrations_applied = database_ready
            && matches!(self.accounts.pending_migrations().await, Ok(pending) if pending.is_empty());
        let admin_exists =
            migrations_applied && self.accounts.superuser_exists().await.unwrap_or(false);
        let installation_complete = self.is_installation_complete().await;

        SetupProgress::new(
            database_ready,
            migrations_applied,
            admin_exists,
            installation_complete,
        )
    }

    /// Diagnostic status. Never fails; problems are reported in `error`.
    pub async fn get_installation_status(&self) -> InstallationStatus {
        let mut problems = Vec::new();

        let record = match self.installation_record().await {
            Ok(record) => record,
            Err(e) => {
                problems.push(e.to_string());
                None
            }
        };
        let progress = self.get_setup_progress().await;
        let admin_count = if progress.migrations_applied {
            match self.accounts.list_superusers().await {
                Ok(admins) => admins.len(),
                Err(e) => {
                    problems.push(e.to_string());
                    0
                }
            }
        } else {
            0
        };
        if !progress.database_ready {
            problems.push("Database is not reachable".to_string());
        }

        InstallationStatus {
            installation_complete: record.as_ref().is_some_and(|r| r.completed),
            phase: self.current_phase().await,
            admin_created: record.as_ref().is_some_and(|r| r.admin_created),
            admin_count,
            token_issued: self.tokens.current().await.is_some(),
            progress,
            error: (!problems.is_empty()).then(|| problems.join("; ")),
        }
    }

    /// Record contents plus live admin existence. Never fails.
    pub async fn get_installation_info(&self) -> InstallationInfo {
        let admin_exists = self.accounts.superuser_exists().await.unwrap_or(false);
        match self.installation_record().await {
            Ok(Some(record)) => InstallationInfo {
                installation_complete: record.completed,
                completed_at: record.completed_at,
                installation_id: Some(record.installation_id),
                version: Some(record.schema_version),
                admin_created: record.admin_created,
                admin_exists,
                error: None,
            },
            Ok(None) => InstallationInfo {
                admin_exists,
                ..InstallationInfo::default()
            },
            Err(e) => InstallationInfo {
                admin_exists,
                error: Some(e.to_string()),
                ..InstallationInfo::default()
            },
        }
    }

    /// Database reachability and migration status only.
    pub async fn database_health(&self) -> HealthReport {
        if let Err(e) = self.accounts.ping().await {
            return HealthReport::from_checks(false, false, Some(e.to_string()));
        }
        match self.accounts.pending_migrations().await {
            Ok(pending) => HealthReport::from_checks(true, pending.is_empty(), None),
            Err(e) => HealthReport::from_checks(true, false, Some(e.to_string())),
        }
    }
}
