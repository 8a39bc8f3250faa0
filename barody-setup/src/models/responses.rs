// API response models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::SetupPhase;

// =========================
// Generic wrapper
// =========================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: Some(message.into()),
        }
    }

}

// =========================
// Setup
// =========================

/// Readiness of each precondition for admin creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupProgress {
    pub database_ready: bool,
    pub migrations_applied: bool,
    pub admin_exists: bool,
    pub installation_complete: bool,
    pub ready_for_admin_creation: bool,
}

impl SetupProgress {
    pub fn new(
        database_ready: bool,
        migrations_applied: bool,
        admin_exists: bool,
        installation_complete: bool,
    ) -> Self {
        Self {
            database_ready,
            migrations_applied,
            admin_exists,
            installation_complete,
            ready_for_admin_creation: database_ready
                && migrations_applied
                && !admin_exists
                && !installation_complete,
        }
    }
}

/// Diagnostic projection of installation state. Errors are reported in `error`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationStatus {
    pub installation_complete: bool,
    pub phase: SetupPhase,
    pub admin_created: bool,
    pub admin_count: usize,
    pub token_issued: bool,
    pub progress: SetupProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Installation record contents plus live admin existence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationInfo {
    pub installation_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub admin_created: bool,
    pub admin_exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `/setup/status/` payload: the status projection with the record details alongside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupStatusReport {
    #[serde(flatten)]
    pub status: InstallationStatus,
    pub installation_info: InstallationInfo,
}

/// Liveness projection for `/setup/health/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// "healthy" | "degraded" | "unhealthy"
    pub status: String,
    pub database: bool,
    pub migrations: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    pub fn from_checks(database: bool, migrations: bool, error: Option<String>) -> Self {
        let status = match (database, migrations) {
            (true, true) => "healthy",
            (true, false) => "degraded",
            (false, _) => "unhealthy",
        };
        Self {
            status: status.to_string(),
            database,
            migrations,
            timestamp: Utc::now(),
            error,
        }
    }

    pub fn is_unhealthy(&self) -> bool {
        !self.database
    }
}
