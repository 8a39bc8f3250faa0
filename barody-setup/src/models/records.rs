// Persisted state records (installation record, setup config, token record)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Version stamped into every installation record written by this crate.
pub const SCHEMA_VERSION: &str = "0.2.0";

/// Keys an installation record must carry to be trusted.
pub const REQUIRED_RECORD_KEYS: [&str; 4] = ["completed", "completed_at", "installation_id", "version"];

/// Durable proof that first-run setup completed.
///
/// Written once by `mark_installation_complete` and replaced wholesale on a forced reinstall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationRecord {
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub admin_created: bool,
    pub installation_id: String,
    #[serde(rename = "version", alias = "schema_version")]
    pub schema_version: String,
}

impl InstallationRecord {
    pub fn new(admin_created: bool) -> Self {
        Self {
            completed: true,
            completed_at: Some(Utc::now()),
            admin_created,
            installation_id: uuid::Uuid::new_v4().simple().to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
        }
    }

    /// Integrity check on the raw document: every required key present and non-null.
    ///
    /// `schema_version` is accepted as a spelling of `version`.
    pub fn has_required_keys(raw: &Value) -> bool {
        let Some(obj) = raw.as_object() else {
            return false;
        };
        REQUIRED_RECORD_KEYS.iter().all(|key| {
            let present = |k: &str| obj.get(k).is_some_and(|v| !v.is_null());
            present(key) || (*key == "version" && present("schema_version"))
        })
    }
}

/// One-time setup token metadata. The plaintext is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Unused and unexpired.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        !self.used && !self.is_expired_at(now)
    }
}

/// Mutable key/value bag of transient setup artifacts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetupConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_token: Option<TokenRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_record_serializes_required_keys() {
        let record = InstallationRecord::new(true);
        let raw = serde_json::to_value(&record).expect("serialize");

        assert!(InstallationRecord::has_required_keys(&raw));
        assert_eq!(raw["version"], SCHEMA_VERSION);
        assert_eq!(raw["installation_id"].as_str().map(str::len), Some(32));
        assert!(raw.get("schema_version").is_none());
    }

    #[test]
    fn partial_records_fail_integrity() {
        assert!(!InstallationRecord::has_required_keys(&json!({ "completed": true })));
        assert!(!InstallationRecord::has_required_keys(&json!({
            "completed": true,
            "completed_at": null,
            "installation_id": "abc",
            "version": "0.2.0"
        })));
        assert!(!InstallationRecord::has_required_keys(&json!([1, 2, 3])));
        assert!(InstallationRecord::has_required_keys(&json!({
            "completed": true,
            "completed_at": "2026-01-01T00:00:00Z",
            "installation_id": "abc",
            "schema_version": "0.1.0"
        })));
    }

    #[test]
    fn setup_config_preserves_unknown_keys() {
        let raw = json!({ "site_name": "Barody", "setup_token": null });
        let config: SetupConfig = serde_json::from_value(raw).expect("parse");
        assert!(config.setup_token.is_none());
        assert_eq!(config.extra.get("site_name"), Some(&json!("Barody")));

        let back = serde_json::to_value(&config).expect("serialize");
        assert_eq!(back, json!({ "site_name": "Barody" }));
    }

    #[test]
    fn token_expiry_boundary_is_inclusive() {
        let now = Utc::now();
        let record = TokenRecord {
            token_hash: "h".into(),
            created_at: now,
            expires_at: now,
            used: false,
            used_at: None,
        };
        assert!(record.is_expired_at(now));
        assert!(!record.is_live_at(now));
        assert!(record.is_live_at(now - chrono::Duration::seconds(1)));
    }
}
