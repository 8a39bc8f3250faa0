// One-time setup token lifecycle
//
// Issue, validate, consume, and expire the single live setup token stored in the setup config.
// Only the SHA-256 of a token is persisted; the plaintext leaves `generate` exactly once.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use std::sync::Arc;

use crate::installation::files::{JsonFileStore, Outcome};
use crate::models::records::{SetupConfig, TokenRecord};
use crate::security::crypto::{constant_time_eq, generate_url_safe_token, secret_fingerprint};
use crate::utils::logging::mask_sensitive;

pub const DEFAULT_TOKEN_EXPIRY_HOURS: i64 = 24;

/// A freshly generated token. `plaintext` must be handed to the operator and then dropped.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub plaintext: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TokenManager {
    store: Arc<JsonFileStore>,
}

impl TokenManager {
    pub fn new(store: Arc<JsonFileStore>) -> Self {
        Self { store }
    }

    /// Issue a new token, retiring any previous one.
    pub async fn generate(&self, expires_in_hours: i64) -> Result<IssuedToken> {
        if expires_in_hours <= 0 {
            anyhow::bail!("Token expiry must be a positive number of hours");
        }

        let plaintext = generate_url_safe_token()?;
        let now = Utc::now();
        let record = TokenRecord {
            token_hash: secret_fingerprint(&plaintext),
            created_at: now,
            expires_at: now + Duration::hours(expires_in_hours),
            used: false,
            used_at: None,
        };
        let expires_at = record.expires_at;
        let masked = mask_sensitive(&record.token_hash);

        self.store
            .update(|config: &mut SetupConfig| {
                config.setup_token = Some(record);
                Outcome::Commit(())
            })
            .await?;

        info!(
            "[PHASE: token] [STEP: generate] Setup token issued (hash={}, expires_at={})",
            masked,
            expires_at.to_rfc3339()
        );
        Ok(IssuedToken {
            plaintext,
            expires_at,
        })
    }

    /// Pure read. False on any doubt: no record, used, hash mismatch, or expired.
    pub async fn validate(&self, candidate: &str) -> bool {
        let config = match self.store.read::<SetupConfig>().await {
            Ok(Some(config)) => config,
            Ok(None) => return false,
            Err(e) => {
                warn!(
                    "[PHASE: token] [STEP: validate] Setup config unreadable, rejecting token: {:#}",
                    e
                );
                return false;
            }
        };
        matches_live(config.setup_token.as_ref(), candidate, Utc::now())
    }

    /// Validate and mark used in one locked read-modify-write. At most one caller wins.
    pub async fn consume(&self, candidate: &str) -> Result<bool> {
        let now = Utc::now();
        let consumed = self
            .store
            .update(|config: &mut SetupConfig| {
                if !matches_live(config.setup_token.as_ref(), candidate, now) {
                    return Outcome::Skip(false);
                }
                if let Some(record) = config.setup_token.as_mut() {
                    record.used = true;
                    record.used_at = Some(now);
                }
                Outcome::Commit(true)
            })
            .await?;

        if consumed {
            info!("[PHASE: token] [STEP: consume] Setup token consumed");
        } else {
            warn!("[PHASE: token] [STEP: consume] Setup token rejected");
        }
        Ok(consumed)
    }

    /// Drop an expired token record. Idempotent.
    pub async fn cleanup_expired(&self) -> Result<bool> {
        let now = Utc::now();
        let removed = self
            .store
            .update(|config: &mut SetupConfig| match &config.setup_token {
                Some(record) if record.is_expired_at(now) => {
                    config.setup_token = None;
                    Outcome::Commit(true)
                }
                _ => Outcome::Skip(false),
            })
            .await?;

        if removed {
            info!("[PHASE: token] [STEP: cleanup] Expired setup token removed");
        }
        Ok(removed)
    }

    /// The stored token record, if any (diagnostics only).
    pub async fn current(&self) -> Option<TokenRecord> {
        match self.store.read::<SetupConfig>().await {
            Ok(Some(config)) => config.setup_token,
            _ => None,
        }
    }
}

fn matches_live(record: Option<&TokenRecord>, candidate: &str, now: DateTime<Utc>) -> bool {
    let Some(record) = record else {
        return false;
    };
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return false;
    }
    // Hash comparison runs before the state checks so timing does not depend on the record.
    let hash_ok = constant_time_eq(&secret_fingerprint(candidate), &record.token_hash);
    hash_ok && record.is_live_at(now)
}
