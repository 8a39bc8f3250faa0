// Migration runner
// Applies the embedded SQL migrations in order, each in its own transaction, and records
// name + checksum in `schema_migrations`. An applied migration whose checksum changed is an error.

use anyhow::{Context, Result};
use chrono::Utc;
use log::info;
use sqlx::{Executor, SqlitePool};
use std::collections::HashMap;

use crate::security::crypto::sha256_hex;

/// A migration compiled into the binary.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

impl Migration {
    pub fn checksum(&self) -> String {
        sha256_hex(self.sql.as_bytes())
    }
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "001_create_users",
        sql: include_str!("../../migrations/001_create_users.sql"),
    },
    Migration {
        name: "002_index_superusers",
        sql: include_str!("../../migrations/002_index_superusers.sql"),
    },
];

const CREATE_TRACKING_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    name              TEXT PRIMARY KEY,
    checksum          TEXT NOT NULL,
    applied_at        TEXT NOT NULL,
    execution_time_ms INTEGER NOT NULL DEFAULT 0
)
"#;

pub struct MigrationRunner {
    pool: SqlitePool,
    migrations: &'static [Migration],
}

impl MigrationRunner {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_migrations(pool, MIGRATIONS)
    }

    pub fn with_migrations(pool: SqlitePool, migrations: &'static [Migration]) -> Self {
        Self { pool, migrations }
    }

    /// Applied migration names mapped to their recorded checksum.
    ///
    /// A brand new database has no tracking table yet; that reads as "nothing applied".
    pub async fn applied(&self) -> Result<HashMap<String, String>> {
        let tables: i64 = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'",
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to check schema_migrations table existence")?;

        if tables == 0 {
            return Ok(HashMap::new());
        }

        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT name, checksum FROM schema_migrations")
                .fetch_all(&self.pool)
                .await
                .context("Failed to query applied migrations")?;
        Ok(rows.into_iter().collect())
    }

    /// Names of migrations not yet applied, in execution order.
    pub async fn pending(&self) -> Result<Vec<&'static str>> {
        let applied = self.applied().await?;
        self.verify_checksums(&applied)?;
        Ok(self
            .migrations
            .iter()
            .filter(|m| !applied.contains_key(m.name))
            .map(|m| m.name)
            .collect())
    }

    /// Apply every pending migration. Returns the names applied by this call.
    pub async fn run(&self) -> Result<Vec<String>> {
        self.pool
            .execute(CREATE_TRACKING_TABLE)
            .await
            .context("Failed to create schema_migrations table")?;

        let pending = self.pending().await?;
        if pending.is_empty() {
            info!("[PHASE: database] [STEP: migrations] Schema is up to date");
            return Ok(Vec::new());
        }

        let mut applied = Vec::with_capacity(pending.len());
        for migration in self.migrations.iter().filter(|m| pending.contains(&m.name)) {
            self.apply(migration).await?;
            applied.push(migration.name.to_string());
        }
        Ok(applied)
    }

    async fn apply(&self, migration: &Migration) -> Result<()> {
        info!(
            "[PHASE: database] [STEP: apply_migration] Applying migration: {}",
            migration.name
        );
        let start_time = Utc::now();

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        // SQLite runs every statement in the script.
        (&mut *tx)
            .execute(migration.sql)
            .await
            .with_context(|| format!("Failed to execute migration SQL: {}", migration.name))?;

        let execution_time_ms = (Utc::now() - start_time).num_milliseconds();
        sqlx::query(
            "INSERT INTO schema_migrations (name, checksum, applied_at, execution_time_ms) VALUES (?, ?, ?, ?)",
        )
        .bind(migration.name)
        .bind(migration.checksum())
        .bind(Utc::now().to_rfc3339())
        .bind(execution_time_ms)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to record applied migration: {}", migration.name))?;

        tx.commit().await.context("Failed to commit transaction")?;

        info!(
            "[PHASE: database] [STEP: apply_migration] Successfully applied migration: {} ({}ms)",
            migration.name, execution_time_ms
        );
        Ok(())
    }

    fn verify_checksums(&self, applied: &HashMap<String, String>) -> Result<()> {
        for migration in self.migrations {
            if let Some(recorded) = applied.get(migration.name) {
                let computed = migration.checksum();
                if *recorded != computed {
                    anyhow::bail!(
                        "Checksum mismatch for migration {}: recorded {}, embedded {}",
                        migration.name,
                        recorded,
                        computed
                    );
                }
            }
        }
        Ok(())
    }
}
