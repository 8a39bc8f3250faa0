// Account store (user/auth collaborator)
//
// AccountStore trait enables deterministic testing of provisioning failure paths without a
// real database. Production code uses SqlAccountStore; tests may substitute stubs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::database::connection;
use crate::database::migrations::MigrationRunner;
use crate::error::{SetupError, SetupResult, ValidationFailure};
use crate::models::requests::NewAdmin;

/// An administrative (staff + superuser) account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminAccount {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub date_joined: DateTime<Utc>,
}

impl AdminAccount {
    pub fn display(&self) -> String {
        format!("{} ({})", self.username, self.email)
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Database reachable.
    async fn ping(&self) -> SetupResult<()>;

    /// Names of migrations not yet applied.
    async fn pending_migrations(&self) -> SetupResult<Vec<String>>;

    /// Apply pending migrations; returns the names applied.
    async fn apply_migrations(&self) -> SetupResult<Vec<String>>;

    async fn list_superusers(&self) -> SetupResult<Vec<AdminAccount>>;

    async fn username_exists(&self, username: &str) -> SetupResult<bool>;

    async fn email_exists(&self, email: &str) -> SetupResult<bool>;

    /// Insert a staff + superuser account in one transaction.
    ///
    /// Unless `allow_existing_admin`, the transaction re-checks that no superuser exists and
    /// fails with `AdminExists` otherwise. Unique violations map to field validation failures.
    async fn create_superuser(
        &self,
        admin: &NewAdmin,
        password_hash: &str,
        allow_existing_admin: bool,
    ) -> SetupResult<AdminAccount>;

    async fn find_superuser(&self, id: i64) -> SetupResult<Option<AdminAccount>>;

    async fn superuser_exists(&self) -> SetupResult<bool> {
        Ok(!self.list_superusers().await?.is_empty())
    }
}

type AccountRow = (i64, String, String, String, String, bool, bool, DateTime<Utc>);

const SELECT_ADMIN: &str = "SELECT id, username, email, first_name, last_name, is_staff, is_superuser, date_joined FROM users";

fn from_row(row: AccountRow) -> AdminAccount {
    let (id, username, email, first_name, last_name, is_staff, is_superuser, date_joined) = row;
    AdminAccount {
        id,
        username,
        email,
        first_name,
        last_name,
        is_staff,
        is_superuser,
        date_joined,
    }
}

/// SQLite-backed account store.
#[derive(Debug, Clone)]
pub struct SqlAccountStore {
    pool: SqlitePool,
}

impl SqlAccountStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        Ok(Self::new(connection::connect(database_url).await?))
    }
}

fn map_insert_error(err: sqlx::Error) -> SetupError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            let message = db.message();
            if message.contains("users.username") {
                return ValidationFailure::new("username", "A user with that username already exists.")
                    .into();
            }
            if message.contains("users.email") {
                return ValidationFailure::new("email", "A user with that email already exists.")
                    .into();
            }
        }
    }
    SetupError::from(err)
}

#[async_trait]
impl AccountStore for SqlAccountStore {
    async fn ping(&self) -> SetupResult<()> {
        connection::ping(&self.pool)
            .await
            .map_err(|e| SetupError::Database(format!("{:#}", e)))
    }

    async fn pending_migrations(&self) -> SetupResult<Vec<String>> {
        MigrationRunner::new(self.pool.clone())
            .pending()
            .await
            .map(|names| names.into_iter().map(str::to_string).collect())
            .map_err(|e| SetupError::Database(format!("{:#}", e)))
    }

    async fn apply_migrations(&self) -> SetupResult<Vec<String>> {
        MigrationRunner::new(self.pool.clone())
            .run()
            .await
            .map_err(|e| SetupError::Database(format!("{:#}", e)))
    }

    async fn list_superusers(&self) -> SetupResult<Vec<AdminAccount>> {
        let sql = format!("{} WHERE is_superuser = 1 ORDER BY id", SELECT_ADMIN);
        let rows: Vec<AccountRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(from_row).collect())
    }

    async fn username_exists(&self, username: &str) -> SetupResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn email_exists(&self, email: &str) -> SetupResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn create_superuser(
        &self,
        admin: &NewAdmin,
        password_hash: &str,
        allow_existing_admin: bool,
    ) -> SetupResult<AdminAccount> {
        let mut tx = self.pool.begin().await?;

        // The "no administrator yet" guard is part of the INSERT itself, so the check and the
        // write are a single statement under SQLite's write lock.
        let guard = if allow_existing_admin {
            ""
        } else {
            "WHERE NOT EXISTS (SELECT 1 FROM users WHERE is_superuser = 1)"
        };
        let sql = format!(
            r#"
            INSERT INTO users
                (username, email, password_hash, first_name, last_name, is_staff, is_superuser, is_active, date_joined)
            SELECT ?, ?, ?, ?, ?, 1, 1, 1, ?
            {}
            "#,
            guard
        );

        let now = Utc::now();
        let result = sqlx::query(&sql)
            .bind(&admin.username)
            .bind(&admin.email)
            .bind(password_hash)
            .bind(&admin.first_name)
            .bind(&admin.last_name)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(map_insert_error)?;

        if result.rows_affected() == 0 {
            warn!("[PHASE: admin] [STEP: create] Refusing to create a second administrator");
            return Err(SetupError::AdminExists);
        }
        let id = result.last_insert_rowid();

        tx.commit().await?;

        info!(
            "[PHASE: admin] [STEP: create] Administrator account created (id={}, username={})",
            id, admin.username
        );
        Ok(AdminAccount {
            id,
            username: admin.username.clone(),
            email: admin.email.clone(),
            first_name: admin.first_name.clone(),
            last_name: admin.last_name.clone(),
            is_staff: true,
            is_superuser: true,
            date_joined: now,
        })
    }

    async fn find_superuser(&self, id: i64) -> SetupResult<Option<AdminAccount>> {
        let sql = format!("{} WHERE id = ? AND is_superuser = 1", SELECT_ADMIN);
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(from_row))
    }
}
