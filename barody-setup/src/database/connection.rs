// Database connection management
//
// The account store lives in SQLite. Connecting is retried with backoff so a database file on a
// slow volume (or briefly locked by another worker) does not fail startup outright.

use anyhow::{Context, Result};
use log::{info, warn};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tokio::time::timeout;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::utils::logging::mask_database_url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Error returned by connection attempts.
/// Keeps user-friendly messages separate from internal details.
#[derive(Debug, Clone)]
pub struct ConnectError {
    /// Safe to show to an operator
    pub user_message: String,
    /// For logs only
    pub internal_details: String,
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.user_message)
    }
}

impl std::error::Error for ConnectError {}

/// Fails unless `database_url` uses the `sqlite:` scheme. sqlx would otherwise treat a
/// `postgres://...` URL as a file name.
pub fn ensure_sqlite_url(database_url: &str) -> Result<()> {
    let scheme = database_url.trim().split(':').next().unwrap_or_default();
    if !scheme.eq_ignore_ascii_case("sqlite") {
        anyhow::bail!(
            "Unsupported database URL {} (expected a sqlite: URL)",
            mask_database_url(database_url)
        );
    }
    Ok(())
}

/// Parse a `sqlite:` URL into connect options.
pub fn sqlite_options(database_url: &str) -> Result<SqliteConnectOptions> {
    ensure_sqlite_url(database_url)?;
    let opts = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("Invalid database URL: {}", mask_database_url(database_url)))?;
    Ok(opts.busy_timeout(BUSY_TIMEOUT))
}

/// Open a pool, retrying transient failures.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let opts = sqlite_options(database_url)?;
    info!(
        "[PHASE: database] [STEP: connect] Connecting to {}",
        mask_database_url(database_url)
    );
    connect_with(opts).await.map_err(|e| {
        warn!(
            "[PHASE: database] [STEP: connect] Connection failed: {}",
            e.internal_details
        );
        anyhow::Error::new(e)
    })
}

pub async fn connect_with(opts: SqliteConnectOptions) -> Result<SqlitePool, ConnectError> {
    let retry_strategy = ExponentialBackoff::from_millis(50)
        .factor(2)
        .max_delay(Duration::from_millis(750))
        .take(3)
        .map(jitter);

    Retry::spawn(retry_strategy, || {
        let opts = opts.clone();
        async move {
            let attempt = SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(opts);
            match timeout(CONNECT_TIMEOUT, attempt).await {
                Ok(Ok(pool)) => Ok(pool),
                Ok(Err(e)) => Err(ConnectError {
                    user_message: "Unable to open the database. Verify the path and permissions."
                        .to_string(),
                    internal_details: format!("Connection error: {}", e),
                }),
                Err(_) => Err(ConnectError {
                    user_message: "Database connection timed out.".to_string(),
                    internal_details: "Connection attempt timed out".to_string(),
                }),
            }
        }
    })
    .await
}

/// Pool that connects on first use, so the web server can start (and report unhealthy)
/// while the database is down.
pub fn connect_lazy(database_url: &str) -> Result<SqlitePool> {
    let opts = sqlite_options(database_url)?;
    Ok(SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(CONNECT_TIMEOUT)
        .connect_lazy_with(opts))
}

/// Cheap round-trip used by readiness/health checks.
pub async fn ping(pool: &SqlitePool) -> Result<()> {
    sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Database ping failed")?;
    Ok(())
}
