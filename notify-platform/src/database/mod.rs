//! SQLite persistence for the ledger, rate limit policies and audit trail.

pub mod models;
pub mod repositories;
pub mod retry;
pub mod time;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

pub type DbPool = Pool<Sqlite>;

/// Pool sizing and lock waiting.
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_connections: u32,
    /// How long SQLite itself waits on a locked database before `SQLITE_BUSY`.
    pub busy_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            busy_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// Open a pool with the default [`PoolSettings`].
pub async fn init_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect(database_url, PoolSettings::default()).await
}

/// Open a pool limited to `max_connections`.
///
/// Every connection to `sqlite::memory:` gets its own empty database, so
/// in-memory pools must use a single connection.
pub async fn init_pool_with_size(
    database_url: &str,
    max_connections: u32,
) -> Result<DbPool, sqlx::Error> {
    connect(
        database_url,
        PoolSettings {
            max_connections,
            ..Default::default()
        },
    )
    .await
}

pub async fn connect(database_url: &str, settings: PoolSettings) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(settings.busy_timeout)
        .foreign_keys(true)
        .pragma("temp_store", "MEMORY");

    let pool = SqlitePoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect_with(options)
        .await?;

    let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode").fetch_one(&pool).await?;
    if !matches!(mode.as_str(), "wal" | "memory") {
        warn!(journal_mode = %mode, "Database is not in WAL mode; concurrent writers will contend");
    }

    info!(
        max_connections = settings.max_connections,
        journal_mode = %mode,
        "Database pool ready"
    );
    Ok(pool)
}

/// Apply the embedded `migrations/` directory.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database schema up to date");
    Ok(())
}
