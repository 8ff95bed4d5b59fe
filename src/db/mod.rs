/// Database layer
///
/// Manages the SQLite connection pool, the embedded migration and the
/// startup schema check. Typed access lives in the repository.

pub mod account;
pub mod repository;
pub mod sqlite;

use crate::error::{AuthError, AuthResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

/// Tables the engine cannot run without
pub const REQUIRED_TABLES: [&str; 4] = [
    sqlite::ACCOUNTS_TABLE,
    sqlite::BANS_TABLE,
    sqlite::ACTIVATION_CODES_TABLE,
    sqlite::EVENTS_TABLE,
];

/// Database connection options
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub enable_wal: bool,
    /// How long a statement waits on a locked database
    pub busy_timeout: Duration,
    /// How long a caller waits for a pooled connection
    pub acquire_timeout: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            enable_wal: true,
            busy_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Create a SQLite connection pool
pub async fn create_pool(path: &Path, options: DatabaseOptions) -> AuthResult<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            AuthError::Config(format!(
                "Cannot create database directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let connect_options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(if options.enable_wal {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        })
        .foreign_keys(true)
        .busy_timeout(options.busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .acquire_timeout(options.acquire_timeout)
        .connect_with(connect_options)
        .await?;

    tracing::debug!(
        path = %path.display(),
        max_connections = options.max_connections,
        "Database pool created"
    );

    Ok(pool)
}

/// Single-connection in-memory database.
///
/// Each connection to `:memory:` is its own database, so the pool is pinned
/// to one connection that is never recycled.
pub async fn memory_pool() -> AuthResult<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    Ok(pool)
}

/// Run migrations for a database
/// Migrations are embedded at compile time from ./migrations directory
pub async fn run_migrations(pool: &SqlitePool) -> AuthResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;

    tracing::debug!("Database migrations applied");
    Ok(())
}

/// Test database connection
pub async fn test_connection(pool: &SqlitePool) -> AuthResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;

    Ok(())
}

/// Fail with [`AuthError::Schema`] when any required table is missing
pub async fn verify_schema(pool: &SqlitePool) -> AuthResult<()> {
    let mut missing = Vec::new();

    for table in REQUIRED_TABLES {
        let found: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if found == 0 {
            missing.push(table);
        }
    }

    if !missing.is_empty() {
        tracing::error!(missing = ?missing, "Required tables are missing");
        return Err(AuthError::Schema(format!(
            "missing tables: {}",
            missing.join(", ")
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pool_migrates_and_verifies() {
        let pool = memory_pool().await.unwrap();
        test_connection(&pool).await.unwrap();

        assert!(matches!(verify_schema(&pool).await, Err(AuthError::Schema(_))));

        run_migrations(&pool).await.unwrap();
        verify_schema(&pool).await.unwrap();

        // Idempotent
        run_migrations(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_table_is_schema_error() {
        let pool = memory_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();

        sqlx::query("DROP TABLE bans").execute(&pool).await.unwrap();

        match verify_schema(&pool).await {
            Err(AuthError::Schema(message)) => assert!(message.contains("bans")),
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_file_pool() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("authed.sqlite");

        let pool = create_pool(&path, DatabaseOptions::default()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        verify_schema(&pool).await.unwrap();

        assert!(path.exists());
    }
}
