//! # Database Connection Pool Management

use crate::config::DatabaseConfig;
use crate::errors::{Error, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Sqlite,
};
use std::{str::FromStr, time::Duration};

/// Type alias for the database connection pool
pub type DbPool = Pool<Sqlite>;

const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a connection pool and, when configured, apply pending migrations.
///
/// An in-memory database lives only as long as its connection, so those URLs
/// get a single connection that is never recycled.
pub async fn create_pool(config: &DatabaseConfig) -> Result<DbPool> {
    let connect_options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| {
            Error::database(
                e,
                format!("Invalid SQLite connection string: {}", sanitize_url(&config.url)),
            )
        })?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(SQLITE_BUSY_TIMEOUT);

    let (pool_options, connect_options) = if config.is_in_memory() {
        (
            SqlitePoolOptions::new().max_connections(1).idle_timeout(None).max_lifetime(None),
            connect_options,
        )
    } else {
        (
            SqlitePoolOptions::new().max_connections(config.max_connections),
            connect_options.journal_mode(SqliteJournalMode::Wal),
        )
    };

    let pool = pool_options.connect_with(connect_options).await.map_err(|e| {
        tracing::error!(error = %e, url = %sanitize_url(&config.url), "Failed to create SQLite database pool");
        Error::database(e, format!("Failed to connect to database: {}", sanitize_url(&config.url)))
    })?;

    tracing::info!(
        url = %sanitize_url(&config.url),
        max_connections = config.max_connections,
        in_memory = config.is_in_memory(),
        "Database connection pool created"
    );

    if config.auto_migrate {
        crate::storage::migrations::run_migrations(&pool).await?;
    }

    Ok(pool)
}

/// Strip query parameters before a URL is logged.
fn sanitize_url(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_url_drops_query() {
        assert_eq!(sanitize_url("sqlite://./data/warden.db?mode=rwc"), "sqlite://./data/warden.db");
        assert_eq!(sanitize_url("sqlite::memory:"), "sqlite::memory:");
    }

    #[tokio::test]
    async fn in_memory_pool_is_migrated() {
        let config = DatabaseConfig { url: "sqlite::memory:".to_string(), ..Default::default() };
        let pool = create_pool(&config).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM api_tokens")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
