//! # Database Migration Management
//!
//! SQL migrations are embedded in the binary and applied in version order.
//! Each applied file is recorded in `schema_migrations` together with a
//! checksum of its content.

use crate::errors::{Error, Result};
use crate::storage::DbPool;
use serde::Serialize;
use sqlx::Row;
use tracing::{error, info, warn};

/// Embedded migrations as `(file stem, sql)`, sorted by version.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "20240101000001_create_users_and_roles",
        include_str!("../../migrations/20240101000001_create_users_and_roles.sql"),
    ),
    (
        "20240101000002_create_api_tokens",
        include_str!("../../migrations/20240101000002_create_api_tokens.sql"),
    ),
];

/// A row of `schema_migrations`
#[derive(Debug, Clone, Serialize)]
pub struct MigrationInfo {
    pub version: i64,
    pub description: String,
    pub installed_on: chrono::DateTime<chrono::Utc>,
    pub execution_time: i64,
}

/// Apply every embedded migration not yet recorded.
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    create_migration_table(pool).await?;
    let applied = applied_versions(pool).await?;

    let mut migrations_run = 0;
    for (name, sql) in MIGRATIONS {
        let version = extract_version(name)?;
        if applied.contains(&version) {
            continue;
        }

        info!(version, "Running migration: {}", name);
        let start_time = std::time::Instant::now();

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| Error::database(e, "Failed to start migration transaction"))?;

        sqlx::raw_sql(sql).execute(&mut *tx).await.map_err(|e| {
            error!(error = %e, migration = name, "Migration failed");
            Error::database(e, format!("Migration failed: {}", name))
        })?;

        let execution_time = start_time.elapsed().as_millis() as i64;
        sqlx::query(
            "INSERT INTO schema_migrations (version, description, checksum, execution_time, installed_on) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(version)
        .bind(*name)
        .bind(checksum(sql))
        .bind(execution_time)
        .bind(chrono::Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::database(e, format!("Failed to record migration: {}", name)))?;

        tx.commit()
            .await
            .map_err(|e| Error::database(e, "Failed to commit migration transaction"))?;

        migrations_run += 1;
        info!(version, execution_time_ms = execution_time, "Migration completed: {}", name);
    }

    if migrations_run > 0 {
        info!(count = migrations_run, "Database migrations completed");
    } else {
        info!("No pending migrations");
    }
    Ok(())
}

/// Whether every embedded migration is recorded with an unchanged checksum.
pub async fn validate_migrations(pool: &DbPool) -> Result<bool> {
    create_migration_table(pool).await?;
    let rows = sqlx::query("SELECT version, checksum FROM schema_migrations")
        .fetch_all(pool)
        .await
        .map_err(|e| Error::database(e, "Failed to read applied migrations"))?;

    for (name, sql) in MIGRATIONS {
        let version = extract_version(name)?;
        let recorded = rows.iter().find(|row| row.get::<i64, _>("version") == version);
        match recorded {
            None => {
                warn!(version, "Missing migration");
                return Ok(false);
            }
            Some(row) if row.get::<String, _>("checksum") != checksum(sql) => {
                warn!(version, "Migration checksum mismatch");
                return Ok(false);
            }
            Some(_) => {}
        }
    }
    Ok(true)
}

pub async fn list_applied_migrations(pool: &DbPool) -> Result<Vec<MigrationInfo>> {
    create_migration_table(pool).await?;
    let rows = sqlx::query(
        "SELECT version, description, installed_on, execution_time FROM schema_migrations ORDER BY version",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| Error::database(e, "Failed to list applied migrations"))?;

    Ok(rows
        .into_iter()
        .map(|row| MigrationInfo {
            version: row.get("version"),
            description: row.get("description"),
            installed_on: row.get("installed_on"),
            execution_time: row.get("execution_time"),
        })
        .collect())
}

async fn create_migration_table(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            checksum TEXT NOT NULL,
            execution_time INTEGER NOT NULL,
            installed_on TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| Error::database(e, "Failed to create migration tracking table"))?;
    Ok(())
}

async fn applied_versions(pool: &DbPool) -> Result<Vec<i64>> {
    sqlx::query_scalar("SELECT version FROM schema_migrations ORDER BY version")
        .fetch_all(pool)
        .await
        .map_err(|e| Error::database(e, "Failed to get applied migrations"))
}

fn extract_version(name: &str) -> Result<i64> {
    name.split('_')
        .next()
        .and_then(|version| version.parse::<i64>().ok())
        .ok_or_else(|| Error::validation(format!("Invalid migration name: {}", name)))
}

/// FNV-1a over the file content; stable across builds, unlike `DefaultHasher`.
fn checksum(content: &str) -> String {
    let hash = content.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    });
    format!("{:016x}", hash)
}
