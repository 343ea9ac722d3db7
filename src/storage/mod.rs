//! # Storage and Persistence
//!
//! SQLite connection pool, embedded migrations and the account/token
//! repositories.

pub mod migrations;
pub mod pool;
pub mod token_repository;
pub mod user_repository;

#[cfg(test)]
pub(crate) mod test_support;

pub use crate::config::DatabaseConfig;

pub use migrations::{
    list_applied_migrations, run_migrations, validate_migrations, MigrationInfo,
};
pub use pool::{create_pool, DbPool};
pub use token_repository::{InMemoryTokenRepository, SqlxTokenRepository, TokenRepository};
pub use user_repository::{SqlxUserRepository, UserRepository};

use crate::errors::{Error, Result};

/// Check database connectivity
pub async fn check_connection(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| Error::database(e, "Database connectivity check failed"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_check_connection() {
        let pool = test_support::memory_pool().await;
        assert!(check_connection(&pool).await.is_ok());
    }
}
