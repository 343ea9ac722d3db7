//! Fixtures shared by storage-backed unit tests.

use chrono::Utc;

use crate::config::DatabaseConfig;
use crate::domain::UserId;
use crate::storage::{create_pool, DbPool};

/// Fresh migrated in-memory database.
pub async fn memory_pool() -> DbPool {
    let config = DatabaseConfig { url: "sqlite::memory:".to_string(), ..Default::default() };
    create_pool(&config).await.expect("in-memory pool")
}

/// Insert a bare user row and return its id.
pub async fn insert_user(pool: &DbPool, username: &str) -> UserId {
    let id = UserId::new();
    sqlx::query(
        "INSERT INTO users (id, username, password_hash, permanent_api_token, created_at, updated_at) \
         VALUES (?, ?, 'hash', 0, ?, ?)",
    )
    .bind(&id)
    .bind(username)
    .bind(Utc::now())
    .bind(Utc::now())
    .execute(pool)
    .await
    .expect("insert user");
    id
}
