//! API token persistence.
//!
//! A user owns at most one token record; saving replaces whatever was there.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tokio::sync::RwLock;
use tracing::Instrument;

use crate::auth::models::ApiToken;
use crate::domain::UserId;
use crate::errors::{Error, Result};
use crate::storage::DbPool;

#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Insert or replace the token record of `token.user_id`.
    async fn save(&self, token: &ApiToken) -> Result<()>;
    async fn find_by_user_id(&self, user_id: &UserId) -> Result<Option<ApiToken>>;
    async fn find_by_token(&self, token: &str) -> Result<Option<ApiToken>>;
    /// Returns whether a record existed.
    async fn delete_by_user_id(&self, user_id: &UserId) -> Result<bool>;
    /// Remove non-permanent records that expired before `now`.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[derive(Debug, Clone, FromRow)]
struct ApiTokenRow {
    user_id: UserId,
    token: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    permanent: bool,
}

impl From<ApiTokenRow> for ApiToken {
    fn from(row: ApiTokenRow) -> Self {
        Self {
            token: row.token,
            user_id: row.user_id,
            issued_at: row.issued_at,
            expires_at: row.expires_at,
            permanent: row.permanent,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SqlxTokenRepository {
    pool: DbPool,
}

impl SqlxTokenRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenRepository for SqlxTokenRepository {
    async fn save(&self, token: &ApiToken) -> Result<()> {
        sqlx::query(
            "INSERT INTO api_tokens (user_id, token, issued_at, expires_at, permanent) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET \
                token = excluded.token, \
                issued_at = excluded.issued_at, \
                expires_at = excluded.expires_at, \
                permanent = excluded.permanent",
        )
        .bind(&token.user_id)
        .bind(&token.token)
        .bind(token.issued_at)
        .bind(token.expires_at)
        .bind(token.permanent)
        .execute(&self.pool)
        .instrument(crate::db_span!("save_api_token", table = "api_tokens"))
        .await
        .map_err(|e| Error::database(e, "Failed to save API token"))?;
        Ok(())
    }

    async fn find_by_user_id(&self, user_id: &UserId) -> Result<Option<ApiToken>> {
        let row: Option<ApiTokenRow> = sqlx::query_as(
            "SELECT user_id, token, issued_at, expires_at, permanent FROM api_tokens WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::database(e, "Failed to load API token"))?;
        Ok(row.map(ApiToken::from))
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<ApiToken>> {
        let row: Option<ApiTokenRow> = sqlx::query_as(
            "SELECT user_id, token, issued_at, expires_at, permanent FROM api_tokens WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::database(e, "Failed to look up API token"))?;
        Ok(row.map(ApiToken::from))
    }

    async fn delete_by_user_id(&self, user_id: &UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM api_tokens WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .instrument(crate::db_span!("delete_api_token", table = "api_tokens"))
            .await
            .map_err(|e| Error::database(e, "Failed to delete API token"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM api_tokens WHERE permanent = 0 AND julianday(expires_at) <= julianday(?)",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::database(e, "Failed to purge expired API tokens"))?;
        Ok(result.rows_affected())
    }
}

/// Process-local token store.
#[derive(Debug, Default)]
pub struct InMemoryTokenRepository {
    tokens: RwLock<HashMap<UserId, ApiToken>>,
}

impl InMemoryTokenRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }
}

#[async_trait]
impl TokenRepository for InMemoryTokenRepository {
    async fn save(&self, token: &ApiToken) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        let taken = tokens
            .values()
            .any(|existing| existing.token == token.token && existing.user_id != token.user_id);
        if taken {
            return Err(Error::conflict("token value already assigned", "api_token"));
        }
        tokens.insert(token.user_id.clone(), token.clone());
        Ok(())
    }

    async fn find_by_user_id(&self, user_id: &UserId) -> Result<Option<ApiToken>> {
        Ok(self.tokens.read().await.get(user_id).cloned())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<ApiToken>> {
        Ok(self.tokens.read().await.values().find(|t| t.token == token).cloned())
    }

    async fn delete_by_user_id(&self, user_id: &UserId) -> Result<bool> {
        Ok(self.tokens.write().await.remove(user_id).is_some())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, token| token.permanent || token.expires_at > now);
        Ok((before - tokens.len()) as u64)
    }
}
