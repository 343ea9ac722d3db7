//! Account and role persistence.
//!
//! Every `User` handed out is fully loaded: role memberships and the current
//! token record (live or not) come with it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::Instrument;

use crate::auth::models::{Role, User};
use crate::domain::{RoleId, UserId};
use crate::errors::{Error, Result};
use crate::storage::token_repository::{SqlxTokenRepository, TokenRepository};
use crate::storage::DbPool;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>>;
    async fn find_by_name(&self, username: &str) -> Result<Option<User>>;
    async fn list(&self) -> Result<Vec<User>>;
    /// Conflict if the username is taken.
    async fn create(&self, user: &User) -> Result<()>;
    /// Persist username, password hash and the permanent-token flag.
    async fn update(&self, user: &User) -> Result<()>;
    async fn delete(&self, id: &UserId) -> Result<bool>;
    /// Grant a role, creating it if needed. Returns whether the membership is new.
    async fn add_role(&self, id: &UserId, role: &str) -> Result<bool>;
    async fn remove_role(&self, id: &UserId, role: &str) -> Result<bool>;
    async fn users_with_role(&self, role: &str) -> Result<Vec<User>>;
    async fn rename_role(&self, from: &str, to: &str) -> Result<()>;
    async fn delete_role(&self, role: &str) -> Result<bool>;
    async fn ensure_role(&self, role: &str) -> Result<Role>;
}

#[derive(Debug, Clone, FromRow)]
struct UserRow {
    id: UserId,
    username: String,
    password_hash: String,
    permanent_api_token: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct RoleRow {
    id: RoleId,
    name: String,
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        Self { id: row.id, name: row.name }
    }
}

const USER_COLUMNS: &str = "id, username, password_hash, permanent_api_token, created_at";

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error.as_database_error().is_some_and(|db| db.is_unique_violation())
}

#[derive(Debug, Clone)]
pub struct SqlxUserRepository {
    pool: DbPool,
    tokens: SqlxTokenRepository,
}

impl SqlxUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { tokens: SqlxTokenRepository::new(pool.clone()), pool }
    }

    async fn roles_for(&self, id: &UserId) -> Result<Vec<Role>> {
        let rows: Vec<RoleRow> = sqlx::query_as(
            "SELECT r.id, r.name FROM roles r \
             JOIN user_roles ur ON ur.role_id = r.id \
             WHERE ur.user_id = ? ORDER BY r.name",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::database(e, "Failed to load user roles"))?;
        Ok(rows.into_iter().map(Role::from).collect())
    }

    async fn load(&self, row: UserRow) -> Result<User> {
        let roles = self.roles_for(&row.id).await?;
        let api_token = self.tokens.find_by_user_id(&row.id).await?;
        Ok(User {
            id: row.id,
            username: row.username,
            password_hash: row.password_hash,
            permanent_api_token: row.permanent_api_token,
            roles,
            api_token,
            created_at: row.created_at,
        })
    }

    async fn load_all(&self, rows: Vec<UserRow>) -> Result<Vec<User>> {
        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            users.push(self.load(row).await?);
        }
        Ok(users)
    }

    async fn find_role(&self, name: &str) -> Result<Option<Role>> {
        let row: Option<RoleRow> = sqlx::query_as("SELECT id, name FROM roles WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::database(e, "Failed to load role"))?;
        Ok(row.map(Role::from))
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::database(e, "Failed to load user"))?;
        match row {
            Some(row) => Ok(Some(self.load(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_name(&self, username: &str) -> Result<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE username = ?", USER_COLUMNS))
                .bind(username)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::database(e, "Failed to load user"))?;
        match row {
            Some(row) => Ok(Some(self.load(row).await?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<User>> {
        let rows: Vec<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users ORDER BY username", USER_COLUMNS))
                .fetch_all(&self.pool)
                .await
                .map_err(|e| Error::database(e, "Failed to list users"))?;
        self.load_all(rows).await
    }

    async fn create(&self, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, username, password_hash, permanent_api_token, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.permanent_api_token)
        .bind(user.created_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .instrument(crate::db_span!("create_user", table = "users"))
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::conflict(format!("username '{}' is already taken", user.username), "user")
            } else {
                Error::database(e, "Failed to create user")
            }
        })?;
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET username = ?, password_hash = ?, permanent_api_token = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.permanent_api_token)
        .bind(Utc::now())
        .bind(&user.id)
        .execute(&self.pool)
        .instrument(crate::db_span!("update_user", table = "users"))
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::conflict(format!("username '{}' is already taken", user.username), "user")
            } else {
                Error::database(e, "Failed to update user")
            }
        })?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("user", user.id.as_str()));
        }
        Ok(())
    }

    async fn delete(&self, id: &UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .instrument(crate::db_span!("delete_user", table = "users"))
            .await
            .map_err(|e| Error::database(e, "Failed to delete user"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_role(&self, id: &UserId, role: &str) -> Result<bool> {
        let role = self.ensure_role(role).await?;
        let result = sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?, ?)")
            .bind(id)
            .bind(&role.id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::database(e, "Failed to add role membership"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_role(&self, id: &UserId, role: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM user_roles WHERE user_id = ? \
             AND role_id = (SELECT id FROM roles WHERE name = ?)",
        )
        .bind(id)
        .bind(role)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::database(e, "Failed to remove role membership"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn users_with_role(&self, role: &str) -> Result<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT u.id, u.username, u.password_hash, u.permanent_api_token, u.created_at \
             FROM users u \
             JOIN user_roles ur ON ur.user_id = u.id \
             JOIN roles r ON r.id = ur.role_id \
             WHERE r.name = ? ORDER BY u.username",
        )
        .bind(role)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::database(e, "Failed to list role members"))?;
        self.load_all(rows).await
    }

    async fn rename_role(&self, from: &str, to: &str) -> Result<()> {
        let result = sqlx::query("UPDATE roles SET name = ? WHERE name = ?")
            .bind(to)
            .bind(from)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::conflict(format!("role '{}' already exists", to), "role")
                } else {
                    Error::database(e, "Failed to rename role")
                }
            })?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("role", from));
        }
        Ok(())
    }

    async fn delete_role(&self, role: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM roles WHERE name = ?")
            .bind(role)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::database(e, "Failed to delete role"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn ensure_role(&self, role: &str) -> Result<Role> {
        sqlx::query("INSERT OR IGNORE INTO roles (id, name, created_at) VALUES (?, ?, ?)")
            .bind(RoleId::new())
            .bind(role)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::database(e, "Failed to create role"))?;
        self.find_role(role)
            .await?
            .ok_or_else(|| Error::internal(format!("role '{}' missing after insert", role)))
    }
}
