//! Administrative account mutations.
//!
//! Every mutation is persisted through the [`UserRepository`] first and only
//! then reported to the [`TokenManager`], so watchers never hear about a
//! change that did not stick.

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, instrument, warn};
use validator::{Validate, ValidationError};

use crate::auth::hashing;
use crate::auth::models::User;
use crate::auth::session::{Session, SessionStore};
use crate::auth::token_manager::TokenManager;
use crate::domain::UserId;
use crate::errors::{Error, Result};
use crate::storage::UserRepository;

lazy_static! {
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_.-]{1,64}$")
        .expect("USERNAME_REGEX should be a valid regex pattern");
}

pub const MIN_PASSWORD_LENGTH: usize = 12;

/// Upper bound keeps hashing cost bounded.
const MAX_PASSWORD_LENGTH: usize = 256;

pub fn validate_username(username: &str) -> std::result::Result<(), ValidationError> {
    if USERNAME_REGEX.is_match(username) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_username")
            .with_message("must be 1-64 characters of letters, digits, '_', '.' or '-'".into()))
    }
}

pub fn validate_password(password: &str) -> std::result::Result<(), ValidationError> {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LENGTH {
        return Err(ValidationError::new("password_too_short")
            .with_message("must be at least 12 characters".into()));
    }
    if length > MAX_PASSWORD_LENGTH {
        return Err(ValidationError::new("password_too_long")
            .with_message("must be at most 256 characters".into()));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(custom(function = "validate_username"))]
    pub username: String,
    #[validate(custom(function = "validate_password"))]
    pub password: String,
    /// Grant the configured admin role right away.
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(custom(function = "validate_username"))]
    pub username: Option<String>,
    #[validate(custom(function = "validate_password"))]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

pub struct AccountService {
    users: Arc<dyn UserRepository>,
    tokens: Arc<TokenManager>,
    sessions: Arc<SessionStore>,
    admin_role: String,
}

impl AccountService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        tokens: Arc<TokenManager>,
        sessions: Arc<SessionStore>,
        admin_role: impl Into<String>,
    ) -> Self {
        Self { users, tokens, sessions, admin_role: admin_role.into() }
    }

    pub fn admin_role(&self) -> &str {
        &self.admin_role
    }

    pub async fn get_user(&self, id: &UserId) -> Result<User> {
        self.users.find_by_id(id).await?.ok_or_else(|| Error::not_found("user", id.as_str()))
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.users.list().await
    }

    /// Create an account, announce it on the directory feed and issue its
    /// first token.
    #[instrument(skip(self, request), fields(username = %request.username, admin = request.admin))]
    pub async fn create_user(&self, request: CreateUserRequest) -> Result<User> {
        request.validate()?;

        let password_hash = hashing::hash_password(&request.password)?;
        let user = User::new(request.username, password_hash);
        self.users.create(&user).await?;
        if request.admin {
            self.users.add_role(&user.id, &self.admin_role).await?;
        }

        let mut user = self.get_user(&user.id).await?;
        self.tokens.notify_user_created(&user);
        self.tokens.issue_if_absent_or_expired(&mut user).await?;
        info!(user_id = %user.id, "Created user");
        Ok(user)
    }

    /// Rename and/or change the password of an account.
    ///
    /// A credential change invalidates the previous identity, terminating its
    /// watchers, and issues a fresh token for the updated one.
    #[instrument(skip(self, request), fields(user_id = %id))]
    pub async fn update_user(&self, id: &UserId, request: UpdateUserRequest) -> Result<User> {
        request.validate()?;

        let mut user = self.get_user(id).await?;
        let previous = user.clone();
        let mut credentials_changed = false;

        if let Some(username) = request.username {
            if username != user.username {
                user.username = username;
                credentials_changed = true;
            }
        }
        if let Some(password) = request.password {
            if !hashing::verify_password(&password, &user.password_hash) {
                user.password_hash = hashing::hash_password(&password)?;
                credentials_changed = true;
            }
        }
        if !credentials_changed {
            return Ok(user);
        }

        self.users.update(&user).await?;
        self.tokens.notify_username_invalid(&previous).await?;
        user.api_token = None;
        if let Err(e) = self.tokens.issue_if_absent_or_expired(&mut user).await {
            // The next authenticated request retries issuance.
            warn!(error = %e, "Failed to issue token after credential change");
        }

        info!(
            previous_username = %previous.username,
            username = %user.username,
            "Updated user credentials"
        );
        Ok(user)
    }

    /// Apply the permanent flag to the live token, issuing one if the user
    /// has none, then persist the flag.
    #[instrument(skip(self), fields(user_id = %id))]
    pub async fn set_permanent_api_token(&self, id: &UserId, permanent: bool) -> Result<User> {
        let mut user = self.get_user(id).await?;
        user.permanent_api_token = permanent;

        // The flag is only persisted once the token agrees with it.
        if user.live_token(chrono::Utc::now()).is_some() {
            self.tokens.set_permanent(&mut user, permanent).await?;
        } else {
            self.tokens.issue_if_absent_or_expired(&mut user).await?;
        }
        self.users.update(&user).await?;
        Ok(user)
    }

    /// Replace the user's token with a new one.
    pub async fn regenerate_api_token(&self, id: &UserId) -> Result<User> {
        let mut user = self.get_user(id).await?;
        self.tokens.regenerate_token(&mut user).await?;
        Ok(user)
    }

    /// Delete an account. Its token goes with it, watchers are terminated and
    /// the directory feed learns of the removal.
    #[instrument(skip(self), fields(user_id = %id))]
    pub async fn delete_user(&self, id: &UserId) -> Result<()> {
        let user = self.get_user(id).await?;
        if !self.users.delete(id).await? {
            return Err(Error::not_found("user", id.as_str()));
        }

        self.tokens.notify_username_invalid(&user).await?;
        self.tokens.notify_user_deleted(&user);
        let sessions = self.sessions.destroy_for_user(id);
        info!(username = %user.username, sessions, "Deleted user");
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub async fn add_role(&self, role: &str, id: &UserId) -> Result<User> {
        self.get_user(id).await?;
        if role.trim().is_empty() {
            return Err(Error::validation_field("role name cannot be empty", "role"));
        }
        self.users.add_role(id, role).await?;

        let user = self.get_user(id).await?;
        self.tokens.notify_role_update(&user).await?;
        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub async fn remove_role(&self, role: &str, id: &UserId) -> Result<User> {
        self.get_user(id).await?;
        if !self.users.remove_role(id, role).await? {
            return Err(Error::not_found("role membership", format!("{}/{}", role, id)));
        }

        let user = self.get_user(id).await?;
        self.tokens.notify_role_update(&user).await?;
        Ok(user)
    }

    /// Rename a role and push the new role set to every member.
    #[instrument(skip(self))]
    pub async fn rename_role(&self, from: &str, to: &str) -> Result<()> {
        if to.trim().is_empty() {
            return Err(Error::validation_field("role name cannot be empty", "name"));
        }
        let members = self.users.users_with_role(from).await?;
        self.users.rename_role(from, to).await?;
        self.notify_members(members).await
    }

    /// Delete a role and push the reduced role set to every former member.
    #[instrument(skip(self))]
    pub async fn delete_role(&self, role: &str) -> Result<()> {
        let members = self.users.users_with_role(role).await?;
        if !self.users.delete_role(role).await? {
            return Err(Error::not_found("role", role));
        }
        self.notify_members(members).await
    }

    async fn notify_members(&self, members: Vec<User>) -> Result<()> {
        let mut first_error = None;
        for member in members {
            let result = match self.users.find_by_id(&member.id).await {
                Ok(Some(user)) => self.tokens.notify_role_update(&user).await,
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(username = %member.username, error = %e, "Failed to push role update");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Check credentials, open a session and make sure the user holds a live
    /// token. Unknown users and wrong passwords are indistinguishable.
    #[instrument(skip(self, request), fields(username = %request.username))]
    pub async fn login(&self, request: LoginRequest) -> Result<(User, Session)> {
        let invalid = || Error::unauthorized("Invalid credentials");

        let mut user = self.users.find_by_name(&request.username).await?.ok_or_else(invalid)?;
        if !hashing::verify_password(&request.password, &user.password_hash) {
            return Err(invalid());
        }

        let session = self.sessions.create(&user);
        self.tokens.issue_if_absent_or_expired(&mut user).await?;
        info!(user_id = %user.id, "User logged in");
        Ok((user, session))
    }

    pub fn logout(&self, session_id: &str) -> bool {
        self.sessions.destroy(session_id)
    }
}
